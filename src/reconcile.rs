use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dest::timeline::dst_end;
use crate::dest::writer::{DstWriter, WriteError};
use crate::dest::{DstFacade, DstLeaveValidity};
use crate::models::org::{
    EngagementTimeline, LeaveTimeline, OperationKind, Person, UnitTimeline,
};
use crate::models::timeline::POS_INF;

fn merged_endpoints(mut a: Vec<DateTime<Utc>>, b: Vec<DateTime<Utc>>) -> Vec<DateTime<Utc>> {
    a.extend(b);
    a.sort();
    a.dedup();
    a
}

/// Walk the endpoint partition of a unit's source and downstream
/// timelines and close every disagreement with a create, update or
/// terminate. Mutations are suppressed in dry-run mode; the planned
/// operation stream is emitted either way.
pub async fn sync_unit(
    writer: &DstWriter<'_>,
    unit: Uuid,
    src: &UnitTimeline,
    dst: &UnitTimeline,
    dry_run: bool,
) -> Result<Vec<(OperationKind, Uuid)>, WriteError> {
    tracing::info!(%unit, "reconciling unit timeline");
    let points = merged_endpoints(src.endpoints(), dst.endpoints());

    let mut operations = Vec::new();
    for pair in points.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if src.equal_at(start, dst) {
            continue;
        }
        if src.has_value(start) {
            let covered = dst
                .active
                .intervals()
                .iter()
                .any(|i| i.start < end && start < i.end);
            if covered {
                operations.push((OperationKind::UpdateUnit, unit));
                if !dry_run {
                    writer.update_unit(unit, start, end, src).await?;
                }
            } else {
                operations.push((OperationKind::AddUnit, unit));
                if !dry_run {
                    writer.create_unit(unit, start, end, src).await?;
                }
            }
        } else {
            operations.push((OperationKind::TerminateUnit, unit));
            if !dry_run {
                writer.terminate_unit(unit, start, end).await?;
            }
        }
    }
    Ok(operations)
}

/// The engagement analogue of [`sync_unit`], run independently per
/// (person, employment id) pair.
pub async fn sync_engagement(
    writer: &DstWriter<'_>,
    person: Uuid,
    cpr: &str,
    user_key: &str,
    src: &EngagementTimeline,
    dst: &EngagementTimeline,
    dry_run: bool,
) -> Result<Vec<(OperationKind, Uuid)>, WriteError> {
    tracing::info!(%person, user_key, "reconciling engagement timeline");
    let points = merged_endpoints(src.endpoints(), dst.endpoints());

    let mut operations = Vec::new();
    for pair in points.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if src.equal_at(start, dst) {
            continue;
        }
        if src.has_value(start) {
            let covered = dst
                .eng_active
                .intervals()
                .iter()
                .any(|i| i.start < end && start < i.end);
            if covered {
                operations.push((OperationKind::UpdateEngagement, person));
                if !dry_run {
                    writer
                        .update_engagement(person, cpr, user_key, start, end, src)
                        .await?;
                }
            } else {
                operations.push((OperationKind::AddEngagement, person));
                if !dry_run {
                    writer.create_engagement(person, user_key, start, end, src).await?;
                }
            }
        } else {
            operations.push((OperationKind::TerminateEngagement, person));
            if !dry_run {
                writer.terminate_engagement(cpr, user_key, start, end).await?;
            }
        }
    }
    Ok(operations)
}

/// Bring downstream leave rows into agreement with the source's leave
/// timeline. Leaves hang off an engagement object, so the caller passes
/// the engagement uuid the rows belong to.
pub async fn sync_leave(
    writer: &DstWriter<'_>,
    person: Uuid,
    engagement: Uuid,
    src: &LeaveTimeline,
    dst_rows: &[DstLeaveValidity],
    dry_run: bool,
) -> Result<Vec<(OperationKind, Uuid)>, WriteError> {
    let mut operations = Vec::new();

    for interval in src.leave_active.intervals() {
        let existing = dst_rows.iter().find(|row| {
            row.validity.from < interval.end && interval.start < dst_end(row.validity.to)
        });
        match existing {
            None => {
                operations.push((OperationKind::AddLeave, person));
                if !dry_run {
                    writer
                        .create_leave(person, engagement, interval.start, interval.end)
                        .await?;
                }
            }
            Some(row)
                if row.validity.from != interval.start
                    || dst_end(row.validity.to) != interval.end =>
            {
                operations.push((OperationKind::UpdateLeave, person));
                if !dry_run {
                    writer.update_leave(row.uuid, interval.start, interval.end).await?;
                }
            }
            Some(_) => {}
        }
    }
    Ok(operations)
}

/// Resolve the downstream person for a source person, creating or
/// renaming as needed. A rename takes effect from `now` on; history
/// before `now` keeps the old name.
pub async fn sync_person(
    dst: &dyn DstFacade,
    writer: &DstWriter<'_>,
    src_person: &Person,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<(Uuid, Vec<(OperationKind, Uuid)>), WriteError> {
    let mut operations = Vec::new();

    match dst.get_person(&src_person.cpr).await? {
        Some(existing) => {
            if existing.given_name != src_person.given_name
                || existing.surname != src_person.surname
            {
                operations.push((OperationKind::UpdatePerson, existing.uuid));
                if !dry_run {
                    writer
                        .update_person(
                            existing.uuid,
                            &src_person.given_name,
                            &src_person.surname,
                            now,
                            POS_INF,
                        )
                        .await?;
                }
            }
            Ok((existing.uuid, operations))
        }
        None => {
            tracing::info!("person unknown downstream, creating");
            if dry_run {
                return Ok((Uuid::new_v4(), operations));
            }
            let uuid = dst
                .create_person(crate::dest::PersonCreateInput {
                    cpr: src_person.cpr.clone(),
                    given_name: src_person.given_name.clone(),
                    surname: src_person.surname.clone(),
                })
                .await?;
            Ok((uuid, operations))
        }
    }
}
