use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::dest::timeline::dst_end;
use crate::dest::{
    DstError, DstFacade, EngagementCreateInput, EngagementTerminateInput, EngagementUpdateInput,
    LeaveCreateInput, LeaveUpdateInput, PersonUpdateInput, UnitCreateInput, UnitTerminateInput,
    UnitUpdateInput, WriteValidity,
};
use crate::models::org::{EngagementTimeline, UnitTimeline};
use crate::models::timeline::POS_INF;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Dst(#[from] DstError),
    #[error("no source value for {member} at {at}")]
    MissingSourceValue { member: &'static str, at: DateTime<Utc> },
    #[error("class {user_key} not found in facet {facet}")]
    UnknownClass { facet: &'static str, user_key: String },
    #[error("business logic hook failed for {unit}: {status}")]
    BusinessLogic { unit: Uuid, status: String },
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Dst(inner) if inner.is_transient())
    }
}

/// Rewrite a half-open interval end into the store's inclusive form:
/// the open end of time becomes NULL, a finite end moves back one
/// calendar day. Inverse of the +1 day applied when reading.
pub fn write_validity(start: DateTime<Utc>, end: DateTime<Utc>) -> WriteValidity {
    let to = if end == POS_INF {
        None
    } else {
        Some(end - Duration::days(1))
    };
    WriteValidity { from: start, to }
}

/// The store's termination contract: a finite span terminates [from, to];
/// an open-ended termination has no `from` and cuts everything from
/// `start` on, expressed as `to = start - 1 day`.
pub fn terminate_bounds(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
    let validity = write_validity(start, end);
    match validity.to {
        Some(to) => (Some(validity.from), to),
        None => (None, validity.from - Duration::days(1)),
    }
}

fn required<'v, V>(
    value: Option<&'v V>,
    member: &'static str,
    at: DateTime<Utc>,
) -> Result<&'v V, WriteError> {
    value.ok_or(WriteError::MissingSourceValue { member, at })
}

/// Translates reconciler decisions into downstream mutations.
pub struct DstWriter<'a> {
    dst: &'a dyn DstFacade,
    unit_type_user_key: String,
    engagement_type_class: Uuid,
    leave_type_class: Uuid,
}

impl<'a> DstWriter<'a> {
    pub fn new(
        dst: &'a dyn DstFacade,
        unit_type_user_key: String,
        engagement_type_class: Uuid,
        leave_type_class: Uuid,
    ) -> Self {
        Self {
            dst,
            unit_type_user_key,
            engagement_type_class,
            leave_type_class,
        }
    }

    async fn class_uuid(
        &self,
        facet: &'static str,
        user_key: &str,
    ) -> Result<Uuid, WriteError> {
        let class = self.dst.get_facet_class(facet, user_key).await?;
        class
            .map(|c| c.uuid)
            .ok_or_else(|| WriteError::UnknownClass { facet, user_key: user_key.to_string() })
    }

    async fn unit_level_uuid(
        &self,
        level: &Option<String>,
    ) -> Result<Option<Uuid>, WriteError> {
        match level {
            Some(user_key) => Ok(Some(self.class_uuid("org_unit_level", user_key).await?)),
            None => Ok(None),
        }
    }

    pub async fn create_unit(
        &self,
        unit: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        src: &UnitTimeline,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%unit, %start, %end, "creating unit");
        let unit_type = self.class_uuid("org_unit_type", &self.unit_type_user_key).await?;
        let level = required(src.unit_level.value_at(start), "unit_level", start)?;
        let unit_level = self.unit_level_uuid(level).await?;

        let uuid = self
            .dst
            .create_unit(UnitCreateInput {
                uuid: unit,
                validity: write_validity(start, end),
                name: required(src.name.value_at(start), "name", start)?.clone(),
                user_key: required(src.unit_id.value_at(start), "unit_id", start)?.clone(),
                parent: *required(src.parent.value_at(start), "parent", start)?,
                unit_type,
                unit_level,
            })
            .await?;
        Ok(uuid)
    }

    /// Update a unit over [start, end). Every existing downstream validity
    /// overlapping that span carries auxiliary attributes (hierarchy
    /// class, time planning) that the update must preserve per validity;
    /// dropping them would revert unrelated administrative data.
    pub async fn update_unit(
        &self,
        unit: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        src: &UnitTimeline,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%unit, %start, %end, "updating unit");
        let validity = write_validity(start, end);
        let unit_type = self.class_uuid("org_unit_type", &self.unit_type_user_key).await?;
        let level = required(src.unit_level.value_at(start), "unit_level", start)?;
        let unit_level = self.unit_level_uuid(level).await?;

        let name = required(src.name.value_at(start), "name", start)?.clone();
        let user_key = required(src.unit_id.value_at(start), "unit_id", start)?.clone();
        let parent = *required(src.parent.value_at(start), "parent", start)?;

        let existing = self.dst.get_unit_timeline_between(unit, validity).await?;
        if existing.is_empty() {
            // The unit exists but has no validity in this span yet.
            let uuid = self
                .dst
                .update_unit(UnitUpdateInput {
                    uuid: unit,
                    validity,
                    name,
                    user_key,
                    parent,
                    unit_type,
                    unit_level,
                    hierarchy_class: None,
                    time_planning: None,
                })
                .await?;
            return Ok(uuid);
        }

        let mut result = unit;
        for row in existing {
            result = self
                .dst
                .update_unit(UnitUpdateInput {
                    uuid: unit,
                    validity,
                    name: name.clone(),
                    user_key: user_key.clone(),
                    parent,
                    unit_type,
                    unit_level,
                    hierarchy_class: row.hierarchy_class,
                    time_planning: row.time_planning,
                })
                .await?;
        }
        Ok(result)
    }

    pub async fn terminate_unit(
        &self,
        unit: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%unit, %start, %end, "terminating unit");
        let (from, to) = terminate_bounds(start, end);
        let uuid = self
            .dst
            .terminate_unit(UnitTerminateInput { uuid: unit, from, to })
            .await?;
        Ok(uuid)
    }

    pub async fn create_engagement(
        &self,
        person: Uuid,
        user_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        src: &EngagementTimeline,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%person, user_key, %start, %end, "creating engagement");
        let key = required(src.eng_key.value_at(start), "eng_key", start)?;
        let job_function = self.class_uuid("engagement_job_function", key).await?;

        let uuid = self
            .dst
            .create_engagement(EngagementCreateInput {
                person,
                user_key: user_key.to_string(),
                validity: write_validity(start, end),
                org_unit: *required(src.eng_unit.value_at(start), "eng_unit", start)?,
                engagement_type: self.engagement_type_class,
                job_function,
                extension_name: required(src.eng_name.value_at(start), "eng_name", start)?.clone(),
            })
            .await?;
        Ok(uuid)
    }

    pub async fn update_engagement(
        &self,
        person: Uuid,
        cpr: &str,
        user_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        src: &EngagementTimeline,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%person, user_key, %start, %end, "updating engagement");
        let key = required(src.eng_key.value_at(start), "eng_key", start)?;
        let job_function = self.class_uuid("engagement_job_function", key).await?;
        let validity = write_validity(start, end);
        let org_unit = *required(src.eng_unit.value_at(start), "eng_unit", start)?;
        let extension_name =
            required(src.eng_name.value_at(start), "eng_name", start)?.clone();

        let rows = self.dst.get_engagement_timeline(cpr, user_key).await?;
        if rows.is_empty() {
            return Err(DstError::NotFound(format!(
                "engagement {user_key} has no downstream rows"
            ))
            .into());
        }

        let overlapping: Vec<_> = rows
            .iter()
            .filter(|row| row.validity.from < end && start < dst_end(row.validity.to))
            .collect();

        if overlapping.is_empty() {
            // No validity in this span; extend the engagement object itself.
            let uuid = self
                .dst
                .update_engagement(EngagementUpdateInput {
                    uuid: rows[0].uuid,
                    person,
                    user_key: user_key.to_string(),
                    validity,
                    org_unit,
                    engagement_type: self.engagement_type_class,
                    job_function,
                    extension_name,
                    primary: None,
                })
                .await?;
            return Ok(uuid);
        }

        let mut result = rows[0].uuid;
        for row in overlapping {
            result = self
                .dst
                .update_engagement(EngagementUpdateInput {
                    uuid: row.uuid,
                    person,
                    user_key: user_key.to_string(),
                    validity,
                    org_unit,
                    // Keep what the row already carries rather than
                    // reclassifying existing data.
                    engagement_type: row.engagement_type,
                    job_function,
                    extension_name: extension_name.clone(),
                    primary: row.primary,
                })
                .await?;
        }
        Ok(result)
    }

    pub async fn terminate_engagement(
        &self,
        cpr: &str,
        user_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(user_key, %start, %end, "terminating engagement");
        let rows = self.dst.get_engagement_timeline(cpr, user_key).await?;
        let Some(first) = rows.first() else {
            return Err(DstError::NotFound(format!(
                "engagement {user_key} has no downstream rows"
            ))
            .into());
        };

        let (from, to) = terminate_bounds(start, end);
        let uuid = self
            .dst
            .terminate_engagement(EngagementTerminateInput { uuid: first.uuid, from, to })
            .await?;
        Ok(uuid)
    }

    pub async fn create_leave(
        &self,
        person: Uuid,
        engagement: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%person, %engagement, %start, %end, "creating leave");
        let uuid = self
            .dst
            .create_leave(LeaveCreateInput {
                person,
                engagement,
                leave_type: self.leave_type_class,
                validity: write_validity(start, end),
            })
            .await?;
        Ok(uuid)
    }

    pub async fn update_leave(
        &self,
        leave: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%leave, %start, %end, "updating leave");
        let uuid = self
            .dst
            .update_leave(LeaveUpdateInput { uuid: leave, validity: write_validity(start, end) })
            .await?;
        Ok(uuid)
    }

    pub async fn update_person(
        &self,
        person: Uuid,
        given_name: &str,
        surname: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Uuid, WriteError> {
        tracing::info!(%person, %start, "updating person");
        let uuid = self
            .dst
            .update_person(PersonUpdateInput {
                uuid: person,
                given_name: given_name.to_string(),
                surname: surname.to_string(),
                validity: write_validity(start, end),
            })
            .await?;
        Ok(uuid)
    }
}

/// The post-mutation side channel that propagates unit changes to
/// collaborating services. Non-2xx is a hard error for the unit; the
/// caller logs the uuid and replays manually.
pub struct BusinessLogicClient {
    http: reqwest::Client,
    base_url: String,
}

impl BusinessLogicClient {
    pub fn new(base_url: String, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub async fn apply(&self, unit: Uuid, institution: &str) -> Result<(), WriteError> {
        let url = format!("{}/trigger/apply-ny-logic/{unit}", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("institution_identifier", institution)])
            .send()
            .await
            .map_err(DstError::Http)?;
        if !response.status().is_success() {
            return Err(WriteError::BusinessLogic {
                unit,
                status: response.status().to_string(),
            });
        }
        tracing::info!(%unit, "business logic applied");
        Ok(())
    }
}
