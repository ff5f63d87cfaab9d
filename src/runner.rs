use std::sync::atomic::Ordering;

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use std::collections::HashSet;

use crate::addresses::AddressSync;
use crate::dest::writer::DstWriter;
use crate::filters;
use crate::models::org::{AddressKind, OperationKind, OrgUnitNode};
use crate::reconcile;
use crate::run_db::RunStatus;
use crate::source::SrcError;
use crate::tree_diff::{self, UnitOperation};
use crate::AppState;

/// Capacity of the operation stream between the differ and the mutator.
const OPERATION_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Previous run did not complete successfully!")]
    GateLocked,
    #[error("run state could not be read: {0}")]
    GateUnknown(String),
    /// The gate is deliberately left at RUNNING so an operator inspects
    /// the half-applied state before the next run.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PersonSyncError {
    #[error("person not found upstream")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

enum InstitutionError {
    /// Logged and skipped; later institutions still run.
    Soft(anyhow::Error),
    /// Aborts the whole run with the gate left locked.
    Fatal(anyhow::Error),
}

fn soft(error: impl Into<anyhow::Error>) -> InstitutionError {
    InstitutionError::Soft(error.into())
}

fn fatal(error: impl Into<anyhow::Error>) -> InstitutionError {
    InstitutionError::Fatal(error.into())
}

#[derive(Default)]
struct RunReport {
    new_subtrees_with_engagements: Vec<OrgUnitNode>,
    units_with_engagements: Vec<OrgUnitNode>,
}

/// Classes resolved once per institution run.
struct ResolvedClasses {
    engagement_type: Uuid,
    leave_type: Uuid,
    postal_type: Uuid,
    pnumber_type: Uuid,
}

async fn resolve_classes(state: &AppState) -> Result<ResolvedClasses, InstitutionError> {
    let settings = &state.settings;
    let engagement_type = match settings.engagement_type_class_uuid {
        Some(uuid) => uuid,
        None => state
            .dst
            .get_facet_class("engagement_type", &settings.engagement_type_user_key)
            .await
            .map_err(soft)?
            .map(|c| c.uuid)
            .context("engagement type class not found")
            .map_err(fatal)?,
    };
    let leave_type = state
        .dst
        .get_facet_class("leave_type", &settings.leave_type_user_key)
        .await
        .map_err(soft)?
        .map(|c| c.uuid)
        .context("leave type class not found")
        .map_err(fatal)?;
    let postal_type = state
        .dst
        .get_facet_class("org_unit_address_type", AddressKind::Postal.user_key())
        .await
        .map_err(soft)?
        .map(|c| c.uuid)
        .context("postal address type class not found")
        .map_err(fatal)?;
    let pnumber_type = state
        .dst
        .get_facet_class("org_unit_address_type", AddressKind::Pnumber.user_key())
        .await
        .map_err(soft)?
        .map(|c| c.uuid)
        .context("pnumber address type class not found")
        .map_err(fatal)?;
    Ok(ResolvedClasses {
        engagement_type,
        leave_type,
        postal_type,
        pnumber_type,
    })
}

/// Reconcile every engagement currently attached to `unit`.
async fn sync_unit_engagements(
    state: &AppState,
    writer: &DstWriter<'_>,
    institution: &str,
    unit: Uuid,
    zone: chrono_tz::Tz,
    dry_run: bool,
    operations: &mut Vec<(OperationKind, Uuid)>,
) -> Result<bool, InstitutionError> {
    let keys = state
        .dst
        .get_unit_engagement_keys(unit)
        .await
        .map_err(soft)?;
    let had_engagements = !keys.is_empty();

    for (cpr, user_key) in keys {
        let employment = match state
            .src
            .get_employment_changed(institution, &cpr, &user_key)
            .await
        {
            Ok(employment) => employment,
            Err(error) => {
                tracing::warn!("skipping engagement {user_key}, upstream read failed: {error}");
                continue;
            }
        };
        let src_eng =
            crate::source::timeline::employment_timeline(&employment, zone).map_err(fatal)?;
        let src_leave =
            crate::source::timeline::leave_timeline(&employment, zone).map_err(fatal)?;

        let dst_rows = match state.dst.get_engagement_timeline(&cpr, &user_key).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!("skipping engagement {user_key}, downstream read failed: {error}");
                continue;
            }
        };
        let dst_eng = crate::dest::timeline::engagement_timeline(&dst_rows).map_err(fatal)?;

        let Some(person) = state.dst.get_person(&cpr).await.map_err(soft)? else {
            tracing::warn!("skipping engagement {user_key}, person unknown downstream");
            continue;
        };

        let mut emitted = reconcile::sync_engagement(
            writer,
            person.uuid,
            &cpr,
            &user_key,
            &src_eng,
            &dst_eng,
            dry_run,
        )
        .await
        .map_err(fatal)?;
        operations.append(&mut emitted);

        if let Some(engagement_row) = dst_rows.first() {
            let leave_rows = state
                .dst
                .get_leave_timeline(&cpr, &user_key)
                .await
                .map_err(soft)?;
            let mut emitted = reconcile::sync_leave(
                writer,
                person.uuid,
                engagement_row.uuid,
                &src_leave,
                &leave_rows,
                dry_run,
            )
            .await
            .map_err(fatal)?;
            operations.append(&mut emitted);
        }
    }

    Ok(had_engagements)
}

async fn run_institution(
    state: &AppState,
    institution: &str,
    org_unit_filter: Option<Uuid>,
    dry_run: bool,
    report: &mut RunReport,
) -> Result<Vec<(OperationKind, Uuid)>, InstitutionError> {
    tracing::info!(institution, dry_run, "starting institution run");
    let settings = &state.settings;
    let zone = settings.src_zone().map_err(fatal)?;
    let deny_list = filters::compile_deny_list(&settings.unit_name_deny_list).map_err(fatal)?;

    // Downstream tree, narrowed to the configured subtree.
    let org_root = state.dst.get_org_root().await.map_err(soft)?;
    let records = state.dst.get_org_units().await.map_err(soft)?;
    let dst_tree = crate::dest::tree::build_tree(
        &records,
        org_root,
        settings.subtree_path_for(institution),
    )
    .map_err(fatal)?;

    // Source tree rooted at the same effective root. Departments whose
    // parent chain leaves the response are spliced in when configured,
    // otherwise skipped as soft data errors.
    let organization = state.src.get_organization(institution).await.map_err(soft)?;
    let departments = state.src.get_departments(institution).await.map_err(soft)?;
    let department_records: std::collections::HashMap<Uuid, crate::source::SrcDepartment> =
        departments.iter().map(|d| (d.uuid, d.clone())).collect();
    let (connected, orphans) =
        crate::source::tree::partition_connected(&organization, departments);
    let mut src_tree = crate::source::tree::build_tree(
        &organization,
        &connected,
        dst_tree.root().clone(),
        zone,
    )
    .map_err(fatal)?;
    if !orphans.is_empty() {
        if settings.build_extra_tree {
            let orphan_ids: Vec<Uuid> = orphans.iter().map(|d| d.uuid).collect();
            crate::source::tree::splice_orphans(
                state.src.as_ref(),
                institution,
                &mut src_tree,
                &orphan_ids,
                &department_records,
                zone,
            )
            .await
            .map_err(fatal)?;
        } else {
            for orphan in &orphans {
                tracing::warn!(unit = %orphan.uuid, name = %orphan.name, "department outside the tree structure, skipping");
            }
        }
    }
    let src_tree = src_tree;

    // The ordered operation stream, narrowed by the filter layer.
    let mut tree_operations = tree_diff::diff_trees(&src_tree, &dst_tree);
    let touched: Vec<OrgUnitNode> = tree_operations.iter().map(|op| op.unit().clone()).collect();
    let touched = filters::filter_by_uuid(org_unit_filter, touched);
    let touched = filters::remove_by_name(&deny_list, touched);
    let allowed: HashSet<Uuid> = touched.into_iter().map(|unit| unit.uuid).collect();
    tree_operations.retain(|op| allowed.contains(&op.unit().uuid));
    tracing::info!(
        institution,
        operations = tree_operations.len(),
        "tree diff computed"
    );

    // Units eligible for postal-address sync, optionally restricted to
    // the line management.
    let postal_units = filters::filter_by_line_management(
        settings.line_management_only,
        state.dst.as_ref(),
        dst_tree.units().cloned().collect(),
    )
    .await
    .map_err(soft)?;
    let postal_units: HashSet<Uuid> = postal_units.into_iter().map(|unit| unit.uuid).collect();

    let classes = resolve_classes(state).await?;
    let writer = DstWriter::new(
        state.dst.as_ref(),
        settings.unit_type_user_key.clone(),
        classes.engagement_type,
        classes.leave_type,
    );
    let address_sync = AddressSync::new(
        state.dst.as_ref(),
        state.cleanser.as_ref(),
        classes.postal_type,
        classes.pnumber_type,
        dry_run,
    );

    // Producer feeds the bounded channel; this task is the serialised
    // consumer applying mutations in diff order.
    let (tx, mut rx) = mpsc::channel::<UnitOperation>(OPERATION_BUFFER);
    tokio::spawn(async move {
        for operation in tree_operations {
            if tx.send(operation).await.is_err() {
                break;
            }
        }
    });

    let mut operations: Vec<(OperationKind, Uuid)> = Vec::new();
    while let Some(operation) = rx.recv().await {
        let node = operation.unit();
        let unit = node.uuid;

        let src_tl = crate::source::tree::unit_timeline(node);
        src_tl.validate(unit).map_err(fatal)?;
        let dst_rows = match state.dst.get_unit_timeline(unit).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(%unit, "skipping unit, downstream read failed: {error}");
                continue;
            }
        };
        let dst_tl = crate::dest::timeline::unit_timeline(&dst_rows).map_err(fatal)?;

        let mut emitted = reconcile::sync_unit(&writer, unit, &src_tl, &dst_tl, dry_run)
            .await
            .map_err(fatal)?;
        let unit_changed = !emitted.is_empty();
        operations.append(&mut emitted);

        // Addresses follow the unit. A freshly added unit has no
        // downstream twin yet; compare against an address-less view.
        let mo_node = dst_tree.get(unit).cloned().unwrap_or_else(|| OrgUnitNode {
            addresses: vec![],
            ..node.clone()
        });
        let postal_allowed =
            !settings.line_management_only || postal_units.contains(&unit);
        let mut emitted = address_sync
            .sync_unit(node, &mo_node, postal_allowed)
            .await
            .map_err(fatal)?;
        operations.append(&mut emitted);

        let had_engagements = sync_unit_engagements(
            state,
            &writer,
            institution,
            unit,
            zone,
            dry_run,
            &mut operations,
        )
        .await?;

        let obsolete = tree_diff::in_obsolete_units_subtree(
            &src_tree,
            node,
            &settings.obsolete_unit_roots,
        );

        if had_engagements {
            match &operation {
                UnitOperation::Add(added) if !obsolete => {
                    // A new unit whose parent already existed roots a new
                    // subtree downstream.
                    let parent_was_known = added
                        .parent_uuid
                        .map(|p| dst_tree.contains(p))
                        .unwrap_or(true);
                    if parent_was_known {
                        report.new_subtrees_with_engagements.push(added.clone());
                    }
                }
                UnitOperation::Update(updated) if !obsolete => {
                    report.units_with_engagements.push(updated.clone());
                }
                _ => {}
            }
        }

        // Post-mutation hook for adds and updates; a failure is a hard
        // error for this unit only, logged for manual replay.
        if unit_changed && settings.apply_business_logic && !dry_run && !obsolete {
            if let Err(error) = state.business_logic.apply(unit, institution).await {
                tracing::error!(%unit, "business logic hook failed, replay manually: {error}");
            }
        }
    }

    Ok(operations)
}

/// One gated run across all configured institutions.
pub async fn trigger_run(
    state: &AppState,
    org_unit: Option<Uuid>,
    dry_run: bool,
) -> Result<Vec<(OperationKind, Uuid)>, RunError> {
    let status = state
        .run_db
        .get_status()
        .map_err(|e| RunError::GateUnknown(e.to_string()))?;
    if status == Some(RunStatus::Running) {
        return Err(RunError::GateLocked);
    }

    if !dry_run {
        state
            .run_db
            .persist_status(RunStatus::Running)
            .context("could not persist run start")?;
    }

    let mut operations = Vec::new();
    let mut report = RunReport::default();
    for institution in &state.settings.institution_identifiers {
        match run_institution(state, institution, org_unit, dry_run, &mut report).await {
            Ok(mut emitted) => operations.append(&mut emitted),
            Err(InstitutionError::Soft(error)) => {
                tracing::warn!(institution, "institution run failed, continuing: {error}");
            }
            Err(InstitutionError::Fatal(error)) => {
                tracing::error!(institution, "fatal error, leaving the gate locked: {error}");
                return Err(RunError::Fatal(error));
            }
        }
    }

    if !dry_run {
        let disabled = &state.settings.email_notifications_disabled_units;
        let subtrees: Vec<_> = report
            .new_subtrees_with_engagements
            .iter()
            .filter(|unit| !disabled.contains(&unit.uuid))
            .cloned()
            .collect();
        state
            .email
            .send_run_summary(&subtrees, &report.units_with_engagements)
            .await;

        state
            .run_db
            .persist_status(RunStatus::Completed)
            .context("could not persist run completion")?;
        state
            .last_success
            .store(Utc::now().timestamp().max(0) as u64, Ordering::Relaxed);
    }

    tracing::info!(operations = operations.len(), dry_run, "run finished");
    Ok(operations)
}

/// Reconcile one person's engagement, leave and name timelines on demand.
pub async fn sync_single_person(
    state: &AppState,
    institution: &str,
    cpr: &str,
) -> Result<Vec<(OperationKind, Uuid)>, PersonSyncError> {
    let src_person = match state.src.get_person(institution, cpr).await {
        Ok(person) => person,
        Err(SrcError::PersonNotFound) => return Err(PersonSyncError::NotFound),
        Err(error) => return Err(PersonSyncError::Other(error.into())),
    };

    let zone = state.settings.src_zone()?;
    let classes = resolve_classes(state).await.map_err(|e| match e {
        InstitutionError::Soft(e) | InstitutionError::Fatal(e) => PersonSyncError::Other(e),
    })?;
    let writer = DstWriter::new(
        state.dst.as_ref(),
        state.settings.unit_type_user_key.clone(),
        classes.engagement_type,
        classes.leave_type,
    );

    let mut operations = Vec::new();
    let (person_uuid, mut emitted) =
        reconcile::sync_person(state.dst.as_ref(), &writer, &src_person, Utc::now(), false)
            .await
            .map_err(anyhow::Error::from)?;
    operations.append(&mut emitted);

    for user_key in &src_person.employment_ids {
        let employment = state
            .src
            .get_employment_changed(institution, cpr, user_key)
            .await
            .map_err(anyhow::Error::from)?;
        let src_eng = crate::source::timeline::employment_timeline(&employment, zone)
            .map_err(anyhow::Error::from)?;
        let src_leave = crate::source::timeline::leave_timeline(&employment, zone)
            .map_err(anyhow::Error::from)?;

        let dst_rows = state
            .dst
            .get_engagement_timeline(cpr, user_key)
            .await
            .map_err(anyhow::Error::from)?;
        let dst_eng = crate::dest::timeline::engagement_timeline(&dst_rows)
            .map_err(anyhow::Error::from)?;

        let mut emitted = reconcile::sync_engagement(
            &writer,
            person_uuid,
            cpr,
            user_key,
            &src_eng,
            &dst_eng,
            false,
        )
        .await
        .map_err(anyhow::Error::from)?;
        operations.append(&mut emitted);

        if let Some(engagement_row) = dst_rows.first() {
            let leave_rows = state
                .dst
                .get_leave_timeline(cpr, user_key)
                .await
                .map_err(anyhow::Error::from)?;
            let mut emitted = reconcile::sync_leave(
                &writer,
                person_uuid,
                engagement_row.uuid,
                &src_leave,
                &leave_rows,
                false,
            )
            .await
            .map_err(anyhow::Error::from)?;
            operations.append(&mut emitted);
        }
    }

    Ok(operations)
}
