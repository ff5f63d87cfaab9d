use std::collections::{HashMap, HashSet};

use chrono_tz::Tz;
use thiserror::Error;
use uuid::Uuid;

use crate::models::org::{
    Address, AddressKind, OrgTree, OrgUnitNode, TreeError, UnitTimeline, Validity,
};
use crate::models::timeline::{Interval, Timeline};
use crate::source::timeline::{src_end, src_start};
use crate::source::{SrcDepartment, SrcFacade, SrcOrganization};

#[derive(Debug, Error)]
pub enum TreeBuildError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Src(#[from] crate::source::SrcError),
}

fn node_from_department(
    department: &SrcDepartment,
    parent: Option<Uuid>,
    zone: Tz,
) -> OrgUnitNode {
    let mut addresses = Vec::new();
    if let Some(postal) = &department.postal_address {
        addresses.push(Address {
            uuid: None,
            value: postal.clone(),
            kind: AddressKind::Postal,
        });
    }
    if let Some(pnumber) = &department.production_unit_number {
        addresses.push(Address {
            uuid: None,
            value: pnumber.clone(),
            kind: AddressKind::Pnumber,
        });
    }
    OrgUnitNode {
        uuid: department.uuid,
        parent_uuid: parent,
        user_key: department.identifier.clone(),
        name: department.name.clone(),
        level: Some(department.level_identifier.clone()),
        hierarchy_class: None,
        validity: Validity {
            from: src_start(department.activation_date, zone),
            to: src_end(department.deactivation_date, zone),
        },
        addresses,
    }
}

/// Build the source unit tree under `root` from the organisation's parent
/// links and the department records.
///
/// Departments are inserted parents-first; a department whose parent link
/// points outside the department set is rejected, preserving the tree
/// invariants.
pub fn build_tree(
    organization: &SrcOrganization,
    departments: &[SrcDepartment],
    root: OrgUnitNode,
    zone: Tz,
) -> Result<OrgTree, TreeError> {
    let root_uuid = root.uuid;
    let mut tree = OrgTree::new(root);

    let parents: HashMap<Uuid, Option<Uuid>> = organization
        .links
        .iter()
        .map(|link| (link.unit, link.parent))
        .collect();

    let mut pending: Vec<&SrcDepartment> = departments.iter().collect();
    while !pending.is_empty() {
        let mut remaining = Vec::with_capacity(pending.len());
        let mut inserted = false;
        for department in pending {
            let parent = parents.get(&department.uuid).copied().flatten();
            let effective_parent = parent.unwrap_or(root_uuid);
            if tree.contains(effective_parent) {
                tree.insert(node_from_department(department, Some(effective_parent), zone))?;
                inserted = true;
            } else {
                remaining.push(department);
            }
        }
        if !inserted {
            // Whatever is left points at a parent that is neither the
            // root nor any department in the response.
            let stuck = remaining[0];
            let parent = parents.get(&stuck.uuid).copied().flatten().unwrap_or(root_uuid);
            return Err(TreeError::UnknownParent { unit: stuck.uuid, parent });
        }
        pending = remaining;
    }

    Ok(tree)
}

/// Split the departments into those reachable from the root through the
/// organisation's parent links and those whose chain leaves the response
/// ("orphans"). Orphans are either spliced in afterwards or skipped,
/// depending on configuration.
pub fn partition_connected(
    organization: &SrcOrganization,
    departments: Vec<SrcDepartment>,
) -> (Vec<SrcDepartment>, Vec<SrcDepartment>) {
    let parents: HashMap<Uuid, Option<Uuid>> = organization
        .links
        .iter()
        .map(|link| (link.unit, link.parent))
        .collect();
    let mut connected: HashSet<Uuid> = HashSet::new();
    let mut grew = true;
    while grew {
        grew = false;
        for department in &departments {
            if connected.contains(&department.uuid) {
                continue;
            }
            let is_connected = match parents.get(&department.uuid).copied().flatten() {
                None => true,
                Some(parent) => connected.contains(&parent),
            };
            if is_connected {
                connected.insert(department.uuid);
                grew = true;
            }
        }
    }

    departments
        .into_iter()
        .partition(|department| connected.contains(&department.uuid))
}

/// Splice departments referenced by engagements but missing from the
/// authoritative tree response, by walking each orphan's parent chain
/// upstream until it reaches a known unit.
///
/// A repeated uuid on the chain is a cycle and a hard error. An orphan
/// whose department record cannot be found is skipped with a log line.
pub async fn splice_orphans(
    facade: &dyn SrcFacade,
    institution: &str,
    tree: &mut OrgTree,
    orphans: &[Uuid],
    departments: &HashMap<Uuid, SrcDepartment>,
    zone: Tz,
) -> Result<(), TreeBuildError> {
    for &orphan in orphans {
        if tree.contains(orphan) {
            continue;
        }

        // Collect the chain from the orphan up to the first unit already
        // in the tree (or the root when the chain runs out).
        let mut chain: Vec<(Uuid, Option<Uuid>)> = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut current = orphan;
        loop {
            if !seen.insert(current) {
                return Err(TreeError::Cycle(current).into());
            }
            let parent = facade.get_department_parent(institution, current).await?;
            chain.push((current, parent));
            match parent {
                Some(parent) if !tree.contains(parent) => current = parent,
                _ => break,
            }
        }

        // Insert top-down so every parent exists before its child.
        for (uuid, parent) in chain.into_iter().rev() {
            if tree.contains(uuid) {
                continue;
            }
            let Some(department) = departments.get(&uuid) else {
                tracing::warn!(%uuid, "orphan department has no record upstream, skipping");
                continue;
            };
            let effective_parent = parent.unwrap_or(tree.root_uuid());
            tree.insert(node_from_department(department, Some(effective_parent), zone))?;
        }
    }
    Ok(())
}

/// Flatten a unit's validity into the five attribute timelines used by
/// the reconciler.
pub fn unit_timeline(node: &OrgUnitNode) -> UnitTimeline {
    fn span<V: Clone + PartialEq>(validity: &Validity, value: V) -> Timeline<V> {
        Timeline::new(vec![Interval {
            start: validity.from,
            end: validity.to,
            value,
        }])
        .unwrap_or_default()
    }
    UnitTimeline {
        active: span(&node.validity, true),
        name: span(&node.validity, node.name.clone()),
        unit_id: span(&node.validity, node.user_key.clone()),
        unit_level: span(&node.validity, node.level.clone()),
        parent: span(&node.validity, node.parent_uuid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timeline::POS_INF;
    use crate::source::{SrcError, SrcParentLink};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    const ZONE: Tz = chrono_tz::Europe::Copenhagen;

    fn department(uuid: Uuid, identifier: &str, name: &str) -> SrcDepartment {
        SrcDepartment {
            uuid,
            identifier: identifier.to_string(),
            name: name.to_string(),
            level_identifier: "NY0-niveau".to_string(),
            activation_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            deactivation_date: NaiveDate::from_ymd_opt(9999, 12, 31).unwrap(),
            postal_address: None,
            production_unit_number: None,
        }
    }

    fn root_node(uuid: Uuid) -> OrgUnitNode {
        OrgUnitNode {
            uuid,
            parent_uuid: None,
            user_key: "root".to_string(),
            name: "Root".to_string(),
            level: None,
            hierarchy_class: None,
            validity: Validity {
                from: src_start(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(), ZONE),
                to: POS_INF,
            },
            addresses: vec![],
        }
    }

    #[test]
    fn builds_tree_with_out_of_order_departments() {
        let root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let organization = SrcOrganization {
            links: vec![
                SrcParentLink { unit: b, parent: Some(a) },
                SrcParentLink { unit: a, parent: None },
            ],
        };
        // Child listed before its parent.
        let departments = vec![department(b, "b", "B"), department(a, "a", "A")];

        let tree = build_tree(&organization, &departments, root_node(root), ZONE).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get(b).unwrap().parent_uuid, Some(a));
        assert_eq!(tree.get(a).unwrap().parent_uuid, Some(root));
    }

    #[test]
    fn rejects_department_with_unknown_parent() {
        let root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let ghost = Uuid::new_v4();

        let organization = SrcOrganization {
            links: vec![SrcParentLink { unit: a, parent: Some(ghost) }],
        };
        let departments = vec![department(a, "a", "A")];

        let err = build_tree(&organization, &departments, root_node(root), ZONE).unwrap_err();
        assert_eq!(err, TreeError::UnknownParent { unit: a, parent: ghost });
    }

    #[test]
    fn department_addresses_are_carried_onto_the_node() {
        let root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let mut dep = department(a, "a", "A");
        dep.postal_address = Some("Paradisæblevej 13, 1234 Andeby".to_string());
        dep.production_unit_number = Some("1234567890".to_string());

        let tree = build_tree(
            &SrcOrganization { links: vec![SrcParentLink { unit: a, parent: None }] },
            &[dep],
            root_node(root),
            ZONE,
        )
        .unwrap();

        let node = tree.get(a).unwrap();
        assert_eq!(node.addresses.len(), 2);
        assert_eq!(node.addresses[0].kind, AddressKind::Postal);
        assert_eq!(node.addresses[1].kind, AddressKind::Pnumber);
        assert!(node.addresses.iter().all(|addr| addr.uuid.is_none()));
    }

    struct ParentChain {
        parents: HashMap<Uuid, Option<Uuid>>,
    }

    #[async_trait]
    impl SrcFacade for ParentChain {
        async fn get_organization(&self, _: &str) -> Result<SrcOrganization, SrcError> {
            unimplemented!()
        }
        async fn get_departments(&self, _: &str) -> Result<Vec<SrcDepartment>, SrcError> {
            unimplemented!()
        }
        async fn get_department_parent(
            &self,
            _: &str,
            department: Uuid,
        ) -> Result<Option<Uuid>, SrcError> {
            Ok(self.parents.get(&department).copied().flatten())
        }
        async fn get_employment_changed(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<crate::source::SrcEmployment, SrcError> {
            unimplemented!()
        }
        async fn get_person(
            &self,
            _: &str,
            _: &str,
        ) -> Result<crate::models::org::Person, SrcError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn splices_orphan_parent_chain_into_tree() {
        let root = Uuid::new_v4();
        let known = Uuid::new_v4();
        let middle = Uuid::new_v4();
        let orphan = Uuid::new_v4();

        let mut tree = OrgTree::new(root_node(root));
        tree.insert(node_from_department(
            &department(known, "known", "Known"),
            Some(root),
            ZONE,
        ))
        .unwrap();

        let facade = ParentChain {
            parents: HashMap::from([(orphan, Some(middle)), (middle, Some(known))]),
        };
        let departments = HashMap::from([
            (middle, department(middle, "middle", "Middle")),
            (orphan, department(orphan, "orphan", "Orphan")),
        ]);

        splice_orphans(&facade, "II", &mut tree, &[orphan], &departments, ZONE)
            .await
            .unwrap();

        assert_eq!(tree.get(orphan).unwrap().parent_uuid, Some(middle));
        assert_eq!(tree.get(middle).unwrap().parent_uuid, Some(known));
    }

    #[tokio::test]
    async fn orphan_parent_cycle_is_a_hard_error() {
        let root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut tree = OrgTree::new(root_node(root));
        let facade = ParentChain {
            parents: HashMap::from([(a, Some(b)), (b, Some(a))]),
        };

        let err = splice_orphans(&facade, "II", &mut tree, &[a], &HashMap::new(), ZONE)
            .await
            .unwrap_err();
        assert!(matches!(err, TreeBuildError::Tree(TreeError::Cycle(_))));
    }

    #[test]
    fn partition_separates_departments_with_dangling_parents() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let elsewhere = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let orphan_child = Uuid::new_v4();

        let organization = SrcOrganization {
            links: vec![
                SrcParentLink { unit: a, parent: None },
                SrcParentLink { unit: b, parent: Some(a) },
                SrcParentLink { unit: orphan, parent: Some(elsewhere) },
                SrcParentLink { unit: orphan_child, parent: Some(orphan) },
            ],
        };
        let departments = vec![
            department(a, "a", "A"),
            department(b, "b", "B"),
            department(orphan, "o", "Orphan"),
            department(orphan_child, "oc", "Orphan child"),
        ];

        let (connected, orphans) = partition_connected(&organization, departments);
        let connected: Vec<Uuid> = connected.iter().map(|d| d.uuid).collect();
        let orphans: Vec<Uuid> = orphans.iter().map(|d| d.uuid).collect();
        assert_eq!(connected, vec![a, b]);
        assert_eq!(orphans, vec![orphan, orphan_child]);
    }

    #[test]
    fn unit_timeline_spans_the_validity() {
        let root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let node = node_from_department(&department(a, "a", "A"), Some(root), ZONE);

        let timeline = unit_timeline(&node);
        let probe = src_start(NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(), ZONE);
        assert!(timeline.has_value(probe));
        assert_eq!(timeline.name.value_at(probe), Some(&"A".to_string()));
        assert_eq!(timeline.parent.value_at(probe), Some(&Some(root)));
        assert_eq!(timeline.active.intervals()[0].end, POS_INF);
    }
}
