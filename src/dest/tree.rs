use std::collections::HashMap;

use uuid::Uuid;

use crate::dest::{DstAddress, DstUnitRecord};
use crate::models::org::{Address, AddressKind, OrgTree, OrgUnitNode, TreeError, Validity};
use crate::models::timeline::{NEG_INF, POS_INF};

fn address_from_record(address: &DstAddress) -> Option<Address> {
    let kind = match address.type_user_key.as_str() {
        "AddressMailUnit" => AddressKind::Postal,
        "Pnummer" => AddressKind::Pnumber,
        _ => return None,
    };
    Some(Address {
        uuid: Some(address.uuid),
        value: address.value.clone(),
        kind,
    })
}

fn node_from_record(record: &DstUnitRecord, parent: Option<Uuid>) -> OrgUnitNode {
    OrgUnitNode {
        uuid: record.uuid,
        parent_uuid: parent,
        user_key: record.user_key.clone(),
        name: record.name.clone(),
        level: record.level.clone(),
        hierarchy_class: record.hierarchy_class,
        validity: Validity { from: NEG_INF, to: POS_INF },
        addresses: record.addresses.iter().filter_map(address_from_record).collect(),
    }
}

/// Assemble the downstream units into a single tree rooted at the last
/// element of `subtree_path` (or the organisation root when no path is
/// configured). Units outside that subtree are left out.
pub fn build_tree(
    records: &[DstUnitRecord],
    org_root: Uuid,
    subtree_path: &[Uuid],
) -> Result<OrgTree, TreeError> {
    let effective_root = subtree_path.last().copied().unwrap_or(org_root);

    let by_uuid: HashMap<Uuid, &DstUnitRecord> =
        records.iter().map(|r| (r.uuid, r)).collect();
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for record in records {
        let parent = record.parent_uuid.unwrap_or(org_root);
        children.entry(parent).or_default().push(record.uuid);
    }
    for siblings in children.values_mut() {
        siblings.sort();
    }

    let root_node = match by_uuid.get(&effective_root) {
        Some(record) => node_from_record(record, None),
        None => OrgUnitNode {
            uuid: effective_root,
            parent_uuid: None,
            user_key: "root".to_string(),
            name: "root".to_string(),
            level: None,
            hierarchy_class: None,
            validity: Validity { from: NEG_INF, to: POS_INF },
            addresses: vec![],
        },
    };

    let mut tree = OrgTree::new(root_node);
    let mut queue: Vec<Uuid> = children.get(&effective_root).cloned().unwrap_or_default();
    let mut index = 0;
    while index < queue.len() {
        let uuid = queue[index];
        index += 1;
        if let Some(record) = by_uuid.get(&uuid) {
            let parent = record.parent_uuid.unwrap_or(org_root);
            tree.insert(node_from_record(record, Some(parent)))?;
            if let Some(grandchildren) = children.get(&uuid) {
                queue.extend(grandchildren.iter().copied());
            }
        }
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: Uuid, parent: Option<Uuid>, name: &str) -> DstUnitRecord {
        DstUnitRecord {
            uuid,
            parent_uuid: parent,
            user_key: name.to_lowercase(),
            name: name.to_string(),
            level: Some("NY0-niveau".to_string()),
            hierarchy_class: None,
            addresses: vec![],
        }
    }

    #[test]
    fn builds_full_tree_under_org_root() {
        let org_root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let records = vec![record(a, None, "A"), record(b, Some(a), "B")];

        let tree = build_tree(&records, org_root, &[]).unwrap();
        assert_eq!(tree.root_uuid(), org_root);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get(b).unwrap().parent_uuid, Some(a));
    }

    #[test]
    fn subtree_path_narrows_the_effective_root() {
        let org_root = Uuid::new_v4();
        let top = Uuid::new_v4();
        let inner = Uuid::new_v4();
        let outside = Uuid::new_v4();
        let records = vec![
            record(top, None, "Top"),
            record(inner, Some(top), "Inner"),
            record(outside, None, "Outside"),
        ];

        let tree = build_tree(&records, org_root, &[top]).unwrap();
        assert_eq!(tree.root_uuid(), top);
        assert!(tree.contains(inner));
        assert!(!tree.contains(outside));
    }

    #[test]
    fn unknown_address_kinds_are_dropped() {
        let org_root = Uuid::new_v4();
        let a = Uuid::new_v4();
        let mut rec = record(a, None, "A");
        rec.addresses = vec![
            DstAddress {
                uuid: Uuid::new_v4(),
                value: "Paradisæblevej 13".to_string(),
                type_user_key: "AddressMailUnit".to_string(),
            },
            DstAddress {
                uuid: Uuid::new_v4(),
                value: "12345678".to_string(),
                type_user_key: "PhoneUnit".to_string(),
            },
        ];

        let tree = build_tree(&[rec], org_root, &[]).unwrap();
        let node = tree.get(a).unwrap();
        assert_eq!(node.addresses.len(), 1);
        assert_eq!(node.addresses[0].kind, AddressKind::Postal);
        assert!(node.addresses[0].uuid.is_some());
    }
}
