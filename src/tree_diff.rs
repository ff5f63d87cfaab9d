use uuid::Uuid;

use crate::models::org::{OperationKind, OrgTree, OrgUnitNode};

/// One tree-level operation against the downstream store. A parent
/// change is expressed as an update carrying the new parent; unit
/// termination is the timeline reconciler's job, not the differ's.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOperation {
    Add(OrgUnitNode),
    Update(OrgUnitNode),
}

impl UnitOperation {
    pub fn unit(&self) -> &OrgUnitNode {
        match self {
            UnitOperation::Add(unit) | UnitOperation::Update(unit) => unit,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            UnitOperation::Add(_) => OperationKind::AddUnit,
            UnitOperation::Update(_) => OperationKind::UpdateUnit,
        }
    }
}

fn parents_equal(src: &OrgTree, dst: &OrgTree, a: Option<Uuid>, b: Option<Uuid>) -> bool {
    // Both trees hang directly under their own root; a unit sitting at
    // the top of either tree is at the top of both when the effective
    // roots are aligned by configuration.
    let a_is_root = a.is_none() || a == Some(src.root_uuid());
    let b_is_root = b.is_none() || b == Some(dst.root_uuid());
    if a_is_root || b_is_root {
        return a_is_root && b_is_root;
    }
    a == b
}

/// Pair the source tree against the downstream tree and emit the ordered
/// operation sequence.
///
/// Operations come out in pre-order over the source tree, so a parent's
/// add always precedes any operation referencing it and a move to a
/// freshly added parent follows that add.
pub fn diff_trees(src: &OrgTree, dst: &OrgTree) -> Vec<UnitOperation> {
    let mut operations = Vec::new();

    for node in src.iter_preorder() {
        match dst.get(node.uuid) {
            None => operations.push(UnitOperation::Add(node.clone())),
            Some(existing) => {
                let changed = node.name != existing.name
                    || node.user_key != existing.user_key
                    || node.level != existing.level
                    || !parents_equal(src, dst, node.parent_uuid, existing.parent_uuid);
                if changed {
                    operations.push(UnitOperation::Update(node.clone()));
                }
            }
        }
    }

    operations
}

/// Whether `unit` sits at or below any of the configured obsolete
/// subtree roots.
pub fn in_obsolete_units_subtree(tree: &OrgTree, unit: &OrgUnitNode, roots: &[Uuid]) -> bool {
    if roots.contains(&unit.uuid) {
        return true;
    }
    if let Some(parent) = unit.parent_uuid {
        if roots.contains(&parent) {
            return true;
        }
    }
    tree.ancestors(unit.uuid)
        .iter()
        .any(|ancestor| roots.contains(ancestor))
}
