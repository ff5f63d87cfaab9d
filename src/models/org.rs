use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::timeline::Timeline;

#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("duplicate unit uuid {0}")]
    DuplicateUnit(Uuid),
    #[error("unit {unit} references unknown parent {parent}")]
    UnknownParent { unit: Uuid, parent: Uuid },
    #[error("cycle detected while splicing parent chain at {0}")]
    Cycle(Uuid),
}

#[derive(Debug, Error, PartialEq)]
pub enum CompositeError {
    #[error("{member} timeline of {unit} has a value outside the active support")]
    OutsideActiveSupport { unit: Uuid, member: &'static str },
}

/// Employment classification derived from the source's salaried and
/// full-time indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngType {
    Hourly,
    MonthlyFullTime,
    MonthlyPartTime,
}

/// The two address kinds synchronised per unit, identified downstream by
/// their class user keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    Postal,
    Pnumber,
}

impl AddressKind {
    pub fn user_key(self) -> &'static str {
        match self {
            AddressKind::Postal => "AddressMailUnit",
            AddressKind::Pnumber => "Pnummer",
        }
    }
}

/// A unit address. An absent `uuid` means the address is not yet stored
/// downstream, so reconciliation will create rather than update it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub uuid: Option<Uuid>,
    pub value: String,
    pub kind: AddressKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Validity {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One organisational unit. Tree membership lives in [`OrgTree`]; a node
/// only records its parent link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgUnitNode {
    pub uuid: Uuid,
    pub parent_uuid: Option<Uuid>,
    pub user_key: String,
    pub name: String,
    pub level: Option<String>,
    pub hierarchy_class: Option<Uuid>,
    pub validity: Validity,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

/// An arena of units keyed by uuid with an explicit children index.
///
/// Children keep insertion order, which makes traversal deterministic.
#[derive(Debug, Clone)]
pub struct OrgTree {
    root: Uuid,
    units: BTreeMap<Uuid, OrgUnitNode>,
    children: BTreeMap<Uuid, Vec<Uuid>>,
}

impl OrgTree {
    pub fn new(root: OrgUnitNode) -> Self {
        let root_uuid = root.uuid;
        let mut units = BTreeMap::new();
        units.insert(root_uuid, root);
        Self {
            root: root_uuid,
            units,
            children: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &OrgUnitNode {
        &self.units[&self.root]
    }

    pub fn root_uuid(&self) -> Uuid {
        self.root
    }

    pub fn get(&self, uuid: Uuid) -> Option<&OrgUnitNode> {
        self.units.get(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.units.contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Insert a unit whose parent must already be present (or be the root
    /// sentinel). Rejects duplicate uuids.
    pub fn insert(&mut self, node: OrgUnitNode) -> Result<(), TreeError> {
        if self.units.contains_key(&node.uuid) {
            return Err(TreeError::DuplicateUnit(node.uuid));
        }
        let parent = match node.parent_uuid {
            Some(parent) => parent,
            None => self.root,
        };
        if !self.units.contains_key(&parent) {
            return Err(TreeError::UnknownParent { unit: node.uuid, parent });
        }
        self.children.entry(parent).or_default().push(node.uuid);
        self.units.insert(node.uuid, node);
        Ok(())
    }

    pub fn children_of(&self, uuid: Uuid) -> impl Iterator<Item = &OrgUnitNode> {
        self.children
            .get(&uuid)
            .into_iter()
            .flatten()
            .map(|child| &self.units[child])
    }

    /// Pre-order traversal starting at the root, excluding the root itself.
    pub fn iter_preorder(&self) -> Vec<&OrgUnitNode> {
        let mut out = Vec::with_capacity(self.units.len().saturating_sub(1));
        let mut stack: Vec<Uuid> = self
            .children
            .get(&self.root)
            .map(|c| c.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(uuid) = stack.pop() {
            out.push(&self.units[&uuid]);
            if let Some(children) = self.children.get(&uuid) {
                stack.extend(children.iter().rev().copied());
            }
        }
        out
    }

    /// Walk the parent chain of `uuid` (excluding the root) top-down.
    pub fn ancestors(&self, uuid: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut current = uuid;
        while let Some(node) = self.units.get(&current) {
            match node.parent_uuid {
                Some(parent) if parent != self.root => {
                    chain.push(parent);
                    current = parent;
                }
                _ => break,
            }
        }
        chain
    }

    pub fn units(&self) -> impl Iterator<Item = &OrgUnitNode> {
        self.units.values()
    }
}

/// The five per-unit attribute timelines read from either side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnitTimeline {
    pub active: Timeline<bool>,
    pub name: Timeline<String>,
    pub unit_id: Timeline<String>,
    pub unit_level: Timeline<Option<String>>,
    pub parent: Timeline<Option<Uuid>>,
}

impl UnitTimeline {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
            && self.name.is_empty()
            && self.unit_id.is_empty()
            && self.unit_level.is_empty()
            && self.parent.is_empty()
    }

    /// True iff every member timeline has an interval at `at`.
    pub fn has_value(&self, at: DateTime<Utc>) -> bool {
        self.active.entity_at(at).is_some()
            && self.name.entity_at(at).is_some()
            && self.unit_id.entity_at(at).is_some()
            && self.unit_level.entity_at(at).is_some()
            && self.parent.entity_at(at).is_some()
    }

    /// Both sides have-or-lack a value at `at`, and all member values are
    /// equal when present.
    pub fn equal_at(&self, at: DateTime<Utc>, other: &UnitTimeline) -> bool {
        if self.has_value(at) != other.has_value(at) {
            return false;
        }
        if !self.has_value(at) {
            return true;
        }
        self.active.value_at(at) == other.active.value_at(at)
            && self.name.value_at(at) == other.name.value_at(at)
            && self.unit_id.value_at(at) == other.unit_id.value_at(at)
            && self.unit_level.value_at(at) == other.unit_level.value_at(at)
            && self.parent.value_at(at) == other.parent.value_at(at)
    }

    /// Union of all member endpoints, sorted and deduplicated.
    pub fn endpoints(&self) -> Vec<DateTime<Utc>> {
        let mut points = self.active.endpoints();
        points.extend(self.name.endpoints());
        points.extend(self.unit_id.endpoints());
        points.extend(self.unit_level.endpoints());
        points.extend(self.parent.endpoints());
        points.sort();
        points.dedup();
        points
    }

    /// No member may carry a value outside the active timeline's support.
    pub fn validate(&self, unit: Uuid) -> Result<(), CompositeError> {
        let outside = |member: &'static str, points: Vec<DateTime<Utc>>| {
            for pair in points.windows(2) {
                let at = pair[0];
                let member_has = match member {
                    "name" => self.name.entity_at(at).is_some(),
                    "unit_id" => self.unit_id.entity_at(at).is_some(),
                    "unit_level" => self.unit_level.entity_at(at).is_some(),
                    _ => self.parent.entity_at(at).is_some(),
                };
                let active_here = self.active.value_at(at).copied().unwrap_or(false);
                if member_has && !active_here {
                    return Err(CompositeError::OutsideActiveSupport { unit, member });
                }
            }
            Ok(())
        };
        outside("name", self.endpoints())?;
        outside("unit_id", self.endpoints())?;
        outside("unit_level", self.endpoints())?;
        outside("parent", self.endpoints())?;
        Ok(())
    }
}

/// Per-engagement attribute timelines. `eng_type` and `eng_unit_id` are
/// source-side extras; equality and coverage are decided on the four
/// primary members the downstream store persists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngagementTimeline {
    pub eng_active: Timeline<bool>,
    pub eng_key: Timeline<String>,
    pub eng_name: Timeline<String>,
    pub eng_unit: Timeline<Uuid>,
    pub eng_type: Timeline<EngType>,
    pub eng_unit_id: Timeline<String>,
}

impl EngagementTimeline {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.eng_active.is_empty()
            && self.eng_key.is_empty()
            && self.eng_name.is_empty()
            && self.eng_unit.is_empty()
    }

    pub fn has_value(&self, at: DateTime<Utc>) -> bool {
        self.eng_active.entity_at(at).is_some()
            && self.eng_key.entity_at(at).is_some()
            && self.eng_name.entity_at(at).is_some()
            && self.eng_unit.entity_at(at).is_some()
    }

    pub fn equal_at(&self, at: DateTime<Utc>, other: &EngagementTimeline) -> bool {
        if self.has_value(at) != other.has_value(at) {
            return false;
        }
        if !self.has_value(at) {
            return true;
        }
        self.eng_active.value_at(at) == other.eng_active.value_at(at)
            && self.eng_key.value_at(at) == other.eng_key.value_at(at)
            && self.eng_name.value_at(at) == other.eng_name.value_at(at)
            && self.eng_unit.value_at(at) == other.eng_unit.value_at(at)
    }

    pub fn endpoints(&self) -> Vec<DateTime<Utc>> {
        let mut points = self.eng_active.endpoints();
        points.extend(self.eng_key.endpoints());
        points.extend(self.eng_name.endpoints());
        points.extend(self.eng_unit.endpoints());
        points.sort();
        points.dedup();
        points
    }
}

/// Leave periods for one engagement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeaveTimeline {
    pub leave_active: Timeline<bool>,
}

impl LeaveTimeline {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_value(&self, at: DateTime<Utc>) -> bool {
        self.leave_active.entity_at(at).is_some()
    }

    pub fn equal_at(&self, at: DateTime<Utc>, other: &LeaveTimeline) -> bool {
        self.leave_active.value_at(at) == other.leave_active.value_at(at)
    }

    pub fn endpoints(&self) -> Vec<DateTime<Utc>> {
        self.leave_active.endpoints()
    }
}

/// A person as known upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub cpr: String,
    pub given_name: String,
    pub surname: String,
    pub employment_ids: Vec<String>,
}

/// The mutation kinds the reconciler can emit, reported per uuid on the
/// trigger response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AddUnit,
    UpdateUnit,
    TerminateUnit,
    AddAddress,
    UpdateAddress,
    AddEngagement,
    UpdateEngagement,
    TerminateEngagement,
    AddLeave,
    UpdateLeave,
    UpdatePerson,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OperationKind::AddUnit => "add_unit",
            OperationKind::UpdateUnit => "update_unit",
            OperationKind::TerminateUnit => "terminate_unit",
            OperationKind::AddAddress => "add_address",
            OperationKind::UpdateAddress => "update_address",
            OperationKind::AddEngagement => "add_engagement",
            OperationKind::UpdateEngagement => "update_engagement",
            OperationKind::TerminateEngagement => "terminate_engagement",
            OperationKind::AddLeave => "add_leave",
            OperationKind::UpdateLeave => "update_leave",
            OperationKind::UpdatePerson => "update_person",
        };
        f.write_str(label)
    }
}
