use regex::Regex;
use uuid::Uuid;

use crate::dest::{DstError, DstFacade};
use crate::models::org::OrgUnitNode;

/// The hierarchy class marking units that belong to the line management.
const LINE_MANAGEMENT_USER_KEY: &str = "linjeorg";

pub fn compile_deny_list(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}

/// Retain only the unit with the supplied uuid; pass everything through
/// when no restriction is given.
pub fn filter_by_uuid(unit_uuid: Option<Uuid>, units: Vec<OrgUnitNode>) -> Vec<OrgUnitNode> {
    match unit_uuid {
        Some(uuid) => units.into_iter().filter(|u| u.uuid == uuid).collect(),
        None => units,
    }
}

/// Drop units whose name matches any regex on the deny list.
pub fn remove_by_name(deny_list: &[Regex], units: Vec<OrgUnitNode>) -> Vec<OrgUnitNode> {
    units
        .into_iter()
        .filter(|unit| !deny_list.iter().any(|regex| regex.is_match(&unit.name)))
        .collect()
}

/// When enabled, retain only units whose hierarchy class is the line
/// management class. The class uuid is resolved once per call.
pub async fn filter_by_line_management(
    enabled: bool,
    dst: &dyn DstFacade,
    units: Vec<OrgUnitNode>,
) -> Result<Vec<OrgUnitNode>, DstError> {
    if !enabled {
        return Ok(units);
    }

    let class = dst
        .get_facet_class("org_unit_hierarchy", LINE_MANAGEMENT_USER_KEY)
        .await?
        .ok_or_else(|| DstError::NotFound(format!("class {LINE_MANAGEMENT_USER_KEY}")))?;

    Ok(units
        .into_iter()
        .filter(|unit| unit.hierarchy_class == Some(class.uuid))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::org::Validity;
    use crate::models::timeline::{NEG_INF, POS_INF};

    fn unit(name: &str, hierarchy_class: Option<Uuid>) -> OrgUnitNode {
        OrgUnitNode {
            uuid: Uuid::new_v4(),
            parent_uuid: None,
            user_key: name.to_lowercase(),
            name: name.to_string(),
            level: None,
            hierarchy_class,
            validity: Validity { from: NEG_INF, to: POS_INF },
            addresses: vec![],
        }
    }

    #[test]
    fn uuid_filter_passes_through_without_restriction() {
        let units = vec![unit("A", None), unit("B", None)];
        assert_eq!(filter_by_uuid(None, units.clone()), units);
    }

    #[test]
    fn uuid_filter_keeps_only_the_match() {
        let a = unit("A", None);
        let b = unit("B", None);
        let kept = filter_by_uuid(Some(b.uuid), vec![a, b.clone()]);
        assert_eq!(kept, vec![b]);
    }

    #[test]
    fn name_deny_list_drops_matching_units() {
        let deny = compile_deny_list(&["^Udd\\..*".to_string(), ".*test.*".to_string()]).unwrap();
        let units = vec![
            unit("Udd. afdeling", None),
            unit("Kitchen", None),
            unit("A test unit", None),
        ];
        let kept = remove_by_name(&deny, units);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Kitchen");
    }

    #[test]
    fn bad_regex_is_rejected_at_compile_time() {
        assert!(compile_deny_list(&["(".to_string()]).is_err());
    }

    #[tokio::test]
    async fn line_management_filter_keeps_matching_hierarchy_class() {
        use crate::dest::testing::StubDst;

        let dst = StubDst::default();
        let line_class = StubDst::class_uuid("org_unit_hierarchy", "linjeorg");
        let in_line = unit("Line unit", Some(line_class));
        let outside = unit("Staff unit", Some(Uuid::new_v4()));
        let unclassified = unit("Unclassified", None);

        let kept = filter_by_line_management(
            true,
            &dst,
            vec![in_line.clone(), outside, unclassified],
        )
        .await
        .unwrap();
        assert_eq!(kept, vec![in_line]);
    }

    #[tokio::test]
    async fn line_management_filter_passes_through_when_disabled() {
        use crate::dest::testing::StubDst;

        let dst = StubDst::default();
        let units = vec![unit("A", None), unit("B", None)];
        let kept = filter_by_line_management(false, &dst, units.clone())
            .await
            .unwrap();
        assert_eq!(kept, units);
    }
}
