use chrono::{DateTime, Duration, Utc};

use crate::dest::{DstEngagementValidity, DstLeaveValidity, DstUnitValidity};
use crate::models::org::{EngagementTimeline, LeaveTimeline, UnitTimeline};
use crate::models::timeline::{Interval, Timeline, TimelineError, POS_INF};

/// The store subtracts one day from validity ends when reading, compared
/// to what was written. Re-adding that day here is the only place the
/// asymmetry is handled; a missing end is the open end of time.
pub fn dst_end(to: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match to {
        Some(to) => to + Duration::days(1),
        None => POS_INF,
    }
}

/// Assemble a unit's five attribute timelines from its downstream
/// validity rows.
pub fn unit_timeline(validities: &[DstUnitValidity]) -> Result<UnitTimeline, TimelineError> {
    if validities.is_empty() {
        return Ok(UnitTimeline::empty());
    }

    let active = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: true,
        })
        .collect();

    let name = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.name.clone(),
        })
        .collect();

    let unit_id = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.user_key.clone(),
        })
        .collect();

    let unit_level = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.level.clone(),
        })
        .collect();

    let parent = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.parent,
        })
        .collect();

    Ok(UnitTimeline {
        active: Timeline::combine(active)?,
        name: Timeline::combine(name)?,
        unit_id: Timeline::combine(unit_id)?,
        unit_level: Timeline::combine(unit_level)?,
        parent: Timeline::combine(parent)?,
    })
}

/// Assemble an engagement's attribute timelines from its downstream
/// validity rows. The source-side extras stay empty here.
pub fn engagement_timeline(
    validities: &[DstEngagementValidity],
) -> Result<EngagementTimeline, TimelineError> {
    if validities.is_empty() {
        return Ok(EngagementTimeline::empty());
    }

    let active = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: true,
        })
        .collect();

    let key = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.job_function_user_key.clone(),
        })
        .collect();

    let name = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.extension_name.clone(),
        })
        .collect();

    let unit = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: v.org_unit,
        })
        .collect();

    Ok(EngagementTimeline {
        eng_active: Timeline::combine(active)?,
        eng_key: Timeline::combine(key)?,
        eng_name: Timeline::combine(name)?,
        eng_unit: Timeline::combine(unit)?,
        eng_type: Timeline::empty(),
        eng_unit_id: Timeline::empty(),
    })
}

pub fn leave_timeline(validities: &[DstLeaveValidity]) -> Result<LeaveTimeline, TimelineError> {
    let active = validities
        .iter()
        .map(|v| Interval {
            start: v.validity.from,
            end: dst_end(v.validity.to),
            value: true,
        })
        .collect();
    Ok(LeaveTimeline { leave_active: Timeline::combine(active)? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest::DstValidity;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn validity_row(
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        name: &str,
        parent: Option<Uuid>,
    ) -> DstUnitValidity {
        DstUnitValidity {
            validity: DstValidity { from, to },
            name: name.to_string(),
            user_key: "dep".to_string(),
            level: Some("NY0-niveau".to_string()),
            parent,
            hierarchy_class: None,
            time_planning: None,
        }
    }

    #[test]
    fn read_end_gets_one_day_added_back() {
        assert_eq!(dst_end(Some(at(2024, 1, 9))), at(2024, 1, 10));
        assert_eq!(dst_end(None), POS_INF);
    }

    #[test]
    fn read_adjustment_inverts_the_write_rewrite() {
        use crate::dest::writer::write_validity;

        for end in [at(2021, 1, 1), at(2024, 2, 29), POS_INF] {
            let written = write_validity(at(2020, 1, 1), end);
            assert_eq!(dst_end(written.to), end);
        }
    }

    #[test]
    fn adjacent_rows_with_equal_values_merge() {
        let parent = Uuid::new_v4();
        // Row one ends (inclusive) the day before row two starts, so on
        // the half-open axis they touch.
        let rows = vec![
            validity_row(at(2020, 1, 1), Some(at(2020, 12, 31)), "Dep", Some(parent)),
            validity_row(at(2021, 1, 1), None, "Dep", Some(parent)),
        ];

        let timeline = unit_timeline(&rows).unwrap();
        assert_eq!(timeline.name.intervals().len(), 1);
        assert_eq!(timeline.name.intervals()[0].start, at(2020, 1, 1));
        assert_eq!(timeline.name.intervals()[0].end, POS_INF);
        assert!(timeline.has_value(at(2023, 6, 1)));
    }

    #[test]
    fn rename_produces_two_name_intervals() {
        let parent = Uuid::new_v4();
        let rows = vec![
            validity_row(at(2020, 1, 1), Some(at(2020, 12, 31)), "Old", Some(parent)),
            validity_row(at(2021, 1, 1), None, "New", Some(parent)),
        ];

        let timeline = unit_timeline(&rows).unwrap();
        assert_eq!(timeline.name.intervals().len(), 2);
        // Activity does not care about the rename.
        assert_eq!(timeline.active.intervals().len(), 1);
        assert_eq!(timeline.name.value_at(at(2020, 6, 1)), Some(&"Old".to_string()));
        assert_eq!(timeline.name.value_at(at(2021, 6, 1)), Some(&"New".to_string()));
    }

    #[test]
    fn empty_rows_give_empty_timelines() {
        assert!(unit_timeline(&[]).unwrap().is_empty());
        assert!(engagement_timeline(&[]).unwrap().is_empty());
    }

    #[test]
    fn engagement_rows_map_onto_primary_members() {
        let dep = Uuid::new_v4();
        let row = DstEngagementValidity {
            uuid: Uuid::new_v4(),
            validity: DstValidity { from: at(2020, 1, 1), to: None },
            job_function_user_key: "1001".to_string(),
            extension_name: "Cook".to_string(),
            org_unit: dep,
            engagement_type: Uuid::new_v4(),
            primary: None,
        };

        let timeline = engagement_timeline(&[row]).unwrap();
        assert!(timeline.has_value(at(2024, 1, 1)));
        assert_eq!(timeline.eng_unit.value_at(at(2024, 1, 1)), Some(&dep));
        assert!(timeline.eng_type.is_empty());
    }
}
