use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::org::{EngType, EngagementTimeline, LeaveTimeline};
use crate::models::timeline::{Interval, Timeline, TimelineError, POS_INF};
use crate::source::{EmploymentStatus, SrcEmployment, SrcWorkingTime};

/// Inclusive end dates with this value mean "no planned end".
const OPEN_END: NaiveDate = NaiveDate::MAX;

fn local_midnight(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        // A DST gap at midnight shifts the instant forward; fall back to
        // interpreting the wall time as already being in UTC offset terms.
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// An activation date marks the first included day: timeline start is that
/// day's local midnight.
pub fn src_start(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    local_midnight(date, zone)
}

/// A deactivation date is inclusive: the day D is still covered, so the
/// half-open timeline ends at midnight of D+1. The 9999-12-31 sentinel
/// maps to the open end of time.
pub fn src_end(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    if date == OPEN_END || (date.year() == 9999 && date.month() == 12 && date.day() == 31) {
        return POS_INF;
    }
    match date.succ_opt() {
        Some(next) => local_midnight(next, zone),
        None => POS_INF,
    }
}

fn employment_type(worktime: &SrcWorkingTime) -> EngType {
    if !worktime.salaried_indicator {
        return EngType::Hourly;
    }
    if worktime.full_time_indicator.unwrap_or(false) {
        return EngType::MonthlyFullTime;
    }
    EngType::MonthlyPartTime
}

/// Build the engagement timeline for one (person, employment id) pair
/// from the source's change history.
pub fn employment_timeline(
    employment: &SrcEmployment,
    zone: Tz,
) -> Result<EngagementTimeline, TimelineError> {
    let active = employment
        .statuses
        .iter()
        .filter(|s| {
            EmploymentStatus::parse(&s.code)
                .map(EmploymentStatus::is_active)
                .unwrap_or(false)
        })
        .map(|s| Interval {
            start: src_start(s.activation_date, zone),
            end: src_end(s.deactivation_date, zone),
            value: true,
        })
        .collect();

    let keys = employment
        .professions
        .iter()
        .map(|p| Interval {
            start: src_start(p.activation_date, zone),
            end: src_end(p.deactivation_date, zone),
            value: p.job_position_identifier.clone(),
        })
        .collect();

    let names = employment
        .professions
        .iter()
        .map(|p| Interval {
            start: src_start(p.activation_date, zone),
            end: src_end(p.deactivation_date, zone),
            value: p.employment_name.clone(),
        })
        .collect();

    let units = employment
        .departments
        .iter()
        .map(|d| Interval {
            start: src_start(d.activation_date, zone),
            end: src_end(d.deactivation_date, zone),
            value: d.department_uuid,
        })
        .collect();

    let unit_ids = employment
        .departments
        .iter()
        .map(|d| Interval {
            start: src_start(d.activation_date, zone),
            end: src_end(d.deactivation_date, zone),
            value: d.department_identifier.clone(),
        })
        .collect();

    let types = employment
        .working_time
        .iter()
        .map(|w| Interval {
            start: src_start(w.activation_date, zone),
            end: src_end(w.deactivation_date, zone),
            value: employment_type(w),
        })
        .collect();

    Ok(EngagementTimeline {
        eng_active: Timeline::combine(active)?,
        eng_key: Timeline::combine(keys)?,
        eng_name: Timeline::combine(names)?,
        eng_unit: Timeline::combine(units)?,
        eng_type: Timeline::combine(types)?,
        eng_unit_id: Timeline::combine(unit_ids)?,
    })
}

/// Leave periods from the same change history, restricted to the leave
/// status codes.
pub fn leave_timeline(
    employment: &SrcEmployment,
    zone: Tz,
) -> Result<LeaveTimeline, TimelineError> {
    let leave = employment
        .statuses
        .iter()
        .filter(|s| {
            EmploymentStatus::parse(&s.code)
                .map(EmploymentStatus::is_leave)
                .unwrap_or(false)
        })
        .map(|s| Interval {
            start: src_start(s.activation_date, zone),
            end: src_end(s.deactivation_date, zone),
            value: true,
        })
        .collect();

    Ok(LeaveTimeline { leave_active: Timeline::combine(leave)? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SrcEmploymentDepartment, SrcEmploymentStatus, SrcProfession};
    use uuid::Uuid;

    const ZONE: Tz = chrono_tz::Europe::Copenhagen;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn start_is_local_midnight_in_utc() {
        // Copenhagen is UTC+1 in January: local midnight is 23:00 UTC the
        // evening before.
        let start = src_start(date(2024, 1, 10), ZONE);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap());
    }

    #[test]
    fn inclusive_end_becomes_next_local_midnight() {
        let end = src_end(date(1999, 12, 31), ZONE);
        assert_eq!(end, Utc.with_ymd_and_hms(1999, 12, 31, 23, 0, 0).unwrap());
    }

    #[test]
    fn sentinel_end_maps_to_open_end_of_time() {
        assert_eq!(src_end(date(9999, 12, 31), ZONE), POS_INF);
    }

    #[test]
    fn employment_type_classification() {
        let wt = |salaried, full_time| SrcWorkingTime {
            salaried_indicator: salaried,
            full_time_indicator: full_time,
            activation_date: date(2024, 1, 1),
            deactivation_date: date(9999, 12, 31),
        };
        assert_eq!(employment_type(&wt(false, None)), EngType::Hourly);
        assert_eq!(employment_type(&wt(false, Some(true))), EngType::Hourly);
        assert_eq!(
            employment_type(&wt(true, Some(true))),
            EngType::MonthlyFullTime
        );
        assert_eq!(
            employment_type(&wt(true, Some(false))),
            EngType::MonthlyPartTime
        );
        assert_eq!(employment_type(&wt(true, None)), EngType::MonthlyPartTime);
    }

    #[test]
    fn active_timeline_includes_leave_status() {
        let employment = SrcEmployment {
            statuses: vec![
                SrcEmploymentStatus {
                    code: "1".to_string(),
                    activation_date: date(2020, 1, 1),
                    deactivation_date: date(2020, 12, 31),
                },
                SrcEmploymentStatus {
                    code: "3".to_string(),
                    activation_date: date(2021, 1, 1),
                    deactivation_date: date(2021, 6, 30),
                },
                SrcEmploymentStatus {
                    code: "8".to_string(),
                    activation_date: date(2021, 7, 1),
                    deactivation_date: date(9999, 12, 31),
                },
            ],
            ..Default::default()
        };

        let timeline = employment_timeline(&employment, ZONE).unwrap();
        // Status 1 and 3 merge into one active span; status 8 is excluded.
        assert_eq!(timeline.eng_active.intervals().len(), 1);
        let span = &timeline.eng_active.intervals()[0];
        assert_eq!(span.start, src_start(date(2020, 1, 1), ZONE));
        assert_eq!(span.end, src_end(date(2021, 6, 30), ZONE));

        let leave = leave_timeline(&employment, ZONE).unwrap();
        assert_eq!(leave.leave_active.intervals().len(), 1);
        assert_eq!(
            leave.leave_active.intervals()[0].start,
            src_start(date(2021, 1, 1), ZONE)
        );
    }

    #[test]
    fn profession_and_department_timelines_are_combined() {
        let dep = Uuid::new_v4();
        let employment = SrcEmployment {
            professions: vec![
                SrcProfession {
                    job_position_identifier: "1001".to_string(),
                    employment_name: "Cook".to_string(),
                    activation_date: date(2020, 1, 1),
                    deactivation_date: date(2020, 12, 31),
                },
                SrcProfession {
                    job_position_identifier: "1001".to_string(),
                    employment_name: "Cook".to_string(),
                    activation_date: date(2021, 1, 1),
                    deactivation_date: date(9999, 12, 31),
                },
            ],
            departments: vec![SrcEmploymentDepartment {
                department_uuid: dep,
                department_identifier: "kitchen".to_string(),
                activation_date: date(2020, 1, 1),
                deactivation_date: date(9999, 12, 31),
            }],
            ..Default::default()
        };

        let timeline = employment_timeline(&employment, ZONE).unwrap();
        assert_eq!(timeline.eng_key.intervals().len(), 1);
        assert_eq!(timeline.eng_key.intervals()[0].end, POS_INF);
        assert_eq!(timeline.eng_unit.value_at(src_start(date(2024, 1, 1), ZONE)), Some(&dep));
    }
}
