use chrono::{DateTime, Utc};
use thiserror::Error;

/// Open ends of the absolute timeline. Every finite instant compares
/// strictly greater than `NEG_INF` and strictly less than `POS_INF`.
pub const NEG_INF: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;
pub const POS_INF: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("interval end must be after start")]
    EmptyInterval,
    #[error("intervals must be sorted by start")]
    Unsorted,
    #[error("intervals cannot overlap")]
    Overlap,
    #[error("touching intervals cannot repeat the same value")]
    RepeatedValue,
}

/// A half-open interval [start, end) carrying a value.
///
/// `start` is included, `end` is not. Open-ended intervals use the
/// `NEG_INF` / `POS_INF` sentinels. Instants are UTC; conversion from
/// local calendar dates happens at the source/destination boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<V> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: V,
}

impl<V> Interval<V> {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, value: V) -> Result<Self, TimelineError> {
        if end <= start {
            return Err(TimelineError::EmptyInterval);
        }
        Ok(Self { start, end, value })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// A validated sequence of non-overlapping intervals over one value type.
///
/// Constructed only through [`Timeline::new`] or [`Timeline::combine`],
/// which enforce: sorted by start, no overlaps, and no touching intervals
/// with equal values. Gaps with repeated values are allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline<V> {
    intervals: Vec<Interval<V>>,
}

impl<V> Default for Timeline<V> {
    fn default() -> Self {
        Self { intervals: Vec::new() }
    }
}

impl<V: Clone + PartialEq> Timeline<V> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(intervals: Vec<Interval<V>>) -> Result<Self, TimelineError> {
        validate(&intervals)?;
        Ok(Self { intervals })
    }

    /// Build a timeline from intervals sorted by start, merging adjacent
    /// intervals that touch (or overlap) and carry the same value:
    ///
    /// ```text
    /// |---- v1 ----|---- v1 ----|---- v2 ----|
    /// |---------- v1 ----------|---- v2 ----|
    /// ```
    pub fn combine(raw: Vec<Interval<V>>) -> Result<Self, TimelineError> {
        let merged = merge_adjacent(raw);
        validate(&merged)?;
        Ok(Self { intervals: merged })
    }

    pub fn intervals(&self) -> &[Interval<V>] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The interval whose half-open span contains `at`, if any.
    pub fn entity_at(&self, at: DateTime<Utc>) -> Option<&Interval<V>> {
        self.intervals.iter().find(|i| i.contains(at))
    }

    pub fn value_at(&self, at: DateTime<Utc>) -> Option<&V> {
        self.entity_at(at).map(|i| &i.value)
    }

    /// Every start and end occurring in the timeline, sorted and deduplicated.
    pub fn endpoints(&self) -> Vec<DateTime<Utc>> {
        let mut points: Vec<DateTime<Utc>> = self
            .intervals
            .iter()
            .flat_map(|i| [i.start, i.end])
            .collect();
        points.sort();
        points.dedup();
        points
    }

    /// Where this timeline and `other` disagree.
    ///
    /// The union of both endpoint sets partitions the result's support.
    /// On each sub-interval the result holds `Some(v)` where `self` has a
    /// value `other` lacks or contradicts, and `None` where `other` covers
    /// a span `self` does not. Agreeing spans are absent. Diffing a
    /// timeline against itself yields the empty timeline.
    pub fn diff(&self, other: &Timeline<V>) -> Timeline<Option<V>> {
        let mut points = self.endpoints();
        points.extend(other.endpoints());
        points.sort();
        points.dedup();

        let mut raw: Vec<Interval<Option<V>>> = Vec::new();
        for pair in points.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let ours = self.value_at(start);
            let theirs = other.value_at(start);
            let value = match (ours, theirs) {
                (Some(v), None) => Some(v.clone()),
                (Some(v), Some(w)) if v != w => Some(v.clone()),
                (None, Some(_)) => None,
                _ => continue,
            };
            raw.push(Interval { start, end, value });
        }

        Timeline { intervals: merge_adjacent(raw) }
    }
}

fn validate<V: PartialEq>(intervals: &[Interval<V>]) -> Result<(), TimelineError> {
    if intervals.iter().any(|i| i.end <= i.start) {
        return Err(TimelineError::EmptyInterval);
    }
    for pair in intervals.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.start > b.start {
            return Err(TimelineError::Unsorted);
        }
        if a.end > b.start {
            return Err(TimelineError::Overlap);
        }
        if a.end == b.start && a.value == b.value {
            return Err(TimelineError::RepeatedValue);
        }
    }
    Ok(())
}

/// Merge runs of intervals where each touches or overlaps its predecessor
/// with the same value. Input must be sorted by start; a gap ends a run.
fn merge_adjacent<V: Clone + PartialEq>(raw: Vec<Interval<V>>) -> Vec<Interval<V>> {
    let mut merged: Vec<Interval<V>> = Vec::with_capacity(raw.len());
    for interval in raw {
        match merged.last_mut() {
            Some(prev) if prev.end >= interval.start && prev.value == interval.value => {
                prev.end = interval.end;
            }
            _ => merged.push(interval),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn iv<V>(start: DateTime<Utc>, end: DateTime<Utc>, value: V) -> Interval<V> {
        Interval { start, end, value }
    }

    #[test]
    fn interval_rejects_empty_span() {
        assert_eq!(
            Interval::new(at(2002), at(2001), true).unwrap_err(),
            TimelineError::EmptyInterval
        );
        assert_eq!(
            Interval::new(at(2001), at(2001), true).unwrap_err(),
            TimelineError::EmptyInterval
        );
    }

    #[test]
    fn timeline_rejects_unsorted_input() {
        let result = Timeline::new(vec![
            iv(at(2002), at(2003), true),
            iv(at(2001), at(2002), true),
        ]);
        assert_eq!(result.unwrap_err(), TimelineError::Unsorted);
    }

    #[test]
    fn timeline_rejects_overlap() {
        let result = Timeline::new(vec![
            iv(at(2001), at(2003), true),
            iv(at(2002), at(2004), false),
        ]);
        assert_eq!(result.unwrap_err(), TimelineError::Overlap);
    }

    #[test]
    fn timeline_rejects_touching_repeated_value() {
        let result = Timeline::new(vec![
            iv(at(2001), at(2002), true),
            iv(at(2002), at(2003), true),
        ]);
        assert_eq!(result.unwrap_err(), TimelineError::RepeatedValue);
    }

    #[test]
    fn repeated_value_allowed_across_gap() {
        let timeline = Timeline::new(vec![
            iv(at(2001), at(2002), true),
            iv(at(2003), POS_INF, true),
        ]);
        assert!(timeline.is_ok());
    }

    #[test]
    fn entity_at_picks_containing_interval() {
        let a = iv(at(2001), at(2002), true);
        let b = iv(at(2002), at(2003), false);
        let timeline = Timeline::new(vec![a.clone(), b.clone()]).unwrap();

        assert_eq!(timeline.entity_at(at(2001)), Some(&a));
        assert_eq!(
            timeline.entity_at(at(2001) + chrono::Duration::days(100)),
            Some(&a)
        );
        assert_eq!(timeline.entity_at(at(2002)), Some(&b));
        assert_eq!(timeline.entity_at(at(2003)), None);
        assert_eq!(timeline.entity_at(at(2000)), None);
    }

    #[test]
    fn combine_merges_touching_runs_of_equal_values() {
        // t1----t2   t3----t4----t5----t6--------
        // |--v1-|    |-v1--|--v1-|--v1-|---v2----
        let combined = Timeline::combine(vec![
            iv(at(2001), at(2002), true),
            iv(at(2003), at(2004), true),
            iv(at(2004), at(2005), true),
            iv(at(2005), at(2006), true),
            iv(at(2006), POS_INF, false),
        ])
        .unwrap();

        assert_eq!(
            combined.intervals(),
            &[
                iv(at(2001), at(2002), true),
                iv(at(2003), at(2006), true),
                iv(at(2006), POS_INF, false),
            ]
        );
    }

    #[test]
    fn combine_of_empty_and_single() {
        assert!(Timeline::<bool>::combine(vec![]).unwrap().is_empty());

        let single = vec![iv(NEG_INF, POS_INF, true)];
        let combined = Timeline::combine(single.clone()).unwrap();
        assert_eq!(combined.intervals(), single.as_slice());
    }

    #[test]
    fn combine_is_idempotent() {
        let raw = vec![
            iv(at(2001), at(2002), "a"),
            iv(at(2002), at(2003), "a"),
            iv(at(2004), at(2005), "b"),
        ];
        let once = Timeline::combine(raw).unwrap();
        let twice = Timeline::combine(once.intervals().to_vec()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn endpoints_are_sorted_and_deduplicated() {
        let timeline = Timeline::new(vec![
            iv(at(2001), at(2002), true),
            iv(at(2002), at(2003), false),
            iv(at(2005), at(2006), true),
        ])
        .unwrap();
        assert_eq!(
            timeline.endpoints(),
            vec![at(2001), at(2002), at(2003), at(2005), at(2006)]
        );
    }

    #[test]
    fn diff_of_empty_timelines_is_empty() {
        let timeline = Timeline::<bool>::empty();
        assert!(timeline.diff(&timeline).is_empty());
    }

    #[test]
    fn diff_against_self_is_empty() {
        let timeline = Timeline::new(vec![
            iv(at(2001), at(2002), true),
            iv(at(2002), at(2003), false),
            iv(at(2003), at(2004), true),
        ])
        .unwrap();
        assert!(timeline.diff(&timeline).is_empty());
    }

    #[test]
    fn diff_emits_our_value_where_they_lack_coverage() {
        // Us:    ------------- v ----|
        // Them:       |------- v ----|
        // Diff:  - v -|
        let us = Timeline::new(vec![iv(NEG_INF, at(2003), true)]).unwrap();
        let them = Timeline::new(vec![iv(at(2002), at(2003), true)]).unwrap();

        assert_eq!(
            us.diff(&them).intervals(),
            &[iv(NEG_INF, at(2002), Some(true))]
        );
    }

    #[test]
    fn diff_emits_none_where_only_they_have_coverage() {
        // Us:          |------- v ----|
        // Them:  -------------- v ----|
        // Diff:  None--|
        let us = Timeline::new(vec![iv(at(2002), at(2003), true)]).unwrap();
        let them = Timeline::new(vec![iv(NEG_INF, at(2003), true)]).unwrap();

        assert_eq!(us.diff(&them).intervals(), &[iv(NEG_INF, at(2002), None)]);
    }

    #[test]
    fn diff_splits_partial_overlap() {
        // Us:              |------ v ------|
        // Them:    |------ v ------|
        // Diff:    |- None -|      |-- v --|
        let us = Timeline::new(vec![iv(at(2002), at(2004), true)]).unwrap();
        let them = Timeline::new(vec![iv(at(2001), at(2003), true)]).unwrap();

        assert_eq!(
            us.diff(&them).intervals(),
            &[
                iv(at(2001), at(2002), None),
                iv(at(2003), at(2004), Some(true)),
            ]
        );
    }

    #[test]
    fn diff_of_disjoint_timelines() {
        // Us:                        |--- v ---|
        // Them:    |--- v ---|
        // Diff:    |-- None -|       |--- v ---|
        let us = Timeline::new(vec![iv(at(2003), at(2004), true)]).unwrap();
        let them = Timeline::new(vec![iv(at(2001), at(2002), true)]).unwrap();

        assert_eq!(
            us.diff(&them).intervals(),
            &[
                iv(at(2001), at(2002), None),
                iv(at(2003), at(2004), Some(true)),
            ]
        );
    }

    #[test]
    fn diff_mixed_values_and_open_end() {
        // ------t1-----t2-----t3-----t4-----t5-----t6---------
        // Us:   |----- v1 ----|             |- v2 -|
        // Them:        |---- v1 -----|------------ v2 --------
        // Diff: |- v1 -|      |------ None -|      |-- None --
        let us = Timeline::new(vec![
            iv(at(2001), at(2003), true),
            iv(at(2005), at(2006), false),
        ])
        .unwrap();
        let them = Timeline::new(vec![
            iv(at(2002), at(2004), true),
            iv(at(2004), POS_INF, false),
        ])
        .unwrap();

        assert_eq!(
            us.diff(&them).intervals(),
            &[
                iv(at(2001), at(2002), Some(true)),
                iv(at(2003), at(2005), None),
                iv(at(2006), POS_INF, None),
            ]
        );
    }

    #[test]
    fn diff_against_empty_yields_own_support() {
        let us = Timeline::new(vec![
            iv(at(2001), at(2002), true),
            iv(at(2003), at(2004), false),
        ])
        .unwrap();
        let empty = Timeline::empty();

        assert_eq!(
            us.diff(&empty).intervals(),
            &[
                iv(at(2001), at(2002), Some(true)),
                iv(at(2003), at(2004), Some(false)),
            ]
        );
        assert_eq!(
            empty.diff(&us).intervals(),
            &[iv(at(2001), at(2002), None), iv(at(2003), at(2004), None)]
        );
    }

    #[test]
    fn sentinels_bound_every_finite_instant() {
        assert!(NEG_INF < at(1900));
        assert!(at(9998) < POS_INF);
    }
}
