//! Rotation definitions: the validated input every other module consumes.
//!
//! A [`RotationDefinition`] describes one prioritized layer of an on-call
//! schedule: a daily time-of-day shift template, a recurrence rule anchored on
//! a start instant, and the ordered pool of user groups that take turns.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifier of a user as known to the host.
pub type UserId = String;

/// One entry of a rotation's rolling user list. Empty groups are kept: they
/// stand for an intentionally uncovered turn.
pub type UserGroup = BTreeSet<UserId>;

// ── Recurrence ──────────────────────────────────────────────────────────────

/// How often a rotation's shift repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// A single shift on the anchor date.
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Decode the wire code: `null` → none, `0` daily, `1` weekly, `2` monthly.
    pub fn from_code(code: Option<u8>) -> Result<Self, ValidationError> {
        match code {
            None => Ok(Frequency::None),
            Some(0) => Ok(Frequency::Daily),
            Some(1) => Ok(Frequency::Weekly),
            Some(2) => Ok(Frequency::Monthly),
            Some(other) => Err(ValidationError::UnknownFrequency(other)),
        }
    }

    /// The wire code for this frequency.
    pub fn code(self) -> Option<u8> {
        match self {
            Frequency::None => None,
            Frequency::Daily => Some(0),
            Frequency::Weekly => Some(1),
            Frequency::Monthly => Some(2),
        }
    }
}

/// The recurrence part of a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Step count between consecutive periods (days, weeks or months).
    pub interval: u32,
    /// Weekdays to emit within each stepped week. Only read for weekly rules.
    #[serde(default)]
    pub by_day: Vec<Weekday>,
    /// First day of a week when grouping `by_day` into stepped weeks.
    #[serde(default = "default_week_start")]
    pub week_start: Weekday,
}

fn default_week_start() -> Weekday {
    Weekday::Mon
}

impl RecurrenceRule {
    pub fn once() -> Self {
        Self::every(Frequency::None, 1)
    }

    pub fn every(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            by_day: Vec::new(),
            week_start: Weekday::Mon,
        }
    }

    pub fn weekly(interval: u32, by_day: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            by_day: by_day.into_iter().collect(),
            ..Self::every(Frequency::Weekly, interval)
        }
    }

    /// Distinct `by_day` entries as day offsets from `week_start`, ascending.
    pub fn week_offsets(&self) -> Vec<u32> {
        let offsets: BTreeSet<u32> = self
            .by_day
            .iter()
            .map(|day| days_from_week_start(*day, self.week_start))
            .collect();
        offsets.into_iter().collect()
    }
}

/// How many days `weekday` is from the week-start day.
pub fn days_from_week_start(weekday: Weekday, week_start: Weekday) -> u32 {
    (weekday.num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7
}

// ── Shift template ──────────────────────────────────────────────────────────

/// Local time-of-day bounds of every shift in a rotation.
///
/// `end <= start` means the shift crosses midnight; `end == start` is a full
/// 24-hour shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTemplate {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ShiftTemplate {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }

    /// Wall-clock length of the shift, modulo 24 hours and never zero.
    pub fn duration(&self) -> Duration {
        let raw = self.end - self.start;
        if raw > Duration::zero() {
            raw
        } else {
            raw + Duration::days(1)
        }
    }
}

// ── RotationDefinition ──────────────────────────────────────────────────────

/// One rotation layer as stored by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationDefinition {
    pub id: String,
    pub schedule_id: String,
    /// Informational only.
    #[serde(default)]
    pub title: String,
    /// 1-based layer rank; higher wins on overlap.
    pub priority_level: u32,
    pub shift: ShiftTemplate,
    /// IANA zone the shift template and recurrence are evaluated in.
    pub time_zone: String,
    /// Anchor instant; its local date in `time_zone` is the first shift date.
    pub rotation_start: DateTime<Utc>,
    pub recurrence: RecurrenceRule,
    /// Exclusive end: shifts starting at or after it are not generated.
    pub until: Option<DateTime<Utc>>,
    pub rolling_users: Vec<UserGroup>,
}

impl RotationDefinition {
    /// Check the invariants every rotation must hold before expansion.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.recurrence.interval < 1 {
            return Err(ValidationError::IntervalBelowOne(self.recurrence.interval));
        }
        if self.priority_level < 1 {
            return Err(ValidationError::PriorityBelowOne(self.priority_level));
        }
        if self.recurrence.frequency == Frequency::Weekly && self.recurrence.by_day.is_empty() {
            return Err(ValidationError::WeeklyWithoutDays);
        }
        if let Some(until) = self.until {
            if until < self.rotation_start {
                return Err(ValidationError::UntilBeforeStart {
                    rotation_start: self.rotation_start.to_rfc3339(),
                    until: until.to_rfc3339(),
                });
            }
        }
        Ok(())
    }

    /// Label identifying this rotation in composed output.
    pub fn source_label(&self) -> String {
        if self.title.trim().is_empty() {
            format!("rotation {}", self.id)
        } else {
            self.title.clone()
        }
    }
}

// ── ShiftOccurrence ─────────────────────────────────────────────────────────

/// One concrete shift of a rotation with the users assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftOccurrence {
    pub rotation_id: String,
    pub occurrence_index: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub assigned_users: UserGroup,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn rotation() -> RotationDefinition {
        RotationDefinition {
            id: "r1".to_string(),
            schedule_id: "s1".to_string(),
            title: String::new(),
            priority_level: 1,
            shift: ShiftTemplate::new(time(9, 0), time(17, 0)),
            time_zone: "UTC".to_string(),
            rotation_start: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            recurrence: RecurrenceRule::every(Frequency::Daily, 1),
            until: None,
            rolling_users: vec![UserGroup::from(["alice".to_string()])],
        }
    }

    #[test]
    fn test_frequency_codes() {
        assert_eq!(Frequency::from_code(None).unwrap(), Frequency::None);
        assert_eq!(Frequency::from_code(Some(0)).unwrap(), Frequency::Daily);
        assert_eq!(Frequency::from_code(Some(1)).unwrap(), Frequency::Weekly);
        assert_eq!(Frequency::from_code(Some(2)).unwrap(), Frequency::Monthly);
        assert_eq!(
            Frequency::from_code(Some(7)).unwrap_err(),
            ValidationError::UnknownFrequency(7)
        );
        assert_eq!(Frequency::Weekly.code(), Some(1));
        assert_eq!(Frequency::None.code(), None);
    }

    #[test]
    fn test_shift_duration_same_day() {
        let shift = ShiftTemplate::new(time(12, 0), time(19, 0));
        assert!(!shift.crosses_midnight());
        assert_eq!(shift.duration(), Duration::hours(7));
    }

    #[test]
    fn test_shift_duration_crosses_midnight() {
        let shift = ShiftTemplate::new(time(22, 0), time(6, 0));
        assert!(shift.crosses_midnight());
        assert_eq!(shift.duration(), Duration::hours(8));
    }

    #[test]
    fn test_shift_duration_equal_bounds_is_full_day() {
        let shift = ShiftTemplate::new(time(9, 0), time(9, 0));
        assert!(shift.crosses_midnight());
        assert_eq!(shift.duration(), Duration::hours(24));
    }

    #[test]
    fn test_week_offsets_sorted_and_deduplicated() {
        let rule = RecurrenceRule::weekly(1, [Weekday::Fri, Weekday::Mon, Weekday::Fri]);
        assert_eq!(rule.week_offsets(), vec![0, 4]);

        let sunday_start = RecurrenceRule {
            week_start: Weekday::Sun,
            ..RecurrenceRule::weekly(1, [Weekday::Mon, Weekday::Sun])
        };
        assert_eq!(sunday_start.week_offsets(), vec![0, 1]);
    }

    #[test]
    fn test_validate_accepts_valid_rotation() {
        assert!(rotation().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut r = rotation();
        r.recurrence.interval = 0;
        assert_eq!(r.validate(), Err(ValidationError::IntervalBelowOne(0)));
    }

    #[test]
    fn test_validate_rejects_weekly_without_days() {
        let mut r = rotation();
        r.recurrence = RecurrenceRule::weekly(1, []);
        assert_eq!(r.validate(), Err(ValidationError::WeeklyWithoutDays));
    }

    #[test]
    fn test_validate_ignores_by_day_for_daily() {
        let mut r = rotation();
        r.recurrence.by_day = vec![];
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_until_before_start() {
        let mut r = rotation();
        r.until = Some(r.rotation_start - Duration::days(1));
        assert!(matches!(
            r.validate(),
            Err(ValidationError::UntilBeforeStart { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_until_equal_to_start() {
        let mut r = rotation();
        r.until = Some(r.rotation_start);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_source_label_prefers_title() {
        let mut r = rotation();
        assert_eq!(r.source_label(), "rotation r1");
        r.title = "Primary".to_string();
        assert_eq!(r.source_label(), "Primary");
    }
}
