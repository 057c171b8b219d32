//! Boundary data contracts: rotation payloads as hosts send them.
//!
//! The payload carries absolute UTC timestamps and small integer codes. It is
//! turned into a [`RotationDefinition`] by [`RotationPayload::into_definition`],
//! which is where every validation rule runs.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::rotation::{
    Frequency, RecurrenceRule, RotationDefinition, ShiftTemplate, UserGroup, UserId,
};
use crate::timezone::{resolve_timezone_or_utc, to_local};

const MAX_SHIFT_SECONDS: i64 = 24 * 3600;

/// A rotation as it crosses the host boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPayload {
    /// Informational only.
    #[serde(default)]
    pub title: String,
    pub rotation_start: DateTime<Utc>,
    /// `null` means the rotation never ends.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// First shift start; its local time-of-day is the shift template start.
    pub shift_start: DateTime<Utc>,
    /// First shift end; its local time-of-day is the shift template end.
    pub shift_end: DateTime<Utc>,
    /// Ordered user groups. Callers drop empty groups before sending; the
    /// engine keeps whatever it receives.
    #[serde(default)]
    pub rolling_users: Vec<Vec<UserId>>,
    /// `null` none, `0` daily, `1` weekly, `2` monthly.
    #[serde(default)]
    pub frequency: Option<u8>,
    /// Absent means 1.
    #[serde(default)]
    pub interval: Option<u32>,
    /// iCal weekday codes; only meaningful when `frequency` is weekly.
    #[serde(default)]
    pub by_day: Option<Vec<String>>,
    pub priority_level: u32,
    /// Absent means UTC.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// iCal weekday code; absent means `MO`.
    #[serde(default)]
    pub week_start: Option<String>,
}

impl RotationPayload {
    /// Validate the payload and build the engine-side rotation.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found: unknown codes, a shift whose
    /// end is not after its start (or more than a day after it), then the
    /// checks of [`RotationDefinition::validate`].
    pub fn into_definition(
        self,
        id: impl Into<String>,
        schedule_id: impl Into<String>,
    ) -> Result<RotationDefinition, ValidationError> {
        let frequency = Frequency::from_code(self.frequency)?;
        let week_start = match self.week_start.as_deref() {
            Some(code) => parse_weekday_code(code)?,
            None => Weekday::Mon,
        };
        let by_day = if frequency == Frequency::Weekly {
            self.by_day
                .unwrap_or_default()
                .iter()
                .map(|code| parse_weekday_code(code))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let shift_seconds = (self.shift_end - self.shift_start).num_seconds();
        if shift_seconds <= 0 {
            return Err(ValidationError::NonPositiveShiftDuration {
                seconds: shift_seconds,
            });
        }
        if shift_seconds > MAX_SHIFT_SECONDS {
            return Err(ValidationError::ShiftExceedsDay {
                seconds: shift_seconds,
            });
        }

        let time_zone = self.time_zone.unwrap_or_else(|| "UTC".to_string());
        let zone = resolve_timezone_or_utc(&time_zone);
        let shift = ShiftTemplate::new(
            to_local(self.shift_start, zone.tz).time,
            to_local(self.shift_end, zone.tz).time,
        );

        let definition = RotationDefinition {
            id: id.into(),
            schedule_id: schedule_id.into(),
            title: self.title,
            priority_level: self.priority_level,
            shift,
            time_zone,
            rotation_start: self.rotation_start,
            recurrence: RecurrenceRule {
                frequency,
                interval: self.interval.unwrap_or(1),
                by_day,
                week_start,
            },
            until: self.until,
            rolling_users: self
                .rolling_users
                .into_iter()
                .map(|group| group.into_iter().collect::<UserGroup>())
                .collect(),
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// A stored rotation: its identity plus the payload fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub id: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(flatten)]
    pub payload: RotationPayload,
}

impl RotationRecord {
    pub fn into_definition(self) -> Result<RotationDefinition, ValidationError> {
        self.payload.into_definition(self.id, self.schedule)
    }
}

// ── Weekday codes ───────────────────────────────────────────────────────────

/// Parse an iCal weekday code (`MO`…`SU`, case-insensitive).
pub fn parse_weekday_code(code: &str) -> Result<Weekday, ValidationError> {
    match code.trim().to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        _ => Err(ValidationError::UnknownWeekday(code.to_string())),
    }
}

/// The iCal code for a weekday.
pub fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}
