//! iCalendar export of a rotation's recurrence.
//!
//! Produces the `DTSTART` and `RRULE` lines calendar clients understand, and
//! checks them by parsing them back with the `rrule` crate. The rendered rule
//! generates the same shift starts as [`crate::expander`], except where a start
//! falls into a DST gap.

use chrono::{Datelike, Duration, NaiveDateTime, Weekday};
use rrule::RRuleSet;

use crate::error::EngineError;
use crate::expander::OccurrenceGenerator;
use crate::rotation::{days_from_week_start, Frequency, RotationDefinition};
use crate::timezone::{local_date, resolve_timezone_or_utc};
use crate::wire::weekday_code;

/// Days every month has. Anchors past it are clamped to the month's end.
const SHORTEST_MONTH: u32 = 28;

/// The `RRULE` value (without the `RRULE:` prefix) for `rotation`.
///
/// A rotation that ends before its first shift renders as a single
/// occurrence; [`export_rotation`] excludes it again with `EXDATE`.
pub fn rrule_string(rotation: &RotationDefinition) -> String {
    if !has_shifts(rotation) {
        return "FREQ=DAILY;COUNT=1".to_string();
    }
    let recurrence = &rotation.recurrence;
    let mut parts = Vec::new();

    match recurrence.frequency {
        Frequency::None => {
            parts.push("FREQ=DAILY".to_string());
            parts.push("COUNT=1".to_string());
        }
        Frequency::Daily => {
            parts.push("FREQ=DAILY".to_string());
            parts.push(format!("INTERVAL={}", recurrence.interval));
        }
        Frequency::Weekly => {
            parts.push("FREQ=WEEKLY".to_string());
            parts.push(format!("INTERVAL={}", recurrence.interval));
            let mut days: Vec<Weekday> = recurrence.by_day.clone();
            days.sort_by_key(|day| days_from_week_start(*day, recurrence.week_start));
            days.dedup();
            let codes: Vec<&str> = days.into_iter().map(weekday_code).collect();
            parts.push(format!("BYDAY={}", codes.join(",")));
            parts.push(format!("WKST={}", weekday_code(recurrence.week_start)));
        }
        Frequency::Monthly => {
            parts.push("FREQ=MONTHLY".to_string());
            parts.push(format!("INTERVAL={}", recurrence.interval));
            let zone = resolve_timezone_or_utc(&rotation.time_zone);
            let day = local_date(rotation.rotation_start, zone.tz).day();
            if day > SHORTEST_MONTH {
                let days: Vec<String> = (SHORTEST_MONTH..=day).map(|d| d.to_string()).collect();
                parts.push(format!("BYMONTHDAY={};BYSETPOS=-1", days.join(",")));
            } else {
                parts.push(format!("BYMONTHDAY={day}"));
            }
        }
    }

    if recurrence.frequency != Frequency::None {
        if let Some(until) = rotation.until {
            // UNTIL is inclusive.
            let last = until - Duration::seconds(1);
            parts.push(format!("UNTIL={}", last.format("%Y%m%dT%H%M%SZ")));
        }
    }

    parts.join(";")
}

/// `DTSTART` and `RRULE` lines for `rotation`, checked by the `rrule` parser.
///
/// # Errors
///
/// [`EngineError::Validation`] for an invalid rotation,
/// [`EngineError::InvalidRule`] if the rendered rule does not parse.
pub fn export_rotation(rotation: &RotationDefinition) -> Result<String, EngineError> {
    rotation.validate()?;
    let text = render(rotation);
    text.parse::<RRuleSet>()
        .map_err(|err| EngineError::InvalidRule(err.to_string()))?;
    tracing::debug!(rotation_id = %rotation.id, rule = %text, "exported rotation recurrence");
    Ok(text)
}

/// The exported recurrence as an [`RRuleSet`].
///
/// # Errors
///
/// See [`export_rotation`].
pub fn rrule_set(rotation: &RotationDefinition) -> Result<RRuleSet, EngineError> {
    export_rotation(rotation)?
        .parse::<RRuleSet>()
        .map_err(|err| EngineError::InvalidRule(err.to_string()))
}

/// Whether `rotation` yields at least one shift before `until`. Invalid
/// rotations count as having shifts so their rule renders unchanged.
fn has_shifts(rotation: &RotationDefinition) -> bool {
    OccurrenceGenerator::new(rotation).map_or(true, |generator| generator.occurrence(0).is_some())
}

fn render(rotation: &RotationDefinition) -> String {
    let zone = resolve_timezone_or_utc(&rotation.time_zone);
    let first = NaiveDateTime::new(
        local_date(rotation.rotation_start, zone.tz),
        rotation.shift.start,
    );
    let stamp = if zone.tz == chrono_tz::UTC {
        format!(":{}Z", first.format("%Y%m%dT%H%M%S"))
    } else {
        format!(";TZID={}:{}", zone.tz.name(), first.format("%Y%m%dT%H%M%S"))
    };
    let mut text = format!("DTSTART{stamp}\nRRULE:{}", rrule_string(rotation));
    if !has_shifts(rotation) {
        text.push_str(&format!("\nEXDATE{stamp}"));
    }
    text
}
