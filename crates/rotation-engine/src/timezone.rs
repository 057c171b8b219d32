//! Wall-clock ↔ instant normalization for rotation shift boundaries.
//!
//! Rotations are defined in local wall-clock time ("12:00 to 19:00 in
//! Europe/Berlin") but composed on absolute instants. The functions here do
//! that conversion deterministically, including across DST transitions:
//!
//! - A local time inside a **spring-forward gap** does not exist. It is read
//!   with the offset in force before the gap, which shifts it forward by the
//!   gap length (02:30 on a 02:00→03:00 night becomes 03:30). Never fails.
//! - A local time inside a **fall-back overlap** exists twice. The earliest
//!   instant is chosen.
//!
//! # Functions
//!
//! - [`resolve_timezone`] — IANA name → [`Tz`], or an error
//! - [`resolve_timezone_or_utc`] — IANA name → [`Tz`], falling back to UTC
//! - [`to_instant`] — local date + time-of-day in a zone → UTC instant
//! - [`to_local`] — UTC instant → local date, time-of-day and offset label
//!
//! # Round trip
//!
//! `to_instant(to_local(i, tz), tz) == i` holds for every instant `i` except
//! the later of the two instants sharing a wall-clock time in a fall-back
//! overlap.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::EngineError;

// ── Zone resolution ─────────────────────────────────────────────────────────

/// A timezone resolved from a name, remembering whether the name was unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedZone {
    pub tz: Tz,
    /// `true` when the requested name could not be resolved and UTC was used.
    pub fell_back: bool,
}

/// Parse an IANA timezone name into [`Tz`].
///
/// # Errors
///
/// Returns [`EngineError::InvalidTimezone`] if the name is not a known IANA zone.
pub fn resolve_timezone(name: &str) -> Result<Tz, EngineError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(format!("'{name}'")))
}

/// Parse an IANA timezone name, degrading to UTC when it is unknown.
///
/// Degraded resolution is not an error: callers surface `fell_back` as a
/// warning next to their result.
pub fn resolve_timezone_or_utc(name: &str) -> ResolvedZone {
    match resolve_timezone(name) {
        Ok(tz) => ResolvedZone {
            tz,
            fell_back: false,
        },
        Err(_) => {
            tracing::warn!(time_zone = name, "unknown timezone, falling back to UTC");
            ResolvedZone {
                tz: Tz::UTC,
                fell_back: true,
            }
        }
    }
}

// ── to_instant ──────────────────────────────────────────────────────────────

/// Resolve a local wall-clock time in `tz` to an absolute instant.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use rotation_engine::timezone::{resolve_timezone, to_instant};
///
/// let tz = resolve_timezone("America/New_York").unwrap();
/// let date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
/// let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
/// // March 15 2026 is EDT (UTC-4)
/// assert_eq!(to_instant(date, time, tz).to_rfc3339(), "2026-03-15T14:00:00+00:00");
/// ```
pub fn to_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Skipped wall-clock time: read it with the offset in force a day earlier.
            let before = tz
                .offset_from_utc_datetime(&(naive - Duration::days(1)))
                .fix()
                .local_minus_utc();
            Utc.from_utc_datetime(&(naive - Duration::seconds(i64::from(before))))
        }
    }
}

// ── to_local ────────────────────────────────────────────────────────────────

/// An instant expressed as wall-clock time in a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalWallClock {
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// The UTC offset at this instant (e.g., "+02:00").
    pub offset: String,
    /// Whether Daylight Saving Time is active at this instant.
    pub dst_active: bool,
}

/// Express an instant as wall-clock time in `tz`.
pub fn to_local(instant: DateTime<Utc>, tz: Tz) -> LocalWallClock {
    let local = instant.with_timezone(&tz);
    LocalWallClock {
        date: local.date_naive(),
        time: local.time(),
        offset: format_utc_offset(&local),
        dst_active: is_dst_active(&local, &tz),
    }
}

/// The local calendar date of an instant in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Parse an RFC 3339 datetime string into `DateTime<Utc>`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidDatetime`] if the string cannot be parsed.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidDatetime(format!("'{s}': {e}")))
}

// ── Internal helpers ────────────────────────────────────────────────────────

/// Determine if DST is active for a datetime in a timezone.
fn is_dst_active<T: TimeZone>(dt: &DateTime<T>, tz: &Tz) -> bool {
    // Compare the January and July offsets: the smaller one is standard time.
    let utc = dt.with_timezone(&Utc);
    let year = utc.year();

    let offset_at = |month: u32| {
        Utc.with_ymd_and_hms(year, month, 1, 12, 0, 0)
            .single()
            .map(|sample| sample.with_timezone(tz).offset().fix().local_minus_utc())
    };
    let (Some(jan), Some(jul)) = (offset_at(1), offset_at(7)) else {
        return false;
    };

    let current = dt.offset().fix().local_minus_utc();
    jan != jul && current == jan.max(jul)
}

/// Format the UTC offset as a string (e.g., "-05:00", "+09:00").
fn format_utc_offset<T: TimeZone>(dt: &DateTime<T>) -> String {
    let offset_secs = dt.offset().fix().local_minus_utc();
    let sign = if offset_secs >= 0 { "+" } else { "-" };
    let abs_secs = offset_secs.unsigned_abs();
    let hours = abs_secs / 3600;
    let minutes = (abs_secs % 3600) / 60;
    format!("{sign}{hours:02}:{minutes:02}")
}

// ── Tests ───────────────────────────────────────────────────────────────────
