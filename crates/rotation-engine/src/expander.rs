//! Rotation recurrence → concrete shift occurrences.
//!
//! An [`OccurrenceGenerator`] maps an occurrence index to its shift without
//! walking the sequence from the anchor: index `k` is always the `k`-th shift
//! of the full, unclipped generation, whatever window is queried. Windows are
//! served by [`Occurrences`], a lazy iterator that jumps close to the window
//! start, stops at the window end (or `until`), and honors a
//! [`CancellationFlag`] before producing each item.
//!
//! Stepping rules, all in the rotation's local calendar:
//!
//! - **none**: index 0 on the anchor date, nothing else.
//! - **daily**: `interval` days per step.
//! - **weekly**: `interval` weeks per step; within a stepped week, one shift per
//!   `by_day` weekday in week order. Days of the anchor week before the anchor
//!   date are not generated.
//! - **monthly**: `interval` months per step on the anchor's day-of-month,
//!   clamped to the month's last day.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::Serialize;

use crate::error::EngineError;
use crate::rotation::{days_from_week_start, Frequency, RotationDefinition, ShiftTemplate};
use crate::timezone::{local_date, resolve_timezone_or_utc, to_instant, ResolvedZone};

/// Days subtracted from the window start's local date before estimating the
/// first index, so DST shifts and zone offsets never skip an in-window shift.
const LOOKBACK_DAYS: u64 = 2;

// ── Cancellation ────────────────────────────────────────────────────────────

/// Shared flag observed by [`Occurrences`] before each generated shift.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Whether both handles observe the same flag.
    pub fn same_as(&self, other: &CancellationFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// ── Occurrence ──────────────────────────────────────────────────────────────

/// One generated shift, before users are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    /// Position in the full generation order, starting at 0 on the anchor.
    pub index: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ── OccurrenceGenerator ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct WeekLayout {
    /// First day of the anchor's week.
    week0: NaiveDate,
    /// `by_day` offsets from the week start, ascending.
    offsets: Vec<u32>,
    /// The offsets generated in the anchor week (those on or after the anchor).
    first_week: Vec<u32>,
}

/// Random-access view over a rotation's conceptually infinite shift sequence.
#[derive(Debug, Clone)]
pub struct OccurrenceGenerator {
    rotation_id: String,
    anchor: NaiveDate,
    shift: ShiftTemplate,
    zone: ResolvedZone,
    frequency: Frequency,
    interval: u32,
    week: Option<WeekLayout>,
    until: Option<DateTime<Utc>>,
}

impl OccurrenceGenerator {
    /// Prepare a generator for `rotation`.
    ///
    /// An unknown timezone is not an error: UTC is used and
    /// [`OccurrenceGenerator::zone`] reports the fallback.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the rotation breaks an invariant,
    /// or [`EngineError::Expansion`] if its anchor week is outside the
    /// representable calendar.
    pub fn new(rotation: &RotationDefinition) -> Result<Self, EngineError> {
        rotation.validate()?;
        let zone = resolve_timezone_or_utc(&rotation.time_zone);
        let anchor = local_date(rotation.rotation_start, zone.tz);
        let recurrence = &rotation.recurrence;

        let week = if recurrence.frequency == Frequency::Weekly {
            let offsets = recurrence.week_offsets();
            let anchor_offset = days_from_week_start(anchor.weekday(), recurrence.week_start);
            let week0 = anchor
                .checked_sub_days(Days::new(u64::from(anchor_offset)))
                .ok_or_else(|| EngineError::Expansion {
                    rotation_id: rotation.id.clone(),
                    reason: format!("anchor week of {anchor} is out of range"),
                })?;
            let first_week = offsets
                .iter()
                .copied()
                .filter(|offset| *offset >= anchor_offset)
                .collect();
            Some(WeekLayout {
                week0,
                offsets,
                first_week,
            })
        } else {
            None
        };

        Ok(Self {
            rotation_id: rotation.id.clone(),
            anchor,
            shift: rotation.shift,
            zone,
            frequency: recurrence.frequency,
            interval: recurrence.interval,
            week,
            until: rotation.until,
        })
    }

    pub fn rotation_id(&self) -> &str {
        &self.rotation_id
    }

    /// The zone shifts are evaluated in, and whether it is a UTC fallback.
    pub fn zone(&self) -> ResolvedZone {
        self.zone
    }

    /// Local date of the shift at `index`, ignoring `until`.
    ///
    /// `None` when the index does not exist (past a one-off rotation) or
    /// lands outside the representable calendar.
    pub fn date_of(&self, index: u64) -> Option<NaiveDate> {
        let interval = u64::from(self.interval);
        match self.frequency {
            Frequency::None => (index == 0).then_some(self.anchor),
            Frequency::Daily => self
                .anchor
                .checked_add_days(Days::new(index.checked_mul(interval)?)),
            Frequency::Monthly => {
                let months = u32::try_from(index.checked_mul(interval)?).ok()?;
                self.anchor.checked_add_months(Months::new(months))
            }
            Frequency::Weekly => {
                let week = self.week.as_ref()?;
                let first = week.first_week.len() as u64;
                let (week_number, offset) = if index < first {
                    (0, week.first_week[index as usize])
                } else {
                    let rest = index - first;
                    let per_week = week.offsets.len() as u64;
                    (1 + rest / per_week, week.offsets[(rest % per_week) as usize])
                };
                let days = week_number
                    .checked_mul(interval)?
                    .checked_mul(7)?
                    .checked_add(u64::from(offset))?;
                week.week0.checked_add_days(Days::new(days))
            }
        }
    }

    /// The shift at `index`, or `None` once generation has ended (one-off
    /// rotation exhausted, `until` reached, calendar overflow).
    pub fn occurrence(&self, index: u64) -> Option<Occurrence> {
        let date = self.date_of(index)?;
        let start = to_instant(date, self.shift.start, self.zone.tz);
        if self.until.is_some_and(|until| start >= until) {
            return None;
        }
        let end_date = if self.shift.crosses_midnight() {
            date.succ_opt()?
        } else {
            date
        };
        let end = to_instant(end_date, self.shift.end, self.zone.tz);
        Some(Occurrence { index, start, end })
    }

    /// An index such that every earlier index falls on a date before `target`.
    fn lower_bound_index(&self, target: NaiveDate) -> u64 {
        if target <= self.anchor {
            return 0;
        }
        let interval = i64::from(self.interval);
        match self.frequency {
            Frequency::None => 0,
            Frequency::Daily => ((target - self.anchor).num_days() / interval) as u64,
            Frequency::Monthly => {
                let months = i64::from(target.year() - self.anchor.year()) * 12
                    + i64::from(target.month())
                    - i64::from(self.anchor.month());
                (months.max(0) / interval) as u64
            }
            Frequency::Weekly => {
                let Some(week) = self.week.as_ref() else {
                    return 0;
                };
                let stepped_weeks = (target - week.week0).num_days() / 7 / interval;
                if stepped_weeks == 0 {
                    0
                } else {
                    week.first_week.len() as u64
                        + (stepped_weeks as u64 - 1) * week.offsets.len() as u64
                }
            }
        }
    }

    /// Lazily produce the shifts starting in `[window_start, window_end)`.
    pub fn window(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Occurrences {
        let target = local_date(window_start, self.zone.tz)
            .checked_sub_days(Days::new(LOOKBACK_DAYS))
            .unwrap_or(self.anchor);
        Occurrences {
            next_index: self.lower_bound_index(target),
            generator: self.clone(),
            window_start,
            window_end,
            cancel: None,
            cancelled: false,
            finished: false,
        }
    }
}

/// Expand `rotation` over `[window_start, window_end)`.
///
/// Nothing is generated until the returned iterator is polled.
///
/// # Errors
///
/// See [`OccurrenceGenerator::new`].
pub fn expand(
    rotation: &RotationDefinition,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Occurrences, EngineError> {
    Ok(OccurrenceGenerator::new(rotation)?.window(window_start, window_end))
}

// ── Occurrences ─────────────────────────────────────────────────────────────

/// Iterator over the shifts of one rotation inside a window.
#[derive(Debug, Clone)]
pub struct Occurrences {
    generator: OccurrenceGenerator,
    next_index: u64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    cancel: Option<CancellationFlag>,
    cancelled: bool,
    finished: bool,
}

impl Occurrences {
    /// Stop producing shifts as soon as `flag` is cancelled.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Whether iteration ended because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn generator(&self) -> &OccurrenceGenerator {
        &self.generator
    }
}

impl Iterator for Occurrences {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.as_ref().is_some_and(CancellationFlag::is_cancelled) {
                tracing::debug!(
                    rotation_id = %self.generator.rotation_id,
                    next_index = self.next_index,
                    "expansion cancelled"
                );
                self.cancelled = true;
                self.finished = true;
                return None;
            }

            let index = self.next_index;
            let Some(occurrence) = self.generator.occurrence(index) else {
                self.finished = true;
                return None;
            };
            if occurrence.start >= self.window_end {
                self.finished = true;
                return None;
            }
            match index.checked_add(1) {
                Some(next) => self.next_index = next,
                None => self.finished = true,
            }

            if occurrence.start < self.window_start {
                continue;
            }
            if occurrence.end <= occurrence.start {
                // Guard against a non-positive shift after zone conversion.
                tracing::debug!(
                    rotation_id = %self.generator.rotation_id,
                    index,
                    "skipping empty shift"
                );
                continue;
            }
            return Some(occurrence);
        }
    }
}
