//! End-to-end computation of a schedule's final timeline.
//!
//! Expands every rotation, assigns users, and composes the layers. A rotation
//! that cannot be expanded is reported in [`FinalSchedule::failures`] and left
//! out; the other layers are still composed. Degraded inputs (an unknown
//! timezone) are reported in [`FinalSchedule::warnings`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::compositor::{compose_with_directory, FinalEvent, Layer, UserDirectory};
use crate::cycler::annotate;
use crate::error::EngineError;
use crate::expander::{CancellationFlag, OccurrenceGenerator};
use crate::rotation::{RotationDefinition, ShiftOccurrence};

/// Shifts are at most a (DST-stretched) day long, so anything starting earlier
/// than this before the window cannot reach into it.
const SPILL_OVER_DAYS: i64 = 2;

/// Half-open query window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScheduleWindow {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWindow`] unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidWindow(format!(
                "end {} is not after start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// A window of `days` days from `start`.
    pub fn days(start: DateTime<Utc>, days: u32) -> Result<Self, EngineError> {
        Self::new(start, start + Duration::days(i64::from(days)))
    }
}

/// Non-fatal degradation noticed while computing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleWarning {
    /// The rotation's zone is unknown; its shifts were evaluated in UTC.
    TimezoneFallback {
        rotation_id: String,
        requested: String,
    },
}

/// A rotation left out of composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerFailure {
    pub rotation_id: String,
    pub reason: String,
}

/// The composed timeline plus everything worth reporting next to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalSchedule {
    pub events: Vec<FinalEvent>,
    pub warnings: Vec<ScheduleWarning>,
    pub failures: Vec<LayerFailure>,
}

/// Expand one rotation over `window` (plus spill-over) into a layer.
///
/// # Errors
///
/// Returns [`EngineError::Cancelled`] if `cancel` fires during expansion, or
/// the error from [`OccurrenceGenerator::new`].
pub fn build_layer(
    rotation: &RotationDefinition,
    window: ScheduleWindow,
    cancel: &CancellationFlag,
) -> Result<(Layer, Option<ScheduleWarning>), EngineError> {
    let generator = OccurrenceGenerator::new(rotation)?;
    let warning = generator
        .zone()
        .fell_back
        .then(|| ScheduleWarning::TimezoneFallback {
            rotation_id: rotation.id.clone(),
            requested: rotation.time_zone.clone(),
        });

    let mut occurrences = generator
        .window(window.start - Duration::days(SPILL_OVER_DAYS), window.end)
        .with_cancellation(cancel.clone());
    let shifts: Vec<ShiftOccurrence> = occurrences
        .by_ref()
        .map(|occurrence| annotate(rotation, occurrence))
        .collect();
    if occurrences.was_cancelled() {
        return Err(EngineError::Cancelled);
    }

    tracing::debug!(
        rotation_id = %rotation.id,
        occurrences = shifts.len(),
        "expanded rotation"
    );
    Ok((Layer::for_rotation(rotation, shifts), warning))
}

/// Compute the final timeline of `rotations` (in definition order) over
/// `window`.
///
/// # Errors
///
/// Returns [`EngineError::Cancelled`] if `cancel` fires before composition
/// completes. Per-rotation problems never fail the call.
pub fn compute_final_schedule(
    rotations: &[RotationDefinition],
    window: ScheduleWindow,
    directory: &dyn UserDirectory,
    cancel: &CancellationFlag,
) -> Result<FinalSchedule, EngineError> {
    let span = tracing::debug_span!(
        "compute_final_schedule",
        rotations = rotations.len(),
        start = %window.start,
        end = %window.end,
    );
    let _guard = span.enter();

    let mut layers = Vec::with_capacity(rotations.len());
    let mut warnings = Vec::new();
    let mut failures = Vec::new();

    for rotation in rotations {
        match build_layer(rotation, window, cancel) {
            Ok((layer, warning)) => {
                layers.push(layer);
                warnings.extend(warning);
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                tracing::warn!(rotation_id = %rotation.id, error = %err, "rotation left out of composition");
                failures.push(LayerFailure {
                    rotation_id: rotation.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let events = compose_with_directory(&layers, window.start, window.end, directory);
    Ok(FinalSchedule {
        events,
        warnings,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::AllUsersKnown;
    use crate::rotation::{Frequency, RecurrenceRule, ShiftTemplate, UserGroup};
    use chrono::{NaiveTime, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn rotation(id: &str, priority: u32, start: u32, end: u32, users: &[&str]) -> RotationDefinition {
        RotationDefinition {
            id: id.to_string(),
            schedule_id: "s1".to_string(),
            title: String::new(),
            priority_level: priority,
            shift: ShiftTemplate::new(
                NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            ),
            time_zone: "UTC".to_string(),
            rotation_start: at(2, 0),
            recurrence: RecurrenceRule::every(Frequency::Daily, 1),
            until: None,
            rolling_users: users
                .iter()
                .map(|u| UserGroup::from([u.to_string()]))
                .collect(),
        }
    }

    fn compute(rotations: &[RotationDefinition], window: ScheduleWindow) -> FinalSchedule {
        compute_final_schedule(rotations, window, &AllUsersKnown, &CancellationFlag::new()).unwrap()
    }

    #[test]
    fn test_window_must_be_ordered() {
        assert!(ScheduleWindow::new(at(3, 0), at(3, 0)).is_err());
        assert!(ScheduleWindow::new(at(3, 0), at(2, 0)).is_err());
        assert_eq!(ScheduleWindow::days(at(3, 0), 2).unwrap().end, at(5, 0));
    }

    #[test]
    fn test_overnight_shift_before_window_still_covers_it() {
        let night = rotation("night", 1, 22, 6, &["owl"]);
        let window = ScheduleWindow::new(at(3, 0), at(3, 6)).unwrap();
        let schedule = compute(&[night], window);
        assert_eq!(schedule.events.len(), 1);
        assert_eq!(schedule.events[0].users, UserGroup::from(["owl".to_string()]));
        assert_eq!(schedule.events[0].shift.as_ref().unwrap().occurrence_index, 0);
    }

    #[test]
    fn test_invalid_rotation_is_reported_not_fatal() {
        let good = rotation("good", 1, 9, 17, &["a"]);
        let mut bad = rotation("bad", 2, 9, 17, &["b"]);
        bad.recurrence.interval = 0;
        let window = ScheduleWindow::new(at(2, 0), at(3, 0)).unwrap();

        let schedule = compute(&[good, bad], window);
        assert_eq!(schedule.failures.len(), 1);
        assert_eq!(schedule.failures[0].rotation_id, "bad");
        assert!(schedule.failures[0].reason.contains("interval"));
        assert!(schedule
            .events
            .iter()
            .filter(|e| !e.is_gap)
            .all(|e| e.source_rotation_id() == Some("good")));
    }

    #[test]
    fn test_unknown_timezone_is_a_warning() {
        let mut r = rotation("r1", 1, 9, 17, &["a"]);
        r.time_zone = "Atlantis/Capital".to_string();
        let window = ScheduleWindow::new(at(2, 0), at(3, 0)).unwrap();
        let schedule = compute(&[r], window);
        assert_eq!(
            schedule.warnings,
            vec![ScheduleWarning::TimezoneFallback {
                rotation_id: "r1".to_string(),
                requested: "Atlantis/Capital".to_string(),
            }]
        );
        assert!(schedule.failures.is_empty());
        assert_eq!(schedule.events[1].start, at(2, 9));
    }

    #[test]
    fn test_cancelled_computation_returns_cancelled() {
        let r = rotation("r1", 1, 9, 17, &["a"]);
        let window = ScheduleWindow::new(at(2, 0), at(30, 0)).unwrap();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = compute_final_schedule(&[r], window, &AllUsersKnown, &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_warning_wire_shape() {
        let warning = ScheduleWarning::TimezoneFallback {
            rotation_id: "r1".to_string(),
            requested: "X/Y".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "timezone_fallback");
        assert_eq!(json["requested"], "X/Y");
    }
}
