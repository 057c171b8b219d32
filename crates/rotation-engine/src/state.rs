//! Per-schedule host state.
//!
//! Holds what a host needs around the pure engine for one schedule:
//!
//! - the rotation definitions, written under an optimistic version check;
//! - at most one recomputation in flight: starting a recomputation or writing
//!   a rotation cancels the running one;
//! - the most recently completed timeline, shared as an `Arc` snapshot so
//!   readers only ever clone a pointer.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::compositor::UserDirectory;
use crate::error::EngineError;
use crate::expander::CancellationFlag;
use crate::rotation::RotationDefinition;
use crate::schedule::{compute_final_schedule, FinalSchedule, ScheduleWindow};

/// A completed computation together with the rotation version it reflects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSnapshot {
    pub version: u64,
    pub window: ScheduleWindow,
    pub schedule: FinalSchedule,
}

#[derive(Debug, Default)]
struct Rotations {
    version: u64,
    definitions: Vec<RotationDefinition>,
}

/// Rotations, in-flight recomputation and latest snapshot of one schedule.
#[derive(Debug)]
pub struct ScheduleState {
    schedule_id: String,
    rotations: RwLock<Rotations>,
    in_flight: Mutex<Option<CancellationFlag>>,
    latest: RwLock<Option<Arc<ScheduleSnapshot>>>,
}

impl ScheduleState {
    /// Empty state at version 0.
    pub fn new(schedule_id: impl Into<String>) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            rotations: RwLock::new(Rotations::default()),
            in_flight: Mutex::new(None),
            latest: RwLock::new(None),
        }
    }

    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    /// Current rotation version; pass it back as `expected_version` on writes.
    pub fn version(&self) -> u64 {
        self.rotations.read().version
    }

    /// Rotations in definition order.
    pub fn rotations(&self) -> Vec<RotationDefinition> {
        self.rotations.read().definitions.clone()
    }

    /// Latest completed timeline, if any.
    pub fn latest(&self) -> Option<Arc<ScheduleSnapshot>> {
        self.latest.read().clone()
    }

    /// Append a rotation as the newest layer. The rotation is stamped with
    /// this schedule's id.
    ///
    /// # Errors
    ///
    /// [`EngineError::Conflict`] on a stale version, [`EngineError::Validation`]
    /// for an invalid rotation, [`EngineError::DuplicateRotation`] if the id is
    /// taken.
    pub fn create_rotation(
        &self,
        expected_version: u64,
        mut rotation: RotationDefinition,
    ) -> Result<u64, EngineError> {
        rotation.schedule_id = self.schedule_id.clone();
        rotation.validate()?;
        self.write(expected_version, |definitions| {
            if definitions.iter().any(|existing| existing.id == rotation.id) {
                return Err(EngineError::DuplicateRotation(rotation.id.clone()));
            }
            definitions.push(rotation);
            Ok(())
        })
    }

    /// Replace the rotation with the same id, keeping its layer position.
    ///
    /// # Errors
    ///
    /// [`EngineError::Conflict`] on a stale version, [`EngineError::Validation`]
    /// for an invalid rotation, [`EngineError::UnknownRotation`] if no rotation
    /// has this id.
    pub fn update_rotation(
        &self,
        expected_version: u64,
        mut rotation: RotationDefinition,
    ) -> Result<u64, EngineError> {
        rotation.schedule_id = self.schedule_id.clone();
        rotation.validate()?;
        self.write(expected_version, |definitions| {
            let slot = definitions
                .iter_mut()
                .find(|existing| existing.id == rotation.id)
                .ok_or_else(|| EngineError::UnknownRotation(rotation.id.clone()))?;
            *slot = rotation;
            Ok(())
        })
    }

    /// # Errors
    ///
    /// [`EngineError::Conflict`] on a stale version,
    /// [`EngineError::UnknownRotation`] if no rotation has this id.
    pub fn delete_rotation(&self, expected_version: u64, rotation_id: &str) -> Result<u64, EngineError> {
        self.write(expected_version, |definitions| {
            let position = definitions
                .iter()
                .position(|existing| existing.id == rotation_id)
                .ok_or_else(|| EngineError::UnknownRotation(rotation_id.to_string()))?;
            definitions.remove(position);
            Ok(())
        })
    }

    fn write(
        &self,
        expected_version: u64,
        apply: impl FnOnce(&mut Vec<RotationDefinition>) -> Result<(), EngineError>,
    ) -> Result<u64, EngineError> {
        let mut rotations = self.rotations.write();
        if rotations.version != expected_version {
            tracing::warn!(
                schedule_id = %self.schedule_id,
                expected = expected_version,
                current = rotations.version,
                "rejected write with stale version"
            );
            return Err(EngineError::Conflict {
                expected: expected_version,
                current: rotations.version,
            });
        }
        apply(&mut rotations.definitions)?;
        rotations.version += 1;
        self.cancel_in_flight();
        Ok(rotations.version)
    }

    fn cancel_in_flight(&self) {
        if let Some(flag) = self.in_flight.lock().take() {
            tracing::debug!(schedule_id = %self.schedule_id, "cancelling in-flight recomputation");
            flag.cancel();
        }
    }

    /// Recompute the timeline over `window` and publish it as the latest
    /// snapshot.
    ///
    /// Cancels any recomputation already running for this schedule.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`] if a write or a newer recomputation
    /// superseded this one; nothing is published in that case.
    pub fn recompute(
        &self,
        window: ScheduleWindow,
        directory: &dyn UserDirectory,
    ) -> Result<Arc<ScheduleSnapshot>, EngineError> {
        let cancel = CancellationFlag::new();
        if let Some(previous) = self.in_flight.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let (version, definitions) = {
            let rotations = self.rotations.read();
            (rotations.version, rotations.definitions.clone())
        };
        let published = compute_final_schedule(&definitions, window, directory, &cancel)
            .and_then(|schedule| self.publish(&cancel, version, window, schedule));

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|flag| flag.same_as(&cancel)) {
            *slot = None;
        }
        published
    }

    /// Swap in a finished computation unless it was superseded.
    ///
    /// The flag stays registered as in flight until this returns, so a write
    /// landing after the version check still cancels it.
    fn publish(
        &self,
        cancel: &CancellationFlag,
        version: u64,
        window: ScheduleWindow,
        schedule: FinalSchedule,
    ) -> Result<Arc<ScheduleSnapshot>, EngineError> {
        let current = self.rotations.read().version;
        let mut latest = self.latest.write();
        let outdated = latest.as_ref().is_some_and(|published| published.version > version);
        if cancel.is_cancelled() || current != version || outdated {
            tracing::debug!(schedule_id = %self.schedule_id, version, "discarding superseded recomputation");
            return Err(EngineError::Cancelled);
        }
        let snapshot = Arc::new(ScheduleSnapshot {
            version,
            window,
            schedule,
        });
        *latest = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::AllUsersKnown;
    use crate::rotation::{Frequency, RecurrenceRule, ShiftTemplate, UserGroup};
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use std::cell::Cell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn rotation(id: &str, user: &str) -> RotationDefinition {
        RotationDefinition {
            id: id.to_string(),
            schedule_id: String::new(),
            title: String::new(),
            priority_level: 1,
            shift: ShiftTemplate::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            ),
            time_zone: "UTC".to_string(),
            rotation_start: at(2, 9),
            recurrence: RecurrenceRule::every(Frequency::Daily, 1),
            until: None,
            rolling_users: vec![UserGroup::from([user.to_string()])],
        }
    }

    fn window() -> ScheduleWindow {
        ScheduleWindow::new(at(2, 0), at(3, 0)).unwrap()
    }

    // ── writes ──────────────────────────────────────────────────────────

    #[test]
    fn test_writes_bump_version() {
        let state = ScheduleState::new("s1");
        assert_eq!(state.version(), 0);
        assert_eq!(state.create_rotation(0, rotation("r1", "a")).unwrap(), 1);
        assert_eq!(state.create_rotation(1, rotation("r2", "b")).unwrap(), 2);
        assert_eq!(state.update_rotation(2, rotation("r1", "c")).unwrap(), 3);
        assert_eq!(state.delete_rotation(3, "r2").unwrap(), 4);

        let rotations = state.rotations();
        assert_eq!(rotations.len(), 1);
        assert_eq!(rotations[0].schedule_id, "s1");
        assert_eq!(rotations[0].rolling_users[0], UserGroup::from(["c".to_string()]));
    }

    #[test]
    fn test_stale_write_is_a_conflict() {
        let state = ScheduleState::new("s1");
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        let err = state.update_rotation(0, rotation("r1", "b")).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { expected: 0, current: 1 }));
        // The concurrent edit was not overwritten.
        assert_eq!(state.rotations()[0].rolling_users[0], UserGroup::from(["a".to_string()]));
        assert_eq!(state.version(), 1);
    }

    #[test]
    fn test_update_keeps_layer_position() {
        let state = ScheduleState::new("s1");
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        state.create_rotation(1, rotation("r2", "b")).unwrap();
        state.update_rotation(2, rotation("r1", "z")).unwrap();
        let ids: Vec<_> = state.rotations().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn test_invalid_and_unknown_writes_leave_version() {
        let state = ScheduleState::new("s1");
        let mut invalid = rotation("r1", "a");
        invalid.recurrence.interval = 0;
        assert!(matches!(
            state.create_rotation(0, invalid),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            state.update_rotation(0, rotation("nope", "a")),
            Err(EngineError::UnknownRotation(_))
        ));
        assert!(matches!(
            state.delete_rotation(0, "nope"),
            Err(EngineError::UnknownRotation(_))
        ));
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        assert!(matches!(
            state.create_rotation(1, rotation("r1", "b")),
            Err(EngineError::DuplicateRotation(_))
        ));
        assert_eq!(state.version(), 1);
    }

    // ── recomputation ───────────────────────────────────────────────────

    #[test]
    fn test_recompute_publishes_snapshot() {
        let state = ScheduleState::new("s1");
        assert!(state.latest().is_none());
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        let snapshot = state.recompute(window(), &AllUsersKnown).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.schedule.events.len(), 3);
        assert!(Arc::ptr_eq(&snapshot, &state.latest().unwrap()));
    }

    /// Performs a rotation write the first time it is consulted, i.e. while a
    /// recomputation is composing.
    struct EditingDirectory<'a> {
        state: &'a ScheduleState,
        edited: Cell<bool>,
    }

    impl UserDirectory for EditingDirectory<'_> {
        fn contains(&self, _user: &str) -> bool {
            if !self.edited.replace(true) {
                let version = self.state.version();
                self.state
                    .update_rotation(version, rotation("r1", "late"))
                    .unwrap();
            }
            true
        }
    }

    #[test]
    fn test_write_cancels_in_flight_recomputation() {
        let state = ScheduleState::new("s1");
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        let directory = EditingDirectory {
            state: &state,
            edited: Cell::new(false),
        };
        let result = state.recompute(window(), &directory);
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(state.latest().is_none());

        let snapshot = state.recompute(window(), &AllUsersKnown).unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(
            snapshot.schedule.events[1].users,
            UserGroup::from(["late".to_string()])
        );
    }

    /// Starts a nested recomputation the first time it is consulted.
    struct RecomputingDirectory<'a> {
        state: &'a ScheduleState,
        nested: Cell<bool>,
    }

    impl UserDirectory for RecomputingDirectory<'_> {
        fn contains(&self, _user: &str) -> bool {
            if !self.nested.replace(true) {
                self.state.recompute(window(), &AllUsersKnown).unwrap();
            }
            true
        }
    }

    #[test]
    fn test_new_recomputation_supersedes_running_one() {
        let state = ScheduleState::new("s1");
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        let directory = RecomputingDirectory {
            state: &state,
            nested: Cell::new(false),
        };
        let outer = state.recompute(window(), &directory);
        assert!(matches!(outer, Err(EngineError::Cancelled)));
        // The nested (newer) computation is the published one.
        assert_eq!(state.latest().unwrap().version, 1);
    }

    /// Parks the composing thread twice on its first lookup so the test can
    /// interleave a rotation lock holder before publication.
    struct GatedDirectory {
        reached: Barrier,
        resume: Barrier,
        gated: AtomicBool,
    }

    impl UserDirectory for GatedDirectory {
        fn contains(&self, _user: &str) -> bool {
            if !self.gated.swap(true, Ordering::SeqCst) {
                self.reached.wait();
                self.resume.wait();
            }
            true
        }
    }

    #[test]
    fn test_latest_stays_readable_while_publication_waits_on_rotations() {
        let state = ScheduleState::new("s1");
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        let directory = GatedDirectory {
            reached: Barrier::new(2),
            resume: Barrier::new(2),
            gated: AtomicBool::new(false),
        };

        std::thread::scope(|scope| {
            let worker = scope.spawn(|| state.recompute(window(), &directory));
            directory.reached.wait();
            let held = state.rotations.write();
            directory.resume.wait();
            std::thread::sleep(Duration::from_millis(50));
            assert!(state.latest().is_none());
            drop(held);

            let snapshot = worker.join().unwrap().unwrap();
            assert_eq!(snapshot.version, 1);
        });
        assert_eq!(state.latest().unwrap().version, 1);
    }

    #[test]
    fn test_readers_never_see_partial_snapshots() {
        let state = ScheduleState::new("s1");
        state.create_rotation(0, rotation("r1", "a")).unwrap();
        state.recompute(window(), &AllUsersKnown).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let snapshot = state.latest().unwrap();
                        assert_eq!(snapshot.schedule.events.first().unwrap().start, at(2, 0));
                        assert_eq!(snapshot.schedule.events.last().unwrap().end, at(3, 0));
                    }
                });
            }
            for _ in 0..20 {
                state.recompute(window(), &AllUsersKnown).unwrap();
            }
        });
    }
}
