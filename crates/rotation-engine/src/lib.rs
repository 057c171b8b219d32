//! # rotation-engine
//!
//! Deterministic on-call schedule computation.
//!
//! Turns a set of prioritized rotation definitions into one gap-aware,
//! non-overlapping coverage timeline for a query window. Every step is a pure
//! function of its inputs, so any window can be computed independently and the
//! same inputs always give the same timeline.
//!
//! ## Modules
//!
//! - [`timezone`] — IANA zone resolution, wall-clock ↔ instant conversion with DST policy
//! - [`rotation`] — Rotation definitions, recurrence rules, shift templates, validation
//! - [`wire`] — Rotation payloads as hosts send them
//! - [`expander`] — Rotation → index-addressable, lazily windowed shift occurrences
//! - [`cycler`] — Occurrence index → on-duty user group
//! - [`compositor`] — Prioritized layers → final timeline with gaps
//! - [`schedule`] — End-to-end pipeline with per-layer failures and warnings
//! - [`state`] — Per-schedule versioned rotations, in-flight recomputation, snapshots
//! - [`draft`] — Immutable rotation editing draft and reducer
//! - [`ical`] — iCalendar `RRULE` export
//! - [`error`] — Error types

pub mod compositor;
pub mod cycler;
pub mod draft;
pub mod error;
pub mod expander;
pub mod ical;
pub mod rotation;
pub mod schedule;
pub mod state;
pub mod timezone;
pub mod wire;

pub use compositor::{compose, compose_with_directory, AllUsersKnown, FinalEvent, Layer, UserDirectory};
pub use cycler::{assigned_users, group_index};
pub use draft::{DraftAction, RotationDraft};
pub use error::{EngineError, ValidationError};
pub use expander::{expand, CancellationFlag, Occurrence, OccurrenceGenerator, Occurrences};
pub use ical::{export_rotation, rrule_string};
pub use rotation::{
    Frequency, RecurrenceRule, RotationDefinition, ShiftOccurrence, ShiftTemplate, UserGroup,
    UserId,
};
pub use schedule::{
    compute_final_schedule, FinalSchedule, LayerFailure, ScheduleWarning, ScheduleWindow,
};
pub use state::{ScheduleSnapshot, ScheduleState};
pub use timezone::{resolve_timezone, to_instant, to_local, LocalWallClock};
pub use wire::{RotationPayload, RotationRecord};
