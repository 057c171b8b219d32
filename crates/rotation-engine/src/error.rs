//! Error types for rotation-engine operations.

use thiserror::Error;

/// Rejections raised before any recomputation is attempted.
///
/// Every variant is recoverable by the caller: fix the rotation definition and
/// submit it again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("shift duration must be positive, got {seconds}s")]
    NonPositiveShiftDuration { seconds: i64 },

    #[error("shift duration must not exceed 24 hours, got {seconds}s")]
    ShiftExceedsDay { seconds: i64 },

    #[error("until ({until}) is earlier than rotation start ({rotation_start})")]
    UntilBeforeStart {
        rotation_start: String,
        until: String,
    },

    #[error("weekly rotations need at least one day in by_day")]
    WeeklyWithoutDays,

    #[error("interval must be at least 1, got {0}")]
    IntervalBelowOne(u32),

    #[error("priority level must be at least 1, got {0}")]
    PriorityBelowOne(u32),

    #[error("unknown frequency code {0}")]
    UnknownFrequency(u8),

    #[error("unknown weekday code '{0}'")]
    UnknownWeekday(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid rotation: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Expansion error for rotation {rotation_id}: {reason}")]
    Expansion { rotation_id: String, reason: String },

    #[error("Version conflict: expected {expected}, current {current}")]
    Conflict { expected: u64, current: u64 },

    #[error("Unknown rotation: {0}")]
    UnknownRotation(String),

    #[error("Rotation already exists: {0}")]
    DuplicateRotation(String),

    #[error("Computation cancelled")]
    Cancelled,
}
