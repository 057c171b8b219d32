//! Rolling user groups → the group on duty for an occurrence.
//!
//! Assignment is a pure modular lookup on the occurrence index, so it can be
//! evaluated for any window, in any order, any number of times.

use crate::expander::Occurrence;
use crate::rotation::{RotationDefinition, ShiftOccurrence, UserGroup};

/// Position in `group_count` groups that serves `occurrence_index`.
///
/// `None` when there are no groups at all.
pub fn group_index(group_count: usize, occurrence_index: u64) -> Option<usize> {
    if group_count == 0 {
        return None;
    }
    Some((occurrence_index % group_count as u64) as usize)
}

/// The users on duty for the occurrence at `occurrence_index`.
///
/// A rotation without groups, or whose selected group is empty, yields the
/// empty set.
pub fn assigned_users(rotation: &RotationDefinition, occurrence_index: u64) -> UserGroup {
    group_index(rotation.rolling_users.len(), occurrence_index)
        .map(|position| rotation.rolling_users[position].clone())
        .unwrap_or_default()
}

/// Attach the assigned users to a generated occurrence.
pub fn annotate(rotation: &RotationDefinition, occurrence: Occurrence) -> ShiftOccurrence {
    ShiftOccurrence {
        rotation_id: rotation.id.clone(),
        occurrence_index: occurrence.index,
        start: occurrence.start,
        end: occurrence.end,
        assigned_users: assigned_users(rotation, occurrence.index),
    }
}
