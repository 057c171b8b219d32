//! Prioritized layers → one gap-aware, non-overlapping coverage timeline.
//!
//! Every occurrence boundary inside the window cuts the window into
//! sub-intervals. Each sub-interval goes to the covering occurrence with the
//! highest rank:
//!
//! 1. higher `priority_level`;
//! 2. on equal priority, the layer defined later;
//! 3. within one layer, the occurrence that started later.
//!
//! Sub-intervals nobody covers become gap events. Adjacent sub-intervals with
//! identical coverage are merged, so the output partitions the window exactly.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::rotation::{RotationDefinition, ShiftOccurrence, UserGroup, UserId};

// ── User directory ──────────────────────────────────────────────────────────

/// Read-only view of the users a host can resolve.
///
/// Assigned users the directory does not know end up in
/// [`FinalEvent::missing_users`] instead of [`FinalEvent::users`].
pub trait UserDirectory {
    fn contains(&self, user: &str) -> bool;
}

/// A directory that resolves every user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllUsersKnown;

impl UserDirectory for AllUsersKnown {
    fn contains(&self, _user: &str) -> bool {
        true
    }
}

impl UserDirectory for BTreeSet<UserId> {
    fn contains(&self, user: &str) -> bool {
        BTreeSet::contains(self, user)
    }
}

impl UserDirectory for HashSet<UserId> {
    fn contains(&self, user: &str) -> bool {
        HashSet::contains(self, user)
    }
}

// ── Layer / FinalEvent ──────────────────────────────────────────────────────

/// One rotation's occurrences, ready for composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub priority_level: u32,
    pub rotation_id: String,
    /// Label reported as [`FinalEvent::source`].
    pub source: String,
    pub occurrences: Vec<ShiftOccurrence>,
}

impl Layer {
    pub fn new(
        priority_level: u32,
        rotation_id: impl Into<String>,
        occurrences: Vec<ShiftOccurrence>,
    ) -> Self {
        let rotation_id = rotation_id.into();
        Self {
            priority_level,
            source: format!("rotation {rotation_id}"),
            rotation_id,
            occurrences,
        }
    }

    pub fn for_rotation(rotation: &RotationDefinition, occurrences: Vec<ShiftOccurrence>) -> Self {
        Self {
            priority_level: rotation.priority_level,
            rotation_id: rotation.id.clone(),
            source: rotation.source_label(),
            occurrences,
        }
    }
}

/// Reference to the occurrence that won a final event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftRef {
    /// Source rotation id.
    pub pk: String,
    pub occurrence_index: u64,
}

/// One interval of the final schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Omitted for gaps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_level: Option<u32>,
    /// Omitted for gaps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift: Option<ShiftRef>,
    /// Omitted for gaps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub users: UserGroup,
    pub is_gap: bool,
    pub is_empty: bool,
    pub missing_users: UserGroup,
}

impl FinalEvent {
    fn gap(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            priority_level: None,
            shift: None,
            source: None,
            users: UserGroup::new(),
            is_gap: true,
            is_empty: false,
            missing_users: UserGroup::new(),
        }
    }

    pub fn source_rotation_id(&self) -> Option<&str> {
        self.shift.as_ref().map(|shift| shift.pk.as_str())
    }

    fn same_coverage(&self, other: &FinalEvent) -> bool {
        self.priority_level == other.priority_level
            && self.source_rotation_id() == other.source_rotation_id()
            && self.users == other.users
            && self.missing_users == other.missing_users
    }
}

// ── compose ─────────────────────────────────────────────────────────────────

struct Candidate<'a> {
    layer_order: usize,
    layer: &'a Layer,
    occurrence: &'a ShiftOccurrence,
    /// Bounds clipped to the window.
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Candidate<'_> {
    fn rank(&self) -> (u32, usize, DateTime<Utc>, u64) {
        (
            self.layer.priority_level,
            self.layer_order,
            self.occurrence.start,
            self.occurrence.occurrence_index,
        )
    }
}

/// Compose `layers` (in definition order) over `[window_start, window_end)`,
/// treating every assigned user as resolvable.
pub fn compose(
    layers: &[Layer],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<FinalEvent> {
    compose_with_directory(layers, window_start, window_end, &AllUsersKnown)
}

/// Compose `layers` (in definition order) over `[window_start, window_end)`.
///
/// Returns no events for an empty or inverted window.
pub fn compose_with_directory(
    layers: &[Layer],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    directory: &dyn UserDirectory,
) -> Vec<FinalEvent> {
    if window_end <= window_start {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate<'_>> = layers
        .iter()
        .enumerate()
        .flat_map(|(layer_order, layer)| {
            layer.occurrences.iter().filter_map(move |occurrence| {
                let start = occurrence.start.max(window_start);
                let end = occurrence.end.min(window_end);
                (start < end).then_some(Candidate {
                    layer_order,
                    layer,
                    occurrence,
                    start,
                    end,
                })
            })
        })
        .collect();
    candidates.sort_by_key(|candidate| (candidate.start, candidate.rank()));

    let mut boundaries: Vec<DateTime<Utc>> = candidates
        .iter()
        .flat_map(|candidate| [candidate.start, candidate.end])
        .chain([window_start, window_end])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut events: Vec<FinalEvent> = Vec::new();
    let mut pending = candidates.iter().peekable();
    let mut active: Vec<&Candidate<'_>> = Vec::new();

    for pair in boundaries.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        while let Some(candidate) = pending.next_if(|candidate| candidate.start <= from) {
            active.push(candidate);
        }
        active.retain(|candidate| candidate.end > from);

        let event = match active.iter().max_by_key(|candidate| candidate.rank()) {
            None => FinalEvent::gap(from, to),
            Some(winner) => covered_event(winner, from, to, directory),
        };
        push_coalesced(&mut events, event);
    }

    tracing::debug!(
        layers = layers.len(),
        candidates = candidates.len(),
        events = events.len(),
        "composed final schedule"
    );
    events
}

fn covered_event(
    winner: &Candidate<'_>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    directory: &dyn UserDirectory,
) -> FinalEvent {
    let (users, missing_users): (UserGroup, UserGroup) = winner
        .occurrence
        .assigned_users
        .iter()
        .cloned()
        .partition(|user| directory.contains(user));

    FinalEvent {
        start,
        end,
        priority_level: Some(winner.layer.priority_level),
        shift: Some(ShiftRef {
            pk: winner.layer.rotation_id.clone(),
            occurrence_index: winner.occurrence.occurrence_index,
        }),
        source: Some(winner.layer.source.clone()),
        is_gap: false,
        is_empty: users.is_empty(),
        users,
        missing_users,
    }
}

fn push_coalesced(events: &mut Vec<FinalEvent>, event: FinalEvent) {
    if let Some(last) = events.last_mut() {
        if last.end == event.start && last.same_coverage(&event) {
            last.end = event.end;
            return;
        }
    }
    events.push(event);
}
