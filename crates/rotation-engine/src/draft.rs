//! Immutable rotation editing draft.
//!
//! An editing surface holds a [`RotationDraft`], feeds every user edit through
//! [`RotationDraft::apply`] to get the next draft, and calls
//! [`RotationDraft::commit`] once to produce the payload sent to the host.

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::rotation::{Frequency, UserId};
use crate::timezone::{resolve_timezone_or_utc, to_instant};
use crate::wire::{weekday_code, RotationPayload};

const DEFAULT_SHIFT_START_HOUR: u32 = 12;
const DEFAULT_SHIFT_END_HOUR: u32 = 19;

/// Every field an editor can change before committing a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationDraft {
    /// Position of the layer being edited; the committed priority is
    /// `layer_index + 1`.
    pub layer_index: u32,
    pub title: String,
    pub time_zone: String,
    pub shift_start: DateTime<Utc>,
    pub shift_end: DateTime<Utc>,
    pub rotation_start: DateTime<Utc>,
    /// Only sent when `endless` is off.
    pub rotation_end: DateTime<Utc>,
    pub endless: bool,
    pub frequency: Frequency,
    pub interval: u32,
    /// Weekly days in selection order.
    pub selected_days: Vec<Weekday>,
    pub week_start: Weekday,
    pub groups: Vec<Vec<UserId>>,
}

/// One edit to a [`RotationDraft`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum DraftAction {
    SetTitle(String),
    SetTimeZone(String),
    SetShiftStart(DateTime<Utc>),
    SetShiftEnd(DateTime<Utc>),
    SetRotationStart(DateTime<Utc>),
    SetRotationEnd(DateTime<Utc>),
    SetEndless(bool),
    SetFrequency(Frequency),
    SetInterval(u32),
    /// Select the day, or deselect it if already selected.
    ToggleDay(Weekday),
    SetWeekStart(Weekday),
    AddGroup,
    RemoveGroup(usize),
    AddUser { group: usize, user: UserId },
    RemoveUser { group: usize, user: UserId },
    SetGroups(Vec<Vec<UserId>>),
}

impl RotationDraft {
    /// A fresh draft for layer `layer_index`: a 12:00–19:00 daily shift on
    /// `reference` in `time_zone`, no end, one empty group.
    pub fn new(layer_index: u32, reference: NaiveDate, time_zone: impl Into<String>) -> Self {
        let time_zone = time_zone.into();
        let tz = resolve_timezone_or_utc(&time_zone).tz;
        let at_hour = |date: NaiveDate, hour: u32| {
            let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
            to_instant(date, time, tz)
        };
        let month_later = reference.checked_add_months(Months::new(1)).unwrap_or(reference);

        Self {
            layer_index,
            title: format!("Rotation {}", layer_index + 1),
            shift_start: at_hour(reference, DEFAULT_SHIFT_START_HOUR),
            shift_end: at_hour(reference, DEFAULT_SHIFT_END_HOUR),
            rotation_start: at_hour(reference, DEFAULT_SHIFT_START_HOUR),
            rotation_end: at_hour(month_later, DEFAULT_SHIFT_START_HOUR),
            time_zone,
            endless: true,
            frequency: Frequency::Daily,
            interval: 1,
            selected_days: Vec::new(),
            week_start: Weekday::Mon,
            groups: vec![Vec::new()],
        }
    }

    /// The draft after `action`. Edits addressing a group that does not exist
    /// leave the draft unchanged.
    #[must_use]
    pub fn apply(&self, action: DraftAction) -> Self {
        let mut next = self.clone();
        match action {
            DraftAction::SetTitle(title) => next.title = title,
            DraftAction::SetTimeZone(time_zone) => next.time_zone = time_zone,
            DraftAction::SetShiftStart(at) => next.shift_start = at,
            DraftAction::SetShiftEnd(at) => next.shift_end = at,
            DraftAction::SetRotationStart(at) => next.rotation_start = at,
            DraftAction::SetRotationEnd(at) => next.rotation_end = at,
            DraftAction::SetEndless(endless) => next.endless = endless,
            DraftAction::SetFrequency(frequency) => next.frequency = frequency,
            DraftAction::SetInterval(interval) => next.interval = interval,
            DraftAction::ToggleDay(day) => {
                if let Some(position) = next.selected_days.iter().position(|d| *d == day) {
                    next.selected_days.remove(position);
                } else {
                    next.selected_days.push(day);
                }
            }
            DraftAction::SetWeekStart(day) => next.week_start = day,
            DraftAction::AddGroup => next.groups.push(Vec::new()),
            DraftAction::RemoveGroup(group) => {
                if group < next.groups.len() {
                    next.groups.remove(group);
                }
            }
            DraftAction::AddUser { group, user } => {
                if let Some(members) = next.groups.get_mut(group) {
                    if !members.contains(&user) {
                        members.push(user);
                    }
                }
            }
            DraftAction::RemoveUser { group, user } => {
                if let Some(members) = next.groups.get_mut(group) {
                    members.retain(|member| *member != user);
                }
            }
            DraftAction::SetGroups(groups) => next.groups = groups,
        }
        next
    }

    /// Fold a sequence of edits.
    #[must_use]
    pub fn apply_all(&self, actions: impl IntoIterator<Item = DraftAction>) -> Self {
        actions
            .into_iter()
            .fold(self.clone(), |draft, action| draft.apply(action))
    }

    /// The payload to send to the host.
    ///
    /// Empty groups are dropped, `by_day` is only sent for weekly rotations,
    /// and the payload is validated the same way the host validates it.
    ///
    /// # Errors
    ///
    /// The first [`ValidationError`] the payload breaks.
    pub fn commit(&self) -> Result<RotationPayload, ValidationError> {
        let payload = RotationPayload {
            title: self.title.clone(),
            rotation_start: self.rotation_start,
            until: (!self.endless).then_some(self.rotation_end),
            shift_start: self.shift_start,
            shift_end: self.shift_end,
            rolling_users: self
                .groups
                .iter()
                .filter(|group| !group.is_empty())
                .cloned()
                .collect(),
            frequency: self.frequency.code(),
            interval: Some(self.interval),
            by_day: (self.frequency == Frequency::Weekly).then(|| {
                self.selected_days
                    .iter()
                    .map(|day| weekday_code(*day).to_string())
                    .collect()
            }),
            priority_level: self.layer_index + 1,
            time_zone: Some(self.time_zone.clone()),
            week_start: Some(weekday_code(self.week_start).to_string()),
        };
        payload.clone().into_definition("draft", "")?;
        Ok(payload)
    }
}
