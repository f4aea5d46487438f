pub mod notification;

pub use notification::{LotteryOutcome, Notification};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Opaque event identifier assigned by the registration app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Entrant identifier: the device id the registration app keys entrants by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntrantId(pub String);

impl std::fmt::Display for EntrantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntrantId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Profile snapshot used as notification sender/receiver.
///
/// Resolved read-only from the profile directory; the engine never writes
/// profiles back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub device_id: EntrantId,
    pub display_name: String,
    #[serde(default)]
    pub contact: Option<String>,
}

/// One event document.
///
/// The scheduling timestamps and capacity are fixed at creation by the
/// registration flow. This engine only flips the three latch flags and moves
/// entrants between the four lists; an entrant id is in at most one list at
/// any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub name: String,
    pub organizer: ProfileSnapshot,

    pub registration_start: OffsetDateTime,
    pub registration_end: OffsetDateTime,
    pub event_start: OffsetDateTime,

    pub registration_opened: bool,
    pub lottery_processed: bool,
    pub pending_expired: bool,

    pub capacity: u32,

    pub wait_list: Vec<EntrantId>,
    pub accepted_list: Vec<EntrantId>,
    pub pending_list: Vec<EntrantId>,
    pub declined_list: Vec<EntrantId>,
}

impl EventRecord {
    /// Remaining invitation slots: capacity minus confirmed entrants,
    /// clamped at zero for over-booked events.
    pub fn slots_to_fill(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.accepted_list.len())
    }
}

/// Append `additions` to `base` preserving order, skipping ids already
/// present. This is the set-union-without-duplicates update the document
/// store exposes as an array union, made explicit.
pub fn union_append(base: &[EntrantId], additions: &[EntrantId]) -> Vec<EntrantId> {
    let mut merged = base.to_vec();
    for id in additions {
        if !merged.contains(id) {
            merged.push(id.clone());
        }
    }
    merged
}
