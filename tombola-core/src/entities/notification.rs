//! Lottery outcome notifications.
//!
//! One notification record is created per (event, entrant, outcome) and never
//! mutated afterwards. The `dispatch_key` is deterministic over that triple so
//! a retried lottery run re-creates the same keys and the sink can drop the
//! duplicates instead of notifying an entrant twice.

use super::{EntrantId, EventId, EventRecord, ProfileSnapshot};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Which side of the draw an entrant landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotteryOutcome {
    Selected,
    NotSelected,
}

impl LotteryOutcome {
    fn as_str(self) -> &'static str {
        match self {
            LotteryOutcome::Selected => "selected",
            LotteryOutcome::NotSelected => "not_selected",
        }
    }
}

/// A notification record as written to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub sender: ProfileSnapshot,
    pub receiver: ProfileSnapshot,
    pub message: String,
    pub read: bool,
    pub created_at: OffsetDateTime,
    /// Idempotency token, unique per (event, entrant, outcome).
    pub dispatch_key: String,
}

impl Notification {
    /// Build the notification for one entrant's lottery outcome.
    ///
    /// The sender is the event organizer's profile snapshot, per the source
    /// data model.
    pub fn lottery_outcome(
        event: &EventRecord,
        receiver: ProfileSnapshot,
        outcome: LotteryOutcome,
        created_at: OffsetDateTime,
    ) -> Self {
        let message = match outcome {
            LotteryOutcome::Selected => format!(
                "You were selected in the draw for \"{}\"! Open the event to accept or decline your invitation.",
                event.name
            ),
            LotteryOutcome::NotSelected => format!(
                "You were not selected in the draw for \"{}\". If a selected entrant declines, a spot may open up again.",
                event.name
            ),
        };

        Self {
            id: Uuid::new_v4(),
            sender: event.organizer.clone(),
            dispatch_key: dispatch_key(&event.id, &receiver.device_id, outcome),
            receiver,
            message,
            read: false,
            created_at,
        }
    }
}

/// Deterministic idempotency key for one lottery outcome.
pub fn dispatch_key(event: &EventId, entrant: &EntrantId, outcome: LotteryOutcome) -> String {
    format!("{}:{}:{}", event, entrant, outcome.as_str())
}
