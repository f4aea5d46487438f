//! In-memory store.
//!
//! Backs the standalone demo mode and the test suites. Implements all three
//! storage seams over a single mutex-guarded state, which also gives it the
//! per-document isolation the contract asks for: every scan and commit holds
//! the lock for its whole read-modify-write.

use super::{CommitOutcome, EventStore, NotificationSink, ProfileDirectory, StoreError};
use crate::entities::{
    EntrantId, EventId, EventRecord, Notification, ProfileSnapshot, union_append,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<EventId, EventRecord>,
    profiles: HashMap<EntrantId, ProfileSnapshot>,
    notifications: Vec<Notification>,
    dispatch_keys: HashSet<String>,
}

/// Mutex-guarded in-memory implementation of the storage seams.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an event document.
    pub fn insert_event(&self, event: EventRecord) {
        self.lock().events.insert(event.id.clone(), event);
    }

    /// Insert or replace a profile snapshot.
    pub fn insert_profile(&self, profile: ProfileSnapshot) {
        self.lock()
            .profiles
            .insert(profile.device_id.clone(), profile);
    }

    /// Current state of one event document.
    pub fn event(&self, id: &EventId) -> Option<EventRecord> {
        self.lock().events.get(id).cloned()
    }

    /// Snapshot of all notifications created so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn due_for_registration_open(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .events
            .values()
            .filter(|e| e.registration_start <= now && !e.registration_opened)
            .cloned()
            .collect())
    }

    async fn due_for_lottery(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .events
            .values()
            .filter(|e| e.registration_end <= now && !e.lottery_processed)
            .cloned()
            .collect())
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .events
            .values()
            .filter(|e| e.event_start <= now && !e.pending_expired)
            .cloned()
            .collect())
    }

    async fn open_registration(&self, id: &EventId) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock();
        let event = inner
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::EventNotFound(id.clone()))?;
        if event.registration_opened {
            return Ok(CommitOutcome::AlreadyProcessed);
        }
        event.registration_opened = true;
        Ok(CommitOutcome::Applied)
    }

    async fn commit_lottery(
        &self,
        id: &EventId,
        remaining: &[EntrantId],
        winners: &[EntrantId],
    ) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock();
        let event = inner
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::EventNotFound(id.clone()))?;
        if event.lottery_processed {
            return Ok(CommitOutcome::AlreadyProcessed);
        }
        event.wait_list = remaining.to_vec();
        event.pending_list = union_append(&event.pending_list, winners);
        event.lottery_processed = true;
        Ok(CommitOutcome::Applied)
    }

    async fn expire_pending(&self, id: &EventId) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock();
        let event = inner
            .events
            .get_mut(id)
            .ok_or_else(|| StoreError::EventNotFound(id.clone()))?;
        if event.pending_expired {
            return Ok(CommitOutcome::AlreadyProcessed);
        }
        let pending = std::mem::take(&mut event.pending_list);
        event.declined_list = union_append(&event.declined_list, &pending);
        event.pending_expired = true;
        Ok(CommitOutcome::Applied)
    }
}

#[async_trait]
impl ProfileDirectory for MemoryStore {
    async fn find_by_device_id(
        &self,
        id: &EntrantId,
    ) -> Result<Option<ProfileSnapshot>, StoreError> {
        Ok(self.lock().profiles.get(id).cloned())
    }
}

#[async_trait]
impl NotificationSink for MemoryStore {
    async fn create_batch(&self, batch: &[Notification]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut created = 0u64;
        for notification in batch {
            if inner.dispatch_keys.insert(notification.dispatch_key.clone()) {
                inner.notifications.push(notification.clone());
                created += 1;
            }
        }
        Ok(created)
    }
}

/// Fault injected by [`FaultyEventStore`] when committing one event.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum CommitFault {
    /// The commit fails with `StoreError::Unavailable`.
    Error,
    /// The commit never completes.
    Stall,
}

/// Wrapper that injects a commit fault for a single event id; scans and
/// every other event pass through to the inner store untouched.
#[cfg(test)]
pub(crate) struct FaultyEventStore {
    inner: std::sync::Arc<MemoryStore>,
    fault_id: EventId,
    fault: CommitFault,
}

#[cfg(test)]
impl FaultyEventStore {
    pub(crate) fn new(
        inner: std::sync::Arc<MemoryStore>,
        fault_id: EventId,
        fault: CommitFault,
    ) -> Self {
        Self {
            inner,
            fault_id,
            fault,
        }
    }

    async fn trip(&self) -> StoreError {
        match self.fault {
            CommitFault::Error => StoreError::Unavailable("injected commit failure".to_owned()),
            CommitFault::Stall => std::future::pending().await,
        }
    }
}

#[cfg(test)]
#[async_trait]
impl EventStore for FaultyEventStore {
    async fn due_for_registration_open(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.due_for_registration_open(now).await
    }

    async fn due_for_lottery(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.due_for_lottery(now).await
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.due_for_expiry(now).await
    }

    async fn open_registration(&self, id: &EventId) -> Result<CommitOutcome, StoreError> {
        if *id == self.fault_id {
            return Err(self.trip().await);
        }
        self.inner.open_registration(id).await
    }

    async fn commit_lottery(
        &self,
        id: &EventId,
        remaining: &[EntrantId],
        winners: &[EntrantId],
    ) -> Result<CommitOutcome, StoreError> {
        if *id == self.fault_id {
            return Err(self.trip().await);
        }
        self.inner.commit_lottery(id, remaining, winners).await
    }

    async fn expire_pending(&self, id: &EventId) -> Result<CommitOutcome, StoreError> {
        if *id == self.fault_id {
            return Err(self.trip().await);
        }
        self.inner.expire_pending(id).await
    }
}
