//! Postgres-backed store.
//!
//! Event documents live in one `events` table with the four entrant lists as
//! JSONB columns. Commits run as read-modify-write transactions with
//! `SELECT ... FOR UPDATE` and re-check the latch flag inside the
//! transaction, so overlapping job runs cannot double-apply a transition.
//! Notification batches insert with `ON CONFLICT (dispatch_key) DO NOTHING`,
//! which makes a retried lottery run duplicate-free.
//!
//! Queries are built with runtime `sqlx::query` (not the compile-time checked
//! macros) so the crate builds without a live database.

use super::{CommitOutcome, EventStore, NotificationSink, ProfileDirectory, StoreError};
use crate::entities::{
    EntrantId, EventId, EventRecord, Notification, ProfileSnapshot, union_append,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;

/// Postgres implementation of the storage seams.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

const EVENT_COLUMNS: &str = "id, name, organizer, registration_start, registration_end, \
     event_start, registration_opened, lottery_processed, pending_expired, \
     capacity, wait_list, accepted_list, pending_list, declined_list";

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                organizer           JSONB NOT NULL,
                registration_start  TIMESTAMPTZ NOT NULL,
                registration_end    TIMESTAMPTZ NOT NULL,
                event_start         TIMESTAMPTZ NOT NULL,
                registration_opened BOOLEAN NOT NULL DEFAULT FALSE,
                lottery_processed   BOOLEAN NOT NULL DEFAULT FALSE,
                pending_expired     BOOLEAN NOT NULL DEFAULT FALSE,
                capacity            INTEGER NOT NULL,
                wait_list           JSONB NOT NULL DEFAULT '[]',
                accepted_list       JSONB NOT NULL DEFAULT '[]',
                pending_list        JSONB NOT NULL DEFAULT '[]',
                declined_list       JSONB NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                device_id    TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                contact      TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id           UUID PRIMARY KEY,
                sender       JSONB NOT NULL,
                receiver     JSONB NOT NULL,
                message      TEXT NOT NULL,
                "read"       BOOLEAN NOT NULL DEFAULT FALSE,
                created_at   TIMESTAMPTZ NOT NULL,
                dispatch_key TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due(&self, time_column: &str, flag_column: &str, now: OffsetDateTime)
    -> Result<Vec<EventRecord>, StoreError> {
        // Column names come from the three fixed call sites, never from input.
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE {time_column} <= $1 AND NOT {flag_column} \
             ORDER BY {time_column}, id"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: &PgRow) -> Result<EventRecord, StoreError> {
    let id = EventId(row.try_get::<String, _>("id")?);
    let malformed = |e: sqlx::Error| StoreError::Malformed {
        id: id.clone(),
        reason: e.to_string(),
    };

    let capacity: i32 = row.try_get("capacity").map_err(malformed)?;
    Ok(EventRecord {
        name: row.try_get("name").map_err(malformed)?,
        organizer: row
            .try_get::<Json<ProfileSnapshot>, _>("organizer")
            .map_err(malformed)?
            .0,
        registration_start: row.try_get("registration_start").map_err(malformed)?,
        registration_end: row.try_get("registration_end").map_err(malformed)?,
        event_start: row.try_get("event_start").map_err(malformed)?,
        registration_opened: row.try_get("registration_opened").map_err(malformed)?,
        lottery_processed: row.try_get("lottery_processed").map_err(malformed)?,
        pending_expired: row.try_get("pending_expired").map_err(malformed)?,
        // A negative stored capacity is clamped rather than rejected; the
        // draw math never sees it as more than zero free slots.
        capacity: capacity.max(0) as u32,
        wait_list: row
            .try_get::<Json<Vec<EntrantId>>, _>("wait_list")
            .map_err(malformed)?
            .0,
        accepted_list: row
            .try_get::<Json<Vec<EntrantId>>, _>("accepted_list")
            .map_err(malformed)?
            .0,
        pending_list: row
            .try_get::<Json<Vec<EntrantId>>, _>("pending_list")
            .map_err(malformed)?
            .0,
        declined_list: row
            .try_get::<Json<Vec<EntrantId>>, _>("declined_list")
            .map_err(malformed)?
            .0,
        id,
    })
}

#[async_trait]
impl EventStore for PgStore {
    async fn due_for_registration_open(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.due("registration_start", "registration_opened", now).await
    }

    async fn due_for_lottery(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError> {
        self.due("registration_end", "lottery_processed", now).await
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> Result<Vec<EventRecord>, StoreError> {
        self.due("event_start", "pending_expired", now).await
    }

    async fn open_registration(&self, id: &EventId) -> Result<CommitOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE events SET registration_opened = TRUE \
             WHERE id = $1 AND NOT registration_opened",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CommitOutcome::Applied);
        }

        let exists = sqlx::query("SELECT 1 FROM events WHERE id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(CommitOutcome::AlreadyProcessed),
            None => Err(StoreError::EventNotFound(id.clone())),
        }
    }

    async fn commit_lottery(
        &self,
        id: &EventId,
        remaining: &[EntrantId],
        winners: &[EntrantId],
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT lottery_processed, pending_list FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(&id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::EventNotFound(id.clone()))?;

        if row.try_get::<bool, _>("lottery_processed")? {
            return Ok(CommitOutcome::AlreadyProcessed);
        }
        let pending: Json<Vec<EntrantId>> = row.try_get("pending_list")?;
        let pending = union_append(&pending.0, winners);

        sqlx::query(
            "UPDATE events SET wait_list = $2, pending_list = $3, lottery_processed = TRUE \
             WHERE id = $1",
        )
        .bind(&id.0)
        .bind(Json(remaining))
        .bind(Json(&pending))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Applied)
    }

    async fn expire_pending(&self, id: &EventId) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT pending_expired, pending_list, declined_list FROM events \
             WHERE id = $1 FOR UPDATE",
        )
        .bind(&id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::EventNotFound(id.clone()))?;

        if row.try_get::<bool, _>("pending_expired")? {
            return Ok(CommitOutcome::AlreadyProcessed);
        }
        let pending: Json<Vec<EntrantId>> = row.try_get("pending_list")?;
        let declined: Json<Vec<EntrantId>> = row.try_get("declined_list")?;
        let declined = union_append(&declined.0, &pending.0);

        sqlx::query(
            "UPDATE events SET pending_list = '[]', declined_list = $2, pending_expired = TRUE \
             WHERE id = $1",
        )
        .bind(&id.0)
        .bind(Json(&declined))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Applied)
    }
}

#[async_trait]
impl ProfileDirectory for PgStore {
    async fn find_by_device_id(
        &self,
        id: &EntrantId,
    ) -> Result<Option<ProfileSnapshot>, StoreError> {
        let row = sqlx::query("SELECT device_id, display_name, contact FROM profiles WHERE device_id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(ProfileSnapshot {
                device_id: EntrantId(row.try_get("device_id")?),
                display_name: row.try_get("display_name")?,
                contact: row.try_get("contact")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl NotificationSink for PgStore {
    async fn create_batch(&self, batch: &[Notification]) -> Result<u64, StoreError> {
        // One transaction per event cohort: either the whole batch lands or
        // none of it does.
        let mut tx = self.pool.begin().await?;
        let mut created = 0u64;

        for notification in batch {
            let result = sqlx::query(
                r#"
                INSERT INTO notifications
                    (id, sender, receiver, message, "read", created_at, dispatch_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (dispatch_key) DO NOTHING
                "#,
            )
            .bind(notification.id)
            .bind(Json(&notification.sender))
            .bind(Json(&notification.receiver))
            .bind(&notification.message)
            .bind(notification.read)
            .bind(notification.created_at)
            .bind(&notification.dispatch_key)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }

        tx.commit().await?;
        Ok(created)
    }
}
