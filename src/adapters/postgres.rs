use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::traits::{CasOutcome, ControlStore, ControlSubscription};
use crate::domain::{ControlCommand, ControlRecord};
use crate::error::{DroverError, Result};

/// Channel the `agent_control` trigger notifies on
pub const NOTIFY_CHANNEL: &str = "agent_control";

/// SQLSTATE for `feature_not_supported` (e.g. LISTEN behind a transaction pooler)
const FEATURE_NOT_SUPPORTED: &str = "0A000";

/// PostgreSQL-backed control store.
///
/// The record lives in `agent_control`; every insert or update fires
/// `pg_notify('agent_control', key)` from a trigger, which is what push
/// subscriptions listen to.
#[derive(Clone)]
pub struct PostgresControlStore {
    pool: PgPool,
    key: String,
    push_enabled: bool,
}

impl PostgresControlStore {
    /// Connect a new pool
    pub async fn connect(database_url: &str, max_connections: u32, key: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self::from_pool(pool, key))
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool, key: &str) -> Self {
        Self {
            pool,
            key: key.to_string(),
            push_enabled: true,
        }
    }

    /// Disable push subscriptions (forces polling)
    pub fn with_push(mut self, enabled: bool) -> Self {
        self.push_enabled = enabled;
        self
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch(&self) -> Result<Option<ControlRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, command, version, updated_at, reason, updated_by
            FROM agent_control WHERE key = $1
            "#,
        )
        .bind(&self.key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }
}

fn row_to_record(row: &PgRow) -> Result<ControlRecord> {
    let command: String = row.get("command");
    let timestamp: DateTime<Utc> = row.get("updated_at");
    Ok(ControlRecord {
        key: row.get("key"),
        command: command.parse::<ControlCommand>()?,
        version: row.get("version"),
        timestamp,
        reason: row.get("reason"),
        updated_by: row.get("updated_by"),
    })
}

/// Map a LISTEN failure to capability-unavailable or a transient store error
fn classify_listen_error(err: sqlx::Error) -> DroverError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(FEATURE_NOT_SUPPORTED) {
            return DroverError::CapabilityUnavailable(format!(
                "LISTEN/NOTIFY not supported by this deployment: {}",
                db.message()
            ));
        }
    }
    DroverError::Store(err.to_string())
}

#[async_trait]
impl ControlStore for PostgresControlStore {
    #[instrument(skip(self), fields(key = %self.key))]
    async fn load(&self) -> Result<ControlRecord> {
        if let Some(record) = self.fetch().await? {
            return Ok(record);
        }

        let initial = ControlRecord::initial(self.key.clone());
        sqlx::query(
            r#"
            INSERT INTO agent_control (key, command, version, updated_at, reason, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&initial.key)
        .bind(initial.command.as_str())
        .bind(initial.version)
        .bind(initial.timestamp)
        .bind(&initial.reason)
        .bind(&initial.updated_by)
        .execute(&self.pool)
        .await?;
        info!("Initialized control record {}", self.key);

        // Another instance may have won the insert
        self.fetch()
            .await?
            .ok_or_else(|| DroverError::Store(format!("control record {} vanished", self.key)))
    }

    #[instrument(skip(self, next), fields(key = %self.key, next_version = next.version))]
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        next: &ControlRecord,
    ) -> Result<CasOutcome> {
        if next.version != expected_version + 1 {
            return Err(DroverError::Validation(format!(
                "next version {} must follow expected version {}",
                next.version, expected_version
            )));
        }

        let row = sqlx::query(
            r#"
            UPDATE agent_control
            SET command = $3, version = $4, updated_at = $5, reason = $6, updated_by = $7
            WHERE key = $1 AND version = $2
            RETURNING key, command, version, updated_at, reason, updated_by
            "#,
        )
        .bind(&self.key)
        .bind(expected_version)
        .bind(next.command.as_str())
        .bind(next.version)
        .bind(next.timestamp)
        .bind(&next.reason)
        .bind(&next.updated_by)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(CasOutcome::Written(row_to_record(&row)?)),
            None => {
                debug!("CAS conflict: expected v{}", expected_version);
                Ok(CasOutcome::Conflict)
            }
        }
    }

    async fn subscribe(&self) -> Result<Box<dyn ControlSubscription>> {
        if !self.push_enabled {
            return Err(DroverError::CapabilityUnavailable(
                "push notifications disabled by configuration".to_string(),
            ));
        }

        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(classify_listen_error)?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .map_err(classify_listen_error)?;

        debug!("Listening on {} for {}", NOTIFY_CHANNEL, self.key);
        Ok(Box::new(PgSubscription {
            listener,
            key: self.key.clone(),
        }))
    }
}

struct PgSubscription {
    listener: PgListener,
    key: String,
}

#[async_trait]
impl ControlSubscription for PgSubscription {
    async fn changed(&mut self) -> Result<()> {
        loop {
            let notification = self
                .listener
                .try_recv()
                .await
                .map_err(|e| DroverError::Store(format!("listener error: {}", e)))?;

            if notification_matches(notification.as_ref().map(|n| n.payload()), &self.key)? {
                return Ok(());
            }
        }
    }
}

/// `None` means the listener connection dropped. Notifications sent before
/// it reconnects are lost, so the caller must resubscribe and re-read.
fn notification_matches(payload: Option<&str>, key: &str) -> Result<bool> {
    match payload {
        // The channel is shared by every record key
        Some(payload) => Ok(payload == key),
        None => Err(DroverError::Store("listener connection lost".to_string())),
    }
}
