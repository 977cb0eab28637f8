//! SQLite stack store.
//!
//! Two tables: `stacks` holds the JSON snapshot next to its state column so
//! that compare-and-swap is a single conditional `UPDATE`, and
//! `teardown_schedules` holds deadlines as epoch milliseconds with a revision
//! counter. Safe for several processes sharing one database file.

use crate::error::{StoreError, StoreResult};
use crate::traits::StackStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ephem_types::{Stack, StackName, StackState, TeardownSchedule};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const STACK_COLUMNS: &str = r#"
    SELECT s.data AS data, t.deadline_ms AS deadline_ms
    FROM stacks s
    LEFT JOIN teardown_schedules t ON t.stack_name = s.name
"#;

/// SQLite-backed stack store
#[derive(Debug, Clone)]
pub struct SqliteStackStore {
    pool: SqlitePool,
}

impl SqliteStackStore {
    /// Open (creating if missing) a database file and initialize the schema.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Connect using a `sqlite:` URL.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS stacks (
                name TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                state TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS stacks_state ON stacks(state);"#,
            r#"
            CREATE TABLE IF NOT EXISTS teardown_schedules (
                stack_name TEXT PRIMARY KEY REFERENCES stacks(name),
                deadline_ms INTEGER,
                last_modified_at_ms INTEGER NOT NULL,
                revision INTEGER NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS teardown_schedules_deadline ON teardown_schedules(deadline_ms);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn to_json(stack: &Stack) -> StoreResult<String> {
        serde_json::to_string(stack)
            .map_err(|e| StoreError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_row(row: &SqliteRow) -> StoreResult<Stack> {
        let data: String = row
            .try_get("data")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let deadline_ms: Option<i64> = row
            .try_get("deadline_ms")
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut stack: Stack = serde_json::from_str(&data)
            .map_err(|e| StoreError::InvalidData(format!("json deserialize error: {}", e)))?;
        stack.teardown_deadline = deadline_ms.map(from_millis).transpose()?;
        Ok(stack)
    }

    async fn fetch_stacks(&self, filter: &str, now_ms: Option<i64>) -> StoreResult<Vec<Stack>> {
        let sql = format!("{} {} ORDER BY s.name", STACK_COLUMNS, filter);
        let mut query = sqlx::query(&sql);
        if let Some(now_ms) = now_ms {
            query = query.bind(now_ms);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn stored_state(&self, name: &StackName) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT state FROM stacks WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        row.map(|r| r.try_get::<String, _>("state"))
            .transpose()
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {}", ms)))
}

fn revision_to_i64(revision: u64) -> StoreResult<i64> {
    i64::try_from(revision)
        .map_err(|_| StoreError::InvalidData(format!("revision out of range: {}", revision)))
}

#[async_trait]
impl StackStore for SqliteStackStore {
    async fn create(&self, stack: &Stack) -> StoreResult<Stack> {
        let data = Self::to_json(stack)?;
        let created_ms = stack.created_at.timestamp_millis();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stacks (name, provider, state, data, created_at_ms, updated_at_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                provider = excluded.provider,
                state = excluded.state,
                data = excluded.data,
                created_at_ms = excluded.created_at_ms,
                updated_at_ms = excluded.updated_at_ms
            WHERE stacks.state = 'destroyed'
            "#,
        )
        .bind(stack.name.as_str())
        .bind(stack.provider.as_str())
        .bind(stack.state.as_str())
        .bind(&data)
        .bind(created_ms)
        .bind(created_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(stack.name.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO teardown_schedules (stack_name, deadline_ms, last_modified_at_ms, revision)
            VALUES (?, ?, ?, 0)
            ON CONFLICT (stack_name)
            DO UPDATE SET
                deadline_ms = EXCLUDED.deadline_ms,
                last_modified_at_ms = EXCLUDED.last_modified_at_ms,
                revision = teardown_schedules.revision + 1
            "#,
        )
        .bind(stack.name.as_str())
        .bind(stack.teardown_deadline.map(|d| d.timestamp_millis()))
        .bind(created_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!(stack = %stack.name, "Stack record created");
        self.get(&stack.name).await
    }

    async fn get(&self, name: &StackName) -> StoreResult<Stack> {
        let sql = format!("{} WHERE s.name = ?", STACK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(row) => Self::from_row(&row),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    async fn compare_and_swap(
        &self,
        name: &StackName,
        expected: StackState,
        snapshot: &Stack,
    ) -> StoreResult<Stack> {
        if snapshot.name != *name {
            return Err(StoreError::InvalidData(format!(
                "snapshot for {} written under {}",
                snapshot.name, name
            )));
        }

        let data = Self::to_json(snapshot)?;
        let result = sqlx::query(
            r#"
            UPDATE stacks
            SET state = ?, data = ?, updated_at_ms = ?
            WHERE name = ? AND state = ?
            "#,
        )
        .bind(snapshot.state.as_str())
        .bind(&data)
        .bind(Utc::now().timestamp_millis())
        .bind(name.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return match self.stored_state(name).await? {
                None => Err(StoreError::NotFound(name.to_string())),
                Some(actual) => Err(StoreError::conflict(
                    name.as_str(),
                    format!("expected state {}, found {}", expected, actual),
                )),
            };
        }

        let schedule = self.get_schedule(name).await?;
        let mut stored = snapshot.clone();
        stored.teardown_deadline = schedule.deadline;
        Ok(stored)
    }

    async fn list_active(&self) -> StoreResult<Vec<Stack>> {
        self.fetch_stacks("WHERE s.state != 'destroyed'", None).await
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Stack>> {
        self.fetch_stacks(
            "WHERE s.state != 'destroyed' AND t.deadline_ms IS NOT NULL AND t.deadline_ms <= ?",
            Some(now.timestamp_millis()),
        )
        .await
    }

    async fn list_all(&self) -> StoreResult<Vec<Stack>> {
        self.fetch_stacks("", None).await
    }

    async fn get_schedule(&self, name: &StackName) -> StoreResult<TeardownSchedule> {
        let row = sqlx::query(
            "SELECT deadline_ms, last_modified_at_ms, revision FROM teardown_schedules WHERE stack_name = ?",
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
        .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let deadline_ms: Option<i64> = row
            .try_get("deadline_ms")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let modified_ms: i64 = row
            .try_get("last_modified_at_ms")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let revision: i64 = row
            .try_get("revision")
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(TeardownSchedule {
            stack_name: name.clone(),
            deadline: deadline_ms.map(from_millis).transpose()?,
            last_modified_at: from_millis(modified_ms)?,
            revision: u64::try_from(revision)
                .map_err(|_| StoreError::InvalidData(format!("negative revision {}", revision)))?,
        })
    }

    async fn swap_schedule(
        &self,
        name: &StackName,
        expected_revision: u64,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<TeardownSchedule> {
        let result = sqlx::query(
            r#"
            UPDATE teardown_schedules
            SET deadline_ms = ?, last_modified_at_ms = ?, revision = revision + 1
            WHERE stack_name = ? AND revision = ?
            "#,
        )
        .bind(deadline.map(|d| d.timestamp_millis()))
        .bind(now.timestamp_millis())
        .bind(name.as_str())
        .bind(revision_to_i64(expected_revision)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            let current = self.get_schedule(name).await?;
            return Err(StoreError::conflict(
                name.as_str(),
                format!(
                    "expected schedule revision {}, found {}",
                    expected_revision, current.revision
                ),
            ));
        }

        self.get_schedule(name).await
    }
}
