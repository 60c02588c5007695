use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{MessageStore, StoreLifecycle, StoredMessage, MESSAGES_TABLE, SIGNALS_TABLE};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Create missing tables on open.
    pub auto_migrate: bool,
    /// Upper bound for waiting on the connection, and SQLite's busy timeout
    /// while another writer holds the database lock.
    pub operation_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_migrate: true,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

/// SQLite-backed message store.
///
/// The connection sits behind an async mutex; `None` once the store has been
/// closed. Queries run on the blocking pool so the runtime keeps serving
/// other tasks while SQLite works.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
    operation_timeout: Duration,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Backend(format!("failed to open {}: {}", path.display(), e))
        })?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        if options.auto_migrate {
            Self::run_migrations(&conn)?;
        }

        info!("Message store opened at: {}", path.display());
        Self::from_connection(conn, options.operation_timeout)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::run_migrations(&conn)?;
        Self::from_connection(conn, StoreOptions::default().operation_timeout)
    }

    fn from_connection(
        conn: Connection,
        operation_timeout: Duration,
    ) -> Result<Self, StoreError> {
        conn.busy_timeout(operation_timeout)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            operation_timeout,
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_created_at
                ON messages(created_at);

            CREATE TABLE IF NOT EXISTS trade_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        debug!("Message store migrations applied");
        Ok(())
    }

    /// Run `f` against the live connection on the blocking pool.
    ///
    /// Only the wait for the connection is bounded here. Once `f` starts, its
    /// result is always reported; lock contention inside SQLite is bounded by
    /// the busy timeout set on open.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let guard = tokio::time::timeout(self.operation_timeout, conn.lock_owned())
            .await
            .map_err(|_| StoreError::Timeout(self.operation_timeout))?;

        let timeout = self.operation_timeout;
        tokio::task::spawn_blocking(move || match guard.as_ref() {
            Some(conn) => f(conn).map_err(|e| busy_as_timeout(e, timeout)),
            None => Err(StoreError::Closed),
        })
        .await
        .map_err(|e| StoreError::Backend(format!("storage task failed: {}", e)))?
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn busy_as_timeout(err: StoreError, timeout: Duration) -> StoreError {
    match err {
        StoreError::Busy => StoreError::Timeout(timeout),
        other => other,
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_message_row(row: &rusqlite::Row) -> rusqlite::Result<StoredMessage> {
    let created_at: String = row.get(3)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);

    Ok(StoredMessage {
        internal_id: row.get(0)?,
        external_id: row.get(1)?,
        text: row.get(2)?,
        created_at,
    })
}

const SELECT_MESSAGE: &str = "SELECT id, message_id, text, created_at FROM messages";

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create(&self, external_id: &str, text: &str) -> Result<i64, StoreError> {
        let external_id = external_id.to_string();
        let text = text.to_string();
        self.with_conn(move |conn| {
            let created_at = format_timestamp(Utc::now());
            let inserted = conn.execute(
                "INSERT INTO messages (message_id, text, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![external_id, text, created_at],
            );
            match inserted {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict { external_id }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("{} WHERE message_id = ?1", SELECT_MESSAGE);
            conn.query_row(&sql, rusqlite::params![external_id], parse_message_row)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn update_text(&self, internal_id: i64, text: &str) -> Result<StoredMessage, StoreError> {
        let text = text.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET text = ?1 WHERE id = ?2",
                rusqlite::params![text, internal_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(internal_id.to_string()));
            }

            let sql = format!("{} WHERE id = ?1", SELECT_MESSAGE);
            conn.query_row(&sql, rusqlite::params![internal_id], parse_message_row)
                .map_err(StoreError::from)
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let sql = format!(
                "{} ORDER BY created_at DESC, id DESC LIMIT ?1",
                SELECT_MESSAGE
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map(rusqlite::params![limit], parse_message_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }
}

#[async_trait]
impl StoreLifecycle for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
    }

    async fn verify_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            for table in [SIGNALS_TABLE, MESSAGES_TABLE] {
                conn.prepare(&format!("SELECT 1 FROM {} LIMIT 1", table))
                    .and_then(|mut stmt| stmt.exists([]))
                    .map_err(|_| StoreError::MissingTable(table.to_string()))?;
                debug!("Table '{}' is queryable", table);
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut guard = tokio::time::timeout(self.operation_timeout, self.conn.lock())
            .await
            .map_err(|_| StoreError::Timeout(self.operation_timeout))?;

        match guard.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| StoreError::from(e))?;
                info!("Message store closed");
            }
            None => debug!("Message store already closed"),
        }
        Ok(())
    }
}
