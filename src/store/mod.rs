pub mod sqlite;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

pub use sqlite::{SqliteStore, StoreOptions};

/// Table holding retained messages.
pub const MESSAGES_TABLE: &str = "messages";
/// Table owned by the trading-signal feature; only checked for presence here.
pub const SIGNALS_TABLE: &str = "trade_signals";

/// A retained message at its last-known state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    #[serde(rename = "id")]
    pub internal_id: i64,
    #[serde(rename = "messageId")]
    pub external_id: String,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Storage contract the reconciler and read API depend on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new message. Fails with `StoreError::Conflict` when the
    /// external id is already stored.
    async fn create(&self, external_id: &str, text: &str) -> Result<i64, StoreError>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError>;

    /// Replace the text of an existing message, returning the updated record.
    async fn update_text(&self, internal_id: i64, text: &str) -> Result<StoredMessage, StoreError>;

    /// Most recent messages, newest `created_at` first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Readiness and teardown hooks used around the store's lifetime.
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Check that every table the service relies on can be queried.
    async fn verify_schema(&self) -> Result<(), StoreError>;

    /// Release the connection. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError>;
}
