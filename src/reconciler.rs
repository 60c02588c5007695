use std::sync::Arc;

use crate::error::StoreError;
use crate::store::{MessageStore, StoredMessage};

/// Decides between creating and updating a stored message, keyed by the
/// platform message id.
///
/// Conversation membership is the caller's concern; by the time a message
/// reaches here it has already passed the filter.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn MessageStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Persist a newly seen message and return its internal id.
    ///
    /// A redelivered message fails with `StoreError::Conflict` and leaves
    /// the stored record untouched.
    pub async fn on_new_message(&self, external_id: &str, text: &str) -> Result<i64, StoreError> {
        self.store.create(external_id, text).await
    }

    /// Apply an edit to a previously stored message.
    ///
    /// Edits to messages that were never stored are not backfilled: they
    /// fail with `StoreError::NotFound` without writing anything.
    pub async fn on_edited_message(
        &self,
        external_id: &str,
        new_text: &str,
    ) -> Result<StoredMessage, StoreError> {
        let existing = self
            .store
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(external_id.to_string()))?;

        self.store.update_text(existing.internal_id, new_text).await
    }
}
