use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::filter::ConversationFilter;
use crate::platform::{InboundUpdate, UpdateKind};
use crate::reconciler::Reconciler;

/// What happened to a single inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Not from the tracked conversation.
    Ignored,
    Stored(i64),
    Updated(i64),
    /// Redelivery of a message that is already stored.
    Duplicate,
    /// Edit of a message that was never stored.
    UnknownEdit,
    /// Storage failed; the update is dropped.
    Failed,
}

/// Filter followed by reconciliation, one update at a time.
///
/// Every failure is contained to the update that caused it.
#[derive(Clone)]
pub struct Pipeline {
    filter: ConversationFilter,
    reconciler: Reconciler,
}

impl Pipeline {
    pub fn new(filter: ConversationFilter, reconciler: Reconciler) -> Self {
        Self { filter, reconciler }
    }

    pub async fn process(&self, update: &InboundUpdate) -> Disposition {
        if !self.filter.accepts(&update.chat_id) {
            return Disposition::Ignored;
        }

        debug!(
            "Processing {:?} message {} from {} chat {}",
            update.kind, update.message_id, update.chat_kind, update.chat_id
        );

        match update.kind {
            UpdateKind::New => self.store_new(update).await,
            UpdateKind::Edited => self.apply_edit(update).await,
        }
    }

    async fn store_new(&self, update: &InboundUpdate) -> Disposition {
        match self
            .reconciler
            .on_new_message(&update.message_id, &update.text)
            .await
        {
            Ok(internal_id) => {
                info!(
                    "Stored message {} as record {}",
                    update.message_id, internal_id
                );
                Disposition::Stored(internal_id)
            }
            Err(StoreError::Conflict { external_id }) => {
                warn!("Message {} already stored, dropping duplicate", external_id);
                Disposition::Duplicate
            }
            Err(e) => {
                error!("Failed to store message {}: {}", update.message_id, e);
                Disposition::Failed
            }
        }
    }

    async fn apply_edit(&self, update: &InboundUpdate) -> Disposition {
        match self
            .reconciler
            .on_edited_message(&update.message_id, &update.text)
            .await
        {
            Ok(updated) => {
                info!(
                    "Updated message {} (record {})",
                    updated.external_id, updated.internal_id
                );
                Disposition::Updated(updated.internal_id)
            }
            Err(StoreError::NotFound(_)) => {
                warn!(
                    "Edited message {} was never stored, ignoring edit",
                    update.message_id
                );
                Disposition::UnknownEdit
            }
            Err(e) => {
                error!("Failed to update message {}: {}", update.message_id, e);
                Disposition::Failed
            }
        }
    }
}
