//! In-memory `MessageStore` for exercising callers without SQLite.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{MessageStore, StoredMessage};
use crate::error::StoreError;

#[derive(Default)]
pub struct FakeStore {
    messages: Mutex<Vec<StoredMessage>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a backend error.
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Number of successful writes (creates and updates).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn create(&self, external_id: &str, text: &str) -> Result<i64, StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().unwrap();
        if messages.iter().any(|m| m.external_id == external_id) {
            return Err(StoreError::Conflict {
                external_id: external_id.to_string(),
            });
        }
        let internal_id = messages.len() as i64 + 1;
        // Spread timestamps so ordering by created_at is deterministic.
        let created_at = Utc::now() + Duration::milliseconds(internal_id);
        messages.push(StoredMessage {
            internal_id,
            external_id: external_id.to_string(),
            text: text.to_string(),
            created_at,
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(internal_id)
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredMessage>, StoreError> {
        self.check()?;
        let messages = self.messages.lock().unwrap();
        Ok(messages.iter().find(|m| m.external_id == external_id).cloned())
    }

    async fn update_text(&self, internal_id: i64, text: &str) -> Result<StoredMessage, StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.internal_id == internal_id)
            .ok_or_else(|| StoreError::NotFound(internal_id.to_string()))?;
        message.text = text.to_string();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(message.clone())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.check()?;
        let mut messages = self.messages.lock().unwrap().clone();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        Ok(messages)
    }
}
