use std::fmt::Display;

use tracing::{debug, error};

/// Whether `conversation_id` names the tracked conversation.
///
/// Ids are compared by their string form, so a numeric chat id matches its
/// decimal text. An empty target matches nothing.
pub fn is_target(conversation_id: impl Display, target_id: &str) -> bool {
    !target_id.is_empty() && conversation_id.to_string() == target_id
}

/// Inclusion check bound to the configured target conversation.
#[derive(Debug, Clone)]
pub struct ConversationFilter {
    target: String,
}

impl ConversationFilter {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.target.is_empty()
    }

    /// Apply the filter, logging a configuration error when no target is set.
    pub fn accepts(&self, conversation_id: impl Display) -> bool {
        if !self.is_configured() {
            error!(
                "Target conversation is not configured (TARGET_ID); dropping update from chat {}",
                conversation_id
            );
            return false;
        }

        let accepted = is_target(&conversation_id, &self.target);
        if !accepted {
            debug!(
                "Update from chat {} is not the target {}",
                conversation_id, self.target
            );
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id_matches_string_target() {
        assert!(is_target(12345_i64, "12345"));
        assert!(is_target(-1001234567890_i64, "-1001234567890"));
    }

    #[test]
    fn test_string_ids_compare_exactly() {
        assert!(is_target("12345", "12345"));
        assert!(!is_target("12345 ", "12345"));
        assert!(!is_target("012345", "12345"));
        assert!(!is_target(999_i64, "12345"));
    }

    #[test]
    fn test_empty_target_rejects_everything() {
        assert!(!is_target(12345_i64, ""));
        assert!(!is_target("", ""));
    }

    #[test]
    fn test_filter_accepts_only_target() {
        let filter = ConversationFilter::new("12345");
        assert!(filter.is_configured());
        assert!(filter.accepts(12345_i64));
        assert!(!filter.accepts(999_i64));
    }

    #[test]
    fn test_unconfigured_filter_rejects_all() {
        let filter = ConversationFilter::new("");
        assert!(!filter.is_configured());
        assert!(!filter.accepts(12345_i64));
        assert!(!filter.accepts(""));
    }
}
