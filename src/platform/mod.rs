pub mod telegram;

/// Whether an update carries a first send or an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    New,
    Edited,
}

/// A text message update received from any platform
#[derive(Debug, Clone)]
pub struct InboundUpdate {
    /// Platform-specific chat/channel ID as string
    pub chat_id: String,
    /// Chat type as reported by the platform (e.g., "group", "channel")
    pub chat_kind: String,
    pub kind: UpdateKind,
    /// Platform message ID as string, stable across edits
    pub message_id: String,
    /// The message text
    pub text: String,
}
