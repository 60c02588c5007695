use std::sync::Arc;

use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::Chat;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pipeline::Pipeline;
use crate::platform::{InboundUpdate, UpdateKind};

const START_REPLY: &str =
    "Hello! I'm running and ready to save messages from the target conversation.";

/// A running dispatcher and the token that stops it.
pub struct TelegramHandle {
    pub shutdown: ShutdownToken,
    pub task: JoinHandle<()>,
}

/// Start long polling in the background, feeding text messages, channel
/// posts, and their edits into the pipeline.
pub fn spawn(bot: Bot, pipeline: Arc<Pipeline>) -> TelegramHandle {
    info!("Starting Telegram platform...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_new))
        .branch(Update::filter_channel_post().endpoint(handle_new))
        .branch(Update::filter_edited_message().endpoint(handle_edited))
        .branch(Update::filter_edited_channel_post().endpoint(handle_edited));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pipeline])
        .default_handler(|upd| async move {
            debug!("Ignoring update {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build();

    let shutdown = dispatcher.shutdown_token();
    let task = tokio::spawn(async move {
        dispatcher.dispatch().await;
        info!("Telegram dispatcher stopped");
    });

    TelegramHandle { shutdown, task }
}

async fn handle_new(bot: Bot, msg: Message, pipeline: Arc<Pipeline>) -> ResponseResult<()> {
    debug!(
        "Received message {} in chat {}",
        msg.id.0, msg.chat.id.0
    );

    if msg.text().is_some_and(is_start_command) {
        bot.send_message(msg.chat.id, START_REPLY).await?;
        return Ok(());
    }

    if let Some(update) = to_inbound(&msg, UpdateKind::New) {
        pipeline.process(&update).await;
    } else {
        debug!("Message {} has no text, skipping", msg.id.0);
    }
    Ok(())
}

async fn handle_edited(msg: Message, pipeline: Arc<Pipeline>) -> ResponseResult<()> {
    debug!(
        "Received edit of message {} in chat {}",
        msg.id.0, msg.chat.id.0
    );

    if let Some(update) = to_inbound(&msg, UpdateKind::Edited) {
        pipeline.process(&update).await;
    } else {
        debug!("Edited message {} has no text, skipping", msg.id.0);
    }
    Ok(())
}

fn to_inbound(msg: &Message, kind: UpdateKind) -> Option<InboundUpdate> {
    let text = msg.text()?;
    Some(InboundUpdate {
        chat_id: msg.chat.id.0.to_string(),
        chat_kind: chat_kind(&msg.chat).to_string(),
        kind,
        message_id: msg.id.0.to_string(),
        text: text.to_string(),
    })
}

fn chat_kind(chat: &Chat) -> &'static str {
    if chat.is_private() {
        "private"
    } else if chat.is_group() {
        "group"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_channel() {
        "channel"
    } else {
        "unknown"
    }
}

/// `/start`, optionally addressed to a bot (`/start@my_bot`) or with a payload.
fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    command == "/start" || command.starts_with("/start@")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    fn sender() -> serde_json::Value {
        json!({"id": 250918540, "is_bot": false, "first_name": "Alice"})
    }

    #[test]
    fn test_supergroup_text_message_ids_become_strings() {
        let msg = message(json!({
            "message_id": 42,
            "from": sender(),
            "chat": {"id": -1001234567890_i64, "title": "Signals", "type": "supergroup"},
            "date": 1568289890,
            "text": "buy the dip"
        }));

        let update = to_inbound(&msg, UpdateKind::New).unwrap();

        assert_eq!(update.chat_id, "-1001234567890");
        assert_eq!(update.message_id, "42");
        assert_eq!(update.chat_kind, "supergroup");
        assert_eq!(update.kind, UpdateKind::New);
        assert_eq!(update.text, "buy the dip");
    }

    #[test]
    fn test_private_chat_numeric_id() {
        let msg = message(json!({
            "message_id": 42,
            "from": sender(),
            "chat": {"id": 12345, "first_name": "Alice", "type": "private"},
            "date": 1568289890,
            "text": "hello"
        }));

        let update = to_inbound(&msg, UpdateKind::Edited).unwrap();

        assert_eq!(update.chat_id, "12345");
        assert_eq!(update.message_id, "42");
        assert_eq!(update.chat_kind, "private");
        assert_eq!(update.kind, UpdateKind::Edited);
    }

    #[test]
    fn test_channel_post_has_channel_kind() {
        let channel = json!({"id": -1009876543210_i64, "title": "Announcements", "type": "channel"});
        let msg = message(json!({
            "message_id": 7,
            "sender_chat": channel.clone(),
            "chat": channel,
            "date": 1568289890,
            "text": "market opens at 9"
        }));

        let update = to_inbound(&msg, UpdateKind::New).unwrap();

        assert_eq!(update.chat_id, "-1009876543210");
        assert_eq!(update.message_id, "7");
        assert_eq!(update.chat_kind, "channel");
        assert_eq!(update.kind, UpdateKind::New);
    }

    #[test]
    fn test_photo_without_text_is_skipped() {
        let msg = message(json!({
            "message_id": 43,
            "from": sender(),
            "chat": {"id": -1001234567890_i64, "title": "Signals", "type": "supergroup"},
            "date": 1568290622,
            "photo": [{
                "file_id": "AgADAgAD36sxG-PX0UvQSXIn9rccdw",
                "file_unique_id": "",
                "file_size": 18188,
                "width": 320,
                "height": 239
            }],
            "caption": "chart"
        }));

        assert!(to_inbound(&msg, UpdateKind::New).is_none());
        assert!(to_inbound(&msg, UpdateKind::Edited).is_none());
    }

    #[test]
    fn test_start_command_variants() {
        assert!(is_start_command("/start"));
        assert!(is_start_command("/start@chatkeeper_bot"));
        assert!(is_start_command("/start deep-link-payload"));
    }

    #[test]
    fn test_regular_text_is_not_start() {
        assert!(!is_start_command("hello /start"));
        assert!(!is_start_command("/started"));
        assert!(!is_start_command(""));
    }
}
