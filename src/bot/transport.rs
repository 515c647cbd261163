//! Telegram updates to engine events
//!
//! Every message and callback query becomes an [`InboundEvent`] handed to
//! [`Engine::dispatch`]. The default distribution function of the
//! dispatcher keeps updates of one chat in order while chats run in parallel.

use super::commands::Command;
use crate::engine::{Document, Engine, InboundEvent};
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use teloxide::RequestError;
use tracing::{debug, info, warn};

/// Safe extraction of the sender's platform id
fn sender_id(user: Option<&teloxide::types::User>) -> Option<i64> {
    user.map(|u| u.id.0.cast_signed())
}

/// Map a message to an event, `None` for content the assistant ignores
#[must_use]
pub fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    let chat_id = msg.chat.id.0;
    let user_id = sender_id(msg.from.as_ref());

    if let Some(text) = msg.text() {
        return Some(InboundEvent::from_text(chat_id, user_id, text));
    }
    msg.document().map(|doc| {
        InboundEvent::document(
            chat_id,
            user_id,
            Document {
                file_id: doc.file.id.0.clone(),
                file_name: doc.file_name.clone().unwrap_or_else(|| "file".to_string()),
            },
        )
    })
}

/// Map a callback query to an event, `None` without data or chat
#[must_use]
pub fn event_from_callback(q: &CallbackQuery) -> Option<InboundEvent> {
    let data = q.data.as_deref()?;
    let chat_id = q.message.as_ref().map(|msg| msg.chat().id.0)?;
    Some(InboundEvent::callback(chat_id, sender_id(Some(&q.from)), data))
}

async fn on_message(msg: Message, engine: Engine) -> Result<(), RequestError> {
    match event_from_message(&msg) {
        Some(event) => {
            engine.dispatch(event).await;
        }
        None => debug!(chat_id = msg.chat.id.0, "Unsupported message ignored"),
    }
    respond(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, engine: Engine) -> Result<(), RequestError> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(error = %e, "Failed to answer callback query");
    }
    if let Some(event) = event_from_callback(&q) {
        engine.dispatch(event).await;
    }
    respond(())
}

/// Update handler tree of the bot
#[must_use]
pub fn schema() -> UpdateHandler<RequestError> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback))
}

/// Publish the command menu and poll updates until Ctrl-C
pub async fn run(bot: Bot, engine: Engine) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to publish command menu");
    }

    info!("Bot is running...");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    info!("Bot stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Payload;

    fn message(json: &str) -> Result<Message, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn test_command_message() -> Result<(), serde_json::Error> {
        let msg = message(
            r#"{"message_id":1,"from":{"id":250918540,"is_bot":false,"first_name":"Анна"},
                "chat":{"id":250918540,"first_name":"Анна","type":"private"},
                "date":1567927221,"text":"/intent как подать заявку"}"#,
        )?;
        let event = event_from_message(&msg);
        assert_eq!(event.as_ref().and_then(InboundEvent::command), Some("intent"));
        assert_eq!(event.and_then(|e| e.user_id), Some(250_918_540));
        Ok(())
    }

    #[test]
    fn test_plain_text_message() -> Result<(), serde_json::Error> {
        let msg = message(
            r#"{"message_id":2,"from":{"id":7,"is_bot":false,"first_name":"Б"},
                "chat":{"id":7,"first_name":"Б","type":"private"},
                "date":1567927221,"text":"Отмена"}"#,
        )?;
        let event = event_from_message(&msg);
        assert_eq!(
            event.map(|e| e.payload),
            Some(Payload::Text("Отмена".to_string()))
        );
        Ok(())
    }
}
