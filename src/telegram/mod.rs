use futures::StreamExt;
use log::{error, info, warn};
use telegram_bot::{Api, ChatId, Message, MessageKind, ParseMode, SendMessage, UpdateKind, UserId};

use crate::scheduler::SharedScheduler;

mod commands;

pub struct CommandData {
    api: Api,
    chat_id: ChatId,
    scheduler: SharedScheduler,
    message: String,
}

impl CommandData {
    fn new(api: Api, chat_id: ChatId, scheduler: SharedScheduler, message: String) -> Self {
        Self {
            api,
            chat_id,
            scheduler,
            message,
        }
    }
}

fn command_task(api: Api, command_data: CommandData, chat_id: ChatId) {
    tokio::spawn(async move {
        if let Err(error) = commands::handle_commands(command_data).await {
            warn!("Got an error while handling a message: {}", error);

            let text = format!("Error: <pre>{}</pre>", commands::escape_html(&error.to_string()));
            let mut message = SendMessage::new(chat_id, text);
            message.parse_mode(ParseMode::Html);
            let _ = api.send(message).await;
        }
    });
}

fn is_user_admin(message: &Message, admin_id: UserId) -> bool {
    message.from.id == admin_id
}

/// Serve operator commands until the update stream ends
pub async fn handle_messages(api: &Api, scheduler: SharedScheduler, admin_id: i64) {
    let admin_id = UserId::from(admin_id);
    let mut stream = api.stream();

    info!("Handling Telegram commands...");

    while let Some(update) = stream.next().await {
        let update = match update {
            Ok(update) => update,
            Err(error) => {
                error!("Telegram update error: {}", error);
                continue;
            }
        };

        if let UpdateKind::Message(message) = update.kind {
            if !is_user_admin(&message, admin_id) {
                warn!("User {} tried to access the bot", message.from.id);
                continue;
            }

            if let MessageKind::Text { data, .. } = message.kind {
                let chat_id = message.chat.id();
                let command_data = CommandData::new(api.clone(), chat_id, scheduler.clone(), data);

                command_task(api.clone(), command_data, chat_id);
            }
        }
    }
}
