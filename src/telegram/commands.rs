use log::info;
use telegram_bot::{ParseMode, SendMessage};
use thiserror::Error;

use crate::{
    account::DriverStatus,
    scheduler::SchedulerError,
};

use super::CommandData;

#[derive(Error, Debug)]
pub enum MessageHandlerError {
    #[error("telegram error: {0}")]
    TelegramError(#[from] telegram_bot::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("invalid command, use /start [name|all], /stop [name|all] or /status")]
    InvalidCommand,
}

type CommandHandlerResult = Result<(), MessageHandlerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Account(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(Target),
    Stop(Target),
    Status,
}

/// Split `"/cmd argument"` on the first space. A bare `/start` or `/stop`
/// targets every account.
pub fn parse_command(message: &str) -> Result<Command, MessageHandlerError> {
    let message = message.trim();

    let (command, argument) = match message.find(' ') {
        Some(index) => {
            let (command, argument) = message.split_at(index);
            (command, argument.trim())
        }
        None => (message, ""),
    };

    // Commands sent in groups carry the bot name: /status@tapper_bot
    let command = command.split('@').next().unwrap_or(command);

    let target = match argument {
        "" | "all" => Target::All,
        name => Target::Account(name.to_string()),
    };

    match command {
        "/start" => Ok(Command::Start(target)),
        "/stop" => Ok(Command::Stop(target)),
        "/status" => Ok(Command::Status),
        _ => Err(MessageHandlerError::InvalidCommand),
    }
}

/// Make text safe inside an HTML formatted message
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// One `name: status` line per account
pub fn format_statuses(statuses: &[(String, Option<DriverStatus>)]) -> String {
    if statuses.is_empty() {
        return "No accounts configured".to_string();
    }

    statuses
        .iter()
        .map(|(name, status)| match status {
            Some(status) => format!("{}: {}", name, status),
            None => format!("{}: not started", name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn handle_commands(command_data: CommandData) -> CommandHandlerResult {
    let command = parse_command(&command_data.message)?;

    info!("Command: {:?}", command);

    match command {
        Command::Start(target) => command_start(&command_data, target).await,
        Command::Stop(target) => command_stop(&command_data, target).await,
        Command::Status => command_status(&command_data).await,
    }
}

async fn command_start(command_data: &CommandData, target: Target) -> CommandHandlerResult {
    let text = {
        let mut scheduler = command_data.scheduler.lock().await;

        match target {
            Target::All => format!("Started {} accounts", scheduler.start_all()),
            Target::Account(name) => {
                scheduler.start(&name)?;
                format!("Started {}", name)
            }
        }
    };

    reply(command_data, text).await
}

async fn command_stop(command_data: &CommandData, target: Target) -> CommandHandlerResult {
    reply(command_data, "Stopping...").await?;

    let text = {
        let mut scheduler = command_data.scheduler.lock().await;

        match target {
            Target::All => format!("Stopped {} accounts", scheduler.stop_all().await),
            Target::Account(name) => {
                scheduler.stop(&name).await?;
                format!("Stopped {}", name)
            }
        }
    };

    reply(command_data, text).await
}

async fn command_status(command_data: &CommandData) -> CommandHandlerResult {
    let statuses = command_data.scheduler.lock().await.statuses();

    let mut message = SendMessage::new(
        command_data.chat_id,
        format!("<pre>{}</pre>", escape_html(&format_statuses(&statuses))),
    );
    message.parse_mode(ParseMode::Html);

    command_data.api.send(message).await?;

    Ok(())
}

async fn reply(command_data: &CommandData, text: impl Into<String>) -> CommandHandlerResult {
    command_data
        .api
        .send(SendMessage::new(command_data.chat_id, text.into()))
        .await
        .map_err(MessageHandlerError::TelegramError)?;

    Ok(())
}
