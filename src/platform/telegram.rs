use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::payloads::SendMessageSetters;
use teloxide::types::{AllowedUpdate, BotCommand, ParseMode, UpdateKind};
use teloxide::utils::html;
use teloxide::RequestError;
use tracing::{debug, error, info, warn};

use crate::commands::{Command, CommandHandler, COMMAND_MENU};
use crate::platform::{split_message, MAX_MESSAGE_UNITS};
use crate::transport::{ChannelId, Forwarder};

/// Publishes text to the destination channel
pub struct TelegramForwarder {
    bot: Bot,
    destination: ChatId,
}

impl TelegramForwarder {
    pub fn new(bot: Bot, destination: ChannelId) -> Self {
        Self {
            bot,
            destination: ChatId(destination),
        }
    }
}

#[async_trait]
impl Forwarder for TelegramForwarder {
    async fn publish(&self, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_UNITS) {
            self.bot
                .send_message(self.destination, html::escape(&chunk))
                .parse_mode(ParseMode::Html)
                .await
                .with_context(|| format!("Failed to send message to {}", self.destination))?;
        }
        Ok(())
    }
}

/// Whether `user_id` may issue commands; an empty list admits everyone
pub fn is_allowed(allowed_user_ids: &[u64], user_id: u64) -> bool {
    allowed_user_ids.is_empty() || allowed_user_ids.contains(&user_id)
}

/// Serve bot commands until Telegram rejects the bot.
///
/// Network failures are retried in place. An API error ends the run so the
/// caller can restart it after a pause.
pub async fn run_commands(
    bot: Bot,
    handler: Arc<CommandHandler>,
    allowed_user_ids: Arc<Vec<u64>>,
) -> Result<()> {
    info!("Starting command interface...");

    let me = bot.get_me().await.context("Failed to identify command bot")?;
    let bot_username = me.username().to_string();

    let commands: Vec<BotCommand> = COMMAND_MENU
        .iter()
        .map(|(name, description)| BotCommand::new(*name, *description))
        .collect();
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("Failed to register bot commands: {}", e);
    }

    bot.delete_webhook()
        .send()
        .await
        .context("Failed to clear command bot webhook")?;
    info!("Command interface ready as @{}", bot_username);

    let mut offset: i32 = 0;
    loop {
        let result = bot
            .get_updates()
            .offset(offset)
            .timeout(20)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await;

        let updates = match result {
            Ok(updates) => updates,
            Err(RequestError::Api(e)) => {
                return Err(RequestError::Api(e)).context("Command bot rejected by Telegram");
            }
            Err(RequestError::RetryAfter(wait)) => {
                warn!("Command bot rate limited for {:?}", wait.duration());
                tokio::time::sleep(wait.duration()).await;
                continue;
            }
            Err(e) => {
                warn!("Command bot getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = update.id.as_offset();
            let UpdateKind::Message(msg) = update.kind else {
                continue;
            };
            if let Err(e) =
                handle_message(&bot, &msg, &handler, &allowed_user_ids, &bot_username).await
            {
                error!(chat_id = msg.chat.id.0, "Failed to answer command: {}", e);
            }
        }
    }
}

async fn handle_message(
    bot: &Bot,
    msg: &Message,
    handler: &CommandHandler,
    allowed_user_ids: &[u64],
    bot_username: &str,
) -> Result<(), RequestError> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(command) = Command::parse(text, Some(bot_username)) else {
        return Ok(());
    };

    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if !is_allowed(allowed_user_ids, user.id.0) {
        warn!(user_id = user.id.0, "Ignoring command from unauthorized user");
        return Ok(());
    }

    info!(user_id = user.id.0, "Command received: {:?}", command);
    let reply = handler.handle(command).await;
    for chunk in split_message(&reply, MAX_MESSAGE_UNITS) {
        bot.send_message(msg.chat.id, chunk).await?;
    }
    debug!(chat_id = msg.chat.id.0, "Command answered");
    Ok(())
}
