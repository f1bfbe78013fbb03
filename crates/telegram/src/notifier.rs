use std::time::Duration;

use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{ChatId, ParseMode, Recipient};
use teloxide::Bot;
use tracing::{debug, warn};

use common::{MessageFormat, Notifier};

/// Pushes reports to one Telegram chat through the Bot API.
///
/// Delivery is best-effort: missing credentials, an unparseable chat id and
/// API failures all end in a warning and `false`.
pub struct TelegramNotifier {
    bot: Option<Bot>,
    chat: Option<Recipient>,
}

impl TelegramNotifier {
    /// `chat_id` is a numeric id (negative for groups) or a `@channel` name.
    /// Every request is bounded by `timeout`.
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Self {
        let token = token.trim();
        let bot = if token.is_empty() {
            None
        } else {
            match teloxide::net::default_reqwest_settings()
                .timeout(timeout)
                .build()
            {
                Ok(client) => Some(Bot::with_client(token, client)),
                Err(e) => {
                    warn!(error = %e, "Failed to build Telegram HTTP client");
                    None
                }
            }
        };

        Self {
            bot,
            chat: parse_recipient(chat_id),
        }
    }
}

fn parse_recipient(chat_id: &str) -> Option<Recipient> {
    let chat_id = chat_id.trim();
    if chat_id.is_empty() {
        return None;
    }
    if let Ok(id) = chat_id.parse::<i64>() {
        return Some(Recipient::Id(ChatId(id)));
    }
    if chat_id.starts_with('@') && chat_id.len() > 1 {
        return Some(Recipient::ChannelUsername(chat_id.to_string()));
    }
    warn!(chat_id, "TELEGRAM_CHAT_ID is neither a numeric id nor an @channel name");
    None
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str, format: Option<MessageFormat>) -> bool {
        let (Some(bot), Some(chat)) = (&self.bot, &self.chat) else {
            warn!("Telegram credentials missing, notification skipped");
            return false;
        };

        let mut request = bot
            .send_message(chat.clone(), message)
            .disable_web_page_preview(true);
        if let Some(format) = format {
            request = request.parse_mode(match format {
                MessageFormat::Html => ParseMode::Html,
                MessageFormat::MarkdownV2 => ParseMode::MarkdownV2,
            });
        }

        match request.await {
            Ok(_) => {
                debug!("Telegram notification sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to send Telegram notification");
                false
            }
        }
    }
}
