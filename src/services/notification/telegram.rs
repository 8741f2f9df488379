use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Notification, NotificationChannel, SenderError};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Delivers notifications through the Telegram Bot API.
pub struct TelegramChannel {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(client: Client, bot_token: &str, chat_id: &str) -> Self {
        Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }

    /// Point at a different Bot API host
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn render(notification: &Notification) -> String {
        format!(
            "<b>{}</b>\n{}",
            escape_html(&notification.title),
            escape_html(&notification.body)
        )
    }
}

/// Escapes the three characters Telegram's HTML parse mode treats as markup.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> String {
        format!("telegram:{}", self.chat_id)
    }

    async fn send(&self, notification: &Notification) -> Result<(), SenderError> {
        let api_url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);

        let text = Self::render(notification);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        // The request URL carries the bot token
        let response = self
            .client
            .post(&api_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SenderError::NetworkError(e.without_url()))?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Telegram API returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
