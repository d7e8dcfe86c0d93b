//! Telegram Bot API Sink
//!
//! `sendPhoto` with an HTML caption when the NFT has an image, otherwise
//! `sendMessage`. If the photo send fails (dead image URL is the usual
//! cause), one plain-text `sendMessage` follows.
//!
//! Usage:
//!   BOT_TOKEN=<bot token> NOTIFY_CHAT=<chat id or @channel>
//!
//! Created: 2026-03-05

use async_trait::async_trait;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use super::{escape_html, Notifier};
use crate::error::NotifyError;
use crate::types::SaleNotification;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: String,
    parse_mode: &'static str,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            token,
            chat_id,
            client,
        })
    }

    /// `None` unless both BOT_TOKEN and NOTIFY_CHAT are set.
    pub fn from_env(timeout: Duration) -> Result<Option<Self>, NotifyError> {
        match (env::var("BOT_TOKEN"), env::var("NOTIFY_CHAT")) {
            (Ok(token), Ok(chat)) if !token.is_empty() && !chat.is_empty() => {
                Self::new(token, chat, timeout).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn call<T: Serialize + ?Sized>(&self, method: &str, body: &T) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/{}", API_BASE, self.token, method);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn send_text(&self, text: String) -> Result<(), NotifyError> {
        let message = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        self.call("sendMessage", &message).await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, sale: &SaleNotification) -> Result<(), NotifyError> {
        let caption = caption(sale);

        let Some(image) = sale.nft_image_url.as_deref() else {
            self.send_text(caption).await?;
            info!("Telegram notification sent: {}", sale.title());
            return Ok(());
        };

        let photo = SendPhoto {
            chat_id: &self.chat_id,
            photo: image,
            caption,
            parse_mode: "HTML",
        };
        match self.call("sendPhoto", &photo).await {
            Ok(()) => {
                info!("Telegram notification sent: {}", sale.title());
                Ok(())
            }
            Err(e) => {
                warn!("Telegram sendPhoto failed ({}), falling back to text", e);
                self.send_text(fallback_text(sale)).await
            }
        }
    }
}

fn caption(sale: &SaleNotification) -> String {
    let mut lines = sale.summary_lines();
    lines[0] = format!("<b>{}</b>", escape_html(&lines[0]));
    for line in lines.iter_mut().skip(1) {
        *line = escape_html(line);
    }
    if let Some(link) = &sale.floor_link {
        lines.push(format!("<a href=\"{}\">floor</a>", escape_html(link)));
    }
    lines.join("\n")
}

fn fallback_text(sale: &SaleNotification) -> String {
    format!("{} sold for {} TON", escape_html(&sale.title()), sale.price.normalize())
}
