//! Sale Notification Sinks
//!
//! The scanner hands each qualifying sale to exactly one `Notifier` call.
//! Sinks:
//! - `TelegramNotifier`: Bot API, photo with caption or plain message
//! - `DiscordNotifier`: webhook embed
//! - `LogNotifier`: writes the sale to the log (`--dry-run`)
//! - `FanoutNotifier`: delivers to several sinks
//!
//! Created: 2026-03-05

pub mod discord;
pub mod telegram;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::NotifyError;
use crate::types::SaleNotification;

pub use discord::DiscordNotifier;
pub use telegram::TelegramNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, sale: &SaleNotification) -> Result<(), NotifyError>;
}

/// Logs instead of delivering.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, sale: &SaleNotification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(sale).unwrap_or_default();
        info!("[DRY RUN] {} | {}", sale.summary_lines().join(" | "), payload);
        Ok(())
    }
}

/// Delivers to every sink. Fails only if every sink failed.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, sale: &SaleNotification) -> Result<(), NotifyError> {
        let mut delivered = 0;
        let mut last_err = None;
        for sink in &self.sinks {
            match sink.notify(sale).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Notification sink failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

/// Minimal HTML escaping for Telegram captions.
pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
