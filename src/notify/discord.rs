//! Discord Webhook Sink
//!
//! One embed per sale: title, price/floor fields, NFT image and a link to
//! the item page.
//!
//! Usage:
//!   Set DISCORD_WEBHOOK environment variable to your webhook URL
//!
//! Created: 2026-03-05

use async_trait::async_trait;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use super::Notifier;
use crate::error::NotifyError;
use crate::types::{SaleKind, SaleNotification};

/// Discord webhook message structure
#[derive(Serialize)]
struct DiscordMessage {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

/// Discord embed structure for rich formatting
#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    url: String,
    description: String,
    color: u32,
    fields: Vec<DiscordField>,
    image: Option<DiscordImage>,
    footer: Option<DiscordFooter>,
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct DiscordImage {
    url: String,
}

#[derive(Serialize)]
struct DiscordFooter {
    text: String,
}

pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { webhook_url, client })
    }

    /// `None` if DISCORD_WEBHOOK is not set.
    pub fn from_env(timeout: Duration) -> Result<Option<Self>, NotifyError> {
        match env::var("DISCORD_WEBHOOK") {
            Ok(url) if !url.is_empty() => Self::new(url, timeout).map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, sale: &SaleNotification) -> Result<(), NotifyError> {
        let message = DiscordMessage {
            content: None,
            embeds: vec![build_embed(sale)],
        };

        let response = self.client.post(&self.webhook_url).json(&message).send().await?;
        let status = response.status();
        if status.is_success() {
            info!("Discord alert sent for {}", sale.title());
            Ok(())
        } else {
            warn!("Discord webhook returned status: {}", status);
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn build_embed(sale: &SaleNotification) -> DiscordEmbed {
    let color = match sale.kind {
        SaleKind::FixedPrice => 0x00FF00, // Green
        SaleKind::Auction => 0xFFA500,    // Orange
        SaleKind::Offer => 0x3498DB,      // Blue
    };

    let mut fields = vec![DiscordField {
        name: "Price".to_string(),
        value: format!("{} TON", sale.price.normalize()),
        inline: true,
    }];
    if let Some(floor) = sale.floor_price {
        let value = match &sale.floor_link {
            Some(link) => format!("[{} TON]({})", floor.normalize(), link),
            None => format!("{} TON", floor.normalize()),
        };
        fields.push(DiscordField {
            name: "Floor".to_string(),
            value,
            inline: true,
        });
    }
    if let Some(buyer) = sale.owner.or(sale.counterparty) {
        fields.push(DiscordField {
            name: "Buyer".to_string(),
            value: format!("`{}`", buyer.to_friendly(false)),
            inline: false,
        });
    }

    DiscordEmbed {
        title: format!("{}: {}", sale.kind, sale.title()),
        url: sale.item_link(),
        description: format!("`{}`", sale.nft.to_friendly(true)),
        color,
        fields,
        image: sale.nft_image_url.clone().map(|url| DiscordImage { url }),
        footer: Some(DiscordFooter {
            text: "TON NFT sales".to_string(),
        }),
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TonAddress;
    use crate::types::{FloorPrice, NftMetadata, SaleRecord};
    use rust_decimal_macros::dec;

    #[test]
    fn test_embed_fields() {
        let record = SaleRecord {
            kind: SaleKind::Offer,
            is_complete: true,
            created_at: 0,
            marketplace: None,
            nft: TonAddress::new(0, [7; 32]),
            counterparty: Some(TonAddress::new(0, [8; 32])),
            price: dec!(3.25),
            auction: None,
        };
        let meta = NftMetadata {
            name: Some("Cat #3".into()),
            image_url: Some("https://img/3.png".into()),
            ..Default::default()
        };
        let floor = FloorPrice {
            price: dec!(3),
            link: Some("https://getgems.io/nft/EQf".into()),
        };
        let embed = build_embed(&SaleNotification::new(&record, &meta, Some(&floor)));

        assert_eq!(embed.title, "Offer: Cat #3");
        assert_eq!(embed.color, 0x3498DB);
        assert_eq!(embed.fields.len(), 3);
        assert_eq!(embed.fields[0].value, "3.25 TON");
        assert_eq!(embed.fields[1].value, "[3 TON](https://getgems.io/nft/EQf)");
        assert_eq!(embed.image.as_ref().unwrap().url, "https://img/3.png");

        let json = serde_json::to_value(&DiscordMessage { content: None, embeds: vec![embed] }).unwrap();
        assert_eq!(json["embeds"][0]["fields"][2]["name"], "Buyer");
    }
}
