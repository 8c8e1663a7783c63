//! Alert hand-off for a cycle's newly detected products.
//!
//! The orchestrator talks to the `AlertDispatcher` trait; the shipped
//! implementation posts Discord-compatible webhook embeds. A dispatcher
//! without credentials runs in dry-run mode: it reports success without
//! sending, and the cycle's fingerprints are committed anyway, so items
//! first seen during dry-run will not alert later either. That trade-off
//! is deliberate and visible in the logs.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{MonitorError, Result};
use crate::models::Product;

/// Outcome of a cycle's alert hand-off. Both variants count as success
/// for the commit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The alert went out.
    Sent,
    /// Dry-run: no credentials configured, nothing was sent.
    Skipped,
}

/// Collaborator receiving the grouped new items of one cycle, in the
/// order the targets were processed.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, new_products: &[(String, Vec<Product>)]) -> Result<DispatchOutcome>;
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    color: u32,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<EmbedImage>,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedImage {
    url: String,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct WebhookMessage {
    content: String,
    embeds: Vec<Embed>,
}

pub struct WebhookDispatcher {
    client: Client,
    webhook_url: Option<String>,
    max_per_site: usize,
}

impl WebhookDispatcher {
    pub fn new(webhook_url: Option<String>, max_per_site: usize) -> Self {
        if webhook_url.is_none() {
            warn!("No alert webhook configured - running in dry-run dispatch mode");
        }
        Self {
            client: Client::new(),
            webhook_url,
            max_per_site: max_per_site.max(1),
        }
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    async fn dispatch(&self, new_products: &[(String, Vec<Product>)]) -> Result<DispatchOutcome> {
        let Some(webhook_url) = &self.webhook_url else {
            info!(
                "Dry-run dispatch: {} site(s) with new items, nothing sent",
                new_products.len()
            );
            return Ok(DispatchOutcome::Skipped);
        };

        for (site, products) in new_products {
            if products.len() > self.max_per_site {
                warn!(
                    "Capping alert for {site} at {} of {} product(s)",
                    self.max_per_site,
                    products.len()
                );
            }
            let embeds: Vec<Embed> = products
                .iter()
                .take(self.max_per_site)
                .map(|product| embed_for(site, product))
                .collect();
            let message = WebhookMessage {
                content: format!("🔍 {} new item(s) on {site}", products.len()),
                embeds,
            };

            let response = self
                .client
                .post(webhook_url)
                .json(&message)
                .send()
                .await
                .map_err(|e| MonitorError::Dispatch(e.to_string()))?;
            if !response.status().is_success() {
                return Err(MonitorError::Dispatch(format!(
                    "webhook returned {} for {site}",
                    response.status()
                )));
            }
            info!("Alert sent for {site} ({} item(s))", products.len());
        }

        let total: usize = new_products.iter().map(|(_, p)| p.len()).sum();
        info!(
            "Dispatched {total} new item(s) across {} site(s)",
            new_products.len()
        );
        Ok(DispatchOutcome::Sent)
    }
}

fn embed_for(site: &str, product: &Product) -> Embed {
    let mut fields = vec![EmbedField {
        name: "Price".to_string(),
        value: product
            .price
            .clone()
            .unwrap_or_else(|| "Not listed".to_string()),
        inline: true,
    }];
    if let Some(link) = &product.link {
        fields.push(EmbedField {
            name: "Link".to_string(),
            value: format!("[View on {site}]({link})"),
            inline: true,
        });
    }

    Embed {
        // Discord caps embed titles at 256 characters
        title: product.title.chars().take(256).collect(),
        description: product.description.clone().unwrap_or_default(),
        url: product.link.clone(),
        color: 0x0058_65F2,
        timestamp: product.discovered_at.to_rfc3339(),
        image: product
            .image
            .as_ref()
            .map(|url| EmbedImage { url: url.clone() }),
        fields,
    }
}
