//! Configuration schema, loading, and validation.
//!
//! The monitor is driven by a single JSON file describing the watched
//! sites and the global settings. Everything except the site list has a
//! sensible default so a minimal config is just a name, a URL, and the
//! search terms.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor_name: String,
    #[serde(default)]
    pub description: String,
    pub websites: Vec<Target>,
    #[serde(default)]
    pub monitoring_settings: MonitoringSettings,
    #[serde(default)]
    pub advanced_settings: AdvancedSettings,
    #[serde(default)]
    pub alert_settings: AlertSettings,
}

/// One monitored site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub selectors: SelectorSet,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl Target {
    /// Stable store key for this site, independent of config ordering.
    pub fn site_key(&self) -> String {
        format!("{}_{}", self.name, self.url)
    }
}

/// Ordered selector lists tried first-match-wins during extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSet {
    #[serde(rename = "product_containers", default = "default_container_selectors")]
    pub containers: Vec<String>,
    #[serde(default = "default_title_selectors")]
    pub title: Vec<String>,
    #[serde(default = "default_price_selectors")]
    pub price: Vec<String>,
    #[serde(default = "default_link_selectors")]
    pub link: Vec<String>,
    #[serde(default = "default_description_selectors")]
    pub description: Vec<String>,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            containers: default_container_selectors(),
            title: default_title_selectors(),
            price: default_price_selectors(),
            link: default_link_selectors(),
            description: default_description_selectors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub check_interval_hours: u64,
    pub avoid_duplicates: bool,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
    pub max_products_per_alert: usize,
    pub log_level: String,
    pub state_database: String,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            check_interval_hours: 24,
            avoid_duplicates: true,
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_seconds: 5,
            max_products_per_alert: 10,
            log_level: "info".to_string(),
            state_database: "sqlite:seen_products.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub rotate_user_agents: bool,
    pub use_proxy: bool,
    pub proxy_url: String,
    pub min_delay_between_sites: u64,
    pub render_wait_seconds: u64,
    pub exclude_terms: Vec<String>,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            rotate_user_agents: true,
            use_proxy: false,
            proxy_url: String::new(),
            min_delay_between_sites: 10,
            render_wait_seconds: 10,
            exclude_terms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub webhook_url: Option<String>,
}

impl MonitorConfig {
    /// Load and validate a config file. The webhook URL falls back to the
    /// `ALERT_WEBHOOK_URL` environment variable when the file omits it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|e| {
            MonitorError::Config(format!("malformed config {}: {e}", path.display()))
        })?;

        if config.alert_settings.webhook_url.is_none() {
            config.alert_settings.webhook_url = std::env::var("ALERT_WEBHOOK_URL").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.websites.is_empty() {
            return Err(MonitorError::Config(
                "at least one website must be configured".to_string(),
            ));
        }
        for site in &self.websites {
            if site.name.trim().is_empty() {
                return Err(MonitorError::Config("website with empty name".to_string()));
            }
            if site.url.trim().is_empty() {
                return Err(MonitorError::Config(format!("website '{}' has no URL", site.name)));
            }
            Url::parse(&site.url).map_err(|e| {
                MonitorError::Config(format!("website '{}' has invalid URL: {e}", site.name))
            })?;
            if !site.search_terms.iter().any(|t| !t.trim().is_empty()) {
                return Err(MonitorError::Config(format!(
                    "website '{}' has no search terms",
                    site.name
                )));
            }
        }
        if self.monitoring_settings.check_interval_hours == 0 {
            return Err(MonitorError::Config(
                "check_interval_hours must be at least 1".to_string(),
            ));
        }
        if self.advanced_settings.use_proxy && self.advanced_settings.proxy_url.trim().is_empty() {
            return Err(MonitorError::Config(
                "use_proxy is set but proxy_url is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn enabled_websites(&self) -> impl Iterator<Item = &Target> {
        self.websites.iter().filter(|w| w.enabled)
    }
}

fn default_true() -> bool {
    true
}

fn default_container_selectors() -> Vec<String> {
    [
        ".product-item",
        ".product-card",
        ".item",
        "[class*='product']",
        ".listing-item",
        ".grid-item",
        ".listing",
    ]
    .map(String::from)
    .to_vec()
}

fn default_title_selectors() -> Vec<String> {
    ["h1", "h2", "h3", ".title", ".name", "[class*='title']", "[class*='name']"]
        .map(String::from)
        .to_vec()
}

fn default_price_selectors() -> Vec<String> {
    [".price", "[class*='price']", ".cost", "[class*='cost']"]
        .map(String::from)
        .to_vec()
}

fn default_link_selectors() -> Vec<String> {
    vec!["a[href]".to_string()]
}

fn default_description_selectors() -> Vec<String> {
    [".description", ".desc", "[class*='description']", ".item-description"]
        .map(String::from)
        .to_vec()
}
