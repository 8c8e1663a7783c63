//! Data models for extracted products

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One item extracted from a monitored page.
///
/// Lives only for the duration of a detection cycle; once reported, the
/// item is represented by its fingerprint in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    pub price: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl Product {
    /// Identity digest used for duplicate suppression.
    ///
    /// Only title, price, and link participate: two listings that differ
    /// solely in description or image are the same item.
    pub fn fingerprint(&self) -> String {
        let raw = format!(
            "{}{}{}",
            self.title,
            self.price.as_deref().unwrap_or(""),
            self.link.as_deref().unwrap_or("")
        );
        format!("{:x}", md5::compute(raw))
    }
}
