//! Configurable web monitor that periodically fetches listing pages,
//! extracts items matching per-site search terms, suppresses everything
//! already alerted on, and forwards the rest to an alert collaborator.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod models;
pub mod monitor;
pub mod store;
