//! Orchestration: one cycle over all enabled targets, and the repeating
//! schedule around it.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::config::{MonitorConfig, Target};
use crate::dispatch::{AlertDispatcher, DispatchOutcome, WebhookDispatcher};
use crate::error::Result;
use crate::extractor::ExtractionEngine;
use crate::fetcher::Fetcher;
use crate::models::Product;
use crate::store::FingerprintStore;

/// How often the wait loop wakes up to check whether a cycle is due.
const SCHEDULER_TICK: Duration = Duration::from_secs(60);

pub struct Monitor {
    config: MonitorConfig,
    fetcher: Fetcher,
    engine: ExtractionEngine,
    store: FingerprintStore,
    dispatcher: Box<dyn AlertDispatcher>,
}

/// What one pass over all enabled targets produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub targets_checked: usize,
    pub targets_failed: usize,
    pub new_products: usize,
    pub alerted: bool,
}

impl Monitor {
    pub async fn new(config: MonitorConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&config.monitoring_settings, &config.advanced_settings, None)?;
        let engine = ExtractionEngine::new(&config.advanced_settings.exclude_terms);
        let store = FingerprintStore::open(&config.monitoring_settings.state_database).await?;
        let dispatcher: Box<dyn AlertDispatcher> = Box::new(WebhookDispatcher::new(
            config.alert_settings.webhook_url.clone(),
            config.monitoring_settings.max_products_per_alert,
        ));

        Ok(Self {
            config,
            fetcher,
            engine,
            store,
            dispatcher,
        })
    }

    /// Swap the alert collaborator, e.g. for a stub in tests.
    pub fn with_dispatcher(mut self, dispatcher: Box<dyn AlertDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// One full pass: every enabled target in configured order, then a
    /// single dispatch decision for whatever turned up.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        info!("Starting cycle for '{}'", self.config.monitor_name);
        let mut summary = CycleSummary::default();
        let mut new_by_site: Vec<(String, Vec<Product>)> = Vec::new();

        let targets: Vec<Target> = self.config.enabled_websites().cloned().collect();
        let pause = Duration::from_secs(self.config.advanced_settings.min_delay_between_sites);

        for (index, target) in targets.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                debug!("Waiting {pause:?} before next site");
                time::sleep(pause).await;
            }

            summary.targets_checked += 1;
            match self.check_target(target).await {
                Ok(new_products) if !new_products.is_empty() => {
                    info!("{} new product(s) on {}", new_products.len(), target.name);
                    summary.new_products += new_products.len();
                    new_by_site.push((target.name.clone(), new_products));
                }
                Ok(_) => info!("Nothing new on {}", target.name),
                Err(e) => {
                    summary.targets_failed += 1;
                    error!("Skipping {} this cycle: {e}", target.name);
                }
            }
        }

        if new_by_site.is_empty() {
            info!("Cycle finished: no new products");
            return Ok(summary);
        }

        match self.dispatcher.dispatch(&new_by_site).await {
            Ok(outcome) => {
                self.store.commit().await?;
                summary.alerted = outcome == DispatchOutcome::Sent;
                info!("Cycle finished: {} new product(s) recorded", summary.new_products);
            }
            Err(e) => {
                // Not committing keeps these items "new" for the next cycle.
                error!("Alert dispatch failed, keeping items unrecorded: {e}");
                self.store.discard();
            }
        }
        Ok(summary)
    }

    async fn check_target(&mut self, target: &Target) -> Result<Vec<Product>> {
        let page = self.fetcher.fetch(target).await?;
        let products = self.engine.search(&page, target);
        if products.is_empty() {
            return Ok(Vec::new());
        }

        let site_key = target.site_key();
        let avoid_duplicates = self.config.monitoring_settings.avoid_duplicates;
        let mut new_products = Vec::new();
        for product in products {
            let fingerprint = product.fingerprint();
            if !avoid_duplicates || !self.store.contains(&site_key, &fingerprint) {
                self.store.record(&site_key, &fingerprint);
                info!("New product: {}", product.title);
                new_products.push(product);
            }
        }
        Ok(new_products)
    }

    /// Run forever: one cycle immediately, then one every configured
    /// interval. The loop only observes an interrupt between ticks; an
    /// in-flight cycle always runs to completion.
    pub async fn run(&mut self) -> Result<()> {
        let interval =
            Duration::from_secs(self.config.monitoring_settings.check_interval_hours * 3600);
        info!(
            "Starting '{}': {} site(s), one cycle every {}h",
            self.config.monitor_name,
            self.config.enabled_websites().count(),
            self.config.monitoring_settings.check_interval_hours
        );
        for site in self.config.enabled_websites() {
            info!("  - {}: [{}]", site.name, site.search_terms.join(", "));
        }

        if let Err(e) = self.run_cycle().await {
            error!("Cycle failed: {e}");
        }
        let mut next_cycle = Instant::now() + interval;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                }
                _ = time::sleep(SCHEDULER_TICK) => {
                    if Instant::now() >= next_cycle {
                        if let Err(e) = self.run_cycle().await {
                            error!("Cycle failed: {e}");
                        }
                        next_cycle = Instant::now() + interval;
                    }
                }
            }
        }
        Ok(())
    }
}
