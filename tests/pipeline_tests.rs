//! Cross-module scenarios: reconciliation against the store, the
//! dispatch-then-commit protocol, and partial-failure tolerance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use pagewatch::config::{
    AdvancedSettings, AlertSettings, MonitorConfig, MonitoringSettings, SelectorSet, Target,
};
use pagewatch::dispatch::{AlertDispatcher, DispatchOutcome};
use pagewatch::error::{MonitorError, Result};
use pagewatch::models::Product;
use pagewatch::monitor::Monitor;

const LISTING: &str = r#"
    <div class="card">
        <h3>Blue desk lamp</h3>
        <span class="price">$25</span>
        <a href="/item/1">view</a>
    </div>
"#;

fn test_config(urls: &[&str], db_url: &str) -> MonitorConfig {
    MonitorConfig {
        monitor_name: "pipeline test".to_string(),
        description: String::new(),
        websites: urls
            .iter()
            .enumerate()
            .map(|(i, url)| Target {
                name: format!("site-{i}"),
                url: url.to_string(),
                enabled: true,
                search_terms: vec!["lamp".to_string()],
                selectors: SelectorSet {
                    containers: vec![".card".to_string()],
                    title: vec!["h3".to_string()],
                    price: vec![".price".to_string()],
                    link: vec!["a[href]".to_string()],
                    description: vec![".desc".to_string()],
                },
                custom_headers: HashMap::new(),
            })
            .collect(),
        monitoring_settings: MonitoringSettings {
            retry_attempts: 1,
            retry_delay_seconds: 0,
            timeout_seconds: 5,
            state_database: db_url.to_string(),
            ..Default::default()
        },
        advanced_settings: AdvancedSettings {
            min_delay_between_sites: 0,
            rotate_user_agents: false,
            ..Default::default()
        },
        alert_settings: AlertSettings { webhook_url: None },
    }
}

fn db_url(dir: &TempDir) -> String {
    format!("sqlite:{}", dir.path().join("state.db").display())
}

/// Records every dispatch as `(site, product count)` pairs; optionally
/// simulates an outage.
#[derive(Clone, Default)]
struct StubDispatcher {
    fail: bool,
    calls: Arc<Mutex<Vec<Vec<(String, usize)>>>>,
}

#[async_trait]
impl AlertDispatcher for StubDispatcher {
    async fn dispatch(&self, new_products: &[(String, Vec<Product>)]) -> Result<DispatchOutcome> {
        self.calls.lock().unwrap().push(
            new_products
                .iter()
                .map(|(site, products)| (site.clone(), products.len()))
                .collect(),
        );
        if self.fail {
            Err(MonitorError::Dispatch("stubbed outage".to_string()))
        } else {
            Ok(DispatchOutcome::Sent)
        }
    }
}

async fn listing_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn new_item_is_reported_exactly_once() {
    let server = listing_server().await;
    let dir = TempDir::new().unwrap();
    let stub = StubDispatcher::default();
    let calls = stub.calls.clone();

    let config = test_config(&[&server.uri()], &db_url(&dir));
    let mut monitor = Monitor::new(config)
        .await
        .unwrap()
        .with_dispatcher(Box::new(stub));

    let first = monitor.run_cycle().await.unwrap();
    assert_eq!(first.new_products, 1);
    assert!(first.alerted);

    let second = monitor.run_cycle().await.unwrap();
    assert_eq!(second.new_products, 0);
    assert!(!second.alerted);

    // Only the first cycle dispatched anything.
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(calls.lock().unwrap()[0], vec![("site-0".to_string(), 1)]);
}

#[tokio::test]
async fn failed_dispatch_keeps_items_new_for_the_next_cycle() {
    let server = listing_server().await;
    let dir = TempDir::new().unwrap();
    let stub = StubDispatcher {
        fail: true,
        ..Default::default()
    };
    let calls = stub.calls.clone();

    let config = test_config(&[&server.uri()], &db_url(&dir));
    let mut monitor = Monitor::new(config)
        .await
        .unwrap()
        .with_dispatcher(Box::new(stub));

    for _ in 0..2 {
        let summary = monitor.run_cycle().await.unwrap();
        assert_eq!(summary.new_products, 1);
        assert!(!summary.alerted);
    }

    // Both cycles saw the same item as new and tried to dispatch it.
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
}

#[tokio::test]
async fn committed_state_survives_a_restart() {
    let server = listing_server().await;
    let dir = TempDir::new().unwrap();
    let url = db_url(&dir);

    let stub = StubDispatcher::default();
    let mut monitor = Monitor::new(test_config(&[&server.uri()], &url))
        .await
        .unwrap()
        .with_dispatcher(Box::new(stub));
    assert_eq!(monitor.run_cycle().await.unwrap().new_products, 1);
    drop(monitor);

    let stub = StubDispatcher::default();
    let calls = stub.calls.clone();
    let mut restarted = Monitor::new(test_config(&[&server.uri()], &url))
        .await
        .unwrap()
        .with_dispatcher(Box::new(stub));
    assert_eq!(restarted.run_cycle().await.unwrap().new_products, 0);
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dry_run_dispatch_still_commits() {
    // No webhook configured: the default dispatcher reports
    // success-without-sending and the items are marked seen anyway.
    let server = listing_server().await;
    let dir = TempDir::new().unwrap();

    let mut monitor = Monitor::new(test_config(&[&server.uri()], &db_url(&dir)))
        .await
        .unwrap();

    let first = monitor.run_cycle().await.unwrap();
    assert_eq!(first.new_products, 1);
    assert!(!first.alerted);

    let second = monitor.run_cycle().await.unwrap();
    assert_eq!(second.new_products, 0);
}

#[tokio::test]
async fn duplicate_avoidance_off_reports_every_cycle() {
    let server = listing_server().await;
    let dir = TempDir::new().unwrap();
    let stub = StubDispatcher::default();
    let calls = stub.calls.clone();

    let mut config = test_config(&[&server.uri()], &db_url(&dir));
    config.monitoring_settings.avoid_duplicates = false;
    let mut monitor = Monitor::new(config)
        .await
        .unwrap()
        .with_dispatcher(Box::new(stub));

    for _ in 0..2 {
        let summary = monitor.run_cycle().await.unwrap();
        assert_eq!(summary.new_products, 1);
        assert!(summary.alerted);
    }
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn one_failing_target_does_not_stop_the_cycle() {
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;
    let healthy = listing_server().await;

    let dir = TempDir::new().unwrap();
    let stub = StubDispatcher::default();
    let calls = stub.calls.clone();

    let config = test_config(&[&broken.uri(), &healthy.uri()], &db_url(&dir));
    let mut monitor = Monitor::new(config)
        .await
        .unwrap()
        .with_dispatcher(Box::new(stub));

    let summary = monitor.run_cycle().await.unwrap();
    assert_eq!(summary.targets_checked, 2);
    assert_eq!(summary.targets_failed, 1);
    assert_eq!(summary.new_products, 1);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec![("site-1".to_string(), 1)]);
}
