//! Page retrieval: plain HTTP with bounded retries, header rotation, and
//! an optional JavaScript-rendering collaborator tried ahead of the plain
//! path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderName, HeaderValue,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AdvancedSettings, MonitoringSettings, Target};
use crate::error::{MonitorError, Result};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Raw markup plus the URL it was fetched from.
///
/// Parsing happens in the extraction engine: `scraper::Html` is not
/// `Send`, so the parsed tree must never be held across an await point.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub base_url: Url,
}

/// JavaScript-rendering collaborator.
///
/// A fetcher built without one simply never tries this path; availability
/// is expressed by presence of the implementation, not by a flag.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, user_agent: &str, wait: Duration) -> Result<String>;
}

/// Pool of user agents sampled uniformly per request.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        Self { agents }
    }

    pub fn pick(&self) -> &str {
        if self.agents.is_empty() {
            return DEFAULT_USER_AGENT;
        }
        let i = rand::rng().random_range(0..self.agents.len());
        &self.agents[i]
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(
            [
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/124.0 Safari/537.36",
            ]
            .map(String::from)
            .to_vec(),
        )
    }
}

pub struct Fetcher {
    client: Client,
    retry_attempts: u32,
    retry_delay: Duration,
    ua_pool: Option<UserAgentPool>,
    renderer: Option<Arc<dyn PageRenderer>>,
    render_wait: Duration,
}

impl Fetcher {
    pub fn new(
        monitoring: &MonitoringSettings,
        advanced: &AdvancedSettings,
        renderer: Option<Arc<dyn PageRenderer>>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(monitoring.timeout_seconds))
            .default_headers(baseline_headers());
        if advanced.use_proxy && !advanced.proxy_url.is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(&advanced.proxy_url)?);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            retry_attempts: monitoring.retry_attempts.max(1),
            retry_delay: Duration::from_secs(monitoring.retry_delay_seconds),
            ua_pool: advanced.rotate_user_agents.then(UserAgentPool::default),
            renderer,
            render_wait: Duration::from_secs(advanced.render_wait_seconds),
        })
    }

    /// Replace the sampled pool, e.g. with a single pinned agent in tests.
    pub fn with_user_agent_pool(mut self, pool: UserAgentPool) -> Self {
        self.ua_pool = Some(pool);
        self
    }

    /// Retrieve one target's page. A renderer failure falls back to plain
    /// HTTP; exhausted retries surface as a per-target fetch error.
    pub async fn fetch(&self, target: &Target) -> Result<FetchedPage> {
        let base_url = Url::parse(&target.url).map_err(|e| MonitorError::Fetch {
            site: target.name.clone(),
            message: format!("invalid URL {}: {e}", target.url),
        })?;

        let user_agent = self
            .ua_pool
            .as_ref()
            .map_or(DEFAULT_USER_AGENT, |pool| pool.pick())
            .to_string();

        if let Some(renderer) = &self.renderer {
            debug!("Rendering {} via JS collaborator", target.url);
            match renderer.render(&target.url, &user_agent, self.render_wait).await {
                Ok(body) => {
                    info!("Rendered {} ({} bytes)", target.name, body.len());
                    return Ok(FetchedPage { body, base_url });
                }
                Err(e) => {
                    warn!("Renderer failed for {}: {e}; falling back to plain HTTP", target.name);
                }
            }
        }

        let headers = self.request_headers(target, &user_agent);

        let mut last_error = String::new();
        for attempt in 1..=self.retry_attempts {
            match self.try_fetch(&target.url, headers.clone()).await {
                Ok(body) => {
                    info!("Fetched {} ({} bytes)", target.name, body.len());
                    return Ok(FetchedPage { body, base_url });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < self.retry_attempts {
                        warn!(
                            "Attempt {attempt}/{} failed for {}: {last_error}; retrying in {:?}",
                            self.retry_attempts, target.name, self.retry_delay
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(MonitorError::Fetch {
            site: target.name.clone(),
            message: last_error,
        })
    }

    async fn try_fetch(&self, url: &str, headers: HeaderMap) -> Result<String> {
        let response = self.client.get(url).headers(headers).send().await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    fn request_headers(&self, target: &Target, user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &target.custom_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid custom header '{name}' for {}", target.name),
            }
        }
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers
    }
}

fn baseline_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,fr-FR;q=0.8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}
