use std::collections::BTreeMap;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use url::Url;

use crate::{configuration::CrawlSettings, error::FetchError};

pub type HeaderSet = BTreeMap<String, String>;

type HostRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Hosts tracked by the limiter before idle ones are evicted.
const HOST_STATE_LIMIT: usize = 1_000;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// What the fetch layer hands back for one URL.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: String,
    /// URL after redirects; relative links on the page resolve against it.
    pub final_url: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx status into a [`FetchError`].
    pub fn ensure_success(self) -> Result<Response, FetchError> {
        match self.is_success() {
            true => Ok(self),
            false => Err(FetchError::Status(self.status)),
        }
    }
}

/// The one capability the extraction core needs from the network.
///
/// Implementations own connection handling, retries and politeness. Any
/// HTTP status is returned as a [`Response`]; `Err` is for transport failures.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HeaderSet) -> Result<Response, FetchError>;
}

/// Headers sent with every request unless a source overrides them.
pub fn default_headers() -> HeaderSet {
    HeaderSet::from([
        (
            "accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        ),
        ("accept-language".to_string(), "en-CA,en;q=0.9".to_string()),
        ("user-agent".to_string(), DEFAULT_USER_AGENT.to_string()),
    ])
}

/// Source headers layered over the defaults. Header names compare case-insensitively.
pub fn merge_headers(overrides: &HeaderSet) -> HeaderSet {
    let mut merged = default_headers();
    for (name, value) in overrides {
        merged.insert(name.to_lowercase(), value.clone());
    }
    merged
}

/// `reqwest` backed fetcher with a minimum delay between requests to the same host.
pub struct HttpFetcher {
    client: reqwest::Client,
    /// `None` when no delay is configured.
    limiter: Option<HostRateLimiter>,
}

impl HttpFetcher {
    pub fn new(settings: &CrawlSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.download_timeout())
            .cookie_store(true)
            .build()?;

        Ok(HttpFetcher {
            client,
            limiter: Quota::with_period(settings.download_delay()).map(RateLimiter::keyed),
        })
    }

    async fn wait_for_host(&self, url: &str) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let Some(host) = host_of(url) else {
            return;
        };

        if limiter.len() > HOST_STATE_LIMIT {
            limiter.retain_recent();
        }
        limiter.until_key_ready(&host).await;
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, headers: &HeaderSet) -> Result<Response, FetchError> {
        self.wait_for_host(url).await;

        let mut request = self.client.get(url);
        for (name, value) in merge_headers(headers) {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        Ok(Response {
            status,
            body,
            final_url,
        })
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_lowercase)
}
