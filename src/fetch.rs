use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

/// Immutable HTTP identity and pacing for one Fetcher.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Minimum gap between two requests to the same host.
    pub delay: Duration,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid user agent: {0}")]
    InvalidUserAgent(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
}

/// Tracks the last request time per host and sleeps off the remaining delay.
struct HostThrottle {
    delay: Duration,
    last: HashMap<String, Instant>,
}

impl HostThrottle {
    fn new(delay: Duration) -> Self {
        HostThrottle {
            delay,
            last: HashMap::new(),
        }
    }

    fn wait(&self, host: &str) -> Duration {
        let Some(prev) = self.last.get(host) else {
            return Duration::ZERO;
        };
        let remaining = self.delay.saturating_sub(prev.elapsed());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        remaining
    }

    fn mark(&mut self, host: &str) {
        self.last.insert(host.to_string(), Instant::now());
    }
}

/// Blocking page fetcher. One request at a time, no retries.
pub struct Fetcher {
    client: Client,
    throttle: HostThrottle,
}

impl Fetcher {
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| FetchError::InvalidUserAgent(config.user_agent.clone()))?;
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Fetcher {
            client,
            throttle: HostThrottle::new(config.delay),
        })
    }

    /// GET `url` and return its body decoded as UTF-8.
    pub fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?
            .to_string();

        let slept = self.throttle.wait(&host);
        if !slept.is_zero() {
            debug!("Throttled {} for {}ms", host, slept.as_millis());
        }

        let result = self.client.get(parsed).send();
        self.throttle.mark(&host);

        let response = result?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes()?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Host part of a URL, used to group seeds per site.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(|h| h.to_string())
}
