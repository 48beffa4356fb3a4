//! Rotating pool of free public proxies

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use futures::{StreamExt, stream};
use rand::seq::SliceRandom;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::config::ProxySettings;
use crate::error::FetchError;

const VALIDATION_CONCURRENCY: usize = 8;

/// A proxy as `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub scheme: String,
    pub address: String,
}

impl ProxyEndpoint {
    pub fn new(scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            address: address.into(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Proxy scheme for a list source, taken from its `protocol` query parameter.
pub fn scheme_for_source(source: &str) -> String {
    let protocol = Url::parse(source).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, _)| key == "protocol")
            .map(|(_, value)| value.to_lowercase())
    });
    match protocol.as_deref() {
        Some(p) if p.starts_with("socks") => p.to_string(),
        _ => "http".to_string(),
    }
}

/// Parse a plain-text `host:port` list, one per line.
pub fn parse_proxy_list(body: &str, scheme: &str) -> Vec<ProxyEndpoint> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains(':') && !line.starts_with('#'))
        .map(|line| ProxyEndpoint::new(scheme, line))
        .collect()
}

/// Proxies handed out round-robin; failed ones are dropped and the list refetched when empty.
pub struct ProxyPool {
    settings: ProxySettings,
    client: Client,
    proxies: Mutex<VecDeque<ProxyEndpoint>>,
}

impl ProxyPool {
    pub fn new(settings: ProxySettings) -> Result<Self, FetchError> {
        Self::with_proxies(settings, VecDeque::new())
    }

    /// A pool over a fixed list, never refetched from the sources.
    pub fn from_list(proxies: Vec<ProxyEndpoint>) -> Result<Self, FetchError> {
        let settings = ProxySettings {
            enabled: true,
            sources: Vec::new(),
            validate: false,
            ..ProxySettings::default()
        };
        Self::with_proxies(settings, proxies.into())
    }

    fn with_proxies(
        settings: ProxySettings,
        proxies: VecDeque<ProxyEndpoint>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            settings,
            client,
            proxies: Mutex::new(proxies),
        })
    }

    pub async fn len(&self) -> usize {
        self.proxies.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Refill the pool from the configured sources. Returns the new pool size.
    pub async fn refresh(&self) -> usize {
        let candidates = self.fetch_candidates().await;
        let mut selected = if self.settings.validate {
            self.validate(&candidates).await
        } else {
            candidates.clone()
        };

        if selected.is_empty() && !candidates.is_empty() {
            warn!(
                "No proxies passed validation, using the first {} unvalidated",
                self.settings.fallback_count
            );
            selected = candidates
                .into_iter()
                .take(self.settings.fallback_count)
                .collect();
        }

        selected.shuffle(&mut rand::thread_rng());
        let count = selected.len();
        *self.proxies.lock().await = selected.into();
        info!("Proxy pool holds {} proxies", count);
        count
    }

    async fn fetch_candidates(&self) -> Vec<ProxyEndpoint> {
        let mut candidates = Vec::new();
        for source in &self.settings.sources {
            let scheme = scheme_for_source(source);
            let body = match self.client.get(source).send().await {
                Ok(response) if response.status().is_success() => response.text().await,
                Ok(response) => {
                    warn!("Proxy source {} returned {}", source, response.status());
                    continue;
                }
                Err(e) => Err(e),
            };
            match body {
                Ok(body) => {
                    let parsed = parse_proxy_list(&body, &scheme);
                    info!("Fetched {} proxies from {}", parsed.len(), source);
                    candidates.extend(parsed);
                }
                Err(e) => warn!("Failed to fetch proxies from {}: {}", source, e),
            }
        }
        candidates
    }

    async fn validate(&self, candidates: &[ProxyEndpoint]) -> Vec<ProxyEndpoint> {
        let timeout = Duration::from_secs(self.settings.validate_timeout_secs);
        let test_url = self.settings.test_url.clone();

        let results: Vec<Option<ProxyEndpoint>> = stream::iter(
            candidates
                .iter()
                .take(self.settings.validate_limit)
                .cloned(),
        )
        .map(|proxy| {
            let test_url = test_url.clone();
            async move {
                let client = reqwest::Proxy::all(proxy.url())
                    .and_then(|p| Client::builder().proxy(p).timeout(timeout).build())
                    .ok()?;
                match client.get(&test_url).send().await {
                    Ok(response) if response.status().is_success() => {
                        info!("Validated proxy: {}", proxy);
                        Some(proxy)
                    }
                    _ => None,
                }
            }
        })
        .buffered(VALIDATION_CONCURRENCY)
        .collect()
        .await;

        results.into_iter().flatten().collect()
    }

    /// The next proxy in rotation, refreshing an empty pool from the sources first.
    pub async fn next(&self) -> Option<ProxyEndpoint> {
        if self.is_empty().await && !self.settings.sources.is_empty() {
            self.refresh().await;
        }
        let mut proxies = self.proxies.lock().await;
        let proxy = proxies.pop_front()?;
        proxies.push_back(proxy.clone());
        Some(proxy)
    }

    /// Drop a proxy that failed or was blocked.
    pub async fn discard(&self, proxy: &ProxyEndpoint) {
        let mut proxies = self.proxies.lock().await;
        proxies.retain(|p| p != proxy);
        info!("Removed proxy {} ({} left)", proxy, proxies.len());
    }
}
