//! Page fetching with bounded retries, randomized sleeps, block detection and proxy rotation

pub mod browser;
pub mod http;
pub mod proxy;

use std::path::Path;

use tracing::{error, info, warn};

use crate::config::{FetchBackend, RetrySettings, ScraperSettings};
use crate::error::FetchError;
use crate::traits::PageFetcher;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use proxy::{ProxyEndpoint, ProxyPool};

/// Wraps a transport with the attempt budget and anti-bot handling.
pub struct RetryingFetcher {
    inner: Box<dyn PageFetcher>,
    settings: RetrySettings,
    proxies: Option<ProxyPool>,
}

impl RetryingFetcher {
    pub fn new(inner: Box<dyn PageFetcher>, settings: RetrySettings) -> Self {
        Self {
            inner,
            settings,
            proxies: None,
        }
    }

    #[must_use]
    pub fn with_proxies(mut self, pool: ProxyPool) -> Self {
        self.proxies = Some(pool);
        self
    }

    /// Attempts per page; proxied fetchers get the larger default budget.
    pub fn attempts(&self) -> u32 {
        self.settings.attempts_for(self.proxies.is_some())
    }

    pub fn transport(&self) -> &str {
        self.inner.name()
    }

    /// The first configured marker found in `content`, compared case-insensitively.
    pub fn block_marker(&self, content: &str) -> Option<&str> {
        let lowered = content.to_lowercase();
        self.settings
            .block_markers
            .iter()
            .find(|marker| !marker.is_empty() && lowered.contains(&marker.to_lowercase()))
            .map(String::as_str)
    }

    /// Fetch `url`, returning `None` once every attempt has failed.
    pub async fn fetch(&self, url: &str) -> Option<String> {
        let attempts = self.attempts();

        for attempt in 1..=attempts {
            let proxy = match &self.proxies {
                Some(pool) => pool.next().await,
                None => None,
            };
            info!("Fetching URL: {} (attempt {}/{})", url, attempt, attempts);

            let failure = match self.inner.fetch_page(url, proxy.as_ref()).await {
                Ok(content) => match self.block_marker(&content) {
                    None => {
                        tokio::time::sleep(self.settings.success_delay.sample()).await;
                        return Some(content);
                    }
                    Some(marker) => {
                        let marker = marker.to_string();
                        self.snapshot(attempt, url, &content).await;
                        FetchError::Blocked(marker)
                    }
                },
                Err(e) => {
                    if let Some(content) = e.page_content() {
                        self.snapshot(attempt, url, content).await;
                    }
                    e
                }
            };

            error!(
                "Error fetching {} (attempt {}/{}): {}",
                url, attempt, attempts, failure
            );

            if let (Some(pool), Some(proxy)) = (&self.proxies, &proxy) {
                pool.discard(proxy).await;
                self.inner.forget_proxy(proxy);
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.failure_delay.sample()).await;
            }
        }

        error!("Failed to fetch {} after {} attempts", url, attempts);
        None
    }

    /// Save the content of a failed attempt for later inspection.
    async fn snapshot(&self, attempt: u32, url: &str, content: &str) {
        let Some(dir) = &self.settings.snapshot_dir else {
            return;
        };
        let path = dir.join(snapshot_file_name(attempt, url));
        if let Err(e) = write_snapshot(dir, &path, content).await {
            warn!("Failed to save page snapshot {}: {}", path.display(), e);
        } else {
            info!("Saved failed page source to {}", path.display());
        }
    }

    /// Release the transport's resources.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

async fn write_snapshot(dir: &Path, path: &Path, content: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, content).await
}

/// `failed_page_<attempt>_<last path segment>.html`, with the segment made filesystem-safe.
pub fn snapshot_file_name(attempt: u32, url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .unwrap_or("index");
    format!("failed_page_{attempt}_{}.html", urlencoding::encode(last))
}

/// Build the configured transport, wrapped in the retry layer.
pub async fn build_fetcher(settings: &ScraperSettings) -> Result<RetryingFetcher, FetchError> {
    let inner: Box<dyn PageFetcher> = match settings.backend {
        FetchBackend::Http => Box::new(HttpFetcher::new(
            settings.user_agents.clone(),
            settings.request_timeout(),
        )?),
        FetchBackend::Browser => Box::new(BrowserFetcher::new(
            settings.browser.clone(),
            settings.user_agents.clone(),
            settings.request_timeout(),
        )),
    };

    let fetcher = RetryingFetcher::new(inner, settings.retry.clone());
    if !settings.proxy.enabled {
        return Ok(fetcher);
    }

    let pool = ProxyPool::new(settings.proxy.clone())?;
    if pool.refresh().await == 0 {
        warn!("Proxy pool is empty, continuing without proxies until a refresh succeeds");
    }
    Ok(fetcher.with_proxies(pool))
}
