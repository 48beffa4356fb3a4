//! Traits and interfaces for transport-agnostic page fetching

use async_trait::async_trait;

use crate::error::FetchError;
use crate::fetcher::proxy::ProxyEndpoint;

/// A transport that turns a URL into rendered page HTML.
///
/// Implementations make a single attempt; retries, sleeps and block
/// detection live in `RetryingFetcher`.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Fetch `url` once, optionally through `proxy`.
    ///
    /// # Returns
    /// * `Result<String, FetchError>` - Page HTML or the reason this attempt failed
    async fn fetch_page(&self, url: &str, proxy: Option<&ProxyEndpoint>)
    -> Result<String, FetchError>;

    /// Drop anything cached for a proxy the pool has discarded.
    fn forget_proxy(&self, _proxy: &ProxyEndpoint) {}

    /// Release any held resources (browser processes). Called once at the end of a run.
    async fn shutdown(&self) {}
}
