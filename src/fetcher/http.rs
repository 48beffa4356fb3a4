//! Plain HTTP transport with browser-like headers

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use super::proxy::ProxyEndpoint;
use crate::error::FetchError;
use crate::traits::PageFetcher;

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Fetches pages with reqwest, one client per proxy.
pub struct HttpFetcher {
    direct: Client,
    by_proxy: Mutex<HashMap<ProxyEndpoint, Client>>,
    user_agents: Vec<String>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agents: Vec<String>, timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            direct: Self::build_client(None, timeout)?,
            by_proxy: Mutex::new(HashMap::new()),
            user_agents,
            timeout,
        })
    }

    fn build_client(proxy: Option<&ProxyEndpoint>, timeout: Duration) -> Result<Client, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.5"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }
        Ok(builder.build()?)
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.by_proxy.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = Self::build_client(Some(proxy), self.timeout)?;
        clients.insert(proxy.clone(), client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn cached_clients(&self) -> usize {
        self.by_proxy.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn pick_user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map_or_else(|| FALLBACK_USER_AGENT.to_string(), Clone::clone)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    fn forget_proxy(&self, proxy: &ProxyEndpoint) {
        let mut clients = self.by_proxy.lock().unwrap_or_else(PoisonError::into_inner);
        if clients.remove(proxy).is_some() {
            debug!("Dropped client for proxy {}", proxy);
        }
    }

    async fn fetch_page(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<String, FetchError> {
        let client = self.client_for(proxy)?;
        let user_agent = self.pick_user_agent();
        debug!("GET {} as {}", url, user_agent);

        let response = client.get(url).header(USER_AGENT, user_agent).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(body)
    }
}
