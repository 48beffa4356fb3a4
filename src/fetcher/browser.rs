//! Headless Chrome transport using chromiumoxide

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::proxy::ProxyEndpoint;
use crate::config::BrowserSettings;
use crate::error::FetchError;
use crate::traits::PageFetcher;

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";
const READY_POLL: Duration = Duration::from_millis(500);

fn browser_err(context: &str) -> impl FnOnce(chromiumoxide::error::CdpError) -> FetchError + '_ {
    move |e| FetchError::Browser(format!("{context}: {e}"))
}

/// A launched browser and the task draining its event handler.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    proxy: Option<ProxyEndpoint>,
}

impl BrowserSession {
    async fn launch(
        settings: &BrowserSettings,
        proxy: Option<&ProxyEndpoint>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .request_timeout(timeout);

        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.url()));
            info!("Launching browser through proxy {}", proxy);
        } else {
            info!("Launching browser");
        }

        let config = builder
            .build()
            .map_err(|e| FetchError::Browser(format!("Failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            FetchError::Browser(format!(
                "Failed to launch browser: {e}. Is Chrome or Chromium installed and in PATH?"
            ))
        })?;

        let handler = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        Ok(Self {
            browser,
            handler,
            proxy: proxy.cloned(),
        })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();
    }
}

/// Renders pages in headless Chrome, simulating the interactions the listing needs.
pub struct BrowserFetcher {
    settings: BrowserSettings,
    user_agents: Vec<String>,
    timeout: Duration,
    session: Mutex<Option<BrowserSession>>,
}

impl BrowserFetcher {
    pub fn new(settings: BrowserSettings, user_agents: Vec<String>, timeout: Duration) -> Self {
        Self {
            settings,
            user_agents,
            timeout,
            session: Mutex::new(None),
        }
    }

    async fn render(&self, page: &Page, url: &str) -> Result<String, FetchError> {
        let user_agent = self.user_agents.choose(&mut rand::thread_rng()).cloned();
        if let Some(user_agent) = user_agent {
            page.set_user_agent(user_agent)
                .await
                .map_err(browser_err("Failed to set user agent"))?;
        }

        page.goto(url).await.map_err(browser_err("Navigation failed"))?;

        if !self.wait_until_ready(page).await {
            let content = page.content().await.unwrap_or_default();
            return Err(FetchError::NotReady(content));
        }

        self.dismiss_cookie_dialog(page).await;
        self.click_load_more(page).await;

        for _ in 0..self.settings.scrolls {
            if let Err(e) = page.evaluate(SCROLL_SCRIPT).await {
                debug!("Scroll failed: {}", e);
            }
            tokio::time::sleep(self.settings.scroll_pause()).await;
        }

        let content = page
            .content()
            .await
            .map_err(browser_err("Failed to read page source"))?;
        info!("Page source retrieved, length: {} characters", content.len());
        Ok(content)
    }

    /// Poll until any readiness selector matches or the timeout elapses.
    async fn wait_until_ready(&self, page: &Page) -> bool {
        if self.settings.ready_selectors.is_empty() {
            return true;
        }
        let deadline = Instant::now() + self.settings.ready_timeout();
        loop {
            for selector in &self.settings.ready_selectors {
                if page.find_element(selector.as_str()).await.is_ok() {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                warn!("Timed out waiting for product listing to render");
                return false;
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn dismiss_cookie_dialog(&self, page: &Page) {
        match page.find_element(self.settings.cookie_selector.as_str()).await {
            Ok(button) => match button.click().await {
                Ok(_) => {
                    debug!("Dismissed cookie dialog");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => debug!("Cookie dialog click failed: {}", e),
            },
            Err(_) => debug!("No cookie dialog found"),
        }
    }

    async fn click_load_more(&self, page: &Page) {
        for clicked in 0..self.settings.load_more_clicks {
            let Ok(button) = page
                .find_element(self.settings.load_more_selector.as_str())
                .await
            else {
                debug!("No load more button after {} clicks", clicked);
                return;
            };
            if let Err(e) = button.click().await {
                debug!("Load more click failed: {}", e);
                return;
            }
            tokio::time::sleep(self.settings.scroll_pause()).await;
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn name(&self) -> &str {
        "browser"
    }

    async fn fetch_page(
        &self,
        url: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<String, FetchError> {
        let mut guard = self.session.lock().await;

        let needs_launch = guard
            .as_ref()
            .is_none_or(|session| session.proxy.as_ref() != proxy);
        if needs_launch {
            if let Some(old) = guard.take() {
                old.close().await;
            }
            *guard = Some(BrowserSession::launch(&self.settings, proxy, self.timeout).await?);
        }

        let Some(session) = guard.as_ref() else {
            return Err(FetchError::Browser("browser session unavailable".to_string()));
        };

        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(browser_err("Failed to create page"))?;

        let result = self.render(&page, url).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }
        result
    }

    async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            info!("Closing browser");
            session.close().await;
        }
    }
}
