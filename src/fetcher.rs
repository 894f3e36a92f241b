use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::BrowserConfig;
use crate::{Result, ScraperError};

/// Scroll targets as divisors of the page height: half, 1/1.2, then the bottom.
pub const SCROLL_DIVISORS: [f64; 3] = [2.0, 1.2, 1.0];

/// Anything that can turn a URL into fully rendered HTML.
#[async_trait]
pub trait PageFetcher: Send {
    async fn fetch(&mut self, url: &str) -> Result<String>;

    /// Releases any resources kept between fetches.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A live browser with one page and the task that drives its event stream.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: EventLoop,
}

/// The browser's event task; aborted when dropped so it never outlives its browser.
struct EventLoop(JoinHandle<()>);

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl BrowserSession {
    /// Launches a browser and opens a blank page.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        info!("Launching browser (headless: {})", config.headless);

        let mut builder = ChromeConfig::builder()
            .window_size(config.window_width, config.window_height)
            .request_timeout(config.navigation_timeout());

        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.arg(format!("--user-agent={}", agent));
        }

        let chrome_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserError(format!("invalid browser config: {}", e)))?;

        let (mut browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| ScraperError::BrowserError(e.to_string()))?;

        let handler = EventLoop(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {:?}", e);
                }
            }
        }));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                // The event task is aborted when `handler` drops on return.
                if let Err(close_err) = browser.close().await {
                    warn!("Failed to close browser after page error: {}", close_err);
                }
                if let Err(wait_err) = browser.wait().await {
                    warn!("Browser process did not exit cleanly: {}", wait_err);
                }
                return Err(ScraperError::BrowserError(e.to_string()));
            }
        };

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    /// Navigates, scrolls in three steps with randomized pauses, and returns the page source.
    #[instrument(skip(self, pauses))]
    pub async fn render(&self, url: &str, pauses: (Duration, Duration)) -> Result<String> {
        let nav_err = |e: chromiumoxide::error::CdpError| ScraperError::NavigationError {
            url: url.to_string(),
            message: e.to_string(),
        };

        self.page.goto(url).await.map_err(nav_err)?;
        self.page.wait_for_navigation().await.map_err(nav_err)?;
        debug!("Navigation complete");

        for divisor in SCROLL_DIVISORS {
            self.page
                .evaluate(scroll_script(divisor))
                .await
                .map_err(nav_err)?;
            tokio::time::sleep(random_pause(pauses)).await;
        }

        self.page.content().await.map_err(nav_err)
    }

    /// Closes the browser and stops its event task.
    pub async fn close(mut self) -> Result<()> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| ScraperError::BrowserError(e.to_string()));

        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        drop(self.handler);
        result
    }
}

fn scroll_script(divisor: f64) -> String {
    format!(
        "window.scrollTo(0, document.body.scrollHeight/{});",
        divisor
    )
}

/// A pause drawn uniformly from `[min, max]`.
fn random_pause((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Fetches one page. With no session a browser is launched for this fetch and torn
/// down afterwards; a supplied session is reused and left open.
pub async fn fetch_html(
    url: &str,
    config: &BrowserConfig,
    session: Option<&BrowserSession>,
) -> Result<String> {
    let pauses = config.scroll_pause_range();
    match session {
        Some(session) => session.render(url, pauses).await,
        None => {
            let session = BrowserSession::launch(config).await?;
            let html = session.render(url, pauses).await;
            if let Err(e) = session.close().await {
                warn!("Failed to close browser: {}", e);
            }
            html
        }
    }
}

/// The `BrowserFetcher` renders pages in Chromium, either with one browser per page
/// or with a session shared across the whole run.
pub struct BrowserFetcher {
    config: BrowserConfig,
    session: Option<BrowserSession>,
}

impl BrowserFetcher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    #[instrument(skip(self))]
    async fn fetch(&mut self, url: &str) -> Result<String> {
        if !self.config.reuse_session {
            return fetch_html(url, &self.config, None).await;
        }

        if self.session.is_none() {
            self.session = Some(BrowserSession::launch(&self.config).await?);
        }
        fetch_html(url, &self.config, self.session.as_ref()).await
    }

    async fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_script() {
        assert_eq!(
            scroll_script(2.0),
            "window.scrollTo(0, document.body.scrollHeight/2);"
        );
        assert_eq!(
            scroll_script(1.2),
            "window.scrollTo(0, document.body.scrollHeight/1.2);"
        );
        assert_eq!(
            scroll_script(1.0),
            "window.scrollTo(0, document.body.scrollHeight/1);"
        );
    }

    #[test]
    fn test_random_pause_stays_in_range() {
        let range = (Duration::from_millis(1100), Duration::from_millis(1800));
        for _ in 0..200 {
            let pause = random_pause(range);
            assert!(pause >= range.0 && pause <= range.1);
        }
    }

    #[test]
    fn test_random_pause_degenerate_range() {
        let d = Duration::from_millis(5);
        assert_eq!(random_pause((d, d)), d);
    }

    #[tokio::test]
    async fn test_event_loop_is_aborted_on_drop() {
        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();

        drop(EventLoop(task));
        for _ in 0..100 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn test_fetcher_without_session_closes_cleanly() {
        let mut fetcher = BrowserFetcher::new(BrowserConfig::default());
        assert!(fetcher.close().await.is_ok());
    }
}
