use anyhow::{anyhow, Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// One headless browser for the whole run. Pages are rendered with
/// JavaScript enabled, so the HTML returned here matches what a
/// reader's browser would see. Navigation goes through a single
/// shared tab and must stay sequential.
pub struct BrowserSession {
    tab: Arc<Tab>,
    // Dropping the Browser shuts the chrome process down, so the
    // session owns it for the lifetime of the run.
    _browser: Browser,
}

impl BrowserSession {
    pub fn new(headless: bool) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(headless)
            .window_size(Some((1280, 1080)))
            .build()
            .map_err(|e| anyhow!("browser launch options: {}", e))?;
        let browser = Browser::new(options).context("failed to launch browser")?;
        let tab = browser.new_tab()?;
        Ok(Self {
            tab,
            _browser: browser,
        })
    }

    /// Navigate the shared tab and return the rendered HTML. The
    /// navigation itself blocks, so it runs off the runtime threads.
    pub async fn html(&self, url: &str) -> Result<String> {
        let tab = Arc::clone(&self.tab);
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            tab.get_content()
        })
        .await?
    }
}

/// Bounded retry with exponential backoff for page fetches. A page
/// that keeps failing past the cap is a hard error rather than an
/// endless loop, so a deleted series page cannot hang the run.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the first try; an operation runs at most
    /// `1 + max_attempts` times in total.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_attempts(3)
    }
}

pub async fn fetch_page(
    session: &BrowserSession,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String> {
    retry_with(policy, url, || session.html(url)).await
}

/// Run `op` once plus up to `policy.max_attempts` retries, doubling
/// the delay between tries up to `policy.max_delay`. The last error
/// is surfaced once the cap is reached.
async fn retry_with<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0;
    loop {
        info!("GET {}", what);
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > policy.max_attempts {
                    return Err(e.context(format!(
                        "giving up on {} after {} attempts",
                        what, attempt
                    )));
                }
                warn!("GET {} failed (attempt {}): {}", what, attempt, e);
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}
