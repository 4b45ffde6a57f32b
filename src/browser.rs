//! Rendering surface plumbing on top of chromiumoxide.

use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, warn};

use crate::config::Config;

/// A running browser together with the task draining its CDP event stream.
pub struct Surface {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl Surface {
    pub async fn launch(config: &Config) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport.width, config.viewport.height)
            .viewport(Viewport {
                width: config.viewport.width,
                height: config.viewport.height,
                ..Default::default()
            })
            .request_timeout(config.timeouts.page_load());
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow!("Failed to create browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    // Chrome emits messages chromiumoxide has no type for; those are noise.
                    let message = err.to_string();
                    if message.contains("data did not match any variant")
                        || message.contains("untagged enum Message")
                    {
                        debug!("Chrome protocol message ignored: {}", err);
                    } else {
                        error!("Browser handler error: {}", err);
                    }
                }
            }
        });

        Ok(Self { browser, handler })
    }

    pub async fn new_page(&self) -> Result<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .context("Failed to create new page")
    }

    /// Close the browser. Never fails; problems are logged.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process did not exit cleanly: {}", e);
        }
        self.handler.abort();
    }
}

/// Evaluate a script and deserialize its return value.
pub async fn eval<T: DeserializeOwned>(page: &Page, script: &str) -> Result<T> {
    let params = EvaluateParams::builder()
        .expression(script)
        .return_by_value(true)
        .build()
        .map_err(|e| anyhow!("Invalid script: {}", e))?;
    page.evaluate_expression(params)
        .await
        .context("Script evaluation failed")?
        .into_value::<T>()
        .context("Unexpected script result")
}

/// Quote a Rust string as a JavaScript string literal.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Navigate and wait for network quiescence, bounded by the page-load timeout.
pub async fn load(page: &Page, url: &str, config: &Config) -> Result<()> {
    let limit = config.timeouts.page_load();
    timeout(limit, async {
        page.goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        page.wait_for_navigation()
            .await
            .with_context(|| format!("Failed to wait for navigation to {}", url))?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow!("Loading {} timed out after {:?}", url, limit))??;

    if let Err(e) = wait_for_network_idle(page, config).await {
        warn!("{:#}, continuing with what has loaded", e);
    }
    Ok(())
}

/// Poll until the document is complete and no new resource entries appear
/// for one `network_idle` interval.
pub async fn wait_for_network_idle(page: &Page, config: &Config) -> Result<()> {
    const PROBE: &str = r#"(() => [document.readyState === 'complete',
        performance.getEntriesByType('resource').length])()"#;

    let quiet = config.timeouts.network_idle();
    let deadline = Instant::now() + config.timeouts.page_load();
    let mut last: Option<u64> = None;

    loop {
        let (complete, resources): (bool, u64) = eval(page, PROBE).await?;
        if complete && last == Some(resources) {
            return Ok(());
        }
        last = Some(resources);
        if Instant::now() + quiet > deadline {
            return Err(anyhow!("Network did not go idle within {:?}", config.timeouts.page_load()));
        }
        sleep(quiet).await;
    }
}

/// Wait until `selector` matches at least one element. Returns false on timeout.
pub async fn wait_for_selector(page: &Page, selector: &str, limit: Duration) -> bool {
    let probe = format!("document.querySelector({}) !== null", js_string(selector));
    let deadline = Instant::now() + limit;
    let poll = Duration::from_millis(250);

    loop {
        match eval::<bool>(page, &probe).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => debug!("Selector probe failed: {:#}", e),
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a 'b' \"c\""), r#""a 'b' \"c\"""#);
        assert_eq!(js_string(":scope > ul\n"), r#"":scope > ul\n""#);
    }
}
