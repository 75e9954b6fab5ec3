use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use headless_chrome::{Browser, LaunchOptions};
use tracing::{info, warn};

use crate::error::PipelineError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const BROWSER_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Browser,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub markup: String,
    pub transport: Transport,
}

/// Fetches the page over plain HTTP with retries, falling back to a headless
/// browser when every retry fails. FBref intermittently rejects non-browser
/// clients, so the fallback is part of normal operation.
pub fn fetch_page(url: &str, attempts: usize, use_browser: bool) -> Result<FetchedPage> {
    if use_browser {
        info!(url = %url, "fetching with headless browser");
        let markup = fetch_with_browser(url)?;
        return Ok(FetchedPage {
            markup,
            transport: Transport::Browser,
        });
    }

    match fetch_with_http(url, attempts) {
        Ok(markup) => Ok(FetchedPage {
            markup,
            transport: Transport::Http,
        }),
        Err(http_error) => {
            warn!(url = %url, error = %http_error, "http fetch failed, trying headless browser");
            match fetch_with_browser(url) {
                Ok(markup) => Ok(FetchedPage {
                    markup,
                    transport: Transport::Browser,
                }),
                Err(browser_error) => Err(browser_error.context(PipelineError::FetchExhausted {
                    url: url.to_string(),
                    attempts,
                })),
            }
        }
    }
}

fn fetch_with_http(url: &str, attempts: usize) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")?;

    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        info!(url = %url, attempt = attempt + 1, attempts, "requesting page");
        match request_once(&client, url) {
            Ok(markup) => return Ok(markup),
            Err(error) => {
                warn!(url = %url, attempt = attempt + 1, error = %error, "request failed");
                last_error = Some(error);
                if attempt + 1 < attempts {
                    thread::sleep(backoff_delay(attempt));
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("no fetch attempts were made")))
}

fn request_once(client: &reqwest::blocking::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("request to {url} failed"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("request to {url} returned an error status"))?;
    response.text().context("failed to read response body")
}

fn fetch_with_browser(url: &str) -> Result<String> {
    let launch_options = LaunchOptions::default_builder()
        .headless(true)
        .build()
        .map_err(|error| anyhow!("failed to assemble browser launch options: {error}"))?;
    let browser = Browser::new(launch_options).context("failed to launch headless browser")?;

    let tab = browser.new_tab().context("failed to open browser tab")?;
    tab.set_user_agent(DEFAULT_USER_AGENT, None, None)
        .context("failed to set browser user agent")?;
    tab.navigate_to(url)
        .with_context(|| format!("failed to navigate to {url}"))?;
    tab.wait_until_navigated()
        .context("page did not finish loading")?;
    thread::sleep(BROWSER_SETTLE_DELAY);

    tab.get_content().context("failed to read rendered page")
}

fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_secs(1_u64 << attempt.min(6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_delay(50), Duration::from_secs(64));
    }

    #[test]
    fn transport_labels_are_stable() {
        assert_eq!(Transport::Http.as_str(), "http");
        assert_eq!(Transport::Browser.as_str(), "browser");
    }
}
