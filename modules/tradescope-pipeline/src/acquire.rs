use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use browserless_client::RenderOptions;
use tradescope_common::{TradescopeError, Tunables};
use tracing::{info, warn};

use crate::pool::BrowserPool;
use crate::retry::RetryPolicy;

/// Realistic desktop UA. Several storefront platforms return interstitials
/// or empty bodies to obvious bot agents.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Which strategy in the cascade produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    DirectHttp,
    HeadlessBrowser,
    MinimalHttp,
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::DirectHttp => write!(f, "direct_http"),
            FetchStrategy::HeadlessBrowser => write!(f, "headless_browser"),
            FetchStrategy::MinimalHttp => write!(f, "minimal_http"),
        }
    }
}

/// Raw HTML plus how it was obtained.
#[derive(Debug, Clone)]
pub struct AcquiredContent {
    pub html: String,
    pub strategy: FetchStrategy,
    /// True when the browser surfaced partial DOM via the degraded wait.
    pub partial: bool,
    pub attempts: u32,
}

/// Anything that can produce HTML for a URL. The acquisition engine is the
/// real implementation; tests substitute fixtures.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<AcquiredContent, TradescopeError>;
}

/// Obtains raw HTML through an ordered strategy cascade, short-circuiting on
/// the first success: direct HTTP GET, pooled headless-browser render, then
/// a minimal last-resort fetch with manual redirect following.
pub struct ContentAcquisitionEngine {
    direct: reqwest::Client,
    minimal: reqwest::Client,
    pool: Option<Arc<BrowserPool>>,
    tunables: Arc<Tunables>,
}

impl ContentAcquisitionEngine {
    pub fn new(pool: Option<Arc<BrowserPool>>, tunables: Arc<Tunables>) -> Result<Self> {
        let direct = reqwest::Client::builder()
            .timeout(tunables.direct_fetch_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("Failed to build direct HTTP client")?;

        let minimal = reqwest::Client::builder()
            .timeout(tunables.direct_fetch_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build minimal HTTP client")?;

        Ok(Self {
            direct,
            minimal,
            pool,
            tunables,
        })
    }

    async fn direct_fetch(&self, url: &str) -> Result<String> {
        // Cache-busting parameter: intermediate caches on cheap hosting
        // plans otherwise serve day-old storefront pages.
        let busted = append_query_param(url, "_ts", &chrono::Utc::now().timestamp_millis().to_string())?;

        let resp = self
            .direct
            .get(&busted)
            .send()
            .await
            .context("Direct GET failed")?;

        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            anyhow::bail!("Direct GET returned status {status}");
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let body = resp.text().await.context("Failed to read response body")?;

        if body.trim().is_empty() {
            anyhow::bail!("Direct GET returned an empty body");
        }
        if !is_html_like(&content_type, &body) {
            anyhow::bail!("Direct GET returned non-HTML content ({content_type})");
        }

        Ok(body)
    }

    async fn browser_fetch(&self, url: &str) -> Result<(String, bool)> {
        let pool = self
            .pool
            .as_ref()
            .context("No browser pool configured")?;

        let policy = RetryPolicy::new(
            self.tunables.browser_attempts,
            self.tunables.browser_backoff_base,
            self.tunables.browser_backoff_cap,
        );
        let options = RenderOptions::default();

        policy
            .run("browser_render", || async {
                let lease = pool.acquire().await.context("Browser lease failed")?;
                let rendered = lease
                    .session()
                    .render(url, &options)
                    .await
                    .context("Browser render failed")?;
                // Lease drops here, returning the session on success and
                // failure alike.
                if rendered.html.trim().is_empty() {
                    anyhow::bail!("Browser returned an empty DOM");
                }
                Ok((rendered.html, rendered.partial))
            })
            .await
    }

    /// Last-resort fetch: a stripped-down client with redirects disabled and
    /// a manual redirect-following loop.
    async fn minimal_fetch(&self, url: &str) -> Result<String> {
        let mut current = url::Url::parse(url).context("Invalid URL")?;

        for _hop in 0..=self.tunables.max_redirects {
            let resp = self
                .minimal
                .get(current.as_str())
                .send()
                .await
                .context("Minimal GET failed")?;

            let status = resp.status();
            if status.is_redirection() {
                let location = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .context("Redirect without Location header")?;
                current = current
                    .join(location)
                    .context("Unresolvable redirect target")?;
                continue;
            }
            if status.is_client_error() || status.is_server_error() {
                anyhow::bail!("Minimal GET returned status {status}");
            }

            let body = resp.text().await.context("Failed to read response body")?;
            if body.trim().is_empty() {
                anyhow::bail!("Minimal GET returned an empty body");
            }
            return Ok(body);
        }

        anyhow::bail!(
            "Exceeded {} redirects fetching {url}",
            self.tunables.max_redirects
        )
    }
}

#[async_trait]
impl ContentFetcher for ContentAcquisitionEngine {
    async fn fetch(&self, url: &str) -> std::result::Result<AcquiredContent, TradescopeError> {
        let mut attempts = 0u32;

        attempts += 1;
        match self.direct_fetch(url).await {
            Ok(html) => {
                info!(url, strategy = "direct_http", bytes = html.len(), "Fetched successfully");
                return Ok(AcquiredContent {
                    html,
                    strategy: FetchStrategy::DirectHttp,
                    partial: false,
                    attempts,
                });
            }
            Err(err) => warn!(url, error = %err, "Direct fetch failed, trying headless browser"),
        }

        if self.pool.is_some() {
            attempts += self.tunables.browser_attempts;
            match self.browser_fetch(url).await {
                Ok((html, partial)) => {
                    info!(
                        url,
                        strategy = "headless_browser",
                        bytes = html.len(),
                        partial,
                        "Fetched successfully"
                    );
                    return Ok(AcquiredContent {
                        html,
                        strategy: FetchStrategy::HeadlessBrowser,
                        partial,
                        attempts,
                    });
                }
                Err(err) => warn!(url, error = %err, "Browser fetch failed, trying minimal fetch"),
            }
        }

        attempts += 1;
        match self.minimal_fetch(url).await {
            Ok(html) => {
                info!(url, strategy = "minimal_http", bytes = html.len(), "Fetched successfully");
                Ok(AcquiredContent {
                    html,
                    strategy: FetchStrategy::MinimalHttp,
                    partial: false,
                    attempts,
                })
            }
            Err(err) => Err(TradescopeError::Fetch(format!(
                "All acquisition strategies exhausted for {url}: {err}"
            ))),
        }
    }
}

fn is_html_like(content_type: &str, body: &str) -> bool {
    if content_type.contains("html") || content_type.contains("xhtml") {
        return true;
    }
    // Some servers omit or mislabel the content type; accept markup-shaped
    // bodies regardless.
    content_type.is_empty() && body.trim_start().starts_with('<')
}

fn append_query_param(url: &str, key: &str, value: &str) -> Result<String> {
    let mut parsed = url::Url::parse(url).context("Invalid URL")?;
    parsed.query_pairs_mut().append_pair(key, value);
    Ok(parsed.to_string())
}
