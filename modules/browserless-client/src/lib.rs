pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

/// Subresource types blocked during rendering. None of these contribute to
/// the DOM text we extract from, and skipping them cuts render time roughly
/// in half on media-heavy storefronts.
const REJECTED_RESOURCE_TYPES: &[&str] = &["image", "font", "stylesheet", "media"];

/// How a navigation decides the page is "done".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// Network has settled (at most 2 in-flight connections).
    NetworkSettled,
    /// DOM parsed; subresources may still be loading.
    DomContentLoaded,
}

impl WaitCondition {
    fn as_goto_option(&self) -> &'static str {
        match self {
            WaitCondition::NetworkSettled => "networkidle2",
            WaitCondition::DomContentLoaded => "domcontentloaded",
        }
    }
}

/// Options for a single `/content` render.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub wait: WaitCondition,
    pub navigation_timeout: Duration,
    /// Extra delay after the wait condition fires, letting late scripts
    /// finish mutating the DOM.
    pub settle_delay: Duration,
    pub block_subresources: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            wait: WaitCondition::NetworkSettled,
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(1500),
            block_subresources: true,
        }
    }
}

#[derive(Serialize)]
struct ContentRequest<'a> {
    url: &'a str,
    #[serde(rename = "gotoOptions")]
    goto_options: GotoOptions,
    #[serde(rename = "rejectResourceTypes", skip_serializing_if = "Vec::is_empty")]
    reject_resource_types: Vec<&'static str>,
    #[serde(rename = "waitForTimeout", skip_serializing_if = "Option::is_none")]
    wait_for_timeout: Option<u64>,
}

#[derive(Serialize)]
struct GotoOptions {
    #[serde(rename = "waitUntil")]
    wait_until: &'static str,
    timeout: u64,
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(45))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Fetch fully-rendered HTML for a URL via the Browserless /content
    /// endpoint, honoring the given render options.
    pub async fn content(&self, url: &str, options: &RenderOptions) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let settle_ms = options.settle_delay.as_millis() as u64;
        let body = ContentRequest {
            url,
            goto_options: GotoOptions {
                wait_until: options.wait.as_goto_option(),
                timeout: options.navigation_timeout.as_millis() as u64,
            },
            reject_resource_types: if options.block_subresources {
                REJECTED_RESOURCE_TYPES.to_vec()
            } else {
                Vec::new()
            },
            wait_for_timeout: (settle_ms > 0).then_some(settle_ms),
        };

        debug!(url, wait = ?options.wait, "Browserless content request");

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }

    /// Render with the settled-network wait; if the navigation fails
    /// mid-flight, retry once with the weaker DOM-parsed wait and return
    /// whatever partial DOM that surfaces. Partial content beats a hard
    /// failure for extraction purposes.
    pub async fn content_with_partial_fallback(
        &self,
        url: &str,
        options: &RenderOptions,
    ) -> Result<RenderedContent> {
        match self.content(url, options).await {
            Ok(html) => Ok(RenderedContent {
                html,
                partial: false,
            }),
            Err(err) => {
                warn!(url, error = %err, "Settled render failed, retrying with DOM-parsed wait");
                let degraded = RenderOptions {
                    wait: WaitCondition::DomContentLoaded,
                    navigation_timeout: options.navigation_timeout / 2,
                    settle_delay: Duration::ZERO,
                    block_subresources: options.block_subresources,
                };
                let html = self.content(url, &degraded).await?;
                Ok(RenderedContent {
                    html,
                    partial: true,
                })
            }
        }
    }
}

/// Rendered page HTML plus whether it came from the degraded wait path.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub html: String,
    pub partial: bool,
}
