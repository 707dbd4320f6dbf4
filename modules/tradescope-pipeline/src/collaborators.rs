//! Regulatory and market-intelligence collaborator boundaries.
//!
//! Both services are opaque request/response collaborators; the traits here
//! are the seam the enrichment engine fans out through, with reqwest-backed
//! clients for live use and no-op implementations for keyless operation.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tradescope_common::TradescopeError;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRequest {
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceInfo {
    #[serde(default)]
    pub hs_code: Option<String>,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub tariff_rates: HashMap<String, f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRequest {
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketInfo {
    #[serde(default)]
    pub market_size: Option<String>,
    #[serde(default)]
    pub market_growth: Option<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

#[async_trait]
pub trait ComplianceLookup: Send + Sync {
    async fn classify(&self, request: &ComplianceRequest) -> Result<ComplianceInfo>;
}

#[async_trait]
pub trait MarketIntel: Send + Sync {
    async fn profile(&self, request: &MarketRequest) -> Result<MarketInfo>;
}

// --- HTTP clients ---

pub struct HttpComplianceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpComplianceClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build compliance HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait]
impl ComplianceLookup for HttpComplianceClient {
    async fn classify(&self, request: &ComplianceRequest) -> Result<ComplianceInfo> {
        info!(product = %request.product_name, "Compliance classification request");

        let mut builder = self
            .client
            .post(format!("{}/classify", self.base_url))
            .json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|err| TradescopeError::Collaborator(format!("compliance request: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(
                TradescopeError::Collaborator(format!("compliance API status {status}")).into(),
            );
        }

        resp.json()
            .await
            .map_err(|err| TradescopeError::Parse(format!("compliance response: {err}")).into())
    }
}

pub struct HttpMarketClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMarketClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build market HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
        })
    }
}

#[async_trait]
impl MarketIntel for HttpMarketClient {
    async fn profile(&self, request: &MarketRequest) -> Result<MarketInfo> {
        info!(product = %request.product_name, "Market intelligence request");

        let mut builder = self
            .client
            .post(format!("{}/profile", self.base_url))
            .json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|err| TradescopeError::Collaborator(format!("market request: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(
                TradescopeError::Collaborator(format!("market API status {status}")).into(),
            );
        }

        resp.json()
            .await
            .map_err(|err| TradescopeError::Parse(format!("market response: {err}")).into())
    }
}

// --- No-op collaborators for keyless operation ---

pub struct NoopComplianceLookup;

#[async_trait]
impl ComplianceLookup for NoopComplianceLookup {
    async fn classify(&self, _request: &ComplianceRequest) -> Result<ComplianceInfo> {
        Err(TradescopeError::Collaborator("compliance lookup not configured".to_string()).into())
    }
}

pub struct NoopMarketIntel;

#[async_trait]
impl MarketIntel for NoopMarketIntel {
    async fn profile(&self, _request: &MarketRequest) -> Result<MarketInfo> {
        Err(TradescopeError::Collaborator("market intelligence not configured".to_string()).into())
    }
}
