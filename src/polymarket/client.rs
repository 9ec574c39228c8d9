use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::marketdata::{normalize_market, MarketRecord};

/// Client for the Polymarket Gamma (markets) API.
#[derive(Clone)]
pub struct GammaClient {
    http: Client,
    api_url: String,
}

impl GammaClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(GammaClient {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch currently tradable markets, normalized. Markets the API ships
    /// in an unusable shape are dropped silently.
    pub async fn fetch_tradable_markets(&self, limit: usize) -> Result<Vec<MarketRecord>> {
        let url = format!(
            "{}/markets?active=true&closed=false&enableOrderBook=true&limit={}",
            self.api_url, limit
        );
        debug!("Fetching Polymarket markets: {}", url);

        let raw = self.get_json(&url).await?;
        let items = match raw.as_array() {
            Some(a) => a.clone(),
            // Some endpoints return { "markets": [...] } instead.
            None => raw
                .get("markets")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        };

        let markets: Vec<MarketRecord> = items.iter().filter_map(normalize_market).collect();
        info!(
            "Fetched {} tradable markets ({} usable)",
            items.len(),
            markets.len()
        );
        Ok(markets)
    }

    /// Fetch one market by id as raw JSON, for resolution detection.
    pub async fn fetch_market(&self, market_id: &str) -> Result<Value> {
        let url = format!("{}/markets/{}", self.api_url, market_id);
        self.get_json(&url).await
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Polymarket API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Polymarket API error {}: {}", status, body);
        }

        resp.json()
            .await
            .context("Failed to parse Polymarket response")
    }
}
