use crate::config::Settings;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRIES: u32 = 2;
const MAX_RETRIES: u32 = 5;
const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; journal/0.1)";

#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Last traded price. `None` means unavailable; implementations never return errors.
    async fn fetch_price(&self, symbol: &str) -> Option<f64>;
}

#[derive(Debug, Clone)]
pub struct YahooQuoteSource {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl YahooQuoteSource {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .quote_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("QUOTE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("QUOTE_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .clamp(1, MAX_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build quote http client")?;

        Ok(Self {
            http,
            base_url,
            retries,
        })
    }

    fn url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        )
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        headers
    }

    async fn fetch_once(&self, symbol: &str) -> Result<f64> {
        let res = self
            .http
            .get(self.url(symbol))
            .headers(self.headers())
            .query(&[("interval", "1d"), ("range", "1d")])
            .send()
            .await
            .context("quote request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read quote response")?;
        if !status.is_success() {
            anyhow::bail!("quote HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<ChartResponse>(&text)
            .with_context(|| format!("quote response is not valid chart JSON: {text}"))?;
        parse_price(&parsed).with_context(|| format!("no market price for {symbol}"))
    }
}

#[async_trait::async_trait]
impl QuoteSource for YahooQuoteSource {
    fn source_name(&self) -> &'static str {
        "yahoo_chart"
    }

    async fn fetch_price(&self, symbol: &str) -> Option<f64> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(symbol).await {
                Ok(price) => return Some(price),
                Err(err) => {
                    if attempt >= self.retries {
                        tracing::warn!(symbol, attempt, error = %err, "quote fetch failed; giving up");
                        return None;
                    }
                    let backoff = retry_backoff(attempt);
                    tracing::warn!(symbol, attempt, ?backoff, error = %err, "quote fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Doubling delay after the given failed attempt, capped.
fn retry_backoff(attempt: u32) -> Duration {
    let ms = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .map_or(MAX_BACKOFF_MS, |factor| BASE_BACKOFF_MS.saturating_mul(factor))
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

fn parse_price(resp: &ChartResponse) -> Option<f64> {
    let meta = &resp.chart.result.as_ref()?.first()?.meta;
    meta.regular_market_price
        .or(meta.previous_close)
        .filter(|p| p.is_finite() && *p > 0.0)
}

#[derive(Debug, Clone, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Clone, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
}
