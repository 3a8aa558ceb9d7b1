//! Futures-to-ETF price ratios with a TTL cache and last-known-good fallback.

use crate::pricing::clock::Clock;
use crate::pricing::quotes::QuoteSource;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentPair {
    /// Chart symbol as traders write it, e.g. `ES1!`.
    pub futures: &'static str,
    /// Symbol the quote source knows the continuous contract by.
    pub futures_quote: &'static str,
    pub etf: &'static str,
    pub fallback_ratio: f64,
}

pub const INSTRUMENTS: [InstrumentPair; 4] = [
    InstrumentPair {
        futures: "ES1!",
        futures_quote: "ES=F",
        etf: "SPY",
        fallback_ratio: 10.0,
    },
    InstrumentPair {
        futures: "NQ1!",
        futures_quote: "NQ=F",
        etf: "QQQ",
        fallback_ratio: 41.0,
    },
    InstrumentPair {
        futures: "YM1!",
        futures_quote: "YM=F",
        etf: "DIA",
        fallback_ratio: 100.0,
    },
    InstrumentPair {
        futures: "RTY1!",
        futures_quote: "RTY=F",
        etf: "IWM",
        fallback_ratio: 10.0,
    },
];

pub fn instrument(symbol: &str) -> Option<&'static InstrumentPair> {
    let symbol = symbol.trim();
    INSTRUMENTS
        .iter()
        .find(|p| p.futures.eq_ignore_ascii_case(symbol))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRatioSnapshot {
    pub futures_price: f64,
    pub etf_price: f64,
    pub ratio: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRatio {
    pub symbol: String,
    pub etf_symbol: Option<String>,
    pub futures_price: Option<f64>,
    pub etf_price: Option<f64>,
    pub ratio: f64,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_fallback: bool,
}

impl LiveRatio {
    fn from_snapshot(pair: &InstrumentPair, snap: &PriceRatioSnapshot) -> Self {
        Self {
            symbol: pair.futures.to_string(),
            etf_symbol: Some(pair.etf.to_string()),
            futures_price: Some(snap.futures_price),
            etf_price: Some(snap.etf_price),
            ratio: snap.ratio,
            last_updated: Some(snap.last_updated),
            is_fallback: false,
        }
    }

    fn fallback(pair: &InstrumentPair) -> Self {
        Self {
            symbol: pair.futures.to_string(),
            etf_symbol: Some(pair.etf.to_string()),
            futures_price: None,
            etf_price: None,
            ratio: pair.fallback_ratio,
            last_updated: None,
            is_fallback: true,
        }
    }

    fn identity(symbol: &str) -> Self {
        Self {
            symbol: symbol.trim().to_string(),
            etf_symbol: None,
            futures_price: None,
            etf_price: None,
            ratio: 1.0,
            last_updated: None,
            is_fallback: true,
        }
    }

    pub fn futures_to_etf(&self, futures_price: f64) -> f64 {
        futures_price / self.ratio
    }

    pub fn etf_to_futures(&self, etf_price: f64) -> f64 {
        etf_price * self.ratio
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(5),
        }
    }
}

impl TtlPolicy {
    pub fn is_fresh(&self, snap: &PriceRatioSnapshot, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(snap.last_updated) < self.ttl
    }
}

/// Process-wide ratio cache. The lock only guards map reads and writes; it is never held
/// across a quote fetch, so concurrent refreshes of one symbol may both fetch and the last
/// write wins.
pub struct PriceRatioCache {
    quotes: Arc<dyn QuoteSource>,
    clock: Arc<dyn Clock>,
    policy: TtlPolicy,
    entries: Mutex<HashMap<&'static str, PriceRatioSnapshot>>,
}

impl PriceRatioCache {
    pub fn new(quotes: Arc<dyn QuoteSource>, clock: Arc<dyn Clock>, policy: TtlPolicy) -> Self {
        Self {
            quotes,
            clock,
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_live_ratio(&self, symbol: &str) -> LiveRatio {
        let Some(pair) = instrument(symbol) else {
            tracing::debug!(symbol, "unknown instrument; using identity ratio");
            return LiveRatio::identity(symbol);
        };

        let now = self.clock.now();
        let cached = self.entries.lock().await.get(pair.futures).copied();
        if let Some(snap) = cached.as_ref().filter(|s| self.policy.is_fresh(s, now)) {
            return LiveRatio::from_snapshot(pair, snap);
        }

        let (futures_price, etf_price) = tokio::join!(
            self.quotes.fetch_price(pair.futures_quote),
            self.quotes.fetch_price(pair.etf)
        );

        match (futures_price, etf_price) {
            (Some(futures_price), Some(etf_price)) if etf_price > 0.0 => {
                let snap = PriceRatioSnapshot {
                    futures_price,
                    etf_price,
                    ratio: futures_price / etf_price,
                    last_updated: self.clock.now(),
                };
                self.entries.lock().await.insert(pair.futures, snap);
                tracing::info!(
                    symbol = pair.futures,
                    source = self.quotes.source_name(),
                    ratio = snap.ratio,
                    "refreshed price ratio"
                );
                LiveRatio::from_snapshot(pair, &snap)
            }
            _ => match cached {
                Some(snap) => {
                    tracing::warn!(
                        symbol = pair.futures,
                        age_secs = now.signed_duration_since(snap.last_updated).num_seconds(),
                        "quote refresh failed; serving last known ratio"
                    );
                    LiveRatio::from_snapshot(pair, &snap)
                }
                None => {
                    tracing::warn!(
                        symbol = pair.futures,
                        ratio = pair.fallback_ratio,
                        "quote refresh failed with empty cache; using fallback ratio"
                    );
                    LiveRatio::fallback(pair)
                }
            },
        }
    }
}
