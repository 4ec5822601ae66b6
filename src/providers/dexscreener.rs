//! DexScreener market data client.
//!
//! Every request waits on a per-minute `governor` quota and is retried with
//! exponential backoff while the failure looks transient. Price lookups are
//! served from a short-lived `moka` cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, instrument, warn};

use crate::config::ProviderConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::MarketDataProvider;
use crate::types::{Chain, MarketSnapshot, TxnCounts};

const PROVIDER: &str = "dexscreener";

#[derive(Debug, Default, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Pair {
    chain_id: String,
    pair_address: String,
    base_token: BaseToken,
    price_usd: Option<String>,
    liquidity: Option<Liquidity>,
    market_cap: Option<f64>,
    volume: Windows<f64>,
    price_change: Windows<f64>,
    txns: Windows<Txns>,
    pair_created_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BaseToken {
    address: String,
    symbol: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Liquidity {
    usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Windows<T> {
    m5: Option<T>,
    h1: Option<T>,
    h6: Option<T>,
    h24: Option<T>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct Txns {
    buys: u64,
    sells: u64,
}

impl Pair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    fn into_snapshot(self, chain: Chain, observed_at: DateTime<Utc>) -> MarketSnapshot {
        let liquidity_usd = self.liquidity_usd();
        let txns = |t: Option<Txns>| t.map(|t| TxnCounts::new(t.buys, t.sells)).unwrap_or_default();

        let mut snapshot = MarketSnapshot::new(chain, self.base_token.address, observed_at);
        snapshot.pair_address = self.pair_address;
        snapshot.symbol = self.base_token.symbol;
        snapshot.price_usd = self
            .price_usd
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);
        snapshot.liquidity_usd = liquidity_usd;
        snapshot.market_cap = self.market_cap.unwrap_or(0.0);
        snapshot.volume_5m = self.volume.m5.unwrap_or(0.0);
        snapshot.volume_1h = self.volume.h1.unwrap_or(0.0);
        snapshot.volume_6h = self.volume.h6.unwrap_or(0.0);
        snapshot.volume_24h = self.volume.h24.unwrap_or(0.0);
        snapshot.price_change_5m = self.price_change.m5.unwrap_or(0.0);
        snapshot.price_change_1h = self.price_change.h1.unwrap_or(0.0);
        snapshot.price_change_6h = self.price_change.h6.unwrap_or(0.0);
        snapshot.price_change_24h = self.price_change.h24.unwrap_or(0.0);
        snapshot.txns_5m = txns(self.txns.m5);
        snapshot.txns_1h = txns(self.txns.h1);
        snapshot.txns_24h = txns(self.txns.h24);
        snapshot.created_at = self.pair_created_at.and_then(DateTime::from_timestamp_millis);
        snapshot
    }
}

/// Pairs on `chain` no older than `max_age_minutes`, newest first.
fn fresh_snapshots(response: PairsResponse, chain: Chain, max_age_minutes: f64, now: DateTime<Utc>) -> Vec<MarketSnapshot> {
    let mut fresh: Vec<MarketSnapshot> = response
        .pairs
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.chain_id == chain.dexscreener_id())
        .map(|p| p.into_snapshot(chain, now))
        .filter(|s| s.age_minutes() <= max_age_minutes)
        .collect();
    fresh.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    fresh
}

/// Most liquid pair on `chain`, if the response lists one.
fn best_pair(response: PairsResponse, chain: Chain) -> Option<Pair> {
    response
        .pairs
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.chain_id == chain.dexscreener_id())
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}

pub struct DexScreenerClient {
    http: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    price_cache: Cache<(Chain, String), f64>,
    retry_attempts: usize,
}

impl DexScreenerClient {
    pub fn new(config: &ProviderConfig) -> EngineResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        let per_minute = NonZeroU32::new(config.dexscreener_requests_per_minute).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            base_url: config.dexscreener_base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            price_cache: Cache::builder()
                .max_capacity(config.max_cache_entries)
                .time_to_live(Duration::from_secs(config.price_cache_ttl_seconds))
                .build(),
            retry_attempts: config.retry_attempts,
        })
    }

    async fn get_pairs(&self, path: &str) -> EngineResult<PairsResponse> {
        let url = format!("{}/{}", self.base_url, path);
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        RetryIf::spawn(
            retry_strategy,
            || async {
                self.limiter.until_ready().await;
                let response = self.http.get(&url).send().await?.error_for_status()?;
                Ok::<_, EngineError>(response.json::<PairsResponse>().await?)
            },
            |e: &EngineError| {
                warn!("DexScreener request {} failed: {}", url, e);
                e.is_transient()
            },
        )
        .await
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerClient {
    #[instrument(skip(self))]
    async fn snapshot(&self, chain: Chain, token_address: &str) -> EngineResult<MarketSnapshot> {
        let response = self.get_pairs(&format!("dex/tokens/{}", token_address)).await?;
        let pair = best_pair(response, chain)
            .ok_or_else(|| EngineError::unavailable(PROVIDER, format!("no {} pair for {}", chain, token_address)))?;

        let snapshot = pair.into_snapshot(chain, Utc::now());
        if snapshot.has_valid_price() {
            self.price_cache
                .insert((chain, token_address.to_string()), snapshot.price_usd)
                .await;
        }
        Ok(snapshot)
    }

    async fn price(&self, chain: Chain, token_address: &str) -> EngineResult<f64> {
        let key = (chain, token_address.to_string());
        if let Some(price) = self.price_cache.get(&key).await {
            debug!("Price cache hit for {}", token_address);
            return Ok(price);
        }

        let snapshot = self.snapshot(chain, token_address).await?;
        if !snapshot.has_valid_price() {
            return Err(EngineError::unavailable(PROVIDER, format!("no price for {}", token_address)));
        }
        Ok(snapshot.price_usd)
    }

    #[instrument(skip(self))]
    async fn discover(&self, chain: Chain, max_age_minutes: f64) -> EngineResult<Vec<MarketSnapshot>> {
        let response = self.get_pairs(&format!("dex/pairs/{}", chain.dexscreener_id())).await?;
        let fresh = fresh_snapshots(response, chain, max_age_minutes, Utc::now());
        debug!("Discovered {} fresh pairs on {}", fresh.len(), chain);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "pairs": [
            {
                "chainId": "solana",
                "pairAddress": "PairA",
                "baseToken": {"address": "Tok", "symbol": "MOON"},
                "priceUsd": "0.00125",
                "liquidity": {"usd": 12000.5},
                "marketCap": 45000,
                "volume": {"m5": 800, "h1": 9000, "h6": 20000, "h24": 50000},
                "priceChange": {"m5": 4.2, "h1": -3.0},
                "txns": {"m5": {"buys": 30, "sells": 10}, "h1": {"buys": 120, "sells": 80}},
                "pairCreatedAt": 1700000000000
            },
            {
                "chainId": "solana",
                "pairAddress": "PairB",
                "baseToken": {"address": "Tok", "symbol": "MOON"},
                "priceUsd": "0.00130",
                "liquidity": {"usd": 500}
            },
            {
                "chainId": "bsc",
                "pairAddress": "PairC",
                "baseToken": {"address": "Tok", "symbol": "MOON"},
                "priceUsd": "9.0",
                "liquidity": {"usd": 999999}
            }
        ]
    }"#;

    #[test]
    fn test_best_pair_picks_most_liquid_on_chain() {
        let response: PairsResponse = serde_json::from_str(RESPONSE).unwrap();
        let pair = best_pair(response, Chain::Solana).unwrap();
        assert_eq!(pair.pair_address, "PairA");
    }

    #[test]
    fn test_pair_parses_into_snapshot() {
        let response: PairsResponse = serde_json::from_str(RESPONSE).unwrap();
        let observed = DateTime::from_timestamp_millis(1_700_000_600_000).unwrap();
        let snapshot = best_pair(response, Chain::Solana).unwrap().into_snapshot(Chain::Solana, observed);

        assert_eq!(snapshot.symbol, "MOON");
        assert!((snapshot.price_usd - 0.00125).abs() < 1e-12);
        assert_eq!(snapshot.liquidity_usd, 12000.5);
        assert_eq!(snapshot.txns_5m, TxnCounts::new(30, 10));
        // missing windows default to zero
        assert_eq!(snapshot.price_change_6h, 0.0);
        assert_eq!(snapshot.txns_24h.total(), 0);
        assert!((snapshot.age_minutes() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_creation_time_leaves_age_unknown() {
        let response: PairsResponse = serde_json::from_str(RESPONSE).unwrap();
        let pair = response.pairs.unwrap().into_iter().nth(1).unwrap();
        let snapshot = pair.into_snapshot(Chain::Solana, Utc::now());
        assert!(snapshot.age_minutes().is_infinite());
    }

    #[test]
    fn test_empty_response_has_no_pair() {
        let response: PairsResponse = serde_json::from_str(r#"{"pairs": null}"#).unwrap();
        assert!(best_pair(response, Chain::Solana).is_none());
    }

    #[test]
    fn test_fresh_pairs_are_offered_on_every_discovery() {
        let observed = DateTime::from_timestamp_millis(1_700_000_600_000).unwrap();
        for _ in 0..2 {
            let response: PairsResponse = serde_json::from_str(RESPONSE).unwrap();
            let fresh = fresh_snapshots(response, Chain::Solana, 60.0, observed);
            // the unknown-age pair and the other chain are dropped
            assert_eq!(fresh.len(), 1);
            assert_eq!(fresh[0].symbol, "MOON");
        }

        let response: PairsResponse = serde_json::from_str(RESPONSE).unwrap();
        assert!(fresh_snapshots(response, Chain::Solana, 5.0, observed).is_empty());
    }
}
