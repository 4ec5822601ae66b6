//! In-process market data: a board of snapshots keyed by (chain, token).
//!
//! Used for paper trading replays and tests. Prices can be moved tick by tick
//! and individual tokens can be made unavailable to exercise the failure paths.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::providers::MarketDataProvider;
use crate::types::{Chain, MarketSnapshot};

type Key = (Chain, String);

#[derive(Debug, Default)]
pub struct PriceBoard {
    snapshots: RwLock<HashMap<Key, MarketSnapshot>>,
    unavailable: RwLock<HashSet<Key>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_snapshot(&self, snapshot: MarketSnapshot) {
        let key = (snapshot.chain, snapshot.token_address.clone());
        self.snapshots.write().await.insert(key, snapshot);
    }

    /// Moves the price of a token, creating a bare snapshot if the token is new.
    pub async fn set_price(&self, chain: Chain, token_address: &str, price: f64) {
        let mut snapshots = self.snapshots.write().await;
        let snapshot = snapshots
            .entry((chain, token_address.to_string()))
            .or_insert_with(|| MarketSnapshot::new(chain, token_address, Utc::now()));
        snapshot.price_usd = price;
        snapshot.observed_at = Utc::now();
        debug!("Price board: {} {} -> {}", chain, token_address, price);
    }

    /// Makes every lookup for the token fail until re-enabled.
    pub async fn set_unavailable(&self, chain: Chain, token_address: &str, unavailable: bool) {
        let key = (chain, token_address.to_string());
        let mut set = self.unavailable.write().await;
        if unavailable {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }

    pub async fn remove(&self, chain: Chain, token_address: &str) -> Option<MarketSnapshot> {
        self.snapshots.write().await.remove(&(chain, token_address.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lookup(&self, chain: Chain, token_address: &str) -> EngineResult<MarketSnapshot> {
        let key = (chain, token_address.to_string());
        if self.unavailable.read().await.contains(&key) {
            return Err(EngineError::unavailable("price_board", format!("{} marked unavailable", token_address)));
        }
        self.snapshots
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| EngineError::unavailable("price_board", format!("no data for {} on {}", token_address, chain)))
    }
}

#[async_trait]
impl MarketDataProvider for PriceBoard {
    async fn snapshot(&self, chain: Chain, token_address: &str) -> EngineResult<MarketSnapshot> {
        self.lookup(chain, token_address).await
    }

    async fn price(&self, chain: Chain, token_address: &str) -> EngineResult<f64> {
        let snapshot = self.lookup(chain, token_address).await?;
        if !snapshot.has_valid_price() {
            return Err(EngineError::unavailable(
                "price_board",
                format!("invalid price {} for {}", snapshot.price_usd, token_address),
            ));
        }
        Ok(snapshot.price_usd)
    }

    async fn discover(&self, chain: Chain, max_age_minutes: f64) -> EngineResult<Vec<MarketSnapshot>> {
        let unavailable = self.unavailable.read().await;
        let mut found: Vec<MarketSnapshot> = self
            .snapshots
            .read()
            .await
            .values()
            .filter(|s| s.chain == chain && s.age_minutes() <= max_age_minutes)
            .filter(|s| !unavailable.contains(&(s.chain, s.token_address.clone())))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
