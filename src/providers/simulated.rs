//! Paper-trading execution.
//!
//! Swaps always fill at the market price less a random slippage drawn
//! uniformly from `[0, max_slippage]`. The generator is seedable so runs
//! replay exactly.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::{ExecutionProvider, MarketDataProvider, SwapResult};
use crate::types::Chain;

pub struct SimulatedExecution {
    rng: Mutex<StdRng>,
    max_slippage_percent: f64,
    native_prices: BTreeMap<Chain, f64>,
    prices: Option<Arc<dyn MarketDataProvider>>,
    fail_buys: AtomicBool,
    fail_sells: AtomicBool,
    swaps: AtomicU64,
}

impl SimulatedExecution {
    pub fn new(max_slippage_percent: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            max_slippage_percent: max_slippage_percent.max(0.0),
            native_prices: BTreeMap::new(),
            prices: None,
            fail_buys: AtomicBool::new(false),
            fail_sells: AtomicBool::new(false),
            swaps: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig, seed: Option<u64>) -> Self {
        let mut execution = Self::new(config.trading.max_slippage_percent, seed);
        execution.native_prices = config
            .chains
            .iter()
            .map(|(chain, c)| (*chain, c.native_price_usd))
            .collect();
        execution
    }

    /// Fills at prices read from `market`. Without one, fills report a zero price.
    pub fn with_prices(mut self, market: Arc<dyn MarketDataProvider>) -> Self {
        self.prices = Some(market);
        self
    }

    pub fn set_fail_buys(&self, fail: bool) {
        self.fail_buys.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sells(&self, fail: bool) {
        self.fail_sells.store(fail, Ordering::SeqCst);
    }

    /// Number of swaps filled so far.
    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::SeqCst)
    }

    fn draw_slippage(&self) -> EngineResult<f64> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| EngineError::execution("simulated rng lock poisoned"))?;
        Ok(rng.gen_range(0.0..=self.max_slippage_percent))
    }

    async fn market_price(&self, chain: Chain, token_address: &str) -> f64 {
        match &self.prices {
            Some(board) => board.price(chain, token_address).await.unwrap_or(0.0),
            None => 0.0,
        }
    }

    fn next_ref(&self) -> String {
        let n = self.swaps.fetch_add(1, Ordering::SeqCst) + 1;
        format!("sim-{}", n)
    }
}

#[async_trait]
impl ExecutionProvider for SimulatedExecution {
    #[instrument(skip(self))]
    async fn buy(&self, chain: Chain, token_address: &str, native_amount: f64) -> EngineResult<SwapResult> {
        if self.fail_buys.load(Ordering::SeqCst) {
            return Ok(SwapResult::failed("simulated buy rejection"));
        }
        if !(native_amount.is_finite() && native_amount > 0.0) {
            return Err(EngineError::execution(format!("invalid buy amount {}", native_amount)));
        }

        let slippage = self.draw_slippage()?;
        let price = self.market_price(chain, token_address).await;
        let native_price = self.native_prices.get(&chain).copied().unwrap_or(0.0);
        let filled = if price > 0.0 {
            native_amount * native_price / price * (1.0 - slippage / 100.0)
        } else {
            0.0
        };

        let tx_ref = self.next_ref();
        debug!("Simulated buy {} on {}: {:.4} tokens, slippage {:.2}% ({})", token_address, chain, filled, slippage, tx_ref);
        Ok(SwapResult::filled(filled, price, slippage, tx_ref))
    }

    #[instrument(skip(self))]
    async fn sell(&self, chain: Chain, token_address: &str, quantity: f64) -> EngineResult<SwapResult> {
        if self.fail_sells.load(Ordering::SeqCst) {
            return Ok(SwapResult::failed("simulated sell rejection"));
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(EngineError::execution(format!("invalid sell quantity {}", quantity)));
        }

        let slippage = self.draw_slippage()?;
        let price = self.market_price(chain, token_address).await;
        let tx_ref = self.next_ref();
        debug!("Simulated sell {} on {}: {:.4} tokens, slippage {:.2}% ({})", token_address, chain, quantity, slippage, tx_ref);
        Ok(SwapResult::filled(quantity, price * (1.0 - slippage / 100.0), slippage, tx_ref))
    }
}
