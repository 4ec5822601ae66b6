//! Collaborator contracts: market data, contract safety, smart money and swap execution.
//!
//! The engines never talk to a venue or an API directly. Everything external
//! arrives through these traits so tests and paper trading can swap in local
//! implementations.

pub mod dexscreener;
pub mod goplus;
pub mod memory;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{Chain, MarketSnapshot, SafetyAssessment, SmartMoneySignals};

pub use dexscreener::DexScreenerClient;
pub use goplus::GoPlusClient;
pub use memory::PriceBoard;
pub use simulated::SimulatedExecution;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn snapshot(&self, chain: Chain, token_address: &str) -> EngineResult<MarketSnapshot>;

    async fn price(&self, chain: Chain, token_address: &str) -> EngineResult<f64>;

    /// New pairs on `chain` no older than `max_age_minutes`. Providers without
    /// a discovery feed return nothing.
    async fn discover(&self, _chain: Chain, _max_age_minutes: f64) -> EngineResult<Vec<MarketSnapshot>> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait SafetyProvider: Send + Sync {
    async fn assess(&self, chain: Chain, token_address: &str) -> EngineResult<SafetyAssessment>;
}

#[async_trait]
pub trait SmartMoneyProvider: Send + Sync {
    async fn signals(&self, chain: Chain, token_address: &str) -> EngineResult<SmartMoneySignals>;
}

/// Outcome of a swap as reported by the execution provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub success: bool,
    pub filled_quantity: f64,
    pub price: f64,
    pub slippage_percent: f64,
    pub tx_ref: Option<String>,
    pub error: Option<String>,
}

impl SwapResult {
    pub fn filled(filled_quantity: f64, price: f64, slippage_percent: f64, tx_ref: impl Into<String>) -> Self {
        Self {
            success: true,
            filled_quantity,
            price,
            slippage_percent,
            tx_ref: Some(tx_ref.into()),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            filled_quantity: 0.0,
            price: 0.0,
            slippage_percent: 0.0,
            tx_ref: None,
            error: Some(reason.into()),
        }
    }

    /// Turns an unsuccessful swap into an `ExecutionFailure`.
    pub fn into_result(self) -> EngineResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(EngineError::execution(
                self.error.unwrap_or_else(|| "swap reported failure".to_string()),
            ))
        }
    }
}

#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Spends `native_amount` of the chain's native token on `token_address`.
    async fn buy(&self, chain: Chain, token_address: &str, native_amount: f64) -> EngineResult<SwapResult>;

    async fn sell(&self, chain: Chain, token_address: &str, quantity: f64) -> EngineResult<SwapResult>;
}

/// Smart-money provider for deployments with no wallet tracker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSmartMoney;

#[async_trait]
impl SmartMoneyProvider for NoSmartMoney {
    async fn signals(&self, _chain: Chain, _token_address: &str) -> EngineResult<SmartMoneySignals> {
        Err(EngineError::unavailable("smart_money", "no wallet tracker configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_swap_becomes_execution_failure() {
        let err = SwapResult::failed("route not found").into_result().unwrap_err();
        assert!(matches!(err, EngineError::ExecutionFailure { ref reason } if reason == "route not found"));
        assert!(SwapResult::filled(1.0, 2.0, 0.5, "sim").into_result().is_ok());
    }

    #[tokio::test]
    async fn test_no_smart_money_is_unavailable() {
        let result = NoSmartMoney.signals(Chain::Solana, "Tok").await;
        assert!(matches!(result, Err(EngineError::DataUnavailable { provider: "smart_money", .. })));
    }
}
