//! Moonshot Sniper - multi-chain new-token trading engine
//!
//! Scores freshly listed tokens, gates entries on a weighted confluence of
//! signals, and manages the resulting positions through a take-profit ladder,
//! ratcheting stops and a portfolio circuit breaker. All market access goes
//! through the collaborator traits in [`providers`].

pub mod bot;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod position;
pub mod providers;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use bot::{CandidateOutcome, MoonshotBot, ScanSummary};
pub use config::{EngineConfig, TradingMode};
pub use error::{EngineError, EngineResult, OpenRejection};
pub use position::{PositionManager, SharedManager};
pub use types::{Chain, MarketSnapshot, PoolType, SafetyAssessment, SafetyStatus};
