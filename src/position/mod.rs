//! Position lifecycle: records, the capital ledger, the circuit breaker and the manager.

pub mod circuit_breaker;
pub mod manager;
pub mod portfolio;
pub mod types;

pub use circuit_breaker::{BreakerCheck, BreakerState, CircuitBreaker, TripReason};
pub use manager::{ClosedPosition, OpenRequest, PositionManager, SharedManager, TickReport};
pub use portfolio::{DailyStats, PortfolioState, PortfolioSummary};
pub use types::{ActivePosition, ExitReason, Position, PositionSnapshot, PositionStatus, TradeKind, TradeRecord};
