//! Decision engines.
//!
//! Scoring and confluence are pure functions of their inputs. Momentum keeps a
//! rolling per-token price history and is owned by the scan loop.

pub mod confluence;
pub mod momentum;
pub mod scoring;

pub use confluence::{ConfluenceEngine, ConfluenceReport, ConfluenceResult, ConfluenceSignal, Rejection, RiskLevel, SignalKind};
pub use momentum::{MomentumEngine, MomentumSignal, SignalStrength, Trend};
pub use scoring::{ScoreBreakdown, ScoreReport, ScoringEngine};
