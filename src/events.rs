//! Structured events published by the manager and the bot loops.
//!
//! Sinks must not block: the manager publishes while it holds the position lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::position::circuit_breaker::TripReason;
use crate::position::portfolio::DailyStats;
use crate::position::types::{ExitReason, PositionSnapshot, TradeKind};
use crate::types::{Chain, PoolType};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PositionOpened {
        position: PositionSnapshot,
        size_usd: f64,
        tx_ref: Option<String>,
    },
    TakeProfitHit {
        position_id: i64,
        token_address: String,
        level: u8,
        quantity: f64,
        price: f64,
        value: f64,
        pnl: f64,
    },
    StopLossRaised {
        position_id: i64,
        token_address: String,
        from: f64,
        to: f64,
    },
    TrailingStopActivated {
        position_id: i64,
        token_address: String,
        high: f64,
    },
    PositionClosed {
        position_id: i64,
        chain: Chain,
        token_address: String,
        symbol: String,
        pool: PoolType,
        reason: ExitReason,
        exit_price: f64,
        pnl_usd: f64,
        pnl_percent: f64,
        returned_capital: f64,
    },
    ExecutionFailed {
        position_id: Option<i64>,
        token_address: String,
        kind: TradeKind,
        reason: String,
    },
    CircuitBreakerTripped {
        reason: TripReason,
        until: DateTime<Utc>,
    },
    CircuitBreakerReset,
    EntryRejected {
        chain: Chain,
        token_address: String,
        reasons: Vec<String>,
    },
    DailySummary {
        stats: DailyStats,
        rejections_by_reason: BTreeMap<String, u64>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::PositionOpened { .. } => "position_opened",
            EngineEvent::TakeProfitHit { .. } => "take_profit_hit",
            EngineEvent::StopLossRaised { .. } => "stop_loss_raised",
            EngineEvent::TrailingStopActivated { .. } => "trailing_stop_activated",
            EngineEvent::PositionClosed { .. } => "position_closed",
            EngineEvent::ExecutionFailed { .. } => "execution_failed",
            EngineEvent::CircuitBreakerTripped { .. } => "circuit_breaker_tripped",
            EngineEvent::CircuitBreakerReset => "circuit_breaker_reset",
            EngineEvent::EntryRejected { .. } => "entry_rejected",
            EngineEvent::DailySummary { .. } => "daily_summary",
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: EngineEvent) {
        match &event {
            EngineEvent::ExecutionFailed { token_address, kind, reason, .. } => {
                warn!(event = event.name(), token = %token_address, "{} failed: {}", kind.label(), reason);
            }
            EngineEvent::CircuitBreakerTripped { reason, until } => {
                warn!(event = event.name(), "Circuit breaker tripped ({}), paused until {}", reason, until);
            }
            EngineEvent::PositionClosed { token_address, reason, pnl_usd, pnl_percent, .. } => {
                info!(
                    event = event.name(),
                    token = %token_address,
                    "Closed on {}: ${:+.2} ({:+.1}%)",
                    reason, pnl_usd, pnl_percent
                );
            }
            EngineEvent::EntryRejected { token_address, reasons, .. } => {
                tracing::debug!(event = event.name(), token = %token_address, "Rejected: {}", reasons.join(", "));
            }
            _ => info!(event = event.name(), "{:?}", event),
        }
    }
}

/// Forwards events to a bounded channel, dropping them when the consumer falls behind.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<EngineEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: EngineEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping engine event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.publish(EngineEvent::CircuitBreakerReset);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "circuit_breaker_reset");
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::channel(1);
        sink.publish(EngineEvent::CircuitBreakerReset);
        sink.publish(EngineEvent::CircuitBreakerReset);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_value(EngineEvent::EntryRejected {
            chain: Chain::Solana,
            token_address: "Tok".into(),
            reasons: vec!["Low liquidity: $100".into()],
        })
        .unwrap();
        assert_eq!(json["event"], "entry_rejected");
        assert_eq!(json["chain"], "solana");
    }
}
