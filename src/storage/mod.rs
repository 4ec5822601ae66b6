//! Persistence contract for positions, fills and daily statistics.
//!
//! The manager's in-memory state is authoritative. The repository is a durable
//! copy used to resume open positions after a restart and for reporting.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::position::portfolio::DailyStats;
use crate::position::types::{Position, TradeRecord};

pub use sqlite::SqliteRepository;

#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Inserts a new position under the id the manager assigned.
    async fn create_position(&self, position: &Position) -> Result<()>;

    /// Overwrites the mutable state of an open position, including hit take-profit levels.
    async fn update_position(&self, position: &Position) -> Result<()>;

    /// Writes the terminal state of a closed position.
    async fn close_position(&self, position: &Position) -> Result<()>;

    async fn get_position(&self, id: i64) -> Result<Option<Position>>;

    async fn record_trade(&self, trade: &TradeRecord) -> Result<i64>;

    async fn load_open_positions(&self) -> Result<Vec<Position>>;

    /// Highest id ever stored, 0 for an empty store.
    async fn max_position_id(&self) -> Result<i64>;

    /// Trades at or after `since`, oldest first.
    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>>;

    async fn save_daily_stats(&self, stats: &DailyStats) -> Result<()>;

    async fn health_check(&self) -> Result<bool>;
}
