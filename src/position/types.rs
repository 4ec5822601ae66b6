//! Position records and their runtime projection.
//!
//! `Position` is what the repository stores. `ActivePosition` wraps it with the
//! per-tick bookkeeping the manager needs while the position is open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::config::TakeProfitLevel;
use crate::types::{Chain, PoolType};

/// Quantities below this are treated as fully sold.
pub const DUST_QUANTITY: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(format!("unknown position status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    /// Held past the pool's flat-exit window without moving
    Stagnant,
    /// Every unit was sold by the take-profit ladder
    LadderComplete,
    Manual,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Stagnant => "stagnant",
            ExitReason::LadderComplete => "ladder_complete",
            ExitReason::Manual => "manual",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(ExitReason::StopLoss),
            "trailing_stop" => Ok(ExitReason::TrailingStop),
            "stagnant" => Ok(ExitReason::Stagnant),
            "ladder_complete" => Ok(ExitReason::LadderComplete),
            "manual" => Ok(ExitReason::Manual),
            "shutdown" => Ok(ExitReason::Shutdown),
            other => Err(format!("unknown exit reason '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeKind {
    Buy,
    TakeProfit(u8),
    Exit(ExitReason),
}

impl TradeKind {
    /// Stored label: `BUY`, `TP2`, `EXIT:stop_loss`.
    pub fn label(&self) -> String {
        match self {
            TradeKind::Buy => "BUY".to_string(),
            TradeKind::TakeProfit(level) => format!("TP{}", level),
            TradeKind::Exit(reason) => format!("EXIT:{}", reason),
        }
    }

    pub fn is_sell(&self) -> bool {
        !matches!(self, TradeKind::Buy)
    }
}

impl FromStr for TradeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "BUY" {
            return Ok(TradeKind::Buy);
        }
        if let Some(level) = s.strip_prefix("TP") {
            return level
                .parse::<u8>()
                .map(TradeKind::TakeProfit)
                .map_err(|e| format!("bad take-profit label '{}': {}", s, e));
        }
        if let Some(reason) = s.strip_prefix("EXIT:") {
            return reason.parse().map(TradeKind::Exit);
        }
        Err(format!("unknown trade kind '{}'", s))
    }
}

/// One fill against the execution provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Database id, set on insert
    pub id: Option<i64>,
    pub position_id: i64,
    pub kind: TradeKind,
    pub chain: Chain,
    pub token_address: String,
    pub symbol: String,
    /// Price booked for the fill
    pub price: f64,
    pub quantity: f64,
    /// USD proceeds or cost
    pub value: f64,
    pub slippage_percent: f64,
    /// Execution reference, if the provider returned one
    pub tx_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted position record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Assigned by the manager, unique across restarts
    pub id: i64,
    pub chain: Chain,
    pub token_address: String,
    pub symbol: String,
    pub pool: PoolType,
    pub entry_price: f64,
    /// USD committed at entry
    pub entry_value: f64,
    /// When the buy filled
    pub entry_time: DateTime<Utc>,
    /// Tokens bought at entry
    pub original_quantity: f64,
    /// Tokens still held after partial sells
    pub remaining_quantity: f64,
    /// Last price applied by a tick
    pub current_price: f64,
    /// Highest price seen since entry
    pub highest_price: f64,
    /// Current stop price; only ever moves up
    pub stop_loss: f64,
    /// Ladder levels already sold
    pub take_profits_hit: BTreeSet<u8>,
    /// Profit booked by partial and final sells
    pub realized_pnl: f64,
    /// USD received from every sell so far
    pub total_sold_value: f64,
    /// Set once the final ladder level has fired
    pub trailing_active: bool,
    /// High the trailing stop trails from
    pub trailing_high: f64,
    /// Move of the current price against entry, in percent
    pub pnl_percent: f64,
    /// Realized plus unrealized profit
    pub pnl_usd: f64,
    pub status: PositionStatus,
    /// Price of the final sell
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn current_value(&self) -> f64 {
        self.remaining_quantity * self.current_price
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.entry_time).num_seconds().max(0) as f64 / 60.0
    }
}

/// Proceeds of one partial sell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellFill {
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    pub pnl: f64,
}

/// Serializable view of an open position for logs and alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub id: i64,
    pub chain: Chain,
    pub token_address: String,
    pub symbol: String,
    pub pool: PoolType,
    pub entry_price: f64,
    pub current_price: f64,
    pub highest_price: f64,
    pub pnl_percent: f64,
    pub pnl_usd: f64,
    pub original_quantity: f64,
    pub remaining_quantity: f64,
    pub take_profits_hit: Vec<u8>,
    pub stop_loss: f64,
    pub trailing_active: bool,
    pub age_minutes: f64,
    pub status: PositionStatus,
    pub failed_sells: u32,
}

/// Runtime state of an open position.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePosition {
    pub record: Position,
    /// Sells rejected by the execution provider since the last successful one
    pub failed_sells: u32,
}

impl ActivePosition {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: i64,
        chain: Chain,
        token_address: impl Into<String>,
        symbol: impl Into<String>,
        pool: PoolType,
        entry_price: f64,
        entry_value: f64,
        stop_loss: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        let quantity = entry_value / entry_price;
        Self {
            record: Position {
                id,
                chain,
                token_address: token_address.into(),
                symbol: symbol.into(),
                pool,
                entry_price,
                entry_value,
                entry_time,
                original_quantity: quantity,
                remaining_quantity: quantity,
                current_price: entry_price,
                highest_price: entry_price,
                stop_loss,
                take_profits_hit: BTreeSet::new(),
                realized_pnl: 0.0,
                total_sold_value: 0.0,
                trailing_active: false,
                trailing_high: 0.0,
                pnl_percent: 0.0,
                pnl_usd: 0.0,
                status: PositionStatus::Open,
                exit_price: None,
                exit_time: None,
                exit_reason: None,
            },
            failed_sells: 0,
        }
    }

    pub fn from_record(record: Position) -> Self {
        Self { record, failed_sells: 0 }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn pool(&self) -> PoolType {
        self.record.pool
    }

    pub fn chain(&self) -> Chain {
        self.record.chain
    }

    pub fn token_address(&self) -> &str {
        &self.record.token_address
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.record.remaining_quantity
    }

    pub fn stop_loss(&self) -> f64 {
        self.record.stop_loss
    }

    pub fn is_exhausted(&self) -> bool {
        self.record.remaining_quantity <= DUST_QUANTITY
    }

    /// Moves the position to a new market price and refreshes P&L.
    pub fn update_price(&mut self, price: f64) {
        let record = &mut self.record;
        record.current_price = price;
        if price > record.highest_price {
            record.highest_price = price;
        }
        if record.trailing_active && price > record.trailing_high {
            record.trailing_high = price;
        }
        self.refresh_pnl();
    }

    fn refresh_pnl(&mut self) {
        let record = &mut self.record;
        if record.entry_price > 0.0 {
            record.pnl_percent = (record.current_price - record.entry_price) / record.entry_price * 100.0;
        }
        let unrealized = record.remaining_quantity * (record.current_price - record.entry_price);
        record.pnl_usd = record.realized_pnl + unrealized;
    }

    /// Ladder levels not yet hit whose trigger the current price has reached.
    pub fn due_take_profits<'a>(&self, levels: impl Iterator<Item = &'a TakeProfitLevel>) -> Vec<TakeProfitLevel> {
        levels
            .filter(|tp| !self.record.take_profits_hit.contains(&tp.level))
            .filter(|tp| self.record.current_price >= tp.trigger_price(self.record.entry_price))
            .copied()
            .collect()
    }

    pub fn take_profit_quantity(&self, level: &TakeProfitLevel) -> f64 {
        self.record.remaining_quantity * (level.sell_percent / 100.0)
    }

    /// Books a take-profit sell at the current price.
    pub fn record_take_profit(&mut self, level: u8, quantity: f64) -> SellFill {
        let record = &mut self.record;
        let quantity = quantity.min(record.remaining_quantity).max(0.0);
        let price = record.current_price;
        let value = quantity * price;
        let pnl = value - quantity * record.entry_price;

        record.take_profits_hit.insert(level);
        record.remaining_quantity = (record.remaining_quantity - quantity).max(0.0);
        record.total_sold_value += value;
        record.realized_pnl += pnl;
        self.failed_sells = 0;
        self.refresh_pnl();

        SellFill { quantity, price, value, pnl }
    }

    /// Ratchets the stop upward. Returns false and leaves the stop alone otherwise.
    pub fn raise_stop(&mut self, new_stop: f64) -> bool {
        if new_stop.is_finite() && new_stop > self.record.stop_loss {
            self.record.stop_loss = new_stop;
            true
        } else {
            false
        }
    }

    pub fn activate_trailing(&mut self) {
        self.record.trailing_active = true;
        self.record.trailing_high = self.record.current_price;
    }

    pub fn trailing_stop_price(&self, trail_percent: f64) -> Option<f64> {
        self.record
            .trailing_active
            .then(|| self.record.trailing_high * (1.0 - trail_percent / 100.0))
    }

    /// Books the final sell of everything left and returns (sell value, total P&L).
    pub fn settle(&mut self, reason: ExitReason, now: DateTime<Utc>) -> (f64, f64) {
        let record = &mut self.record;
        let quantity = record.remaining_quantity;
        let value = quantity * record.current_price;
        let final_pnl = value - quantity * record.entry_price;

        record.realized_pnl += final_pnl;
        record.total_sold_value += value;
        record.remaining_quantity = 0.0;
        record.pnl_usd = record.realized_pnl;
        record.status = PositionStatus::Closed;
        record.exit_price = Some(record.current_price);
        record.exit_time = Some(now);
        record.exit_reason = Some(reason);

        (value, record.realized_pnl)
    }

    pub fn to_snapshot(&self, now: DateTime<Utc>) -> PositionSnapshot {
        let record = &self.record;
        PositionSnapshot {
            id: record.id,
            chain: record.chain,
            token_address: record.token_address.clone(),
            symbol: record.symbol.clone(),
            pool: record.pool,
            entry_price: record.entry_price,
            current_price: record.current_price,
            highest_price: record.highest_price,
            pnl_percent: record.pnl_percent,
            pnl_usd: record.pnl_usd,
            original_quantity: record.original_quantity,
            remaining_quantity: record.remaining_quantity,
            take_profits_hit: record.take_profits_hit.iter().copied().collect(),
            stop_loss: record.stop_loss,
            trailing_active: record.trailing_active,
            age_minutes: record.age_minutes(now),
            status: record.status,
            failed_sells: self.failed_sells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_position() -> ActivePosition {
        ActivePosition::open(1, Chain::Solana, "Tok", "TOK", PoolType::Hunt, 1.0, 10.0, 0.7, Utc::now())
    }

    #[test]
    fn test_open_sets_quantity_and_stop() {
        let pos = create_test_position();
        assert_eq!(pos.record.original_quantity, 10.0);
        assert_eq!(pos.remaining_quantity(), 10.0);
        assert_eq!(pos.stop_loss(), 0.7);
        assert!(pos.record.is_open());
    }

    #[test]
    fn test_update_price_tracks_high_and_pnl() {
        let mut pos = create_test_position();
        pos.update_price(1.5);
        pos.update_price(1.2);
        assert_eq!(pos.record.highest_price, 1.5);
        assert!((pos.record.pnl_percent - 20.0).abs() < 1e-9);
        assert!((pos.record.pnl_usd - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_books_realized_pnl() {
        let mut pos = create_test_position();
        pos.update_price(1.5);
        let fill = pos.record_take_profit(1, 2.0);

        assert_eq!(fill.quantity, 2.0);
        assert!((fill.value - 3.0).abs() < 1e-9);
        assert!((fill.pnl - 1.0).abs() < 1e-9);
        assert_eq!(pos.remaining_quantity(), 8.0);
        assert!(pos.record.take_profits_hit.contains(&1));
        // realized 1.0 plus 8 units up 0.5 each
        assert!((pos.record.pnl_usd - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_stop_only_moves_up() {
        let mut pos = create_test_position();
        assert!(pos.raise_stop(1.0));
        assert!(!pos.raise_stop(0.9));
        assert!(!pos.raise_stop(f64::NAN));
        assert_eq!(pos.stop_loss(), 1.0);
    }

    #[test]
    fn test_trailing_high_follows_price_after_activation() {
        let mut pos = create_test_position();
        pos.update_price(6.0);
        assert_eq!(pos.trailing_stop_price(25.0), None);

        pos.activate_trailing();
        pos.update_price(8.0);
        pos.update_price(7.0);
        assert_eq!(pos.record.trailing_high, 8.0);
        assert_eq!(pos.trailing_stop_price(25.0), Some(6.0));
    }

    #[test]
    fn test_settle_closes_everything() {
        let mut pos = create_test_position();
        pos.update_price(0.5);
        let (value, pnl) = pos.settle(ExitReason::StopLoss, Utc::now());

        assert!((value - 5.0).abs() < 1e-9);
        assert!((pnl + 5.0).abs() < 1e-9);
        assert_eq!(pos.remaining_quantity(), 0.0);
        assert_eq!(pos.record.status, PositionStatus::Closed);
        assert_eq!(pos.record.exit_reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_trade_kind_labels_parse_back() {
        for kind in [TradeKind::Buy, TradeKind::TakeProfit(3), TradeKind::Exit(ExitReason::Stagnant)] {
            assert_eq!(kind.label().parse::<TradeKind>().unwrap(), kind);
        }
        assert!("SELL".parse::<TradeKind>().is_err());
    }
}
