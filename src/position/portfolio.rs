//! Capital ledger and daily counters.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::position::circuit_breaker::CircuitBreaker;
use crate::types::PoolType;

/// Aggregate of one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub starting_capital: f64,
    pub ending_capital: f64,
    pub total_pnl: f64,
    pub pnl_percent: f64,
    pub trades_count: u32,
    pub winners: u32,
    pub losers: u32,
    pub win_rate: f64,
    /// Gross profit over gross loss; infinite with no losing closes
    pub profit_factor: f64,
    pub safe_pnl: f64,
    pub hunt_pnl: f64,
    pub tokens_scanned: u64,
    pub tokens_rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_capital: f64,
    pub available_capital: f64,
    pub pool_available: BTreeMap<PoolType, f64>,
    pub exposure: f64,
    pub open_positions: usize,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub consecutive_losses: u32,
    pub paused_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PortfolioState {
    /// Baseline for the daily loss percentage; never moves with P&L
    pub total_capital: f64,
    pub available_capital: f64,
    pool_available: BTreeMap<PoolType, f64>,
    pub breaker: CircuitBreaker,
    day: NaiveDate,
    day_starting_capital: f64,
    daily_pnl: f64,
    daily_trades: u32,
    winners: u32,
    losers: u32,
    gross_profit: f64,
    gross_loss: f64,
    pool_pnl: BTreeMap<PoolType, f64>,
    tokens_scanned: u64,
    tokens_rejected: u64,
}

impl PortfolioState {
    pub fn new(config: &EngineConfig, now: DateTime<Utc>) -> Self {
        let total = config.trading.starting_capital;
        let pool_available = PoolType::all()
            .into_iter()
            .map(|pool| (pool, total * config.pool(pool).allocation_percent / 100.0))
            .collect();

        Self {
            total_capital: total,
            available_capital: total,
            pool_available,
            breaker: CircuitBreaker::from_config(&config.trading),
            day: now.date_naive(),
            day_starting_capital: total,
            daily_pnl: 0.0,
            daily_trades: 0,
            winners: 0,
            losers: 0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            pool_pnl: BTreeMap::new(),
            tokens_scanned: 0,
            tokens_rejected: 0,
        }
    }

    pub fn pool_available(&self, pool: PoolType) -> f64 {
        self.pool_available.get(&pool).copied().unwrap_or(0.0)
    }

    pub fn debit(&mut self, pool: PoolType, amount: f64) {
        *self.pool_available.entry(pool).or_insert(0.0) -= amount;
        self.available_capital -= amount;
    }

    pub fn credit(&mut self, pool: PoolType, amount: f64) {
        *self.pool_available.entry(pool).or_insert(0.0) += amount;
        self.available_capital += amount;
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn daily_trades(&self) -> u32 {
        self.daily_trades
    }

    pub fn daily_loss_percent(&self) -> f64 {
        if self.total_capital > 0.0 {
            self.daily_pnl / self.total_capital * 100.0
        } else {
            0.0
        }
    }

    /// Books a closed position's total P&L against the day.
    pub fn record_close(&mut self, pool: PoolType, pnl: f64) {
        self.daily_pnl += pnl;
        self.daily_trades += 1;
        *self.pool_pnl.entry(pool).or_insert(0.0) += pnl;
        if pnl >= 0.0 {
            self.winners += 1;
            self.gross_profit += pnl;
        } else {
            self.losers += 1;
            self.gross_loss += pnl.abs();
        }
    }

    pub fn record_scan(&mut self, scanned: u64, rejected: u64) {
        self.tokens_scanned += scanned;
        self.tokens_rejected += rejected;
    }

    pub fn current_day(&self) -> NaiveDate {
        self.day
    }

    /// Stats for the day so far. `open_value` is the cost basis still deployed.
    pub fn daily_stats(&self, open_value: f64) -> DailyStats {
        let trades = self.daily_trades;
        DailyStats {
            date: self.day,
            starting_capital: self.day_starting_capital,
            ending_capital: self.available_capital + open_value,
            total_pnl: self.daily_pnl,
            pnl_percent: self.daily_loss_percent(),
            trades_count: trades,
            winners: self.winners,
            losers: self.losers,
            win_rate: if trades > 0 { self.winners as f64 / trades as f64 * 100.0 } else { 0.0 },
            profit_factor: if self.gross_loss > 0.0 {
                self.gross_profit / self.gross_loss
            } else {
                f64::INFINITY
            },
            safe_pnl: self.pool_pnl.get(&PoolType::Safe).copied().unwrap_or(0.0),
            hunt_pnl: self.pool_pnl.get(&PoolType::Hunt).copied().unwrap_or(0.0),
            tokens_scanned: self.tokens_scanned,
            tokens_rejected: self.tokens_rejected,
        }
    }

    /// Closes the day: returns its stats and zeroes the daily counters.
    pub fn roll_day(&mut self, open_value: f64, now: DateTime<Utc>) -> DailyStats {
        let stats = self.daily_stats(open_value);
        self.day = now.date_naive();
        self.day_starting_capital = stats.ending_capital;
        self.daily_pnl = 0.0;
        self.daily_trades = 0;
        self.winners = 0;
        self.losers = 0;
        self.gross_profit = 0.0;
        self.gross_loss = 0.0;
        self.pool_pnl.clear();
        self.tokens_scanned = 0;
        self.tokens_rejected = 0;
        stats
    }

    pub fn summary(&self, exposure: f64, open_positions: usize) -> PortfolioSummary {
        PortfolioSummary {
            total_capital: self.total_capital,
            available_capital: self.available_capital,
            pool_available: self.pool_available.clone(),
            exposure,
            open_positions,
            daily_pnl: self.daily_pnl,
            daily_trades: self.daily_trades,
            consecutive_losses: self.breaker.consecutive_losses(),
            paused_until: self.breaker.paused_until(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_split_by_allocation() {
        let state = PortfolioState::new(&EngineConfig::default(), Utc::now());
        assert_eq!(state.pool_available(PoolType::Safe), 60.0);
        assert_eq!(state.pool_available(PoolType::Hunt), 40.0);
        assert_eq!(state.available_capital, 100.0);
    }

    #[test]
    fn test_debit_and_credit_move_pool_and_total() {
        let mut state = PortfolioState::new(&EngineConfig::default(), Utc::now());
        state.debit(PoolType::Hunt, 10.0);
        assert_eq!(state.pool_available(PoolType::Hunt), 30.0);
        assert_eq!(state.available_capital, 90.0);

        state.credit(PoolType::Hunt, 12.5);
        assert_eq!(state.pool_available(PoolType::Hunt), 42.5);
        assert_eq!(state.available_capital, 102.5);
        assert_eq!(state.total_capital, 100.0);
    }

    #[test]
    fn test_daily_stats_profit_factor() {
        let mut state = PortfolioState::new(&EngineConfig::default(), Utc::now());
        state.record_close(PoolType::Safe, 6.0);
        assert!(state.daily_stats(0.0).profit_factor.is_infinite());

        state.record_close(PoolType::Hunt, -2.0);
        state.record_close(PoolType::Hunt, -1.0);
        let stats = state.daily_stats(0.0);
        assert_eq!(stats.trades_count, 3);
        assert_eq!(stats.winners, 1);
        assert!((stats.profit_factor - 2.0).abs() < 1e-9);
        assert!((stats.win_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.safe_pnl, 6.0);
        assert_eq!(stats.hunt_pnl, -3.0);
    }

    #[test]
    fn test_roll_day_resets_counters() {
        let now = Utc::now();
        let mut state = PortfolioState::new(&EngineConfig::default(), now);
        state.record_close(PoolType::Safe, -4.0);
        state.record_scan(12, 9);

        let stats = state.roll_day(0.0, now);
        assert_eq!(stats.tokens_scanned, 12);
        assert_eq!(state.daily_pnl(), 0.0);
        assert_eq!(state.daily_trades(), 0);
        assert_eq!(state.daily_stats(0.0).tokens_rejected, 0);
    }
}
