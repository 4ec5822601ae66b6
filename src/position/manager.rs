//! Position Lifecycle Manager.
//!
//! Owns every open position, the capital ledger and the circuit breaker. Each
//! tick moves a position to a new price, then runs the take-profit ladder, the
//! stop checks and the stagnant-position exit, in that order.
//!
//! State is changed only between collaborator calls, never across one, so a
//! tick cancelled mid-flight leaves the ledger consistent. Persistence is a
//! best-effort copy: failures are logged and never roll back state.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ChainConfig, EngineConfig, PoolConfig, TakeProfitLadder, TakeProfitLevel, TradingConfig};
use crate::error::{EngineError, EngineResult, OpenRejection};
use crate::events::{EngineEvent, EventSink};
use crate::position::circuit_breaker::BreakerCheck;
use crate::position::portfolio::{DailyStats, PortfolioState, PortfolioSummary};
use crate::position::types::{
    ActivePosition, ExitReason, PositionSnapshot, TradeKind, TradeRecord, DUST_QUANTITY,
};
use crate::providers::{ExecutionProvider, MarketDataProvider, SwapResult};
use crate::storage::PositionRepository;
use crate::types::{Chain, PoolType};

/// Manager shared between the bot loops. The mutex is the single writer.
pub type SharedManager = Arc<tokio::sync::Mutex<PositionManager>>;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub chain: Chain,
    pub token_address: String,
    pub symbol: String,
    pub pool: PoolType,
    pub entry_price: f64,
    pub size_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position_id: i64,
    pub reason: ExitReason,
    pub exit_price: f64,
    pub pnl_usd: f64,
    pub returned_capital: f64,
    pub final_stop_loss: f64,
}

/// What one price tick did to a position.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub position_id: i64,
    pub price: f64,
    pub take_profits: Vec<u8>,
    pub stop_loss: f64,
    pub closed: Option<ClosedPosition>,
}

pub struct PositionManager {
    trading: TradingConfig,
    pools: BTreeMap<PoolType, PoolConfig>,
    chains: BTreeMap<Chain, ChainConfig>,
    ladder: TakeProfitLadder,
    positions: BTreeMap<i64, ActivePosition>,
    portfolio: PortfolioState,
    execution: Arc<dyn ExecutionProvider>,
    repository: Arc<dyn PositionRepository>,
    events: Arc<dyn EventSink>,
    next_id: i64,
    call_timeout: Duration,
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| EngineError::execution(format!("timed out after {}s", timeout.as_secs())))?
}

impl PositionManager {
    pub fn new(
        config: &EngineConfig,
        execution: Arc<dyn ExecutionProvider>,
        repository: Arc<dyn PositionRepository>,
        events: Arc<dyn EventSink>,
        now: DateTime<Utc>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let pools = PoolType::all()
            .into_iter()
            .map(|pool| (pool, config.pool(pool).clone()))
            .collect();

        Ok(Self {
            trading: config.trading.clone(),
            pools,
            chains: config.chains.clone(),
            ladder: config.take_profit_ladder()?,
            positions: BTreeMap::new(),
            portfolio: PortfolioState::new(config, now),
            execution,
            repository,
            events,
            next_id: 1,
            call_timeout: Duration::from_secs(config.trading.collaborator_timeout_seconds),
        })
    }

    pub fn into_shared(self) -> SharedManager {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn pool_config(&self, pool: PoolType) -> EngineResult<&PoolConfig> {
        self.pools
            .get(&pool)
            .ok_or_else(|| EngineError::Config(format!("no policy for pool {}", pool)))
    }

    // ---- queries ----

    pub fn open_count(&self, pool: PoolType) -> usize {
        self.positions.values().filter(|p| p.pool() == pool).count()
    }

    pub fn total_open(&self) -> usize {
        self.positions.len()
    }

    pub fn holds(&self, chain: Chain, token_address: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.chain() == chain && p.token_address() == token_address)
    }

    pub fn position(&self, id: i64) -> Option<&ActivePosition> {
        self.positions.get(&id)
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    pub fn snapshots(&self, now: DateTime<Utc>) -> Vec<PositionSnapshot> {
        self.positions.values().map(|p| p.to_snapshot(now)).collect()
    }

    pub fn exposure(&self) -> f64 {
        self.positions.values().map(|p| p.record.current_value()).sum()
    }

    pub fn portfolio_summary(&self) -> PortfolioSummary {
        self.portfolio.summary(self.exposure(), self.positions.len())
    }

    /// USD size for an entry of `size_percent` of the pool's free capital,
    /// clamped to the configured position bounds.
    pub fn size_for(&self, pool: PoolType, size_percent: f64) -> f64 {
        let raw = self.portfolio.pool_available(pool) * size_percent / 100.0;
        raw.clamp(self.trading.min_position_size, self.trading.max_position_size)
    }

    pub fn record_scan(&mut self, scanned: u64, rejected: u64) {
        self.portfolio.record_scan(scanned, rejected);
    }

    // ---- startup / shutdown ----

    /// Reloads OPEN positions from the repository and re-debits their capital.
    pub async fn restore_open_positions(&mut self) -> anyhow::Result<usize> {
        let max_id = self.repository.max_position_id().await?;
        self.next_id = self.next_id.max(max_id + 1);

        let mut restored = 0;
        for record in self.repository.load_open_positions().await? {
            if self.positions.contains_key(&record.id) {
                continue;
            }
            self.portfolio.debit(record.pool, record.entry_value);
            debug!("Restored position {} ({} {})", record.id, record.pool, record.token_address);
            self.positions.insert(record.id, ActivePosition::from_record(record));
            restored += 1;
        }

        info!("Restored {} open positions, next id {}", restored, self.next_id);
        Ok(restored)
    }

    /// Writes every open position's state to the repository.
    pub async fn persist_all(&self) -> usize {
        let mut saved = 0;
        for pos in self.positions.values() {
            match self.repository.update_position(&pos.record).await {
                Ok(()) => saved += 1,
                Err(e) => error!("Failed to persist position {}: {:#}", pos.id(), e),
            }
        }
        saved
    }

    // ---- entry ----

    #[instrument(skip(self, request), fields(token = %request.token_address, pool = %request.pool))]
    pub async fn open_position(&mut self, request: OpenRequest, now: DateTime<Utc>) -> EngineResult<PositionSnapshot> {
        match self.portfolio.breaker.check(now) {
            BreakerCheck::Paused { until } => {
                return Err(EngineError::CapacityExceeded(OpenRejection::CircuitBreakerActive { until }));
            }
            BreakerCheck::Resumed => self.events.publish(EngineEvent::CircuitBreakerReset),
            BreakerCheck::Available => {}
        }

        if !(request.entry_price.is_finite() && request.entry_price > 0.0) {
            return Err(EngineError::CapacityExceeded(OpenRejection::InvalidPrice));
        }
        if !request.size_usd.is_finite() {
            return Err(EngineError::CapacityExceeded(OpenRejection::InvalidSize));
        }
        if self.holds(request.chain, &request.token_address) {
            return Err(EngineError::CapacityExceeded(OpenRejection::AlreadyHolding));
        }

        let policy = self.pool_config(request.pool)?;
        let stop_loss_percent = policy.stop_loss_percent.abs();
        if self.open_count(request.pool) >= policy.max_positions {
            return Err(EngineError::CapacityExceeded(OpenRejection::PoolFull {
                pool: request.pool,
                max: policy.max_positions,
            }));
        }
        if self.positions.len() >= self.trading.max_total_positions {
            return Err(EngineError::CapacityExceeded(OpenRejection::PortfolioFull {
                max: self.trading.max_total_positions,
            }));
        }

        let size = request
            .size_usd
            .clamp(self.trading.min_position_size, self.trading.max_position_size)
            .min(self.portfolio.pool_available(request.pool));
        if size < self.trading.min_position_size {
            return Err(EngineError::CapacityExceeded(OpenRejection::InsufficientCapital {
                available: size,
                minimum: self.trading.min_position_size,
            }));
        }

        let native_price = self
            .chains
            .get(&request.chain)
            .map(|c| c.native_price_usd)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| EngineError::Config(format!("no native price for {}", request.chain)))?;

        let execution = Arc::clone(&self.execution);
        let swap = match bounded(
            self.call_timeout,
            execution.buy(request.chain, &request.token_address, size / native_price),
        )
        .await
        .and_then(SwapResult::into_result)
        {
            Ok(swap) => swap,
            Err(e) => {
                warn!("Buy failed for {}: {}", request.token_address, e);
                self.events.publish(EngineEvent::ExecutionFailed {
                    position_id: None,
                    token_address: request.token_address.clone(),
                    kind: TradeKind::Buy,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        let stop_loss = request.entry_price * (1.0 - stop_loss_percent / 100.0);
        let active = ActivePosition::open(
            id,
            request.chain,
            request.token_address.clone(),
            request.symbol.clone(),
            request.pool,
            request.entry_price,
            size,
            stop_loss,
            now,
        );
        self.portfolio.debit(request.pool, size);

        let snapshot = active.to_snapshot(now);
        let record = active.record.clone();
        self.positions.insert(id, active);

        info!(
            position_id = id,
            "Opened {} position {} @ {:.10} (${:.2}, stop {:.10})",
            request.pool, request.symbol, request.entry_price, size, stop_loss
        );
        self.events.publish(EngineEvent::PositionOpened {
            position: snapshot.clone(),
            size_usd: size,
            tx_ref: swap.tx_ref.clone(),
        });

        self.persist("create position", self.repository.create_position(&record)).await;
        let trade = TradeRecord {
            id: None,
            position_id: id,
            kind: TradeKind::Buy,
            chain: request.chain,
            token_address: request.token_address,
            symbol: request.symbol,
            price: request.entry_price,
            quantity: record.original_quantity,
            value: size,
            slippage_percent: swap.slippage_percent,
            tx_ref: swap.tx_ref,
            timestamp: now,
        };
        self.persist("record buy", self.repository.record_trade(&trade)).await;

        Ok(snapshot)
    }

    // ---- monitoring ----

    /// Fetches a price for every open position and applies it.
    pub async fn monitor_tick(&mut self, market: &dyn MarketDataProvider, now: DateTime<Utc>) -> Vec<TickReport> {
        let targets: Vec<(i64, Chain, String)> = self
            .positions
            .values()
            .map(|p| (p.id(), p.chain(), p.token_address().to_string()))
            .collect();

        let mut reports = Vec::with_capacity(targets.len());
        for (id, chain, token) in targets {
            let price = match tokio::time::timeout(self.call_timeout, market.price(chain, &token)).await {
                Ok(Ok(price)) => price,
                Ok(Err(e)) => {
                    warn!("No price for position {} ({}): {}", id, token, e);
                    continue;
                }
                Err(_) => {
                    warn!("Price lookup for position {} ({}) timed out", id, token);
                    continue;
                }
            };

            match self.apply_price(id, price, now).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Tick skipped for position {}: {}", id, e),
            }
        }
        reports
    }

    /// Runs one tick for a position at `price`.
    #[instrument(skip(self))]
    pub async fn apply_price(&mut self, id: i64, price: f64, now: DateTime<Utc>) -> EngineResult<TickReport> {
        if !(price.is_finite() && price > 0.0) {
            return Err(EngineError::unavailable("market_data", format!("invalid price {}", price)));
        }
        let pos = self
            .positions
            .get_mut(&id)
            .ok_or_else(|| EngineError::invalid_state(format!("position {} is not open", id)))?;
        pos.update_price(price);

        let due = pos.due_take_profits(self.ladder.iter());
        let mut report = TickReport {
            position_id: id,
            price,
            take_profits: Vec::new(),
            stop_loss: pos.stop_loss(),
            closed: None,
        };

        for level in due {
            if self.execute_take_profit(id, &level, now).await {
                report.take_profits.push(level.level);
            }
            if self.positions.get(&id).is_some_and(ActivePosition::is_exhausted) {
                report.closed = self.settle(id, ExitReason::LadderComplete, None, now).await;
                break;
            }
        }

        if report.closed.is_none() {
            let exit = self.stop_exit(id).or_else(|| self.stagnant_exit(id, now));
            if let Some(reason) = exit {
                // at most one exit sell per tick; a failed one is retried on the next
                report.closed = self.close_position(id, reason, now).await.ok().flatten();
            }
        }

        match (self.positions.get(&id), &report.closed) {
            (Some(pos), _) => {
                report.stop_loss = pos.stop_loss();
                let record = pos.record.clone();
                self.persist("update position", self.repository.update_position(&record)).await;
            }
            (None, Some(closed)) => report.stop_loss = closed.final_stop_loss,
            (None, None) => {}
        }
        Ok(report)
    }

    async fn execute_take_profit(&mut self, id: i64, level: &TakeProfitLevel, now: DateTime<Utc>) -> bool {
        let Some(pos) = self.positions.get(&id) else {
            return false;
        };
        let (chain, token) = (pos.chain(), pos.token_address().to_string());
        let quantity = pos.take_profit_quantity(level);
        if quantity <= DUST_QUANTITY {
            return false;
        }

        let execution = Arc::clone(&self.execution);
        let swap = match bounded(self.call_timeout, execution.sell(chain, &token, quantity))
            .await
            .and_then(SwapResult::into_result)
        {
            Ok(swap) => swap,
            Err(e) => {
                self.sell_failed(id, token, TradeKind::TakeProfit(level.level), &e);
                return false;
            }
        };

        let is_final = level.level == self.ladder.final_level().level;
        let Some(pos) = self.positions.get_mut(&id) else {
            return false;
        };
        let fill = pos.record_take_profit(level.level, quantity);
        let mut events = vec![EngineEvent::TakeProfitHit {
            position_id: id,
            token_address: token.clone(),
            level: level.level,
            quantity: fill.quantity,
            price: fill.price,
            value: fill.value,
            pnl: fill.pnl,
        }];
        info!(
            position_id = id,
            "TP{} hit for {}: sold {:.4} for ${:.2} (${:+.2})",
            level.level, token, fill.quantity, fill.value, fill.pnl
        );

        if let Some(new_stop) = level.stop_price(pos.record.entry_price) {
            let from = pos.stop_loss();
            if pos.raise_stop(new_stop) {
                info!(position_id = id, "Stop raised {:.10} -> {:.10}", from, new_stop);
                events.push(EngineEvent::StopLossRaised { position_id: id, token_address: token.clone(), from, to: new_stop });
            }
        }
        if is_final && !pos.record.trailing_active {
            pos.activate_trailing();
            info!(position_id = id, "Trailing stop armed at high {:.10}", pos.record.trailing_high);
            events.push(EngineEvent::TrailingStopActivated {
                position_id: id,
                token_address: token.clone(),
                high: pos.record.trailing_high,
            });
        }

        let trade = TradeRecord {
            id: None,
            position_id: id,
            kind: TradeKind::TakeProfit(level.level),
            chain,
            token_address: token,
            symbol: pos.record.symbol.clone(),
            price: fill.price,
            quantity: fill.quantity,
            value: fill.value,
            slippage_percent: swap.slippage_percent,
            tx_ref: swap.tx_ref,
            timestamp: now,
        };
        for event in events {
            self.events.publish(event);
        }
        self.persist("record take-profit", self.repository.record_trade(&trade)).await;
        true
    }

    /// Ratchets the trailing stop and reports which stop, if any, the price has crossed.
    fn stop_exit(&mut self, id: i64) -> Option<ExitReason> {
        let pool = self.positions.get(&id)?.pool();
        let trail_percent = self.pool_config(pool).ok()?.trailing_stop_percent;
        let pos = self.positions.get_mut(&id)?;
        let price = pos.record.current_price;

        if let Some(trail) = pos.trailing_stop_price(trail_percent) {
            let from = pos.stop_loss();
            if pos.raise_stop(trail) {
                debug!(position_id = id, "Trailing stop raised {:.10} -> {:.10}", from, trail);
                let token_address = pos.token_address().to_string();
                self.events.publish(EngineEvent::StopLossRaised { position_id: id, token_address, from, to: trail });
            }
            if price <= trail {
                return Some(ExitReason::TrailingStop);
            }
        }

        let stop = self.positions.get(&id)?.stop_loss();
        (price <= stop).then_some(ExitReason::StopLoss)
    }

    fn stagnant_exit(&self, id: i64, now: DateTime<Utc>) -> Option<ExitReason> {
        let pos = self.positions.get(&id)?;
        let flat_exit_minutes = self.pool_config(pos.pool()).ok()?.flat_exit_minutes as f64;
        let stale = pos.record.age_minutes(now) > flat_exit_minutes
            && pos.record.pnl_percent.abs() < self.trading.stagnant_pnl_percent;
        stale.then_some(ExitReason::Stagnant)
    }

    // ---- exit ----

    /// Sells everything left in a position.
    ///
    /// Closing a position that is no longer open is a no-op returning `Ok(None)`.
    /// A failed sell leaves the position untouched for the next tick.
    #[instrument(skip(self))]
    pub async fn close_position(
        &mut self,
        id: i64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ClosedPosition>> {
        let Some(pos) = self.positions.get(&id) else {
            debug!("Close of position {} ignored: not open", id);
            return Ok(None);
        };
        if pos.is_exhausted() {
            debug!("Close of position {} ignored: {}", id, EngineError::invalid_state("nothing left to sell"));
            return Ok(None);
        }
        let (chain, token, quantity) = (pos.chain(), pos.token_address().to_string(), pos.remaining_quantity());

        let execution = Arc::clone(&self.execution);
        let swap = match bounded(self.call_timeout, execution.sell(chain, &token, quantity))
            .await
            .and_then(SwapResult::into_result)
        {
            Ok(swap) => swap,
            Err(e) => {
                self.sell_failed(id, token, TradeKind::Exit(reason), &e);
                return Err(e);
            }
        };

        Ok(self.settle(id, reason, Some((quantity, swap)), now).await)
    }

    /// Closes every open position, continuing past individual failures.
    pub async fn close_all(&mut self, reason: ExitReason, now: DateTime<Utc>) -> Vec<ClosedPosition> {
        let ids: Vec<i64> = self.positions.keys().copied().collect();
        let mut closed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.close_position(id, reason, now).await {
                Ok(Some(c)) => closed.push(c),
                Ok(None) => {}
                Err(e) => error!("Failed to close position {}: {}", id, e),
            }
        }
        closed
    }

    fn sell_failed(&mut self, id: i64, token_address: String, kind: TradeKind, error: &EngineError) {
        if let Some(pos) = self.positions.get_mut(&id) {
            pos.failed_sells += 1;
        }
        warn!(position_id = id, "{} sell failed for {}: {}", kind.label(), token_address, error);
        self.events.publish(EngineEvent::ExecutionFailed {
            position_id: Some(id),
            token_address,
            kind,
            reason: error.to_string(),
        });
    }

    /// Books the final sale, returns capital and updates the day and the breaker.
    async fn settle(
        &mut self,
        id: i64,
        reason: ExitReason,
        sale: Option<(f64, SwapResult)>,
        now: DateTime<Utc>,
    ) -> Option<ClosedPosition> {
        let mut pos = self.positions.remove(&id)?;
        let final_stop_loss = pos.stop_loss();
        let (sell_value, total_pnl) = pos.settle(reason, now);
        let pool = pos.pool();
        let returned = pos.record.total_sold_value;

        self.portfolio.credit(pool, returned);
        self.portfolio.record_close(pool, total_pnl);
        let tripped = self.portfolio.breaker.record_close(
            total_pnl,
            self.portfolio.daily_pnl(),
            self.portfolio.total_capital,
            now,
        );

        let record = pos.record;
        let exit_price = record.current_price;
        let pnl_percent = if record.entry_value > 0.0 { total_pnl / record.entry_value * 100.0 } else { 0.0 };
        info!(
            position_id = id,
            "Closed {} {}: {} | P&L ${:+.2} ({:+.1}%)",
            pool, record.symbol, reason, total_pnl, pnl_percent
        );
        self.events.publish(EngineEvent::PositionClosed {
            position_id: id,
            chain: record.chain,
            token_address: record.token_address.clone(),
            symbol: record.symbol.clone(),
            pool,
            reason,
            exit_price,
            pnl_usd: total_pnl,
            pnl_percent,
            returned_capital: returned,
        });
        if let Some((trip, until)) = tripped {
            self.events.publish(EngineEvent::CircuitBreakerTripped { reason: trip, until });
        }

        let trade = sale.map(|(quantity, swap)| TradeRecord {
            id: None,
            position_id: id,
            kind: TradeKind::Exit(reason),
            chain: record.chain,
            token_address: record.token_address.clone(),
            symbol: record.symbol.clone(),
            price: exit_price,
            quantity,
            value: sell_value,
            slippage_percent: swap.slippage_percent,
            tx_ref: swap.tx_ref,
            timestamp: now,
        });
        if let Some(trade) = &trade {
            self.persist("record exit", self.repository.record_trade(trade)).await;
        }
        self.persist("close position", self.repository.close_position(&record)).await;

        Some(ClosedPosition {
            position_id: id,
            reason,
            exit_price,
            pnl_usd: total_pnl,
            returned_capital: returned,
            final_stop_loss,
        })
    }

    // ---- daily ----

    /// Stats for the day so far without resetting anything.
    pub fn daily_stats(&self) -> DailyStats {
        self.portfolio.daily_stats(self.exposure())
    }

    /// Closes the trading day: returns its stats and zeroes the daily counters.
    pub fn reset_daily(&mut self, now: DateTime<Utc>) -> DailyStats {
        let exposure = self.exposure();
        let stats = self.portfolio.roll_day(exposure, now);
        info!(
            "Day {} closed: {} trades, P&L ${:+.2} ({:+.1}%)",
            stats.date, stats.trades_count, stats.total_pnl, stats.pnl_percent
        );
        stats
    }

    // ---- persistence ----

    async fn persist<T, F>(&self, what: &str, fut: F)
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Failed to {}: {:#}", what, e),
            Err(_) => error!("Failed to {}: timed out", what),
        }
    }
}
