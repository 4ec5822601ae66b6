//! Runtime orchestration: the scan, monitor and daily loops.
//!
//! The bot owns the engines and shares the position manager behind a mutex.
//! Each loop ticks on its own interval and stops at the next tick boundary
//! once the shutdown channel flips, so an in-flight tick always completes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::{ConfluenceEngine, MomentumEngine, ScoringEngine};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventSink};
use crate::position::{OpenRequest, PositionSnapshot, SharedManager, TickReport, DailyStats};
use crate::providers::{MarketDataProvider, SafetyProvider, SmartMoneyProvider};
use crate::storage::PositionRepository;
use crate::types::{Chain, MarketSnapshot, SafetyAssessment, SafetyStatus};

/// Minimum 5-minute buy ratio a candidate needs to reach the full pipeline.
const QUICK_MIN_BUY_PRESSURE: f64 = 0.35;

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Entered(PositionSnapshot),
    Rejected(Vec<String>),
    /// Passed the engines but the manager declined to open
    Skipped(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: u64,
    pub rejected: u64,
    pub entered: u64,
}

/// Aggregation key of a rejection reason: the text before the first colon.
pub fn reason_key(reason: &str) -> String {
    reason.split(':').next().unwrap_or(reason).trim().to_string()
}

pub struct MoonshotBot {
    config: EngineConfig,
    market: Arc<dyn MarketDataProvider>,
    safety: Arc<dyn SafetyProvider>,
    smart_money: Arc<dyn SmartMoneyProvider>,
    repository: Arc<dyn PositionRepository>,
    events: Arc<dyn EventSink>,
    manager: SharedManager,
    scoring: ScoringEngine,
    confluence: ConfluenceEngine,
    momentum: Mutex<MomentumEngine>,
    rejections: Mutex<BTreeMap<String, u64>>,
    call_timeout: Duration,
}

impl MoonshotBot {
    pub fn new(
        config: EngineConfig,
        market: Arc<dyn MarketDataProvider>,
        safety: Arc<dyn SafetyProvider>,
        smart_money: Arc<dyn SmartMoneyProvider>,
        repository: Arc<dyn PositionRepository>,
        events: Arc<dyn EventSink>,
        manager: SharedManager,
    ) -> Self {
        Self {
            scoring: ScoringEngine::from_config(&config),
            confluence: ConfluenceEngine::from_config(&config),
            momentum: Mutex::new(MomentumEngine::new(config.momentum.clone())),
            rejections: Mutex::new(BTreeMap::new()),
            call_timeout: Duration::from_secs(config.trading.collaborator_timeout_seconds),
            config,
            market,
            safety,
            smart_money,
            repository,
            events,
            manager,
        }
    }

    pub fn manager(&self) -> SharedManager {
        Arc::clone(&self.manager)
    }

    pub async fn rejections_by_reason(&self) -> BTreeMap<String, u64> {
        self.rejections.lock().await.clone()
    }

    async fn bounded<T>(&self, provider: &'static str, fut: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| EngineError::unavailable(provider, format!("timed out after {}s", self.call_timeout.as_secs())))?
    }

    async fn reject(&self, snapshot: &MarketSnapshot, reasons: Vec<String>) -> CandidateOutcome {
        {
            let mut counts = self.rejections.lock().await;
            for reason in &reasons {
                *counts.entry(reason_key(reason)).or_insert(0) += 1;
            }
        }
        debug!("Rejected {} ({}): {}", snapshot.symbol, snapshot.token_address, reasons.join(", "));
        self.events.publish(EngineEvent::EntryRejected {
            chain: snapshot.chain,
            token_address: snapshot.token_address.clone(),
            reasons: reasons.clone(),
        });
        CandidateOutcome::Rejected(reasons)
    }

    /// Cheap checks run before any collaborator is called.
    pub fn quick_filter(&self, snapshot: &MarketSnapshot) -> Vec<String> {
        let mut reasons = Vec::new();
        let min_liquidity = self
            .config
            .chain(snapshot.chain)
            .map_or(self.config.trading.min_liquidity_usd, |c| c.min_liquidity_usd);

        if snapshot.liquidity_usd < min_liquidity {
            reasons.push(format!("Low liquidity: ${:.0}", snapshot.liquidity_usd));
        }
        let age = snapshot.age_minutes();
        if age > self.config.safe_pool.max_age_minutes {
            if age.is_finite() {
                reasons.push(format!("Too old: {:.0}m", age));
            } else {
                reasons.push("Too old: unknown age".to_string());
            }
        }
        if snapshot.buy_pressure_5m() < QUICK_MIN_BUY_PRESSURE {
            reasons.push(format!("Heavy selling: {:.0}%", snapshot.buy_pressure_5m() * 100.0));
        }
        reasons
    }

    /// Full pipeline for one candidate: quick filter, safety, momentum, smart
    /// money, score, confluence and, on a positive decision, the entry.
    #[instrument(skip(self, snapshot), fields(token = %snapshot.token_address, chain = %snapshot.chain))]
    pub async fn evaluate_candidate(&self, snapshot: MarketSnapshot, now: DateTime<Utc>) -> EngineResult<CandidateOutcome> {
        let chain = snapshot.chain;
        if self.manager.lock().await.holds(chain, &snapshot.token_address) {
            return Ok(CandidateOutcome::Skipped("already holding".to_string()));
        }

        let reasons = self.quick_filter(&snapshot);
        if !reasons.is_empty() {
            return Ok(self.reject(&snapshot, reasons).await);
        }

        let safety = match self.bounded("safety", self.safety.assess(chain, &snapshot.token_address)).await {
            Ok(safety) => safety,
            Err(e) => {
                warn!("Safety check unavailable for {}: {}", snapshot.token_address, e);
                SafetyAssessment::unknown(chain, snapshot.token_address.clone())
            }
        };
        if safety.status == SafetyStatus::Dangerous {
            let mut reasons = safety.rejection_reasons(&self.config.safety_limits());
            if reasons.is_empty() {
                reasons.push(format!("Safety: {} (score {})", safety.status, safety.score));
            }
            return Ok(self.reject(&snapshot, reasons).await);
        }

        let momentum = self.momentum.lock().await.analyze(&snapshot);
        let smart_money = match self
            .bounded("smart_money", self.smart_money.signals(chain, &snapshot.token_address))
            .await
        {
            Ok(signals) => Some(signals),
            Err(e) => {
                debug!("No smart money data for {}: {}", snapshot.token_address, e);
                None
            }
        };

        let score = self.scoring.score(&snapshot, &safety, None, None, smart_money.as_ref());
        let decision = self
            .confluence
            .analyze(chain, &snapshot, &safety, &score, &momentum, smart_money.as_ref());
        info!("{} score {} ({}): {}", snapshot.symbol, score.total, score.grade(), decision.summary());

        if !decision.should_enter {
            let mut reasons: Vec<String> = decision.rejection_reasons.iter().map(|r| r.to_string()).collect();
            if reasons.is_empty() {
                reasons.push(format!("Low confluence: {:.0}%", decision.confidence));
            }
            return Ok(self.reject(&snapshot, reasons).await);
        }
        let pool = decision
            .recommended_pool
            .ok_or_else(|| EngineError::invalid_state("entry decision without a pool"))?;

        let mut manager = self.manager.lock().await;
        let size_usd = manager.size_for(pool, decision.position_size_percent);
        let request = OpenRequest {
            chain,
            token_address: snapshot.token_address.clone(),
            symbol: snapshot.symbol.clone(),
            pool,
            entry_price: snapshot.price_usd,
            size_usd,
        };
        match manager.open_position(request, now).await {
            Ok(position) => Ok(CandidateOutcome::Entered(position)),
            Err(EngineError::CapacityExceeded(rejection)) => {
                info!("Entry into {} declined: {}", snapshot.symbol, rejection);
                Ok(CandidateOutcome::Skipped(rejection.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Discovers and evaluates candidates on every enabled chain.
    ///
    /// Every fresh pair is offered again on each scan so a token rejected
    /// earlier can still qualify later. Tokens already held are skipped
    /// before the per-scan cap is applied.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> ScanSummary {
        let mut summary = ScanSummary::default();
        let max_age = self.config.safe_pool.max_age_minutes;

        for chain in self.config.enabled_chains() {
            let candidates = match self.bounded("market_data", self.market.discover(chain, max_age)).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Discovery failed on {}: {}", chain, e);
                    continue;
                }
            };

            let candidates: Vec<MarketSnapshot> = {
                let manager = self.manager.lock().await;
                candidates
                    .into_iter()
                    .filter(|s| !manager.holds(s.chain, &s.token_address))
                    .take(self.config.trading.max_candidates_per_scan)
                    .collect()
            };

            for snapshot in candidates {
                summary.scanned += 1;
                match self.evaluate_candidate(snapshot, now).await {
                    Ok(CandidateOutcome::Entered(_)) => summary.entered += 1,
                    Ok(CandidateOutcome::Rejected(_)) => summary.rejected += 1,
                    Ok(CandidateOutcome::Skipped(_)) => {}
                    Err(e) => error!("Candidate evaluation failed on {}: {}", chain, e),
                }
            }
        }

        let idle_cutoff = now - chrono::Duration::minutes(max_age.ceil() as i64);
        self.momentum.lock().await.evict_idle(idle_cutoff);

        self.manager.lock().await.record_scan(summary.scanned, summary.rejected);
        if summary.scanned > 0 {
            debug!(
                "Scan: {} scanned, {} rejected, {} entered",
                summary.scanned, summary.rejected, summary.entered
            );
        }
        summary
    }

    /// Applies one price tick to every open position.
    pub async fn monitor_once(&self, now: DateTime<Utc>) -> Vec<TickReport> {
        let mut manager = self.manager.lock().await;
        manager.monitor_tick(self.market.as_ref(), now).await
    }

    /// Rolls the trading day when the UTC date has changed since it started.
    pub async fn daily_check(&self, now: DateTime<Utc>) -> Option<DailyStats> {
        let stats = {
            let mut manager = self.manager.lock().await;
            if manager.portfolio().current_day() == now.date_naive() {
                return None;
            }
            manager.reset_daily(now)
        };

        match tokio::time::timeout(self.call_timeout, self.repository.save_daily_stats(&stats)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to save daily stats: {:#}", e),
            Err(_) => error!("Failed to save daily stats: timed out"),
        }

        let rejections_by_reason = std::mem::take(&mut *self.rejections.lock().await);
        self.events.publish(EngineEvent::DailySummary {
            stats: stats.clone(),
            rejections_by_reason,
        });
        Some(stats)
    }

    async fn scan_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.trading.scan_interval_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scan loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_once(Utc::now()).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Scan loop stopped");
    }

    async fn monitor_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.trading.position_check_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Monitor loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.monitor_once(Utc::now()).await;
                    let closed = reports.iter().filter(|r| r.closed.is_some()).count();
                    if closed > 0 {
                        info!("Monitor tick closed {} positions", closed);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Monitor loop stopped");
    }

    async fn daily_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.config.trading.daily_check_seconds.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(stats) = self.daily_check(Utc::now()).await {
                        info!("Daily summary for {} published", stats.date);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Daily loop stopped");
    }

    /// Restores open positions, runs the three loops until `shutdown` flips,
    /// then writes every open position back to the repository.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if !self.repository.health_check().await.context("Failed to check repository health")? {
            warn!("Repository health check failed, persistence may be unavailable");
        }
        let restored = self
            .manager
            .lock()
            .await
            .restore_open_positions()
            .await
            .context("Failed to restore open positions")?;

        let chains: Vec<Chain> = self.config.enabled_chains();
        info!(
            "Moonshot bot running in {:?} mode on {:?} with {} restored positions",
            self.config.trading.mode, chains, restored
        );

        tokio::join!(
            self.scan_loop(shutdown.clone()),
            self.monitor_loop(shutdown.clone()),
            self.daily_loop(shutdown),
        );

        let manager = self.manager.lock().await;
        let saved = manager.persist_all().await;
        let summary = manager.portfolio_summary();
        info!(
            "Shutdown complete: {} open positions saved, available ${:.2}, daily P&L ${:+.2}",
            saved, summary.available_capital, summary.daily_pnl
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_key_takes_text_before_colon() {
        assert_eq!(reason_key("Low liquidity: $100"), "Low liquidity");
        assert_eq!(reason_key("Honeypot"), "Honeypot");
        assert_eq!(reason_key("  Too old: 300m"), "Too old");
    }
}
