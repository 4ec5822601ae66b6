//! Confluence analysis: ten weighted boolean signals aggregated into an entry decision.
//!
//! Each signal is evaluated independently. The decision then assigns a pool by
//! token age, checks that pool's score and signal-count thresholds and scales the
//! pool's base position size by confidence. A critical rejection (honeypot,
//! failed safety, concentrated supply or a dump) vetoes entry outright.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument};

use crate::config::{ConfluenceWeights, EngineConfig, PoolConfig};
use crate::engine::momentum::MomentumSignal;
use crate::engine::scoring::ScoreBreakdown;
use crate::types::{Chain, MarketSnapshot, PoolType, SafetyAssessment, SafetyStatus, SmartMoneySignals, VolumeTrend};

/// Words that mark a rejection as disqualifying on its own.
pub const CRITICAL_KEYWORDS: [&str; 4] = ["honeypot", "safety", "concentrated", "dump"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    SafetyPassed,
    LiquidityHealthy,
    HoldersDistributed,
    VolumeIncreasing,
    BuyPressureHigh,
    MomentumBullish,
    SmartMoneyBuying,
    SocialBuzz,
    FreshToken,
    NoRedFlags,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::SafetyPassed => "safety_passed",
            SignalKind::LiquidityHealthy => "liquidity_healthy",
            SignalKind::HoldersDistributed => "holders_distributed",
            SignalKind::VolumeIncreasing => "volume_increasing",
            SignalKind::BuyPressureHigh => "buy_pressure_high",
            SignalKind::MomentumBullish => "momentum_bullish",
            SignalKind::SmartMoneyBuying => "smart_money_buying",
            SignalKind::SocialBuzz => "social_buzz",
            SignalKind::FreshToken => "fresh_token",
            SignalKind::NoRedFlags => "no_red_flags",
        }
    }

    /// All signals in evaluation order.
    pub fn all() -> [SignalKind; 10] {
        [
            SignalKind::SafetyPassed,
            SignalKind::LiquidityHealthy,
            SignalKind::HoldersDistributed,
            SignalKind::VolumeIncreasing,
            SignalKind::BuyPressureHigh,
            SignalKind::MomentumBullish,
            SignalKind::SmartMoneyBuying,
            SignalKind::SocialBuzz,
            SignalKind::FreshToken,
            SignalKind::NoRedFlags,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RedFlag {
    Mintable,
    Proxy,
    CanPause,
    HighTax { buy: f64, sell: f64 },
    RecentDump(f64),
}

impl fmt::Display for RedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedFlag::Mintable => f.write_str("Mint function"),
            RedFlag::Proxy => f.write_str("Proxy contract"),
            RedFlag::CanPause => f.write_str("Can pause trading"),
            RedFlag::HighTax { buy, sell } => write!(f, "High tax: {:.1}/{:.1}%", buy, sell),
            RedFlag::RecentDump(change) => write!(f, "Recent dump: {:.1}%", change),
        }
    }
}

/// Why a token should not be entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rejection {
    Honeypot,
    SafetyFailed(SafetyStatus),
    LowLiquidity(f64),
    SuspiciousLiquidity,
    TooFewHolders(u64),
    TooConcentrated(f64),
    HeavySelling(f64),
    PriceDumping(f64),
    TokenTooOld(f64),
    UnknownAge,
    RedFlag(RedFlag),
}

impl Rejection {
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Rejection::Honeypot
                | Rejection::SafetyFailed(_)
                | Rejection::TooConcentrated(_)
                | Rejection::PriceDumping(_)
                | Rejection::RedFlag(RedFlag::RecentDump(_))
        )
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Honeypot => f.write_str("Honeypot detected"),
            Rejection::SafetyFailed(status) => write!(f, "Safety check failed: {}", status),
            Rejection::LowLiquidity(liquidity) => write!(f, "Low liquidity: ${:.0}", liquidity),
            Rejection::SuspiciousLiquidity => f.write_str("Suspicious liquidity pattern"),
            Rejection::TooFewHolders(count) => write!(f, "Too few holders: {}", count),
            Rejection::TooConcentrated(top) => write!(f, "Too concentrated: {:.1}%", top),
            Rejection::HeavySelling(pressure) => write!(f, "Heavy selling: {:.0}% buys", pressure * 100.0),
            Rejection::PriceDumping(change) => write!(f, "Price dumping: {:.1}%", change),
            Rejection::TokenTooOld(age) => write!(f, "Token too old: {:.0} min", age),
            Rejection::UnknownAge => f.write_str("Token age unknown"),
            Rejection::RedFlag(flag) => write!(f, "Red flag: {}", flag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceSignal {
    pub kind: SignalKind,
    pub active: bool,
    /// Configured weight of the signal; only counted when active
    pub weight: u32,
    pub reason: String,
}

impl ConfluenceSignal {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceResult {
    pub chain: Chain,
    pub token_address: String,
    pub signals: Vec<ConfluenceSignal>,
    pub active_signals: usize,
    pub active_weight: u32,
    pub max_weight: u32,
    /// active_weight / max_weight * 100
    pub confidence: f64,
    pub should_enter: bool,
    pub recommended_pool: Option<PoolType>,
    pub position_size_percent: f64,
    pub risk_level: RiskLevel,
    pub entry_reasons: Vec<String>,
    pub rejection_reasons: Vec<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfluenceReport {
    pub token_address: String,
    pub chain: Chain,
    pub should_enter: bool,
    pub pool: Option<PoolType>,
    pub confidence: f64,
    pub active_signals: usize,
    pub active_weight: u32,
    pub max_weight: u32,
    pub position_size_percent: f64,
    pub risk_level: RiskLevel,
    pub active: Vec<String>,
    pub entry_reasons: Vec<String>,
    pub rejection_reasons: Vec<String>,
}

impl ConfluenceResult {
    pub fn signal(&self, kind: SignalKind) -> Option<&ConfluenceSignal> {
        self.signals.iter().find(|s| s.kind == kind)
    }

    pub fn has_critical_rejection(&self) -> bool {
        self.rejection_reasons.iter().any(Rejection::is_critical)
    }

    /// One line for logs.
    pub fn summary(&self) -> String {
        if !self.should_enter {
            let reasons: Vec<String> = self.rejection_reasons.iter().take(3).map(|r| r.to_string()).collect();
            if reasons.is_empty() {
                return format!(
                    "SKIP: {} signals, confidence {:.0}% below pool thresholds",
                    self.active_signals, self.confidence
                );
            }
            return format!("SKIP: {}", reasons.join(", "));
        }
        format!(
            "ENTER {} | confidence {:.0}% | signals {} | size {:.1}%",
            self.recommended_pool.map_or("-", |p| p.as_str()),
            self.confidence,
            self.active_signals,
            self.position_size_percent
        )
    }

    pub fn to_report(&self) -> ConfluenceReport {
        ConfluenceReport {
            token_address: self.token_address.clone(),
            chain: self.chain,
            should_enter: self.should_enter,
            pool: self.recommended_pool,
            confidence: self.confidence,
            active_signals: self.active_signals,
            active_weight: self.active_weight,
            max_weight: self.max_weight,
            position_size_percent: self.position_size_percent,
            risk_level: self.risk_level,
            active: self
                .signals
                .iter()
                .filter(|s| s.active)
                .map(|s| s.name().to_string())
                .collect(),
            entry_reasons: self.entry_reasons.clone(),
            rejection_reasons: self.rejection_reasons.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Entry limits the confluence checks compare against.
#[derive(Debug, Clone)]
pub struct ConfluenceLimits {
    pub min_liquidity_usd: f64,
    pub min_holders: u64,
    pub max_top_holder_percent: f64,
    pub max_tax_percent: f64,
    pub smart_money_buy_threshold: u32,
    pub max_position_share_percent: f64,
}

#[derive(Debug, Clone)]
pub struct ConfluenceEngine {
    weights: ConfluenceWeights,
    safe_pool: PoolConfig,
    hunt_pool: PoolConfig,
    limits: ConfluenceLimits,
}

struct Evaluation {
    signals: Vec<ConfluenceSignal>,
    entry_reasons: Vec<String>,
    rejections: Vec<Rejection>,
}

impl Evaluation {
    fn push(&mut self, weights: &ConfluenceWeights, kind: SignalKind, active: bool, reason: String) {
        self.signals.push(ConfluenceSignal { kind, active, weight: weights.weight(kind), reason });
    }
}

impl ConfluenceEngine {
    pub fn new(weights: ConfluenceWeights, safe_pool: PoolConfig, hunt_pool: PoolConfig, limits: ConfluenceLimits) -> Self {
        Self { weights, safe_pool, hunt_pool, limits }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let trading = &config.trading;
        Self::new(
            config.confluence,
            config.safe_pool.clone(),
            config.hunt_pool.clone(),
            ConfluenceLimits {
                min_liquidity_usd: trading.min_liquidity_usd,
                min_holders: trading.min_holders,
                max_top_holder_percent: trading.max_top_holder_percent,
                max_tax_percent: trading.max_tax_percent,
                smart_money_buy_threshold: trading.smart_money_buy_threshold,
                max_position_share_percent: trading.max_position_share_percent,
            },
        )
    }

    #[instrument(skip_all, fields(token = %snapshot.token_address, chain = %chain))]
    pub fn analyze(
        &self,
        chain: Chain,
        snapshot: &MarketSnapshot,
        safety: &SafetyAssessment,
        score: &ScoreBreakdown,
        momentum: &MomentumSignal,
        smart_money: Option<&SmartMoneySignals>,
    ) -> ConfluenceResult {
        let mut eval = Evaluation { signals: Vec::with_capacity(10), entry_reasons: Vec::new(), rejections: Vec::new() };

        self.check_safety(&mut eval, safety);
        self.check_liquidity(&mut eval, snapshot);
        self.check_holders(&mut eval, safety);
        self.check_volume(&mut eval, snapshot);
        self.check_buy_pressure(&mut eval, snapshot);
        self.check_momentum(&mut eval, momentum);
        self.check_smart_money(&mut eval, smart_money);
        self.check_social(&mut eval);
        self.check_age(&mut eval, snapshot);
        self.check_red_flags(&mut eval, safety, snapshot);

        let active_signals = eval.signals.iter().filter(|s| s.active).count();
        let active_weight: u32 = eval.signals.iter().filter(|s| s.active).map(|s| s.weight).sum();
        let max_weight = self.weights.max_weight();
        let confidence = if max_weight > 0 {
            active_weight as f64 / max_weight as f64 * 100.0
        } else {
            0.0
        };

        let mut result = ConfluenceResult {
            chain,
            token_address: snapshot.token_address.clone(),
            signals: eval.signals,
            active_signals,
            active_weight,
            max_weight,
            confidence,
            should_enter: false,
            recommended_pool: None,
            position_size_percent: 0.0,
            risk_level: RiskLevel::High,
            entry_reasons: eval.entry_reasons,
            rejection_reasons: eval.rejections,
        };
        let age = snapshot.age_minutes();
        self.decide(&mut result, score, self.pool_for_age(age), age);

        debug!("Confluence {}: {}", snapshot.token_address, result.summary());
        result
    }

    fn pool_for_age(&self, age_minutes: f64) -> Option<PoolType> {
        if self.hunt_pool.accepts_age(age_minutes) {
            Some(PoolType::Hunt)
        } else if self.safe_pool.accepts_age(age_minutes) {
            Some(PoolType::Safe)
        } else {
            None
        }
    }

    fn pool_config(&self, pool: PoolType) -> &PoolConfig {
        match pool {
            PoolType::Safe => &self.safe_pool,
            PoolType::Hunt => &self.hunt_pool,
        }
    }

    fn check_safety(&self, eval: &mut Evaluation, safety: &SafetyAssessment) {
        let active = safety.status == SafetyStatus::Safe;
        let reason = if active {
            "Contract verified safe".to_string()
        } else {
            format!("Safety: {}", safety.status)
        };
        eval.push(&self.weights, SignalKind::SafetyPassed, active, reason);

        if safety.is_honeypot {
            eval.rejections.push(Rejection::Honeypot);
        }
        if !active {
            eval.rejections.push(Rejection::SafetyFailed(safety.status));
        }
    }

    fn check_liquidity(&self, eval: &mut Evaluation, snapshot: &MarketSnapshot) {
        let liquidity = snapshot.liquidity_usd;
        let sufficient = liquidity >= self.limits.min_liquidity_usd;
        let suspicious = liquidity > snapshot.volume_24h * 10.0 && snapshot.volume_24h < 1000.0;

        eval.push(
            &self.weights,
            SignalKind::LiquidityHealthy,
            sufficient && !suspicious,
            format!("Liquidity: ${:.0}", liquidity),
        );
        if !sufficient {
            eval.rejections.push(Rejection::LowLiquidity(liquidity));
        }
        if suspicious {
            eval.rejections.push(Rejection::SuspiciousLiquidity);
        }
    }

    fn check_holders(&self, eval: &mut Evaluation, safety: &SafetyAssessment) {
        let enough = safety.holder_count >= self.limits.min_holders;
        let distributed = safety.top_holder_percent <= self.limits.max_top_holder_percent;

        eval.push(
            &self.weights,
            SignalKind::HoldersDistributed,
            enough && distributed,
            format!("{} holders, top {:.1}%", safety.holder_count, safety.top_holder_percent),
        );
        if !enough {
            eval.rejections.push(Rejection::TooFewHolders(safety.holder_count));
        }
        if !distributed {
            eval.rejections.push(Rejection::TooConcentrated(safety.top_holder_percent));
        }
    }

    fn check_volume(&self, eval: &mut Evaluation, snapshot: &MarketSnapshot) {
        let trend = snapshot.volume_trend();
        let active = trend == VolumeTrend::Increasing
            || (trend == VolumeTrend::Stable && snapshot.volume_1h > 1000.0);
        eval.push(
            &self.weights,
            SignalKind::VolumeIncreasing,
            active,
            format!("Volume {}: ${:.0}/h", trend.as_str(), snapshot.volume_1h),
        );
    }

    fn check_buy_pressure(&self, eval: &mut Evaluation, snapshot: &MarketSnapshot) {
        let pressure = snapshot.buy_pressure_1h();
        eval.push(
            &self.weights,
            SignalKind::BuyPressureHigh,
            pressure >= 0.55,
            format!("Buy pressure: {:.0}%", pressure * 100.0),
        );
        if pressure < 0.4 {
            eval.rejections.push(Rejection::HeavySelling(pressure));
        }
    }

    fn check_momentum(&self, eval: &mut Evaluation, momentum: &MomentumSignal) {
        eval.push(
            &self.weights,
            SignalKind::MomentumBullish,
            momentum.is_bullish(),
            format!("Momentum: {:?} ({:.0}%)", momentum.signal, momentum.confidence),
        );
        if momentum.is_dumping {
            eval.rejections.push(Rejection::PriceDumping(momentum.price_change_5m));
        }
    }

    fn check_smart_money(&self, eval: &mut Evaluation, smart_money: Option<&SmartMoneySignals>) {
        let Some(smart_money) = smart_money else {
            eval.push(&self.weights, SignalKind::SmartMoneyBuying, false, "No smart wallet data".into());
            return;
        };

        let buying = smart_money.buying_count;
        let active = buying >= self.limits.smart_money_buy_threshold;
        let reason = if buying > 0 {
            format!("{} smart wallets buying", buying)
        } else {
            "No smart wallet activity".to_string()
        };
        eval.push(&self.weights, SignalKind::SmartMoneyBuying, active, reason);
        if active {
            eval.entry_reasons.push(format!("Smart money: {} wallets buying", buying));
        }
    }

    /// No social feed is wired in, so this signal never fires.
    fn check_social(&self, eval: &mut Evaluation) {
        eval.push(&self.weights, SignalKind::SocialBuzz, false, "Social data not available".into());
    }

    fn check_age(&self, eval: &mut Evaluation, snapshot: &MarketSnapshot) {
        let age = snapshot.age_minutes();
        let fresh = self.hunt_pool.accepts_age(age);
        let established = self.safe_pool.accepts_age(age);

        let reason = if !age.is_finite() {
            "Age unknown".to_string()
        } else {
            format!("Age: {:.0} min ({})", age, if fresh { "fresh" } else { "established" })
        };
        eval.push(&self.weights, SignalKind::FreshToken, fresh || established, reason);

        if !age.is_finite() {
            eval.rejections.push(Rejection::UnknownAge);
        } else if age > self.safe_pool.max_age_minutes.max(self.hunt_pool.max_age_minutes) {
            eval.rejections.push(Rejection::TokenTooOld(age));
        }
    }

    fn check_red_flags(&self, eval: &mut Evaluation, safety: &SafetyAssessment, snapshot: &MarketSnapshot) {
        let mut flags = Vec::new();
        if safety.is_mintable {
            flags.push(RedFlag::Mintable);
        }
        if safety.is_proxy {
            flags.push(RedFlag::Proxy);
        }
        if safety.can_pause {
            flags.push(RedFlag::CanPause);
        }
        if safety.max_tax_percent() > self.limits.max_tax_percent {
            flags.push(RedFlag::HighTax { buy: safety.buy_tax_percent, sell: safety.sell_tax_percent });
        }
        if snapshot.price_change_5m < -20.0 {
            flags.push(RedFlag::RecentDump(snapshot.price_change_5m));
        }

        let reason = if flags.is_empty() {
            "No red flags".to_string()
        } else {
            let listed: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
            format!("Red flags: {}", listed.join(", "))
        };
        eval.push(&self.weights, SignalKind::NoRedFlags, flags.is_empty(), reason);
        eval.rejections.extend(flags.into_iter().map(Rejection::RedFlag));
    }

    /// Settles the entry decision. The pool is only recommended on entry.
    fn decide(&self, result: &mut ConfluenceResult, score: &ScoreBreakdown, candidate: Option<PoolType>, age_minutes: f64) {
        result.risk_level = match candidate {
            Some(PoolType::Safe) => RiskLevel::Medium,
            _ => RiskLevel::High,
        };

        if result.has_critical_rejection() {
            return;
        }
        let Some(pool) = candidate else {
            return;
        };

        let policy = self.pool_config(pool);
        if result.active_signals < policy.min_confluence || score.total < policy.min_score {
            return;
        }

        result.should_enter = true;
        result.recommended_pool = Some(pool);
        result.position_size_percent = policy.position_size_percent;
        result.entry_reasons.push(match pool {
            PoolType::Hunt => format!("Fresh token ({:.0}m) with {} signals", age_minutes, result.active_signals),
            PoolType::Safe => format!("Established token with {} signals", result.active_signals),
        });

        if result.confidence >= 80.0 {
            result.position_size_percent *= 1.2;
            result.risk_level = match pool {
                PoolType::Safe => RiskLevel::Low,
                PoolType::Hunt => RiskLevel::Medium,
            };
        } else if result.confidence < 60.0 {
            result.position_size_percent *= 0.8;
            result.risk_level = RiskLevel::High;
        }
        result.position_size_percent = result
            .position_size_percent
            .min(self.limits.max_position_share_percent);
    }
}
