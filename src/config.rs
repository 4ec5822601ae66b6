//! Configuration for the scoring, confluence and position management policies.
//!
//! Every section deserializes from TOML with production defaults, so a partial
//! file only needs the values it wants to change.

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::engine::confluence::SignalKind;
use crate::error::{EngineError, EngineResult};
use crate::types::{Chain, PoolType, SafetyLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Simulation,
    Live,
}

impl std::str::FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulation" | "sim" | "paper" => Ok(TradingMode::Simulation),
            "live" => Ok(TradingMode::Live),
            other => Err(format!("unknown trading mode '{}'", other)),
        }
    }
}

/// Portfolio-wide limits and loop cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Simulation or live execution
    pub mode: TradingMode,
    /// USD split across the pools at startup; also the base for the daily loss limit
    pub starting_capital: f64,
    /// Daily realized loss, as a percentage of total capital, that pauses new entries
    pub daily_loss_limit_percent: f64,
    /// Losing closes in a row that trip the circuit breaker
    pub consecutive_loss_pause: u32,
    /// How long a tripped breaker blocks new entries
    pub pause_duration_minutes: i64,
    /// Smallest entry in USD
    pub min_position_size: f64,
    /// Largest entry in USD
    pub max_position_size: f64,
    /// Open positions allowed across both pools
    pub max_total_positions: usize,
    /// Cap on a single entry's share of its pool, in percent
    pub max_position_share_percent: f64,
    /// Upper bound of simulated slippage
    pub max_slippage_percent: f64,
    /// Buy or sell tax above this is a red flag
    pub max_tax_percent: f64,
    /// Holder count below this rejects a token
    pub min_holders: u64,
    /// Largest holder share above this rejects a token
    pub max_top_holder_percent: f64,
    /// Fallback liquidity floor for chains without their own
    pub min_liquidity_usd: f64,
    /// Tracked wallets buying before the smart money signal fires
    pub smart_money_buy_threshold: u32,
    /// Positions older than their pool's flat-exit window are closed while |pnl| stays inside this band
    pub stagnant_pnl_percent: f64,
    /// Seconds between discovery scans
    pub scan_interval_seconds: u64,
    /// Seconds between position monitor ticks
    pub position_check_seconds: u64,
    /// Seconds between checks for a UTC date change
    pub daily_check_seconds: u64,
    /// Bound on every market, safety and execution call
    pub collaborator_timeout_seconds: u64,
    /// Candidates evaluated per chain on each scan
    pub max_candidates_per_scan: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Simulation,
            starting_capital: 100.0,
            daily_loss_limit_percent: 15.0,
            consecutive_loss_pause: 3,
            pause_duration_minutes: 240,
            min_position_size: 5.0,
            max_position_size: 20.0,
            max_total_positions: 5,
            max_position_share_percent: 20.0,
            max_slippage_percent: 5.0,
            max_tax_percent: 5.0,
            min_holders: 20,
            max_top_holder_percent: 20.0,
            min_liquidity_usd: 3000.0,
            smart_money_buy_threshold: 2,
            stagnant_pnl_percent: 10.0,
            scan_interval_seconds: 5,
            position_check_seconds: 30,
            daily_check_seconds: 60,
            collaborator_timeout_seconds: 15,
            max_candidates_per_scan: 10,
        }
    }
}

/// Risk policy of one capital pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool: PoolType,
    /// Share of starting capital, in percent
    pub allocation_percent: f64,
    /// Quality score needed to enter
    pub min_score: u8,
    /// Active confluence signals needed to enter
    pub min_confluence: usize,
    /// Initial stop distance below entry, in percent
    pub stop_loss_percent: f64,
    /// Base entry size as a share of the pool, in percent
    pub position_size_percent: f64,
    /// Open positions the pool may hold
    pub max_positions: usize,
    /// Youngest token age the pool accepts
    pub min_age_minutes: f64,
    /// Oldest token age the pool accepts
    pub max_age_minutes: f64,
    /// Trail distance below the high once the ladder is complete
    pub trailing_stop_percent: f64,
    /// Age after which a flat position is closed
    pub flat_exit_minutes: i64,
}

impl PoolConfig {
    pub fn default_safe() -> Self {
        Self {
            pool: PoolType::Safe,
            allocation_percent: 60.0,
            min_score: 75,
            min_confluence: 3,
            stop_loss_percent: 20.0,
            position_size_percent: 15.0,
            max_positions: 3,
            min_age_minutes: 30.0,
            max_age_minutes: 240.0,
            trailing_stop_percent: 20.0,
            flat_exit_minutes: 120,
        }
    }

    pub fn default_hunt() -> Self {
        Self {
            pool: PoolType::Hunt,
            allocation_percent: 40.0,
            min_score: 65,
            min_confluence: 2,
            stop_loss_percent: 30.0,
            position_size_percent: 15.0,
            max_positions: 2,
            min_age_minutes: 0.0,
            max_age_minutes: 30.0,
            trailing_stop_percent: 25.0,
            flat_exit_minutes: 240,
        }
    }

    pub fn accepts_age(&self, age_minutes: f64) -> bool {
        age_minutes >= self.min_age_minutes && age_minutes <= self.max_age_minutes
    }
}

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub level: u8,
    /// Gain above entry that fires this level, in percent
    pub trigger_percent: f64,
    /// Share of the remaining quantity to sell, in percent
    pub sell_percent: f64,
    /// Stop-loss to ratchet to, in percent relative to entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_stop_to_percent: Option<f64>,
}

impl TakeProfitLevel {
    pub fn new(level: u8, trigger_percent: f64, sell_percent: f64, move_stop_to_percent: Option<f64>) -> Self {
        Self { level, trigger_percent, sell_percent, move_stop_to_percent }
    }

    pub fn trigger_price(&self, entry_price: f64) -> f64 {
        entry_price * (1.0 + self.trigger_percent / 100.0)
    }

    pub fn stop_price(&self, entry_price: f64) -> Option<f64> {
        self.move_stop_to_percent.map(|pct| entry_price * (1.0 + pct / 100.0))
    }
}

/// Validated take-profit ladder ordered by trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TakeProfitLadder {
    levels: NonEmpty<TakeProfitLevel>,
}

impl TakeProfitLadder {
    pub fn new(mut levels: Vec<TakeProfitLevel>) -> EngineResult<Self> {
        levels.sort_by(|a, b| a.trigger_percent.total_cmp(&b.trigger_percent));

        for window in levels.windows(2) {
            if window[0].trigger_percent == window[1].trigger_percent {
                return Err(EngineError::Config(format!(
                    "take-profit levels {} and {} share trigger {}%",
                    window[0].level, window[1].level, window[0].trigger_percent
                )));
            }
        }
        let mut seen = HashSet::new();
        for level in &levels {
            if !seen.insert(level.level) {
                return Err(EngineError::Config(format!(
                    "take-profit level {} defined twice",
                    level.level
                )));
            }
        }
        for level in &levels {
            if level.trigger_percent <= 0.0 {
                return Err(EngineError::Config(format!(
                    "take-profit level {} must trigger above entry",
                    level.level
                )));
            }
            if level.sell_percent <= 0.0 || level.sell_percent > 100.0 {
                return Err(EngineError::Config(format!(
                    "take-profit level {} sells {}% of remaining, expected (0, 100]",
                    level.level, level.sell_percent
                )));
            }
        }

        let levels = NonEmpty::from_vec(levels)
            .ok_or_else(|| EngineError::Config("take-profit ladder is empty".to_string()))?;
        Ok(Self { levels })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TakeProfitLevel> {
        self.levels.iter()
    }

    /// Highest rung; reaching it hands the position over to the trailing stop.
    pub fn final_level(&self) -> &TakeProfitLevel {
        self.levels.last()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Maxima of the six scoring dimensions. They must add up to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub liquidity: u32,
    pub holders: u32,
    pub trading_activity: u32,
    pub momentum: u32,
    pub social: u32,
    pub dev_reputation: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            liquidity: 20,
            holders: 20,
            trading_activity: 25,
            momentum: 20,
            social: 10,
            dev_reputation: 5,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> u32 {
        self.liquidity
            + self.holders
            + self.trading_activity
            + self.momentum
            + self.social
            + self.dev_reputation
    }
}

/// Weights of the ten confluence signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceWeights {
    pub safety_passed: u32,
    pub liquidity_healthy: u32,
    pub holders_distributed: u32,
    pub volume_increasing: u32,
    pub buy_pressure_high: u32,
    pub momentum_bullish: u32,
    pub smart_money_buying: u32,
    pub social_buzz: u32,
    pub fresh_token: u32,
    pub no_red_flags: u32,
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        Self {
            safety_passed: 2,
            liquidity_healthy: 1,
            holders_distributed: 1,
            volume_increasing: 1,
            buy_pressure_high: 1,
            momentum_bullish: 2,
            smart_money_buying: 2,
            social_buzz: 1,
            fresh_token: 1,
            no_red_flags: 1,
        }
    }
}

impl ConfluenceWeights {
    pub fn weight(&self, kind: SignalKind) -> u32 {
        match kind {
            SignalKind::SafetyPassed => self.safety_passed,
            SignalKind::LiquidityHealthy => self.liquidity_healthy,
            SignalKind::HoldersDistributed => self.holders_distributed,
            SignalKind::VolumeIncreasing => self.volume_increasing,
            SignalKind::BuyPressureHigh => self.buy_pressure_high,
            SignalKind::MomentumBullish => self.momentum_bullish,
            SignalKind::SmartMoneyBuying => self.smart_money_buying,
            SignalKind::SocialBuzz => self.social_buzz,
            SignalKind::FreshToken => self.fresh_token,
            SignalKind::NoRedFlags => self.no_red_flags,
        }
    }

    pub fn max_weight(&self) -> u32 {
        SignalKind::all().into_iter().map(|kind| self.weight(kind)).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    /// Current over average volume that counts as a surge
    pub volume_surge_multiplier: f64,
    /// 5-minute change at or above this is a pump
    pub pump_threshold_percent: f64,
    /// 5-minute change at or below this is a dump
    pub dump_threshold_percent: f64,
    pub buy_pressure_threshold: f64,
    /// Price points kept per token
    pub max_history: usize,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            ema_fast_period: 5,
            ema_slow_period: 20,
            volume_surge_multiplier: 2.0,
            pump_threshold_percent: 10.0,
            dump_threshold_percent: -15.0,
            buy_pressure_threshold: 0.6,
            max_history: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub enabled: bool,
    pub native_symbol: String,
    pub min_liquidity_usd: f64,
    /// USD value of one unit of the native token, used to size buys
    pub native_price_usd: f64,
}

fn default_chains() -> BTreeMap<Chain, ChainConfig> {
    let mut chains = BTreeMap::new();
    chains.insert(
        Chain::Solana,
        ChainConfig {
            enabled: true,
            native_symbol: "SOL".to_string(),
            min_liquidity_usd: 3000.0,
            native_price_usd: 150.0,
        },
    );
    chains.insert(
        Chain::Bsc,
        ChainConfig {
            enabled: false,
            native_symbol: "BNB".to_string(),
            min_liquidity_usd: 5000.0,
            native_price_usd: 600.0,
        },
    );
    chains.insert(
        Chain::Base,
        ChainConfig {
            enabled: false,
            native_symbol: "ETH".to_string(),
            min_liquidity_usd: 5000.0,
            native_price_usd: 3000.0,
        },
    );
    chains
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub dexscreener_base_url: String,
    pub dexscreener_requests_per_minute: u32,
    pub goplus_base_url: String,
    pub goplus_requests_per_minute: u32,
    /// Per-request HTTP timeout
    pub request_timeout_seconds: u64,
    /// Retries after a transient failure
    pub retry_attempts: usize,
    /// Lifetime of a cached price
    pub price_cache_ttl_seconds: u64,
    /// Lifetime of a cached safety assessment
    pub safety_cache_ttl_seconds: u64,
    /// Capacity of each cache
    pub max_cache_entries: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            dexscreener_base_url: "https://api.dexscreener.com/latest".to_string(),
            dexscreener_requests_per_minute: 300,
            goplus_base_url: "https://api.gopluslabs.io/api/v1".to_string(),
            goplus_requests_per_minute: 100,
            request_timeout_seconds: 15,
            retry_attempts: 3,
            price_cache_ttl_seconds: 5,
            safety_cache_ttl_seconds: 300,
            max_cache_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite:moonshot.db?mode=rwc".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default = "PoolConfig::default_safe")]
    pub safe_pool: PoolConfig,
    #[serde(default = "PoolConfig::default_hunt")]
    pub hunt_pool: PoolConfig,
    #[serde(default = "default_take_profit")]
    pub take_profit: Vec<TakeProfitLevel>,
    #[serde(default)]
    pub scoring: ScoringWeights,
    #[serde(default)]
    pub confluence: ConfluenceWeights,
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default = "default_chains")]
    pub chains: BTreeMap<Chain, ChainConfig>,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_take_profit() -> Vec<TakeProfitLevel> {
    vec![
        TakeProfitLevel::new(1, 50.0, 20.0, Some(0.0)),
        TakeProfitLevel::new(2, 100.0, 30.0, Some(25.0)),
        TakeProfitLevel::new(3, 200.0, 25.0, Some(75.0)),
        TakeProfitLevel::new(4, 500.0, 15.0, Some(150.0)),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading: TradingConfig::default(),
            safe_pool: PoolConfig::default_safe(),
            hunt_pool: PoolConfig::default_hunt(),
            take_profit: default_take_profit(),
            scoring: ScoringWeights::default(),
            confluence: ConfluenceWeights::default(),
            momentum: MomentumConfig::default(),
            chains: default_chains(),
            providers: ProviderConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Load configuration from a TOML file, apply environment overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Overrides from `MOONSHOT_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("MOONSHOT_MODE") {
            match mode.parse() {
                Ok(mode) => self.trading.mode = mode,
                Err(e) => warn!("Ignoring MOONSHOT_MODE: {}", e),
            }
        }
        if let Ok(capital) = std::env::var("MOONSHOT_STARTING_CAPITAL") {
            match capital.parse::<f64>() {
                Ok(capital) => self.trading.starting_capital = capital,
                Err(e) => warn!("Ignoring MOONSHOT_STARTING_CAPITAL: {}", e),
            }
        }
        if let Ok(url) = std::env::var("MOONSHOT_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(level) = std::env::var("MOONSHOT_LOG_LEVEL") {
            self.logging.level = level;
        }
        debug!("Applied environment overrides");
    }

    pub fn validate(&self) -> EngineResult<()> {
        let scoring_total = self.scoring.total();
        if scoring_total != 100 {
            return Err(EngineError::Config(format!(
                "scoring maxima must sum to 100, got {}",
                scoring_total
            )));
        }
        if self.confluence.max_weight() == 0 {
            return Err(EngineError::Config("confluence weights are all zero".to_string()));
        }
        self.take_profit_ladder()?;

        if self.safe_pool.pool != PoolType::Safe || self.hunt_pool.pool != PoolType::Hunt {
            return Err(EngineError::Config("pool sections are mislabelled".to_string()));
        }
        let allocation = self.safe_pool.allocation_percent + self.hunt_pool.allocation_percent;
        if allocation > 100.0 {
            return Err(EngineError::Config(format!(
                "pool allocations sum to {}%",
                allocation
            )));
        }
        for pool in [&self.safe_pool, &self.hunt_pool] {
            if pool.stop_loss_percent <= 0.0 || pool.stop_loss_percent >= 100.0 {
                return Err(EngineError::Config(format!(
                    "{} stop loss must be within (0, 100)",
                    pool.pool
                )));
            }
            if pool.min_age_minutes > pool.max_age_minutes {
                return Err(EngineError::Config(format!("{} age window is inverted", pool.pool)));
            }
        }

        let trading = &self.trading;
        if trading.starting_capital <= 0.0 {
            return Err(EngineError::Config("starting capital must be positive".to_string()));
        }
        if !(trading.min_position_size.is_finite() && trading.max_position_size.is_finite()) {
            return Err(EngineError::Config("position size bounds must be finite".to_string()));
        }
        if trading.min_position_size > trading.max_position_size {
            return Err(EngineError::Config(format!(
                "min position size {} exceeds max {}",
                trading.min_position_size, trading.max_position_size
            )));
        }
        if trading.daily_loss_limit_percent <= 0.0 {
            return Err(EngineError::Config("daily loss limit must be positive".to_string()));
        }

        for (chain, chain_config) in &self.chains {
            if chain_config.enabled && chain_config.native_price_usd <= 0.0 {
                return Err(EngineError::Config(format!(
                    "{} needs a positive native price",
                    chain
                )));
            }
        }
        Ok(())
    }

    pub fn take_profit_ladder(&self) -> EngineResult<TakeProfitLadder> {
        TakeProfitLadder::new(self.take_profit.clone())
    }

    pub fn pool(&self, pool: PoolType) -> &PoolConfig {
        match pool {
            PoolType::Safe => &self.safe_pool,
            PoolType::Hunt => &self.hunt_pool,
        }
    }

    pub fn enabled_chains(&self) -> Vec<Chain> {
        self.chains
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(chain, _)| *chain)
            .collect()
    }

    pub fn chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.get(&chain)
    }

    pub fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_tax_percent: self.trading.max_tax_percent,
            min_holders: self.trading.min_holders,
            max_top_holder_percent: self.trading.max_top_holder_percent,
        }
    }
}

/// Builder for assembling an [`EngineConfig`] in code.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self { config: EngineConfig::default() }
    }

    pub fn with_mode(mut self, mode: TradingMode) -> Self {
        self.config.trading.mode = mode;
        self
    }

    pub fn with_starting_capital(mut self, capital: f64) -> Self {
        self.config.trading.starting_capital = capital;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        match pool.pool {
            PoolType::Safe => self.config.safe_pool = pool,
            PoolType::Hunt => self.config.hunt_pool = pool,
        }
        self
    }

    pub fn with_take_profit(mut self, levels: Vec<TakeProfitLevel>) -> Self {
        self.config.take_profit = levels;
        self
    }

    pub fn with_circuit_breaker(
        mut self,
        consecutive_losses: u32,
        daily_loss_limit_percent: f64,
        pause_minutes: i64,
    ) -> Self {
        self.config.trading.consecutive_loss_pause = consecutive_losses;
        self.config.trading.daily_loss_limit_percent = daily_loss_limit_percent;
        self.config.trading.pause_duration_minutes = pause_minutes;
        self
    }

    pub fn with_position_limits(mut self, min_size: f64, max_size: f64, max_total: usize) -> Self {
        self.config.trading.min_position_size = min_size;
        self.config.trading.max_position_size = max_size;
        self.config.trading.max_total_positions = max_total;
        self
    }

    pub fn with_scoring(mut self, weights: ScoringWeights) -> Self {
        self.config.scoring = weights;
        self
    }

    pub fn with_collaborator_timeout(mut self, seconds: u64) -> Self {
        self.config.trading.collaborator_timeout_seconds = seconds;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = url.into();
        self
    }

    pub fn build(self) -> EngineResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.total(), 100);
        assert_eq!(config.confluence.max_weight(), 13);
        assert_eq!(config.enabled_chains(), vec![Chain::Solana]);
    }

    #[test]
    fn test_scoring_weights_must_sum_to_hundred() {
        let weights = ScoringWeights { social: 11, ..ScoringWeights::default() };
        let result = EngineConfig::builder().with_scoring(weights).build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_ladder_is_sorted_and_validated() {
        let ladder = TakeProfitLadder::new(vec![
            TakeProfitLevel::new(2, 100.0, 30.0, Some(25.0)),
            TakeProfitLevel::new(1, 50.0, 20.0, Some(0.0)),
        ])
        .unwrap();
        let triggers: Vec<f64> = ladder.iter().map(|l| l.trigger_percent).collect();
        assert_eq!(triggers, vec![50.0, 100.0]);
        assert_eq!(ladder.final_level().level, 2);

        assert!(TakeProfitLadder::new(vec![]).is_err());
        assert!(TakeProfitLadder::new(vec![TakeProfitLevel::new(1, 50.0, 0.0, None)]).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [trading]
            starting_capital = 250.0
            consecutive_loss_pause = 2

            [hunt_pool]
            pool = "HUNT"
            allocation_percent = 30.0
            min_score = 70
            min_confluence = 3
            stop_loss_percent = 25.0
            position_size_percent = 10.0
            max_positions = 1
            min_age_minutes = 0.0
            max_age_minutes = 20.0
            trailing_stop_percent = 25.0
            flat_exit_minutes = 180

            [chains.bsc]
            enabled = true
            native_symbol = "BNB"
            min_liquidity_usd = 5000.0
            native_price_usd = 600.0
        "#;
        let config = EngineConfig::from_toml_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.starting_capital, 250.0);
        assert_eq!(config.trading.consecutive_loss_pause, 2);
        assert_eq!(config.trading.daily_loss_limit_percent, 15.0);
        assert_eq!(config.hunt_pool.min_score, 70);
        assert_eq!(config.safe_pool, PoolConfig::default_safe());
        assert_eq!(config.take_profit.len(), 4);
        assert_eq!(config.enabled_chains(), vec![Chain::Bsc]);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = EngineConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.take_profit, config.take_profit);
        assert_eq!(parsed.safe_pool, config.safe_pool);
    }

    #[test]
    fn test_pool_age_window() {
        let hunt = PoolConfig::default_hunt();
        assert!(hunt.accepts_age(0.0));
        assert!(hunt.accepts_age(30.0));
        assert!(!hunt.accepts_age(30.5));
        assert!(PoolConfig::default_safe().accepts_age(120.0));
    }
}
