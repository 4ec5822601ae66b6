//! Shared data contract between the providers, the engines and the position manager.
//!
//! Everything here is an immutable per-tick observation: market snapshots and
//! safety assessments are produced by collaborators and only ever read by the
//! scoring and confluence engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chains the bot knows how to trade on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Solana,
    Bsc,
    Base,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Bsc => "bsc",
            Chain::Base => "base",
        }
    }

    /// Identifier used by DexScreener in `chainId` fields and paths.
    pub fn dexscreener_id(&self) -> &'static str {
        self.as_str()
    }

    /// Identifier used by the GoPlus security API.
    pub fn goplus_id(&self) -> &'static str {
        match self {
            Chain::Solana => "solana",
            Chain::Bsc => "56",
            Chain::Base => "8453",
        }
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Solana)
    }

    pub fn all() -> Vec<Chain> {
        vec![Chain::Solana, Chain::Bsc, Chain::Base]
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solana" | "sol" => Ok(Chain::Solana),
            "bsc" | "bnb" => Ok(Chain::Bsc),
            "base" => Ok(Chain::Base),
            other => Err(format!("unknown chain '{}'", other)),
        }
    }
}

/// Capital bucket a position is funded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolType {
    Safe,
    Hunt,
}

impl PoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Safe => "SAFE",
            PoolType::Hunt => "HUNT",
        }
    }

    pub fn all() -> Vec<PoolType> {
        vec![PoolType::Safe, PoolType::Hunt]
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SAFE" => Ok(PoolType::Safe),
            "HUNT" => Ok(PoolType::Hunt),
            other => Err(format!("unknown pool '{}'", other)),
        }
    }
}

/// Direction of the short-term volume profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeTrend {
    Increasing,
    Stable,
    Decreasing,
}

impl VolumeTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeTrend::Increasing => "INCREASING",
            VolumeTrend::Stable => "STABLE",
            VolumeTrend::Decreasing => "DECREASING",
        }
    }

    /// Classifies the last hour against the average hour of the last six.
    pub fn classify(volume_1h: f64, volume_6h: f64) -> Self {
        let hourly_average = volume_6h / 6.0;
        if volume_1h > hourly_average * 2.0 {
            VolumeTrend::Increasing
        } else if volume_1h < hourly_average * 0.5 {
            VolumeTrend::Decreasing
        } else {
            VolumeTrend::Stable
        }
    }
}

/// Buy and sell transaction counts for one time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnCounts {
    pub buys: u64,
    pub sells: u64,
}

impl TxnCounts {
    pub fn new(buys: u64, sells: u64) -> Self {
        Self { buys, sells }
    }

    pub fn total(&self) -> u64 {
        self.buys + self.sells
    }

    /// Share of buys among all transactions, 0.5 when the window is empty.
    pub fn buy_pressure(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.5
        } else {
            self.buys as f64 / total as f64
        }
    }
}

/// Market telemetry for the most liquid pair of a token at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub chain: Chain,
    pub token_address: String,
    pub pair_address: String,
    pub symbol: String,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    /// Market cap in USD, 0.0 when unknown
    pub market_cap: f64,
    pub volume_5m: f64,
    pub volume_1h: f64,
    pub volume_6h: f64,
    pub volume_24h: f64,
    pub price_change_5m: f64,
    pub price_change_1h: f64,
    pub price_change_6h: f64,
    pub price_change_24h: f64,
    pub txns_5m: TxnCounts,
    pub txns_1h: TxnCounts,
    pub txns_24h: TxnCounts,
    pub created_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Empty snapshot for a token, useful as a base for providers and tests.
    pub fn new(chain: Chain, token_address: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            chain,
            token_address: token_address.into(),
            pair_address: String::new(),
            symbol: String::new(),
            price_usd: 0.0,
            liquidity_usd: 0.0,
            market_cap: 0.0,
            volume_5m: 0.0,
            volume_1h: 0.0,
            volume_6h: 0.0,
            volume_24h: 0.0,
            price_change_5m: 0.0,
            price_change_1h: 0.0,
            price_change_6h: 0.0,
            price_change_24h: 0.0,
            txns_5m: TxnCounts::default(),
            txns_1h: TxnCounts::default(),
            txns_24h: TxnCounts::default(),
            created_at: None,
            observed_at,
        }
    }

    /// Minutes between pair creation and observation; infinite when unknown.
    pub fn age_minutes(&self) -> f64 {
        match self.created_at {
            Some(created) => (self.observed_at - created).num_seconds().max(0) as f64 / 60.0,
            None => f64::INFINITY,
        }
    }

    pub fn buy_pressure_5m(&self) -> f64 {
        self.txns_5m.buy_pressure()
    }

    pub fn buy_pressure_1h(&self) -> f64 {
        self.txns_1h.buy_pressure()
    }

    pub fn volume_trend(&self) -> VolumeTrend {
        VolumeTrend::classify(self.volume_1h, self.volume_6h)
    }

    pub fn has_valid_price(&self) -> bool {
        self.price_usd.is_finite() && self.price_usd > 0.0
    }
}

/// Overall verdict of a contract safety inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyStatus {
    Safe,
    Warning,
    Dangerous,
    Unknown,
}

impl SafetyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyStatus::Safe => "SAFE",
            SafetyStatus::Warning => "WARNING",
            SafetyStatus::Dangerous => "DANGEROUS",
            SafetyStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds used when turning a safety assessment into rejection reasons.
#[derive(Debug, Clone, Copy)]
pub struct SafetyLimits {
    pub max_tax_percent: f64,
    pub min_holders: u64,
    pub max_top_holder_percent: f64,
}

/// Result of a contract safety inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub chain: Chain,
    pub token_address: String,
    pub status: SafetyStatus,
    /// 0-100, higher is safer
    pub score: u8,
    pub is_honeypot: bool,
    pub is_mintable: bool,
    pub is_proxy: bool,
    pub can_pause: bool,
    pub has_blacklist: bool,
    pub buy_tax_percent: f64,
    pub sell_tax_percent: f64,
    pub is_renounced: bool,
    pub lp_locked: bool,
    pub holder_count: u64,
    pub top_holder_percent: f64,
}

impl SafetyAssessment {
    /// Assessment used when the safety provider has nothing to say.
    pub fn unknown(chain: Chain, token_address: impl Into<String>) -> Self {
        Self {
            chain,
            token_address: token_address.into(),
            status: SafetyStatus::Unknown,
            score: 0,
            is_honeypot: false,
            is_mintable: false,
            is_proxy: false,
            can_pause: false,
            has_blacklist: false,
            buy_tax_percent: 0.0,
            sell_tax_percent: 0.0,
            is_renounced: false,
            lp_locked: false,
            holder_count: 0,
            top_holder_percent: 0.0,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.status == SafetyStatus::Safe
    }

    pub fn max_tax_percent(&self) -> f64 {
        self.buy_tax_percent.max(self.sell_tax_percent)
    }

    /// Human-readable reasons a cautious trader would skip this token.
    pub fn rejection_reasons(&self, limits: &SafetyLimits) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.is_honeypot {
            reasons.push("Honeypot: cannot sell".to_string());
        }
        if self.is_mintable {
            reasons.push("Mint function enabled".to_string());
        }
        if self.is_proxy {
            reasons.push("Proxy contract".to_string());
        }
        if self.can_pause {
            reasons.push("Can pause trading".to_string());
        }
        if self.has_blacklist {
            reasons.push("Has blacklist".to_string());
        }
        if self.buy_tax_percent > limits.max_tax_percent {
            reasons.push(format!("High buy tax: {:.1}%", self.buy_tax_percent));
        }
        if self.sell_tax_percent > limits.max_tax_percent {
            reasons.push(format!("High sell tax: {:.1}%", self.sell_tax_percent));
        }
        if !self.lp_locked {
            reasons.push("LP not locked".to_string());
        }
        if self.holder_count < limits.min_holders {
            reasons.push(format!("Low holders: {}", self.holder_count));
        }
        if self.top_holder_percent > limits.max_top_holder_percent {
            reasons.push(format!("Concentrated: {:.1}%", self.top_holder_percent));
        }
        reasons
    }
}

/// Activity of tracked smart-money wallets on a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartMoneySignals {
    pub buying_count: u32,
    pub selling_count: u32,
    pub whale_buys: u32,
    pub whale_sells: u32,
}

/// Social chatter around a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialSignals {
    pub mentions: u32,
    pub sentiment: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_buy_pressure_defaults_to_neutral() {
        let counts = TxnCounts::default();
        assert_eq!(counts.buy_pressure(), 0.5);
        assert!((TxnCounts::new(30, 10).buy_pressure() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_volume_trend_classification() {
        assert_eq!(VolumeTrend::classify(5_000.0, 6_000.0), VolumeTrend::Increasing);
        assert_eq!(VolumeTrend::classify(1_000.0, 6_000.0), VolumeTrend::Stable);
        assert_eq!(VolumeTrend::classify(100.0, 6_000.0), VolumeTrend::Decreasing);
    }

    #[test]
    fn test_snapshot_age() {
        let now = Utc::now();
        let mut snapshot = MarketSnapshot::new(Chain::Solana, "Token", now);
        assert!(snapshot.age_minutes().is_infinite());

        snapshot.created_at = Some(now - Duration::minutes(45));
        assert!((snapshot.age_minutes() - 45.0).abs() < 0.01);
    }

    #[test]
    fn test_chain_parsing() {
        assert_eq!("SOL".parse::<Chain>().unwrap(), Chain::Solana);
        assert_eq!("base".parse::<Chain>().unwrap(), Chain::Base);
        assert!("ethereum".parse::<Chain>().is_err());
        assert_eq!(Chain::Bsc.goplus_id(), "56");
    }

    #[test]
    fn test_rejection_reasons() {
        let limits = SafetyLimits {
            max_tax_percent: 5.0,
            min_holders: 20,
            max_top_holder_percent: 20.0,
        };
        let mut safety = SafetyAssessment::unknown(Chain::Bsc, "0xabc");
        safety.is_honeypot = true;
        safety.sell_tax_percent = 12.0;
        safety.lp_locked = true;
        safety.holder_count = 500;

        let reasons = safety.rejection_reasons(&limits);
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("Honeypot"));
        assert!(reasons[1].contains("sell tax"));
    }
}
