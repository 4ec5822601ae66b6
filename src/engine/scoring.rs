//! Token quality scoring.
//!
//! Six dimensions each map raw telemetry onto a fraction of their configured
//! maximum through fixed threshold tiers. The summed total then receives age,
//! market-cap and safety modifiers and is clamped to 0-100.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::config::{EngineConfig, ScoringWeights};
use crate::engine::momentum::MomentumSignal;
use crate::types::{MarketSnapshot, SafetyAssessment, SafetyStatus, SmartMoneySignals, SocialSignals, VolumeTrend};

/// Result of scoring one token. Never mutated after it is returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub liquidity: u32,
    pub holders: u32,
    pub trading: u32,
    pub momentum: u32,
    pub social: u32,
    pub dev: u32,
    /// Final score after modifiers, always within 0-100
    pub total: u8,
    pub max_possible: u32,
    pub details: BTreeMap<String, String>,
    pub bonuses: Vec<String>,
    pub penalties: Vec<String>,
}

/// Plain record of a score for logs and alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub total: u8,
    pub grade: String,
    pub components: BTreeMap<String, u32>,
    pub bonuses: Vec<String>,
    pub penalties: Vec<String>,
}

impl ScoreBreakdown {
    /// Sum of the six dimensions before modifiers.
    pub fn component_sum(&self) -> u32 {
        self.liquidity + self.holders + self.trading + self.momentum + self.social + self.dev
    }

    pub fn grade(&self) -> &'static str {
        grade(self.total)
    }

    pub fn to_report(&self) -> ScoreReport {
        let components = [
            ("liquidity", self.liquidity),
            ("holders", self.holders),
            ("trading", self.trading),
            ("momentum", self.momentum),
            ("social", self.social),
            ("dev", self.dev),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

        ScoreReport {
            total: self.total,
            grade: self.grade().to_string(),
            components,
            bonuses: self.bonuses.clone(),
            penalties: self.penalties.clone(),
        }
    }
}

/// Letter grade for a 0-100 score.
pub fn grade(score: u8) -> &'static str {
    match score {
        90..=u8::MAX => "A+",
        85..=89 => "A",
        80..=84 => "A-",
        75..=79 => "B+",
        70..=74 => "B",
        65..=69 => "B-",
        60..=64 => "C+",
        55..=59 => "C",
        50..=54 => "C-",
        40..=49 => "D",
        _ => "F",
    }
}

fn share(max: u32, fraction: f64) -> f64 {
    max as f64 * fraction
}

/// Stateless scorer configured with the dimension maxima and entry limits.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoringWeights,
    min_liquidity_usd: f64,
    max_top_holder_percent: f64,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights, min_liquidity_usd: f64, max_top_holder_percent: f64) -> Self {
        Self { weights, min_liquidity_usd, max_top_holder_percent }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.scoring,
            config.trading.min_liquidity_usd,
            config.trading.max_top_holder_percent,
        )
    }

    #[instrument(skip_all, fields(token = %snapshot.token_address))]
    pub fn score(
        &self,
        snapshot: &MarketSnapshot,
        safety: &SafetyAssessment,
        momentum: Option<&MomentumSignal>,
        social: Option<&SocialSignals>,
        smart_money: Option<&SmartMoneySignals>,
    ) -> ScoreBreakdown {
        let mut breakdown = ScoreBreakdown {
            max_possible: self.weights.total(),
            ..ScoreBreakdown::default()
        };

        breakdown.liquidity = self.score_liquidity(snapshot, &mut breakdown);
        breakdown.holders = self.score_holders(safety, &mut breakdown);
        breakdown.trading = self.score_trading(snapshot, &mut breakdown);
        breakdown.momentum = self.score_momentum(snapshot, momentum, &mut breakdown);
        breakdown.social = self.score_social(social, smart_money, &mut breakdown);
        breakdown.dev = self.score_dev(safety, &mut breakdown);

        let raw = breakdown.component_sum() as i64;
        let adjusted = Self::apply_modifiers(raw, snapshot, safety, &mut breakdown);
        breakdown.total = adjusted.clamp(0, 100) as u8;

        debug!(
            "Scored {}: {} ({}) from components {}",
            snapshot.token_address,
            breakdown.total,
            breakdown.grade(),
            raw
        );
        breakdown
    }

    fn score_liquidity(&self, snapshot: &MarketSnapshot, breakdown: &mut ScoreBreakdown) -> u32 {
        let liquidity = snapshot.liquidity_usd;
        let max = self.weights.liquidity;

        if liquidity < self.min_liquidity_usd {
            breakdown
                .details
                .insert("liquidity".into(), format!("Below minimum: ${:.0}", liquidity));
            return 0;
        }

        let (fraction, label) = if liquidity >= 100_000.0 {
            (1.0, "Excellent")
        } else if liquidity >= 50_000.0 {
            (0.9, "Very good")
        } else if liquidity >= 20_000.0 {
            (0.75, "Good")
        } else if liquidity >= 10_000.0 {
            (0.6, "Adequate")
        } else if liquidity >= 5_000.0 {
            (0.4, "Low")
        } else {
            (0.2, "Very low")
        };
        breakdown
            .details
            .insert("liquidity".into(), format!("{}: ${:.0}", label, liquidity));
        share(max, fraction) as u32
    }

    fn score_holders(&self, safety: &SafetyAssessment, breakdown: &mut ScoreBreakdown) -> u32 {
        let max = self.weights.holders;
        let holders = safety.holder_count;
        let top = safety.top_holder_percent;

        let count_fraction = match holders {
            1000.. => 0.5,
            500..=999 => 0.4,
            200..=499 => 0.3,
            50..=199 => 0.2,
            _ => 0.1,
        };
        breakdown
            .details
            .insert("holder_count".into(), format!("{} holders", holders));

        let distribution_fraction = if top <= 5.0 {
            0.5
        } else if top <= 10.0 {
            0.4
        } else if top <= 15.0 {
            0.25
        } else if top <= self.max_top_holder_percent {
            0.1
        } else {
            breakdown.penalties.push(format!("Too concentrated: {:.1}%", top));
            0.0
        };
        breakdown
            .details
            .insert("distribution".into(), format!("Top holder {:.1}%", top));

        (share(max, count_fraction) + share(max, distribution_fraction)) as u32
    }

    fn score_trading(&self, snapshot: &MarketSnapshot, breakdown: &mut ScoreBreakdown) -> u32 {
        let max = self.weights.trading_activity;

        let ratio = if snapshot.liquidity_usd > 0.0 {
            snapshot.volume_24h / snapshot.liquidity_usd
        } else {
            0.0
        };
        let volume_fraction = if ratio >= 1.0 {
            0.4
        } else if ratio >= 0.5 {
            0.35
        } else if ratio >= 0.2 {
            0.25
        } else if ratio >= 0.1 {
            0.15
        } else {
            0.05
        };
        breakdown
            .details
            .insert("volume".into(), format!("24h volume {:.2}x liquidity", ratio));

        let pressure = snapshot.buy_pressure_1h();
        let pressure_fraction = if pressure >= 0.7 {
            breakdown.bonuses.push("Strong buy pressure".into());
            0.35
        } else if pressure >= 0.6 {
            0.3
        } else if pressure >= 0.5 {
            0.2
        } else if pressure >= 0.4 {
            0.1
        } else {
            breakdown.penalties.push("Heavy sell pressure".into());
            0.0
        };
        breakdown
            .details
            .insert("buy_pressure".into(), format!("{:.0}% buys", pressure * 100.0));

        let txns = snapshot.txns_1h.total();
        let txn_fraction = match txns {
            100.. => 0.25,
            50..=99 => 0.2,
            20..=49 => 0.15,
            _ => 0.05,
        };

        (share(max, volume_fraction) + share(max, pressure_fraction) + share(max, txn_fraction)) as u32
    }

    fn score_momentum(
        &self,
        snapshot: &MarketSnapshot,
        momentum: Option<&MomentumSignal>,
        breakdown: &mut ScoreBreakdown,
    ) -> u32 {
        let max = self.weights.momentum;
        let change_5m = snapshot.price_change_5m;
        let change_1h = snapshot.price_change_1h;

        let short_fraction = if change_5m > 10.0 {
            0.3
        } else if change_5m > 5.0 {
            0.25
        } else if change_5m > 0.0 {
            0.15
        } else if change_5m > -5.0 {
            0.1
        } else {
            0.0
        };
        breakdown
            .details
            .insert("short_momentum".into(), format!("5m {:+.1}%", change_5m));

        let medium_fraction = if change_1h > 20.0 {
            breakdown
                .bonuses
                .push(format!("Strong 1h momentum: {:+.1}%", change_1h));
            0.35
        } else if change_1h > 10.0 {
            0.3
        } else if change_1h > 0.0 {
            0.2
        } else if change_1h > -10.0 {
            0.1
        } else {
            breakdown.penalties.push(format!("Weak 1h: {:.1}%", change_1h));
            0.0
        };

        let trend = momentum.map_or_else(|| snapshot.volume_trend(), |m| m.volume_trend);
        let trend_fraction = match trend {
            VolumeTrend::Increasing => 0.35,
            VolumeTrend::Stable => 0.2,
            VolumeTrend::Decreasing => 0.05,
        };
        breakdown
            .details
            .insert("volume_trend".into(), format!("Volume {}", trend.as_str().to_lowercase()));

        (share(max, short_fraction) + share(max, medium_fraction) + share(max, trend_fraction)) as u32
    }

    fn score_social(
        &self,
        social: Option<&SocialSignals>,
        smart_money: Option<&SmartMoneySignals>,
        breakdown: &mut ScoreBreakdown,
    ) -> u32 {
        let max = self.weights.social;
        let mut score = 0.0;

        if let Some(smart_money) = smart_money {
            let buying = smart_money.buying_count;
            if buying >= 3 {
                score += share(max, 0.5);
                breakdown.bonuses.push(format!("{} smart wallets buying", buying));
            } else if buying >= 1 {
                score += share(max, 0.3);
                breakdown
                    .details
                    .insert("smart_money".into(), format!("{} smart wallet(s)", buying));
            }
        }

        if let Some(social) = social {
            if social.mentions > 100 {
                score += share(max, 0.3);
                breakdown
                    .details
                    .insert("social".into(), format!("Trending: {} mentions", social.mentions));
            } else if social.mentions > 20 {
                score += share(max, 0.15);
            }
        }

        score.min(max as f64) as u32
    }

    fn score_dev(&self, safety: &SafetyAssessment, breakdown: &mut ScoreBreakdown) -> u32 {
        let mut penalty = 0;
        if safety.is_mintable {
            penalty += 2;
        }
        if safety.is_proxy {
            penalty += 2;
        }
        if !safety.lp_locked {
            penalty += 1;
        }
        if !safety.is_renounced {
            penalty += 1;
        }

        if safety.is_renounced && safety.lp_locked && !safety.is_mintable {
            breakdown.bonuses.push("Clean contract".into());
        }
        self.weights.dev_reputation.saturating_sub(penalty)
    }

    fn apply_modifiers(
        raw: i64,
        snapshot: &MarketSnapshot,
        safety: &SafetyAssessment,
        breakdown: &mut ScoreBreakdown,
    ) -> i64 {
        let mut score = raw;

        let age = snapshot.age_minutes();
        if age < 10.0 {
            score += 5;
            breakdown.bonuses.push("Very fresh token".into());
        } else if age < 30.0 {
            score += 3;
            breakdown.bonuses.push("Fresh token".into());
        } else if age > 180.0 {
            score -= 5;
            breakdown.penalties.push("Token getting old".into());
        }

        if snapshot.market_cap > 0.0 {
            if snapshot.market_cap < 50_000.0 {
                score += 3;
                breakdown.bonuses.push("Micro cap".into());
            } else if snapshot.market_cap > 10_000_000.0 {
                score -= 5;
                breakdown.penalties.push("High cap, limited upside".into());
            }
        }

        score += match safety.status {
            SafetyStatus::Safe => 5,
            SafetyStatus::Warning => -10,
            SafetyStatus::Dangerous => -30,
            SafetyStatus::Unknown => 0,
        };
        score
    }
}
