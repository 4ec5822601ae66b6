//! Momentum analysis over a rolling per-token price history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, instrument};

use crate::config::MomentumConfig;
use crate::types::{Chain, MarketSnapshot, VolumeTrend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl SignalStrength {
    pub fn is_buy(&self) -> bool {
        matches!(self, SignalStrength::StrongBuy | SignalStrength::Buy)
    }
}

#[derive(Debug, Clone, Copy)]
struct PricePoint {
    price: f64,
    volume: f64,
    buys: u64,
    sells: u64,
}

#[derive(Debug)]
struct Series {
    points: VecDeque<PricePoint>,
    last_seen: DateTime<Utc>,
}

/// Momentum read of one token at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumSignal {
    pub chain: Chain,
    pub token_address: String,
    pub trend: Trend,
    pub trend_strength: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_crossover: bool,
    pub ema_signal: Trend,
    pub volume_surge: bool,
    pub volume_trend: VolumeTrend,
    pub average_volume: f64,
    pub current_volume: f64,
    pub price_change_5m: f64,
    pub price_change_1h: f64,
    pub is_pumping: bool,
    pub is_dumping: bool,
    pub buy_pressure: f64,
    pub buy_pressure_trend: VolumeTrend,
    pub signal: SignalStrength,
    /// 0-100
    pub confidence: f64,
}

impl MomentumSignal {
    /// Neutral read with no history behind it.
    pub fn neutral(chain: Chain, token_address: impl Into<String>) -> Self {
        Self {
            chain,
            token_address: token_address.into(),
            trend: Trend::Neutral,
            trend_strength: 0.0,
            ema_fast: 0.0,
            ema_slow: 0.0,
            ema_crossover: false,
            ema_signal: Trend::Neutral,
            volume_surge: false,
            volume_trend: VolumeTrend::Stable,
            average_volume: 0.0,
            current_volume: 0.0,
            price_change_5m: 0.0,
            price_change_1h: 0.0,
            is_pumping: false,
            is_dumping: false,
            buy_pressure: 0.5,
            buy_pressure_trend: VolumeTrend::Stable,
            signal: SignalStrength::Neutral,
            confidence: 0.0,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.trend == Trend::Bullish || self.signal.is_buy()
    }
}

/// Exponential moving average seeded with the simple average of the first period.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    if period == 0 || prices.len() < period {
        return prices.iter().sum::<f64>() / prices.len() as f64;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;
    prices[period..].iter().fold(seed, |ema, price| (price - ema) * k + ema)
}

pub struct MomentumEngine {
    config: MomentumConfig,
    history: HashMap<(Chain, String), Series>,
}

impl MomentumEngine {
    pub fn new(config: MomentumConfig) -> Self {
        Self { config, history: HashMap::new() }
    }

    fn record(&mut self, snapshot: &MarketSnapshot) -> Vec<PricePoint> {
        let max_history = self.config.max_history.max(1);
        let series = self
            .history
            .entry((snapshot.chain, snapshot.token_address.clone()))
            .or_insert_with(|| Series {
                points: VecDeque::with_capacity(max_history),
                last_seen: snapshot.observed_at,
            });
        series.last_seen = series.last_seen.max(snapshot.observed_at);

        let points = &mut series.points;
        points.push_back(PricePoint {
            price: snapshot.price_usd,
            volume: snapshot.volume_5m,
            buys: snapshot.txns_5m.buys,
            sells: snapshot.txns_5m.sells,
        });
        while points.len() > max_history {
            points.pop_front();
        }
        points.iter().copied().collect()
    }

    #[instrument(skip(self, snapshot), fields(token = %snapshot.token_address))]
    pub fn analyze(&mut self, snapshot: &MarketSnapshot) -> MomentumSignal {
        let history = self.record(snapshot);
        let prices: Vec<f64> = history.iter().map(|p| p.price).collect();
        let mut signal = MomentumSignal::neutral(snapshot.chain, snapshot.token_address.clone());

        signal.ema_fast = ema(&prices, self.config.ema_fast_period);
        signal.ema_slow = ema(&prices, self.config.ema_slow_period);
        if signal.ema_fast > signal.ema_slow * 1.02 {
            signal.ema_signal = Trend::Bullish;
        } else if signal.ema_fast < signal.ema_slow * 0.98 {
            signal.ema_signal = Trend::Bearish;
        }

        if prices.len() >= 2 {
            let previous = &prices[..prices.len() - 1];
            let prev_fast = ema(previous, self.config.ema_fast_period);
            let prev_slow = ema(previous, self.config.ema_slow_period);
            if prev_fast <= prev_slow && signal.ema_fast > signal.ema_slow {
                signal.ema_crossover = true;
                signal.ema_signal = Trend::Bullish;
            } else if prev_fast >= prev_slow && signal.ema_fast < signal.ema_slow {
                signal.ema_crossover = true;
                signal.ema_signal = Trend::Bearish;
            }
        }

        signal.average_volume = history.iter().map(|p| p.volume).sum::<f64>() / history.len() as f64;
        signal.current_volume = snapshot.volume_5m;
        if signal.average_volume > 0.0 {
            let ratio = signal.current_volume / signal.average_volume;
            signal.volume_surge = ratio >= self.config.volume_surge_multiplier;
            signal.volume_trend = if ratio > 1.5 {
                VolumeTrend::Increasing
            } else if ratio < 0.5 {
                VolumeTrend::Decreasing
            } else {
                VolumeTrend::Stable
            };
        }

        signal.price_change_5m = snapshot.price_change_5m;
        signal.price_change_1h = snapshot.price_change_1h;
        signal.is_pumping = snapshot.price_change_5m >= self.config.pump_threshold_percent;
        signal.is_dumping = snapshot.price_change_5m <= self.config.dump_threshold_percent;
        signal.buy_pressure = snapshot.buy_pressure_5m();

        if history.len() >= 3 {
            let recent: Vec<f64> = history[history.len() - 3..]
                .iter()
                .map(|p| p.buys as f64 / (p.buys + p.sells + 1) as f64)
                .collect();
            if recent[2] > recent[0] + 0.1 {
                signal.buy_pressure_trend = VolumeTrend::Increasing;
            } else if recent[2] < recent[0] - 0.1 {
                signal.buy_pressure_trend = VolumeTrend::Decreasing;
            }
        }

        let (trend, strength) = self.trend_of(&signal);
        signal.trend = trend;
        signal.trend_strength = strength;

        let (strength, confidence) = Self::signal_of(&signal);
        signal.signal = strength;
        signal.confidence = confidence;

        debug!(
            "Momentum {}: {:?} ({:.0}), trend {:?}",
            snapshot.token_address, signal.signal, signal.confidence, signal.trend
        );
        signal
    }

    fn trend_of(&self, signal: &MomentumSignal) -> (Trend, f64) {
        const MAX_POINTS: f64 = 10.0;
        let mut bullish = 0u32;
        let mut bearish = 0u32;

        match signal.ema_signal {
            Trend::Bullish => bullish += 2 + signal.ema_crossover as u32,
            Trend::Bearish => bearish += 2 + signal.ema_crossover as u32,
            Trend::Neutral => {}
        }

        let change_5m = signal.price_change_5m;
        if change_5m > 5.0 {
            bullish += 2;
        } else if change_5m > 0.0 {
            bullish += 1;
        } else if change_5m < -5.0 {
            bearish += 2;
        } else if change_5m < 0.0 {
            bearish += 1;
        }

        let change_1h = signal.price_change_1h;
        if change_1h > 10.0 {
            bullish += 2;
        } else if change_1h > 0.0 {
            bullish += 1;
        } else if change_1h < -10.0 {
            bearish += 2;
        } else if change_1h < 0.0 {
            bearish += 1;
        }

        if signal.volume_surge && signal.buy_pressure > 0.6 {
            bullish += 2;
        } else if signal.volume_surge && signal.buy_pressure < 0.4 {
            bearish += 2;
        }

        if signal.buy_pressure >= self.config.buy_pressure_threshold {
            bullish += 1;
        } else if signal.buy_pressure < 0.4 {
            bearish += 1;
        }

        if bullish > bearish + 2 {
            (Trend::Bullish, (bullish as f64 / MAX_POINTS * 100.0).min(100.0))
        } else if bearish > bullish + 2 {
            (Trend::Bearish, (bearish as f64 / MAX_POINTS * 100.0).min(100.0))
        } else {
            (Trend::Neutral, 50.0)
        }
    }

    fn signal_of(signal: &MomentumSignal) -> (SignalStrength, f64) {
        let mut score = 50.0;

        match signal.trend {
            Trend::Bullish => score += signal.trend_strength * 0.3,
            Trend::Bearish => score -= signal.trend_strength * 0.3,
            Trend::Neutral => {}
        }

        match signal.ema_signal {
            Trend::Bullish => score += if signal.ema_crossover { 20.0 } else { 10.0 },
            Trend::Bearish => score -= if signal.ema_crossover { 20.0 } else { 10.0 },
            Trend::Neutral => {}
        }

        if signal.volume_surge {
            if signal.buy_pressure > 0.6 {
                score += 15.0;
            } else if signal.buy_pressure < 0.4 {
                score -= 15.0;
            }
        }

        score += (signal.buy_pressure - 0.5) * 20.0;

        if signal.is_pumping {
            score += 10.0;
        } else if signal.is_dumping {
            score -= 20.0;
        }

        let score: f64 = score.clamp(0.0, 100.0);
        let strength = if score >= 80.0 {
            SignalStrength::StrongBuy
        } else if score >= 65.0 {
            SignalStrength::Buy
        } else if score >= 35.0 {
            SignalStrength::Neutral
        } else if score >= 20.0 {
            SignalStrength::Sell
        } else {
            SignalStrength::StrongSell
        };
        (strength, score)
    }

    pub fn clear(&mut self, chain: Chain, token_address: &str) {
        self.history.remove(&(chain, token_address.to_string()));
    }

    pub fn history_len(&self, chain: Chain, token_address: &str) -> usize {
        self.history
            .get(&(chain, token_address.to_string()))
            .map_or(0, |series| series.points.len())
    }

    /// Number of tokens with recorded history.
    pub fn tracked(&self) -> usize {
        self.history.len()
    }

    /// Drops the history of every token last observed before `cutoff`.
    pub fn evict_idle(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.history.len();
        self.history.retain(|_, series| series.last_seen >= cutoff);
        let evicted = before - self.history.len();
        if evicted > 0 {
            debug!("Evicted momentum history of {} idle tokens", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnCounts;
    use chrono::{DateTime, Duration, Utc};

    fn snapshot_at(price: f64, minute: i64) -> MarketSnapshot {
        let start = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut snapshot = MarketSnapshot::new(Chain::Solana, "MomentumToken", start + Duration::minutes(minute));
        snapshot.price_usd = price;
        snapshot.volume_5m = 1_000.0;
        snapshot
    }

    #[test]
    fn test_ema_matches_simple_mean_for_short_history() {
        assert_eq!(ema(&[], 5), 0.0);
        assert!((ema(&[1.0, 2.0, 3.0], 5) - 2.0).abs() < 1e-12);
        // seed 2.0, then (4 - 2) * 0.5 + 2
        assert!((ema(&[1.0, 2.0, 3.0, 4.0], 3) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rising_prices_turn_bullish() {
        let mut engine = MomentumEngine::new(MomentumConfig::default());
        let mut last = MomentumSignal::neutral(Chain::Solana, "MomentumToken");
        for minute in 0..25 {
            let mut snapshot = snapshot_at(1.0 + minute as f64 * 0.1, minute);
            snapshot.price_change_5m = 6.0;
            snapshot.price_change_1h = 15.0;
            snapshot.txns_5m = TxnCounts::new(80, 20);
            last = engine.analyze(&snapshot);
        }
        assert_eq!(last.ema_signal, Trend::Bullish);
        assert_eq!(last.trend, Trend::Bullish);
        assert!(last.signal.is_buy());
        assert!(last.is_bullish());
        assert_eq!(engine.history_len(Chain::Solana, "MomentumToken"), 25);
    }

    #[test]
    fn test_dump_is_flagged() {
        let mut engine = MomentumEngine::new(MomentumConfig::default());
        let mut snapshot = snapshot_at(1.0, 0);
        snapshot.price_change_5m = -25.0;
        snapshot.txns_5m = TxnCounts::new(5, 45);
        let signal = engine.analyze(&snapshot);
        assert!(signal.is_dumping);
        assert!(!signal.is_bullish());
    }

    #[test]
    fn test_history_is_bounded_and_clearable() {
        let config = MomentumConfig { max_history: 3, ..MomentumConfig::default() };
        let mut engine = MomentumEngine::new(config);
        for minute in 0..10 {
            engine.analyze(&snapshot_at(1.0, minute));
        }
        assert_eq!(engine.history_len(Chain::Solana, "MomentumToken"), 3);
        engine.clear(Chain::Solana, "MomentumToken");
        assert_eq!(engine.history_len(Chain::Solana, "MomentumToken"), 0);
    }

    #[test]
    fn test_idle_histories_are_evicted() {
        let mut engine = MomentumEngine::new(MomentumConfig::default());
        engine.analyze(&snapshot_at(1.0, 0));
        let mut other = snapshot_at(2.0, 30);
        other.token_address = "OtherToken".to_string();
        engine.analyze(&other);
        assert_eq!(engine.tracked(), 2);

        let cutoff = snapshot_at(1.0, 10).observed_at;
        assert_eq!(engine.evict_idle(cutoff), 1);
        assert_eq!(engine.tracked(), 1);
        assert_eq!(engine.history_len(Chain::Solana, "MomentumToken"), 0);
        assert_eq!(engine.history_len(Chain::Solana, "OtherToken"), 1);

        // a token seen again after the cutoff keeps its series
        engine.analyze(&snapshot_at(1.1, 40));
        assert_eq!(engine.evict_idle(cutoff), 0);
        assert_eq!(engine.tracked(), 2);
    }
}
