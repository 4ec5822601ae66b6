//! Property checks on scoring, confluence and position bookkeeping.

use chrono::{Duration, Utc};
use moonshot_sniper::config::{EngineConfig, TakeProfitLevel};
use moonshot_sniper::engine::{ConfluenceEngine, MomentumSignal, ScoringEngine, Trend};
use moonshot_sniper::position::ActivePosition;
use moonshot_sniper::types::{
    Chain, MarketSnapshot, PoolType, SafetyAssessment, SafetyStatus, SmartMoneySignals, TxnCounts,
};
use proptest::prelude::*;

fn status_strategy() -> impl Strategy<Value = SafetyStatus> {
    prop_oneof![
        Just(SafetyStatus::Safe),
        Just(SafetyStatus::Warning),
        Just(SafetyStatus::Dangerous),
        Just(SafetyStatus::Unknown),
    ]
}

prop_compose! {
    fn snapshot_strategy()(
        liquidity in 0.0f64..500_000.0,
        volume_1h in 0.0f64..200_000.0,
        volume_6h in 0.0f64..600_000.0,
        volume_24h in 0.0f64..2_000_000.0,
        change_5m in -90.0f64..300.0,
        change_1h in -95.0f64..1_000.0,
        buys in 0u64..2_000,
        sells in 0u64..2_000,
        market_cap in 0.0f64..50_000_000.0,
        age in proptest::option::of(0i64..2_000),
    ) -> MarketSnapshot {
        let now = Utc::now();
        let mut snapshot = MarketSnapshot::new(Chain::Solana, "PropToken", now);
        snapshot.price_usd = 0.001;
        snapshot.liquidity_usd = liquidity;
        snapshot.volume_1h = volume_1h;
        snapshot.volume_6h = volume_6h;
        snapshot.volume_24h = volume_24h;
        snapshot.price_change_5m = change_5m;
        snapshot.price_change_1h = change_1h;
        snapshot.txns_1h = TxnCounts::new(buys, sells);
        snapshot.market_cap = market_cap;
        snapshot.created_at = age.map(|a| now - Duration::minutes(a));
        snapshot
    }
}

prop_compose! {
    fn safety_strategy()(
        status in status_strategy(),
        honeypot in any::<bool>(),
        mintable in any::<bool>(),
        proxy in any::<bool>(),
        renounced in any::<bool>(),
        locked in any::<bool>(),
        holders in 0u64..10_000,
        top in 0.0f64..100.0,
        tax in 0.0f64..50.0,
    ) -> SafetyAssessment {
        let mut safety = SafetyAssessment::unknown(Chain::Solana, "PropToken");
        safety.status = status;
        safety.is_honeypot = honeypot;
        safety.is_mintable = mintable;
        safety.is_proxy = proxy;
        safety.is_renounced = renounced;
        safety.lp_locked = locked;
        safety.holder_count = holders;
        safety.top_holder_percent = top;
        safety.sell_tax_percent = tax;
        safety
    }
}

proptest! {
    #[test]
    fn score_stays_within_bounds(
        snapshot in snapshot_strategy(),
        safety in safety_strategy(),
        buying in 0u32..10,
    ) {
        let engine = ScoringEngine::from_config(&EngineConfig::default());
        let smart_money = SmartMoneySignals { buying_count: buying, ..Default::default() };
        let breakdown = engine.score(&snapshot, &safety, None, None, Some(&smart_money));

        prop_assert!(breakdown.total <= 100);
        prop_assert!(breakdown.liquidity <= 20);
        prop_assert!(breakdown.holders <= 20);
        prop_assert!(breakdown.trading <= 25);
        prop_assert!(breakdown.momentum <= 20);
        prop_assert!(breakdown.social <= 10);
        prop_assert!(breakdown.dev <= 5);
    }

    #[test]
    fn confidence_is_active_weight_share(
        snapshot in snapshot_strategy(),
        safety in safety_strategy(),
        score in 0u8..=100,
        bullish in any::<bool>(),
    ) {
        let config = EngineConfig::default();
        let engine = ConfluenceEngine::from_config(&config);
        let mut momentum = MomentumSignal::neutral(Chain::Solana, "PropToken");
        if bullish {
            momentum.trend = Trend::Bullish;
        }
        let breakdown = moonshot_sniper::engine::ScoreBreakdown { total: score, ..Default::default() };
        let result = engine.analyze(Chain::Solana, &snapshot, &safety, &breakdown, &momentum, None);

        let active: u32 = result.signals.iter().filter(|s| s.active).map(|s| s.weight).sum();
        prop_assert_eq!(result.signals.len(), 10);
        prop_assert_eq!(result.active_weight, active);
        prop_assert!((result.confidence - active as f64 / result.max_weight as f64 * 100.0).abs() < 1e-9);
        prop_assert!((0.0..=100.0).contains(&result.confidence));
        if result.should_enter {
            prop_assert!(!result.has_critical_rejection());
            prop_assert!(result.recommended_pool.is_some());
            prop_assert!(result.position_size_percent <= config.trading.max_position_share_percent);
        } else {
            prop_assert_eq!(result.recommended_pool, None);
            prop_assert_eq!(result.position_size_percent, 0.0);
        }
    }

    #[test]
    fn stop_loss_never_decreases(
        prices in proptest::collection::vec(0.01f64..20.0, 1..60),
        proposals in proptest::collection::vec(0.0f64..20.0, 1..60),
    ) {
        let mut position = ActivePosition::open(1, Chain::Solana, "PropToken", "PROP", PoolType::Safe, 1.0, 10.0, 0.8, Utc::now());
        position.activate_trailing();
        let mut last = position.stop_loss();

        for (price, proposal) in prices.iter().zip(proposals.iter().cycle()) {
            position.update_price(*price);
            if let Some(trail) = position.trailing_stop_price(20.0) {
                position.raise_stop(trail);
            }
            position.raise_stop(*proposal);
            prop_assert!(position.stop_loss() >= last);
            last = position.stop_loss();
        }
    }

    #[test]
    fn sells_conserve_quantity(
        sells in proptest::collection::vec((1.0f64..=100.0, 0.1f64..10.0), 1..8),
        entry_value in 5.0f64..20.0,
    ) {
        let mut position = ActivePosition::open(1, Chain::Solana, "PropToken", "PROP", PoolType::Hunt, 0.25, entry_value, 0.2, Utc::now());
        let original = position.record.original_quantity;
        let mut sold = 0.0;

        for (index, (sell_percent, price)) in sells.iter().enumerate() {
            let level = TakeProfitLevel::new(index as u8 + 1, 10.0, *sell_percent, None);
            position.update_price(*price);
            let fill = position.record_take_profit(level.level, position.take_profit_quantity(&level));
            sold += fill.quantity;
            prop_assert!(position.remaining_quantity() >= 0.0);
            prop_assert!((sold + position.remaining_quantity() - original).abs() < 1e-9 * original.max(1.0));
        }

        let (value, _) = position.settle(moonshot_sniper::position::ExitReason::Manual, Utc::now());
        sold += value / position.record.current_price;
        prop_assert!((sold - original).abs() < 1e-6 * original.max(1.0));
        prop_assert_eq!(position.remaining_quantity(), 0.0);
    }
}
