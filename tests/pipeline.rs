//! End-to-end candidate pipeline with an in-process market and fixed safety data.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use moonshot_sniper::config::EngineConfig;
use moonshot_sniper::error::{EngineError, EngineResult};
use moonshot_sniper::events::{ChannelSink, EngineEvent};
use moonshot_sniper::position::PositionManager;
use moonshot_sniper::providers::{NoSmartMoney, PriceBoard, SafetyProvider, SimulatedExecution};
use moonshot_sniper::storage::SqliteRepository;
use moonshot_sniper::types::{Chain, MarketSnapshot, PoolType, SafetyAssessment, SafetyStatus, TxnCounts};
use moonshot_sniper::{CandidateOutcome, MoonshotBot};
use std::sync::Arc;
use tokio::sync::mpsc;

struct FixedSafety {
    assessment: Option<SafetyAssessment>,
}

#[async_trait]
impl SafetyProvider for FixedSafety {
    async fn assess(&self, chain: Chain, token_address: &str) -> EngineResult<SafetyAssessment> {
        match &self.assessment {
            Some(assessment) => Ok(SafetyAssessment {
                chain,
                token_address: token_address.to_string(),
                ..assessment.clone()
            }),
            None => Err(EngineError::unavailable("safety", "service offline")),
        }
    }
}

struct TestBot {
    bot: MoonshotBot,
    board: Arc<PriceBoard>,
    repository: Arc<SqliteRepository>,
    events: mpsc::Receiver<EngineEvent>,
}

fn trading_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap()
}

fn clean_safety() -> SafetyAssessment {
    let mut safety = SafetyAssessment::unknown(Chain::Solana, "");
    safety.status = SafetyStatus::Safe;
    safety.score = 100;
    safety.is_renounced = true;
    safety.lp_locked = true;
    safety.holder_count = 1500;
    safety.top_holder_percent = 4.0;
    safety
}

fn create_test_snapshot(token: &str, age_minutes: i64) -> MarketSnapshot {
    let now = Utc::now();
    let mut snapshot = MarketSnapshot::new(Chain::Solana, token, now);
    snapshot.symbol = token.to_uppercase();
    snapshot.price_usd = 0.004;
    snapshot.liquidity_usd = 120_000.0;
    snapshot.volume_5m = 5_000.0;
    snapshot.volume_1h = 60_000.0;
    snapshot.volume_6h = 90_000.0;
    snapshot.volume_24h = 150_000.0;
    snapshot.price_change_5m = 12.0;
    snapshot.price_change_1h = 25.0;
    snapshot.txns_5m = TxnCounts::new(40, 10);
    snapshot.txns_1h = TxnCounts::new(150, 30);
    snapshot.market_cap = 40_000.0;
    snapshot.created_at = Some(now - Duration::minutes(age_minutes));
    snapshot
}

async fn create_test_bot(safety: Option<SafetyAssessment>) -> TestBot {
    create_test_bot_with(EngineConfig::default(), safety).await
}

async fn create_test_bot_with(config: EngineConfig, safety: Option<SafetyAssessment>) -> TestBot {
    let board = Arc::new(PriceBoard::new());
    let repository = SqliteRepository::in_memory().await.unwrap();
    let execution = Arc::new(SimulatedExecution::from_config(&config, Some(7)).with_prices(board.clone()));
    let (sink, events) = ChannelSink::channel(256);
    let sink = Arc::new(sink);

    let manager = PositionManager::new(&config, execution, repository.clone(), sink.clone(), trading_day())
        .unwrap()
        .into_shared();
    let bot = MoonshotBot::new(
        config,
        board.clone(),
        Arc::new(FixedSafety { assessment: safety }),
        Arc::new(NoSmartMoney),
        repository.clone(),
        sink,
        manager,
    );
    TestBot { bot, board, repository, events }
}

fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_healthy_fresh_token_is_entered() {
    let mut t = create_test_bot(Some(clean_safety())).await;

    let outcome = t
        .bot
        .evaluate_candidate(create_test_snapshot("fresh", 10), trading_day())
        .await
        .unwrap();

    let CandidateOutcome::Entered(position) = outcome else {
        panic!("expected entry, got {:?}", outcome);
    };
    assert_eq!(position.pool, PoolType::Hunt);
    assert_eq!(position.entry_price, 0.004);
    // 15% of the 40 USD hunt pool
    assert!((position.original_quantity * position.entry_price - 6.0).abs() < 1e-9);

    let manager = t.bot.manager();
    assert!(manager.lock().await.holds(Chain::Solana, "fresh"));
    assert!(drain(&mut t.events).iter().any(|e| e.name() == "position_opened"));
}

#[tokio::test]
async fn test_held_token_is_skipped() {
    let t = create_test_bot(Some(clean_safety())).await;
    t.bot.evaluate_candidate(create_test_snapshot("fresh", 10), trading_day()).await.unwrap();

    let again = t
        .bot
        .evaluate_candidate(create_test_snapshot("fresh", 10), trading_day())
        .await
        .unwrap();
    assert_eq!(again, CandidateOutcome::Skipped("already holding".to_string()));
}

#[tokio::test]
async fn test_quick_filter_rejects_before_safety() {
    let mut t = create_test_bot(None).await;

    let mut thin = create_test_snapshot("thin", 10);
    thin.liquidity_usd = 900.0;
    let mut dumping = create_test_snapshot("dumping", 10);
    dumping.txns_5m = TxnCounts::new(5, 45);
    let stale = create_test_snapshot("stale", 600);

    for snapshot in [thin, dumping, stale] {
        let outcome = t.bot.evaluate_candidate(snapshot, trading_day()).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Rejected(ref r) if r.len() == 1), "{:?}", outcome);
    }

    let counts = t.bot.rejections_by_reason().await;
    assert_eq!(counts.get("Low liquidity"), Some(&1));
    assert_eq!(counts.get("Heavy selling"), Some(&1));
    assert_eq!(counts.get("Too old"), Some(&1));

    let rejected = drain(&mut t.events)
        .into_iter()
        .filter(|e| e.name() == "entry_rejected")
        .count();
    assert_eq!(rejected, 3);
}

#[tokio::test]
async fn test_dangerous_contract_is_rejected_with_reasons() {
    let mut safety = clean_safety();
    safety.status = SafetyStatus::Dangerous;
    safety.is_honeypot = true;
    let t = create_test_bot(Some(safety)).await;

    let outcome = t
        .bot
        .evaluate_candidate(create_test_snapshot("trap", 10), trading_day())
        .await
        .unwrap();

    let CandidateOutcome::Rejected(reasons) = outcome else {
        panic!("expected rejection");
    };
    assert!(reasons[0].starts_with("Honeypot"));
    assert_eq!(t.bot.rejections_by_reason().await.get("Honeypot"), Some(&1));
}

#[tokio::test]
async fn test_safety_outage_blocks_entry() {
    let t = create_test_bot(None).await;

    let outcome = t
        .bot
        .evaluate_candidate(create_test_snapshot("dark", 10), trading_day())
        .await
        .unwrap();

    let CandidateOutcome::Rejected(reasons) = outcome else {
        panic!("expected rejection");
    };
    assert!(reasons.iter().any(|r| r.starts_with("Safety check failed")));
    assert_eq!(t.bot.manager().lock().await.total_open(), 0);
}

#[tokio::test]
async fn test_full_pool_skips_entry() {
    let t = create_test_bot(Some(clean_safety())).await;
    for token in ["one", "two"] {
        let outcome = t.bot.evaluate_candidate(create_test_snapshot(token, 10), trading_day()).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Entered(_)));
    }

    let third = t
        .bot
        .evaluate_candidate(create_test_snapshot("three", 10), trading_day())
        .await
        .unwrap();
    assert!(matches!(third, CandidateOutcome::Skipped(ref reason) if reason.contains("HUNT")));
}

#[tokio::test]
async fn test_scan_and_monitor_cycle() {
    let t = create_test_bot(Some(clean_safety())).await;
    t.board.set_snapshot(create_test_snapshot("good", 10)).await;
    let mut thin = create_test_snapshot("thin", 20);
    thin.liquidity_usd = 500.0;
    t.board.set_snapshot(thin).await;

    let summary = t.bot.scan_once(trading_day()).await;
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.entered, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(t.bot.manager().lock().await.daily_stats().tokens_scanned, 2);

    t.board.set_price(Chain::Solana, "good", 0.0061).await;
    let reports = t.bot.monitor_once(trading_day() + Duration::minutes(5)).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].take_profits, vec![1]);

    t.board.set_price(Chain::Solana, "good", 0.001).await;
    let reports = t.bot.monitor_once(trading_day() + Duration::minutes(6)).await;
    assert!(reports[0].closed.is_some());
    assert_eq!(t.bot.manager().lock().await.total_open(), 0);
}

#[tokio::test]
async fn test_daily_check_rolls_once_per_day() {
    let mut t = create_test_bot(Some(clean_safety())).await;
    let mut thin = create_test_snapshot("thin", 10);
    thin.liquidity_usd = 100.0;
    t.bot.evaluate_candidate(thin, trading_day()).await.unwrap();
    drain(&mut t.events);

    assert!(t.bot.daily_check(trading_day() + Duration::hours(3)).await.is_none());

    let next_day = trading_day() + Duration::days(1);
    let stats = t.bot.daily_check(next_day).await.unwrap();
    assert_eq!(stats.date, trading_day().date_naive());
    assert_eq!(stats.trades_count, 0);

    let summary = drain(&mut t.events)
        .into_iter()
        .find_map(|e| match e {
            EngineEvent::DailySummary { rejections_by_reason, .. } => Some(rejections_by_reason),
            _ => None,
        })
        .unwrap();
    assert_eq!(summary.get("Low liquidity"), Some(&1));
    assert!(t.bot.rejections_by_reason().await.is_empty());

    let stored = t.repository.daily_stats(trading_day().date_naive()).await.unwrap();
    assert!(stored.is_some());
    assert!(t.bot.daily_check(next_day + Duration::hours(1)).await.is_none());
}

#[tokio::test]
async fn test_rejected_tokens_are_offered_again_on_later_scans() {
    let mut config = EngineConfig::default();
    config.trading.max_candidates_per_scan = 2;
    let t = create_test_bot_with(config, Some(clean_safety())).await;

    let mut newest = create_test_snapshot("newest", 5);
    newest.liquidity_usd = 500.0;
    t.board.set_snapshot(newest.clone()).await;
    t.board.set_snapshot(create_test_snapshot("middle", 10)).await;
    t.board.set_snapshot(create_test_snapshot("oldest", 15)).await;

    let first = t.bot.scan_once(trading_day()).await;
    assert_eq!((first.scanned, first.rejected, first.entered), (2, 1, 1));

    // the held token no longer takes a slot, so the third one is reached
    let second = t.bot.scan_once(trading_day() + Duration::minutes(1)).await;
    assert_eq!((second.scanned, second.rejected, second.entered), (2, 1, 1));
    {
        let manager = t.bot.manager();
        let manager = manager.lock().await;
        assert!(manager.holds(Chain::Solana, "middle"));
        assert!(manager.holds(Chain::Solana, "oldest"));
    }

    // liquidity arrives: the token passes the filters and only the full hunt pool stops it
    newest.liquidity_usd = 120_000.0;
    t.board.set_snapshot(newest).await;
    let third = t.bot.scan_once(trading_day() + Duration::minutes(2)).await;
    assert_eq!((third.scanned, third.rejected, third.entered), (1, 0, 0));
    assert_eq!(t.bot.rejections_by_reason().await.get("Low liquidity"), Some(&2));
}
