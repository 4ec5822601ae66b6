//! SQLite repository behaviour against an in-memory database.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use moonshot_sniper::position::{
    ActivePosition, DailyStats, ExitReason, Position, PositionStatus, TradeKind, TradeRecord,
};
use moonshot_sniper::storage::{PositionRepository, SqliteRepository};
use moonshot_sniper::types::{Chain, PoolType};

fn entry_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 14, 9, 30, 0).unwrap()
}

fn create_test_position(id: i64, token: &str) -> Position {
    ActivePosition::open(id, Chain::Base, token, "TEST", PoolType::Hunt, 0.5, 10.0, 0.35, entry_time()).record
}

fn create_test_trade(position_id: i64, kind: TradeKind, minutes: i64) -> TradeRecord {
    TradeRecord {
        id: None,
        position_id,
        kind,
        chain: Chain::Base,
        token_address: "0xabc".to_string(),
        symbol: "TEST".to_string(),
        price: 0.5,
        quantity: 20.0,
        value: 10.0,
        slippage_percent: 1.2,
        tx_ref: Some(format!("sim-{}", minutes)),
        timestamp: entry_time() + Duration::minutes(minutes),
    }
}

#[tokio::test]
async fn test_position_round_trip_with_take_profits() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    let mut active = ActivePosition::from_record(create_test_position(7, "0xabc"));

    repo.create_position(&active.record).await.unwrap();

    active.update_price(0.75);
    active.record_take_profit(1, 4.0);
    active.raise_stop(0.5);
    repo.update_position(&active.record).await.unwrap();

    let loaded = repo.get_position(7).await.unwrap().unwrap();
    assert_eq!(loaded, active.record);
    assert!(loaded.take_profits_hit.contains(&1));
    assert_eq!(loaded.stop_loss, 0.5);
    assert_eq!(loaded.entry_time, entry_time());
    assert!(loaded.is_open());
}

#[tokio::test]
async fn test_missing_position_is_none() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    assert!(repo.get_position(99).await.unwrap().is_none());
}

#[tokio::test]
async fn test_closed_positions_leave_open_set() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    let mut first = ActivePosition::from_record(create_test_position(1, "0xaaa"));
    let second = create_test_position(2, "0xbbb");
    repo.create_position(&first.record).await.unwrap();
    repo.create_position(&second).await.unwrap();

    first.update_price(0.3);
    first.settle(ExitReason::StopLoss, entry_time() + Duration::minutes(12));
    repo.close_position(&first.record).await.unwrap();

    let open = repo.load_open_positions().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, 2);

    let closed = repo.get_position(1).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(closed.exit_price, Some(0.3));
    assert_eq!(closed.remaining_quantity, 0.0);

    // updates after close do not resurrect the row
    repo.update_position(&second).await.unwrap();
    let mut stale = first.record.clone();
    stale.status = PositionStatus::Open;
    repo.update_position(&stale).await.unwrap();
    assert_eq!(repo.get_position(1).await.unwrap().unwrap().status, PositionStatus::Closed);
}

#[tokio::test]
async fn test_max_position_id() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    assert_eq!(repo.max_position_id().await.unwrap(), 0);

    repo.create_position(&create_test_position(3, "0xaaa")).await.unwrap();
    repo.create_position(&create_test_position(11, "0xbbb")).await.unwrap();
    assert_eq!(repo.max_position_id().await.unwrap(), 11);
}

#[tokio::test]
async fn test_trades_since_filters_and_orders() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    repo.create_position(&create_test_position(1, "0xabc")).await.unwrap();

    let buy_id = repo.record_trade(&create_test_trade(1, TradeKind::Buy, 0)).await.unwrap();
    let tp_id = repo.record_trade(&create_test_trade(1, TradeKind::TakeProfit(2), 30)).await.unwrap();
    repo.record_trade(&create_test_trade(1, TradeKind::Exit(ExitReason::TrailingStop), 90)).await.unwrap();
    assert!(tp_id > buy_id);

    let all = repo.trades_since(entry_time()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].kind, TradeKind::Buy);
    assert_eq!(all[0].id, Some(buy_id));
    assert_eq!(all[2].kind, TradeKind::Exit(ExitReason::TrailingStop));

    let later = repo.trades_since(entry_time() + Duration::minutes(30)).await.unwrap();
    assert_eq!(later.len(), 2);
    assert_eq!(later[0].kind, TradeKind::TakeProfit(2));
    assert_eq!(later[0].tx_ref.as_deref(), Some("sim-30"));
}

#[tokio::test]
async fn test_daily_stats_upsert_keeps_infinite_profit_factor() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 5, 14).unwrap();
    let mut stats = DailyStats {
        date,
        starting_capital: 100.0,
        ending_capital: 104.0,
        total_pnl: 4.0,
        pnl_percent: 4.0,
        trades_count: 2,
        winners: 2,
        losers: 0,
        win_rate: 100.0,
        profit_factor: f64::INFINITY,
        safe_pnl: 1.0,
        hunt_pnl: 3.0,
        tokens_scanned: 250,
        tokens_rejected: 240,
    };

    repo.save_daily_stats(&stats).await.unwrap();
    let loaded = repo.daily_stats(date).await.unwrap().unwrap();
    assert!(loaded.profit_factor.is_infinite());
    assert_eq!(loaded.tokens_scanned, 250);

    stats.losers = 1;
    stats.trades_count = 3;
    stats.profit_factor = 2.5;
    repo.save_daily_stats(&stats).await.unwrap();
    let loaded = repo.daily_stats(date).await.unwrap().unwrap();
    assert_eq!(loaded, stats);

    assert!(repo.daily_stats(date.succ_opt().unwrap()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_health_check() {
    let repo = SqliteRepository::in_memory().await.unwrap();
    assert!(repo.health_check().await.unwrap());
}
