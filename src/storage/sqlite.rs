//! SQLite implementation of the position repository.
//!
//! Normalized schema: hit take-profit levels live in their own table keyed by
//! (position_id, level) instead of a serialized list on the position row.
//! Timestamps are stored as UTC milliseconds.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::position::portfolio::DailyStats;
use crate::position::types::{Position, TradeRecord};
use crate::storage::PositionRepository;

const SCHEMA_VERSION: i64 = 1;

#[derive(FromRow)]
struct PositionRow {
    id: i64,
    chain: String,
    token_address: String,
    symbol: String,
    pool: String,
    entry_price: f64,
    entry_value: f64,
    entry_time_ms: i64,
    original_quantity: f64,
    remaining_quantity: f64,
    current_price: f64,
    highest_price: f64,
    stop_loss: f64,
    realized_pnl: f64,
    total_sold_value: f64,
    trailing_active: bool,
    trailing_high: f64,
    pnl_percent: f64,
    pnl_usd: f64,
    status: String,
    exit_price: Option<f64>,
    exit_time_ms: Option<i64>,
    exit_reason: Option<String>,
}

#[derive(FromRow)]
struct TradeRow {
    id: i64,
    position_id: i64,
    kind: String,
    chain: String,
    token_address: String,
    symbol: String,
    price: f64,
    quantity: f64,
    value: f64,
    slippage_percent: f64,
    tx_ref: Option<String>,
    timestamp_ms: i64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {} out of range", ms))
}

pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Connects to `url` and creates the schema if needed.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        // every pooled connection to :memory: would get its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to SQLite database")?;

        let repository = Self { pool };
        repository.create_schema().await?;
        info!("SqliteRepository initialized at {}", url);

        Ok(Arc::new(repository))
    }

    pub async fn in_memory() -> Result<Arc<Self>> {
        Self::connect("sqlite::memory:").await
    }

    pub fn get_db_pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at_ms INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create schema_version table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                chain TEXT NOT NULL,
                token_address TEXT NOT NULL,
                symbol TEXT NOT NULL,
                pool TEXT NOT NULL,
                entry_price REAL NOT NULL,
                entry_value REAL NOT NULL,
                entry_time_ms INTEGER NOT NULL,
                original_quantity REAL NOT NULL,
                remaining_quantity REAL NOT NULL,
                current_price REAL NOT NULL,
                highest_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                realized_pnl REAL NOT NULL DEFAULT 0,
                total_sold_value REAL NOT NULL DEFAULT 0,
                trailing_active BOOLEAN NOT NULL DEFAULT FALSE,
                trailing_high REAL NOT NULL DEFAULT 0,
                pnl_percent REAL NOT NULL DEFAULT 0,
                pnl_usd REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'OPEN',
                exit_price REAL,
                exit_time_ms INTEGER,
                exit_reason TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS position_take_profits (
                position_id INTEGER NOT NULL,
                level INTEGER NOT NULL,
                PRIMARY KEY (position_id, level),
                FOREIGN KEY (position_id) REFERENCES positions (id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create position_take_profits table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                chain TEXT NOT NULL,
                token_address TEXT NOT NULL,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL,
                value REAL NOT NULL,
                slippage_percent REAL NOT NULL DEFAULT 0,
                tx_ref TEXT,
                timestamp_ms INTEGER NOT NULL,
                FOREIGN KEY (position_id) REFERENCES positions (id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_stats (
                date TEXT PRIMARY KEY,
                starting_capital REAL NOT NULL,
                ending_capital REAL NOT NULL,
                total_pnl REAL NOT NULL,
                pnl_percent REAL NOT NULL,
                trades_count INTEGER NOT NULL,
                winners INTEGER NOT NULL,
                losers INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                profit_factor REAL,
                safe_pnl REAL NOT NULL,
                hunt_pnl REAL NOT NULL,
                tokens_scanned INTEGER NOT NULL,
                tokens_rejected INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create daily_stats table")?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_positions_status ON positions (status);",
            "CREATE INDEX IF NOT EXISTS idx_trades_position ON trades (position_id);",
            "CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades (timestamp_ms);",
        ] {
            sqlx::query(index)
                .execute(&self.pool)
                .await
                .context("Failed to create index")?;
        }

        sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at_ms) VALUES (?, ?);")
            .bind(SCHEMA_VERSION)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .context("Failed to record schema version")?;

        Ok(())
    }

    /// Replaces the hit take-profit rows of a position inside `tx`.
    async fn write_take_profits(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        position_id: i64,
        levels: &BTreeSet<u8>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM position_take_profits WHERE position_id = ?;")
            .bind(position_id)
            .execute(&mut **tx)
            .await
            .context("Failed to clear take-profit levels")?;

        for level in levels {
            sqlx::query("INSERT INTO position_take_profits (position_id, level) VALUES (?, ?);")
                .bind(position_id)
                .bind(*level as i64)
                .execute(&mut **tx)
                .await
                .context(format!("Failed to store take-profit level {}", level))?;
        }
        Ok(())
    }

    async fn take_profits_for(&self, position_id: i64) -> Result<BTreeSet<u8>> {
        let levels: Vec<(i64,)> =
            sqlx::query_as("SELECT level FROM position_take_profits WHERE position_id = ? ORDER BY level;")
                .bind(position_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch take-profit levels")?;

        levels
            .into_iter()
            .map(|(level,)| u8::try_from(level).context("take-profit level out of range"))
            .collect()
    }

    async fn row_to_position(&self, row: PositionRow) -> Result<Position> {
        let take_profits_hit = self.take_profits_for(row.id).await?;
        Ok(Position {
            id: row.id,
            chain: row.chain.parse().map_err(|e: String| anyhow!(e))?,
            token_address: row.token_address,
            symbol: row.symbol,
            pool: row.pool.parse().map_err(|e: String| anyhow!(e))?,
            entry_price: row.entry_price,
            entry_value: row.entry_value,
            entry_time: from_millis(row.entry_time_ms)?,
            original_quantity: row.original_quantity,
            remaining_quantity: row.remaining_quantity,
            current_price: row.current_price,
            highest_price: row.highest_price,
            stop_loss: row.stop_loss,
            take_profits_hit,
            realized_pnl: row.realized_pnl,
            total_sold_value: row.total_sold_value,
            trailing_active: row.trailing_active,
            trailing_high: row.trailing_high,
            pnl_percent: row.pnl_percent,
            pnl_usd: row.pnl_usd,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            exit_price: row.exit_price,
            exit_time: row.exit_time_ms.map(from_millis).transpose()?,
            exit_reason: row
                .exit_reason
                .map(|r| r.parse().map_err(|e: String| anyhow!(e)))
                .transpose()?,
        })
    }

    fn row_to_trade(row: TradeRow) -> Result<TradeRecord> {
        Ok(TradeRecord {
            id: Some(row.id),
            position_id: row.position_id,
            kind: row.kind.parse().map_err(|e: String| anyhow!(e))?,
            chain: row.chain.parse().map_err(|e: String| anyhow!(e))?,
            token_address: row.token_address,
            symbol: row.symbol,
            price: row.price,
            quantity: row.quantity,
            value: row.value,
            slippage_percent: row.slippage_percent,
            tx_ref: row.tx_ref,
            timestamp: from_millis(row.timestamp_ms)?,
        })
    }

    /// Daily stats row for `date`, if one was saved.
    pub async fn daily_stats(&self, date: NaiveDate) -> Result<Option<DailyStats>> {
        #[derive(FromRow)]
        struct DailyRow {
            date: NaiveDate,
            starting_capital: f64,
            ending_capital: f64,
            total_pnl: f64,
            pnl_percent: f64,
            trades_count: i64,
            winners: i64,
            losers: i64,
            win_rate: f64,
            profit_factor: Option<f64>,
            safe_pnl: f64,
            hunt_pnl: f64,
            tokens_scanned: i64,
            tokens_rejected: i64,
        }

        let row: Option<DailyRow> = sqlx::query_as("SELECT * FROM daily_stats WHERE date = ?;")
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch daily stats")?;

        Ok(row.map(|r| DailyStats {
            date: r.date,
            starting_capital: r.starting_capital,
            ending_capital: r.ending_capital,
            total_pnl: r.total_pnl,
            pnl_percent: r.pnl_percent,
            trades_count: r.trades_count as u32,
            winners: r.winners as u32,
            losers: r.losers as u32,
            win_rate: r.win_rate,
            profit_factor: r.profit_factor.unwrap_or(f64::INFINITY),
            safe_pnl: r.safe_pnl,
            hunt_pnl: r.hunt_pnl,
            tokens_scanned: r.tokens_scanned as u64,
            tokens_rejected: r.tokens_rejected as u64,
        }))
    }
}

#[async_trait]
impl PositionRepository for SqliteRepository {
    async fn create_position(&self, position: &Position) -> Result<()> {
        debug!("Inserting position {} for {}", position.id, position.token_address);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, chain, token_address, symbol, pool, entry_price, entry_value, entry_time_ms,
                original_quantity, remaining_quantity, current_price, highest_price, stop_loss,
                realized_pnl, total_sold_value, trailing_active, trailing_high, pnl_percent, pnl_usd, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(position.id)
        .bind(position.chain.as_str())
        .bind(&position.token_address)
        .bind(&position.symbol)
        .bind(position.pool.as_str())
        .bind(position.entry_price)
        .bind(position.entry_value)
        .bind(position.entry_time.timestamp_millis())
        .bind(position.original_quantity)
        .bind(position.remaining_quantity)
        .bind(position.current_price)
        .bind(position.highest_price)
        .bind(position.stop_loss)
        .bind(position.realized_pnl)
        .bind(position.total_sold_value)
        .bind(position.trailing_active)
        .bind(position.trailing_high)
        .bind(position.pnl_percent)
        .bind(position.pnl_usd)
        .bind(position.status.as_str())
        .execute(&mut *tx)
        .await
        .context(format!("Failed to insert position {}", position.id))?;

        Self::write_take_profits(&mut tx, position.id, &position.take_profits_hit).await?;
        tx.commit().await.context("Failed to commit position insert")?;
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            UPDATE positions SET
                remaining_quantity = ?, current_price = ?, highest_price = ?, stop_loss = ?,
                realized_pnl = ?, total_sold_value = ?, trailing_active = ?, trailing_high = ?,
                pnl_percent = ?, pnl_usd = ?
            WHERE id = ? AND status = 'OPEN';
            "#,
        )
        .bind(position.remaining_quantity)
        .bind(position.current_price)
        .bind(position.highest_price)
        .bind(position.stop_loss)
        .bind(position.realized_pnl)
        .bind(position.total_sold_value)
        .bind(position.trailing_active)
        .bind(position.trailing_high)
        .bind(position.pnl_percent)
        .bind(position.pnl_usd)
        .bind(position.id)
        .execute(&mut *tx)
        .await
        .context(format!("Failed to update position {}", position.id))?;

        Self::write_take_profits(&mut tx, position.id, &position.take_profits_hit).await?;
        tx.commit().await.context("Failed to commit position update")?;
        Ok(())
    }

    async fn close_position(&self, position: &Position) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query(
            r#"
            UPDATE positions SET
                status = ?, remaining_quantity = ?, current_price = ?, highest_price = ?, stop_loss = ?,
                realized_pnl = ?, total_sold_value = ?, pnl_percent = ?, pnl_usd = ?,
                exit_price = ?, exit_time_ms = ?, exit_reason = ?
            WHERE id = ? AND status = 'OPEN';
            "#,
        )
        .bind(position.status.as_str())
        .bind(position.remaining_quantity)
        .bind(position.current_price)
        .bind(position.highest_price)
        .bind(position.stop_loss)
        .bind(position.realized_pnl)
        .bind(position.total_sold_value)
        .bind(position.pnl_percent)
        .bind(position.pnl_usd)
        .bind(position.exit_price)
        .bind(position.exit_time.map(|t| t.timestamp_millis()))
        .bind(position.exit_reason.map(|r| r.as_str()))
        .bind(position.id)
        .execute(&mut *tx)
        .await
        .context(format!("Failed to close position {}", position.id))?;

        if result.rows_affected() == 0 {
            debug!("Position {} was not open in storage, close skipped", position.id);
        } else {
            Self::write_take_profits(&mut tx, position.id, &position.take_profits_hit).await?;
        }
        tx.commit().await.context("Failed to commit position close")?;
        Ok(())
    }

    async fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let row: Option<PositionRow> = sqlx::query_as("SELECT * FROM positions WHERE id = ?;")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch position by ID")?;

        match row {
            Some(row) => Ok(Some(self.row_to_position(row).await?)),
            None => Ok(None),
        }
    }

    async fn record_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                position_id, kind, chain, token_address, symbol, price, quantity, value,
                slippage_percent, tx_ref, timestamp_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(trade.position_id)
        .bind(trade.kind.label())
        .bind(trade.chain.as_str())
        .bind(&trade.token_address)
        .bind(&trade.symbol)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.value)
        .bind(trade.slippage_percent)
        .bind(&trade.tx_ref)
        .bind(trade.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert trade")?;

        Ok(result.last_insert_rowid())
    }

    async fn load_open_positions(&self) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> = sqlx::query_as("SELECT * FROM positions WHERE status = 'OPEN' ORDER BY id;")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch open positions")?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            positions.push(self.row_to_position(row).await?);
        }
        Ok(positions)
    }

    async fn max_position_id(&self) -> Result<i64> {
        let max: (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM positions;")
            .fetch_one(&self.pool)
            .await
            .context("Failed to get max position id")?;

        Ok(max.0.unwrap_or(0))
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows: Vec<TradeRow> =
            sqlx::query_as("SELECT * FROM trades WHERE timestamp_ms >= ? ORDER BY timestamp_ms ASC, id ASC;")
                .bind(since.timestamp_millis())
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch trades")?;

        rows.into_iter().map(Self::row_to_trade).collect()
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO daily_stats (
                date, starting_capital, ending_capital, total_pnl, pnl_percent, trades_count,
                winners, losers, win_rate, profit_factor, safe_pnl, hunt_pnl, tokens_scanned, tokens_rejected
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
            "#,
        )
        .bind(stats.date)
        .bind(stats.starting_capital)
        .bind(stats.ending_capital)
        .bind(stats.total_pnl)
        .bind(stats.pnl_percent)
        .bind(stats.trades_count as i64)
        .bind(stats.winners as i64)
        .bind(stats.losers as i64)
        .bind(stats.win_rate)
        .bind(stats.profit_factor.is_finite().then_some(stats.profit_factor))
        .bind(stats.safe_pnl)
        .bind(stats.hunt_pnl)
        .bind(stats.tokens_scanned as i64)
        .bind(stats.tokens_rejected as i64)
        .execute(&self.pool)
        .await
        .context(format!("Failed to save daily stats for {}", stats.date))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
