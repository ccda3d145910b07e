use super::{table_name, CandleStore, StoreError, PRICE_SCALE};
use crate::models::{Candle, Timeframe};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, InsertStatement, OnConflict, Order, Query, SelectStatement, Table,
    TableCreateStatement,
};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DeriveIden, FromQueryResult, TransactionTrait,
};
use tracing::debug;

/// Rows per INSERT statement inside one upsert transaction
const INSERT_CHUNK: usize = 500;

#[derive(DeriveIden)]
enum Kline {
    OpenTime,
    Open,
    High,
    Low,
    Close,
    Volume,
    Closed,
    UpdatedAt,
}

#[derive(Debug, FromQueryResult)]
struct KlineRow {
    open_time: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    closed: bool,
}

impl KlineRow {
    fn into_candle(self, symbol: &str, timeframe: Timeframe) -> Candle {
        Candle::new(
            symbol,
            timeframe,
            self.open_time,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.closed,
        )
    }
}

/// MySQL candle storage, one table per `(symbol, timeframe)`.
#[derive(Debug, Clone)]
pub struct MySqlCandleStore {
    db: DatabaseConnection,
}

impl MySqlCandleStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn select(
        &self,
        stmt: &SelectStatement,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>, StoreError> {
        let backend = self.db.get_database_backend();
        let rows = KlineRow::find_by_statement(backend.build(stmt))
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_candle(symbol, timeframe))
            .collect())
    }
}

#[async_trait]
impl CandleStore for MySqlCandleStore {
    async fn ensure_table(&self, symbol: &str, timeframe: Timeframe) -> Result<(), StoreError> {
        let table = table_name(symbol, timeframe)?;
        let backend = self.db.get_database_backend();
        self.db
            .execute(backend.build(&create_table_statement(&table)))
            .await?;
        debug!("Ensured table {}", table);
        Ok(())
    }

    async fn load_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let table = table_name(symbol, timeframe)?;
        self.select(&range_statement(&table, from_ms, to_ms), symbol, timeframe)
            .await
    }

    async fn latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        let table = table_name(symbol, timeframe)?;
        self.select(&latest_statement(&table, limit), symbol, timeframe)
            .await
    }

    async fn upsert(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<(), StoreError> {
        if candles.is_empty() {
            return Ok(());
        }
        let table = table_name(symbol, timeframe)?;
        let backend = self.db.get_database_backend();

        let txn = self.db.begin().await?;
        for chunk in candles.chunks(INSERT_CHUNK) {
            let stmt = upsert_statement(&table, chunk)?;
            txn.execute(backend.build(&stmt)).await?;
        }
        txn.commit().await?;
        Ok(())
    }
}

fn create_table_statement(table: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(ColumnDef::new(Kline::OpenTime).big_integer().not_null().primary_key())
        .col(ColumnDef::new(Kline::Open).decimal_len(36, PRICE_SCALE).not_null())
        .col(ColumnDef::new(Kline::High).decimal_len(36, PRICE_SCALE).not_null())
        .col(ColumnDef::new(Kline::Low).decimal_len(36, PRICE_SCALE).not_null())
        .col(ColumnDef::new(Kline::Close).decimal_len(36, PRICE_SCALE).not_null())
        .col(ColumnDef::new(Kline::Volume).decimal_len(36, PRICE_SCALE).not_null())
        .col(ColumnDef::new(Kline::Closed).boolean().not_null().default(false))
        .col(
            ColumnDef::new(Kline::UpdatedAt)
                .timestamp()
                .default(Expr::cust("CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP")),
        )
        .to_owned()
}

fn select_columns(table: &str) -> SelectStatement {
    Query::select()
        .columns([
            Kline::OpenTime,
            Kline::Open,
            Kline::High,
            Kline::Low,
            Kline::Close,
            Kline::Volume,
            Kline::Closed,
        ])
        .from(Alias::new(table))
        .to_owned()
}

fn range_statement(table: &str, from_ms: i64, to_ms: i64) -> SelectStatement {
    select_columns(table)
        .and_where(Expr::col(Kline::OpenTime).gte(from_ms))
        .and_where(Expr::col(Kline::OpenTime).lt(to_ms))
        .order_by(Kline::OpenTime, Order::Asc)
        .to_owned()
}

fn latest_statement(table: &str, limit: usize) -> SelectStatement {
    select_columns(table)
        .order_by(Kline::OpenTime, Order::Desc)
        .limit(limit as u64)
        .to_owned()
}

/// `INSERT ... ON DUPLICATE KEY UPDATE` keyed by `open_time`.
fn upsert_statement(table: &str, candles: &[Candle]) -> Result<InsertStatement, StoreError> {
    let mut insert = Query::insert();
    insert.into_table(Alias::new(table)).columns([
        Kline::OpenTime,
        Kline::Open,
        Kline::High,
        Kline::Low,
        Kline::Close,
        Kline::Volume,
        Kline::Closed,
    ]);
    for c in candles {
        insert
            .values([
                c.open_time.into(),
                c.open.into(),
                c.high.into(),
                c.low.into(),
                c.close.into(),
                c.volume.into(),
                c.closed.into(),
            ])
            .map_err(|e| StoreError::Statement(e.to_string()))?;
    }
    insert.on_conflict(
        OnConflict::column(Kline::OpenTime)
            .update_columns([
                Kline::Open,
                Kline::High,
                Kline::Low,
                Kline::Close,
                Kline::Volume,
                Kline::Closed,
            ])
            .to_owned(),
    );
    Ok(insert)
}
