//! PostgreSQL candle storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::store::CandleStore;
use crate::types::{Candle, SeriesKey};
use crate::Result;

/// Rows per INSERT statement, well under the bind parameter limit.
const UPSERT_CHUNK: usize = 1000;

/// Replaces every non-key column of a conflicting row, NULLs included.
const ON_CONFLICT_OVERWRITE: &str = r#"
    ON CONFLICT (source, symbol, cadence, open_time) DO UPDATE SET
        close_time = EXCLUDED.close_time,
        open = EXCLUDED.open,
        high = EXCLUDED.high,
        low = EXCLUDED.low,
        close = EXCLUDED.close,
        volume = EXCLUDED.volume,
        quote_volume = EXCLUDED.quote_volume,
        trade_count = EXCLUDED.trade_count,
        taker_buy_base = EXCLUDED.taker_buy_base,
        taker_buy_quote = EXCLUDED.taker_buy_quote,
        updated_at = NOW()
"#;

/// Candle repository backed by the `candles` table.
pub struct PgCandleStore {
    pool: PgPool,
}

impl PgCandleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_candle(r: &sqlx::postgres::PgRow) -> Candle {
        Candle {
            open_time: r.get("open_time"),
            close_time: r.get("close_time"),
            open: r.get("open"),
            high: r.get("high"),
            low: r.get("low"),
            close: r.get("close"),
            volume: r.get("volume"),
            quote_volume: r.get("quote_volume"),
            trade_count: r.get("trade_count"),
            taker_buy_base: r.get("taker_buy_base"),
            taker_buy_quote: r.get("taker_buy_quote"),
        }
    }
}

#[async_trait]
impl CandleStore for PgCandleStore {
    async fn latest_open_time(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(open_time) AS latest
            FROM candles
            WHERE source = $1 AND symbol = $2 AND cadence = $3
            "#,
        )
        .bind(&key.source)
        .bind(&key.symbol)
        .bind(&key.cadence)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("latest"))
    }

    async fn upsert(&self, key: &SeriesKey, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        // One transaction per batch: a failure leaves earlier batches committed.
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in candles.chunks(UPSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO candles (source, symbol, cadence, open_time, close_time, \
                 open, high, low, close, volume, quote_volume, trade_count, \
                 taker_buy_base, taker_buy_quote) ",
            );
            builder.push_values(chunk, |mut b, candle| {
                b.push_bind(&key.source)
                    .push_bind(&key.symbol)
                    .push_bind(&key.cadence)
                    .push_bind(candle.open_time)
                    .push_bind(candle.close_time)
                    .push_bind(candle.open)
                    .push_bind(candle.high)
                    .push_bind(candle.low)
                    .push_bind(candle.close)
                    .push_bind(candle.volume)
                    .push_bind(candle.quote_volume)
                    .push_bind(candle.trade_count)
                    .push_bind(candle.taker_buy_base)
                    .push_bind(candle.taker_buy_quote);
            });
            builder.push(ON_CONFLICT_OVERWRITE);

            let result = builder.build().execute(&mut *tx).await?;
            affected += result.rows_affected();
        }

        tx.commit().await?;
        debug!(series = %key, rows = affected, "Upserted candles");
        Ok(affected)
    }

    async fn recent(&self, key: &SeriesKey, limit: Option<usize>) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT open_time, close_time, open, high, low, close, volume,
                   quote_volume, trade_count, taker_buy_base, taker_buy_quote
            FROM candles
            WHERE source = $1 AND symbol = $2 AND cadence = $3
            ORDER BY open_time DESC
            LIMIT $4
            "#,
        )
        .bind(&key.source)
        .bind(&key.symbol)
        .bind(&key.cadence)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        let mut candles: Vec<Candle> = rows.iter().map(Self::row_to_candle).collect();
        candles.reverse();
        Ok(candles)
    }

    async fn count(&self, key: &SeriesKey) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM candles
            WHERE source = $1 AND symbol = $2 AND cadence = $3
            "#,
        )
        .bind(&key.source)
        .bind(&key.symbol)
        .bind(&key.cadence)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count") as u64)
    }
}
