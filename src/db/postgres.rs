//! PostgreSQL candle and sample storage

use super::invariants::{AlignmentFinding, DuplicateFinding, InvariantFindings, OrderingFinding};
use super::{prepare_batch, CandleStore, SampleStore};
use crate::config;
use crate::error::StoreError;
use crate::models::{Candle, CandleRow, CandleSource, Interval, PriceSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info};

const UPSERT_CHUNK_SIZE: usize = 1_000;
const FINDINGS_LIMIT: i64 = 100;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS candles (
        asset TEXT NOT NULL,
        interval_code TEXT NOT NULL,
        open_time TIMESTAMPTZ NOT NULL,
        open DOUBLE PRECISION NOT NULL,
        high DOUBLE PRECISION NOT NULL,
        low DOUBLE PRECISION NOT NULL,
        close DOUBLE PRECISION NOT NULL,
        volume DOUBLE PRECISION,
        source TEXT NOT NULL DEFAULT 'local',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    CREATE TABLE IF NOT EXISTS price_samples (
        asset TEXT NOT NULL,
        observed_at TIMESTAMPTZ NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        volume DOUBLE PRECISION,
        market_cap DOUBLE PRECISION
    );
";

const CONSTRAINTS_SQL: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS uq_candles_asset_interval_open_time
        ON candles (asset, interval_code, open_time);
    CREATE INDEX IF NOT EXISTS ix_candles_asset_interval_open_time_desc
        ON candles (asset, interval_code, open_time DESC);
    CREATE UNIQUE INDEX IF NOT EXISTS uq_price_samples_asset_observed_at
        ON price_samples (asset, observed_at);
";

const UPSERT_SQL: &str = "
    INSERT INTO candles (asset, interval_code, open_time, open, high, low, close, volume, source)
    SELECT * FROM UNNEST(
        $1::text[], $2::text[], $3::timestamptz[],
        $4::float8[], $5::float8[], $6::float8[], $7::float8[], $8::float8[],
        $9::text[]
    )
    ON CONFLICT (asset, interval_code, open_time) DO UPDATE SET
        open = EXCLUDED.open,
        high = EXCLUDED.high,
        low = EXCLUDED.low,
        close = EXCLUDED.close,
        volume = EXCLUDED.volume,
        source = EXCLUDED.source,
        updated_at = NOW()
";

const DUPLICATES_SQL: &str = "
    SELECT asset, interval_code, open_time, COUNT(*) AS count
    FROM candles
    GROUP BY asset, interval_code, open_time
    HAVING COUNT(*) > 1
    LIMIT $1
";

const NON_MONOTONIC_SQL: &str = "
    WITH ordered AS (
        SELECT
            asset,
            interval_code,
            open_time,
            LAG(open_time) OVER (PARTITION BY asset, interval_code ORDER BY open_time) AS prev_open_time
        FROM candles
    )
    SELECT asset, interval_code, open_time, prev_open_time
    FROM ordered
    WHERE prev_open_time IS NOT NULL AND open_time <= prev_open_time
    LIMIT $1
";

const MISALIGNED_SQL: &str = "
    SELECT asset, open_time
    FROM candles
    WHERE interval_code = $1
      AND MOD(EXTRACT(EPOCH FROM open_time)::bigint, $2::bigint) <> 0
    LIMIT $3
";

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    /// Connect using `DATABASE_URL`.
    pub async fn new() -> Result<Self, StoreError> {
        Self::connect(&config::get_database_url()).await
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.client.batch_execute(SCHEMA_SQL).await?;

        // Refuse to build the unique index over rows that already violate it
        let duplicates = self.find_duplicates().await?;
        if !duplicates.is_empty() {
            return Err(StoreError::InvariantViolation(InvariantFindings {
                duplicates,
                ..Default::default()
            }));
        }

        self.client.batch_execute(CONSTRAINTS_SQL).await?;
        info!("Postgres schema and integrity constraints ready");
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn find_duplicates(&self) -> Result<Vec<DuplicateFinding>, StoreError> {
        let rows = self.client.query(DUPLICATES_SQL, &[&FINDINGS_LIMIT]).await?;
        rows.iter()
            .map(|row| {
                Ok(DuplicateFinding {
                    asset: row.try_get(0)?,
                    interval: row.try_get(1)?,
                    open_time: row.try_get(2)?,
                    count: row.try_get(3)?,
                })
            })
            .collect()
    }
}

fn candle_from_row(row: &Row) -> Result<Candle, StoreError> {
    let interval_code: String = row.try_get(1)?;
    let source: String = row.try_get(8)?;
    Ok(Candle {
        row: CandleRow {
            asset: row.try_get(0)?,
            interval: Interval::parse(&interval_code)?,
            open_time: row.try_get(2)?,
            open: row.try_get(3)?,
            high: row.try_get(4)?,
            low: row.try_get(5)?,
            close: row.try_get(6)?,
            volume: row.try_get(7)?,
            source: CandleSource::parse(&source),
        },
        created_at: row.try_get(9)?,
        updated_at: row.try_get(10)?,
    })
}

#[async_trait]
impl CandleStore for PostgresStore {
    async fn upsert(&self, rows: &[CandleRow]) -> Result<u64, StoreError> {
        let batch = prepare_batch(rows)?;
        let mut written = 0u64;

        for chunk in batch.chunks(UPSERT_CHUNK_SIZE) {
            let assets: Vec<&str> = chunk.iter().map(|r| r.asset.as_str()).collect();
            let intervals: Vec<&str> = chunk.iter().map(|r| r.interval.code()).collect();
            let open_times: Vec<DateTime<Utc>> = chunk.iter().map(|r| r.open_time).collect();
            let opens: Vec<f64> = chunk.iter().map(|r| r.open).collect();
            let highs: Vec<f64> = chunk.iter().map(|r| r.high).collect();
            let lows: Vec<f64> = chunk.iter().map(|r| r.low).collect();
            let closes: Vec<f64> = chunk.iter().map(|r| r.close).collect();
            let volumes: Vec<Option<f64>> = chunk.iter().map(|r| r.volume).collect();
            let sources: Vec<&str> = chunk.iter().map(|r| r.source.as_str()).collect();

            written += self
                .client
                .execute(
                    UPSERT_SQL,
                    &[
                        &assets,
                        &intervals,
                        &open_times,
                        &opens,
                        &highs,
                        &lows,
                        &closes,
                        &volumes,
                        &sources,
                    ],
                )
                .await?;
        }

        debug!(rows = batch.len(), written, "Upserted candle batch");
        Ok(written)
    }

    async fn insert_raw(&self, row: &CandleRow) -> Result<(), StoreError> {
        if !row.interval.is_aligned(row.open_time) {
            return Err(StoreError::Misaligned {
                interval: row.interval,
                open_time: row.open_time,
            });
        }

        let result = self
            .client
            .execute(
                "INSERT INTO candles (asset, interval_code, open_time, open, high, low, close, volume, source)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &row.asset,
                    &row.interval.code(),
                    &row.open_time,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &row.source.as_str(),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(StoreError::Integrity(row.key()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT asset, interval_code, open_time, open, high, low, close, volume, source, created_at, updated_at
                 FROM candles
                 WHERE asset = $1 AND interval_code = $2 AND open_time >= $3 AND open_time < $4
                 ORDER BY open_time ASC",
                &[&asset, &interval.code(), &start, &end],
            )
            .await?;

        rows.iter().map(candle_from_row).collect()
    }

    async fn existing_open_times(
        &self,
        asset: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT open_time FROM candles
                 WHERE asset = $1 AND interval_code = $2 AND open_time >= $3 AND open_time < $4",
                &[&asset, &interval.code(), &start, &end],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, DateTime<Utc>>(0).map_err(StoreError::from))
            .collect()
    }

    async fn latest_open_time(
        &self,
        asset: &str,
        interval: Interval,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = self
            .client
            .query_one(
                "SELECT MAX(open_time) FROM candles WHERE asset = $1 AND interval_code = $2",
                &[&asset, &interval.code()],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn verify_invariants(&self, strict: bool) -> Result<InvariantFindings, StoreError> {
        let mut findings = InvariantFindings {
            duplicates: self.find_duplicates().await?,
            ..Default::default()
        };

        for row in self.client.query(NON_MONOTONIC_SQL, &[&FINDINGS_LIMIT]).await? {
            findings.non_monotonic.push(OrderingFinding {
                asset: row.try_get(0)?,
                interval: row.try_get(1)?,
                open_time: row.try_get(2)?,
                prev_open_time: row.try_get(3)?,
            });
        }

        for interval in Interval::all() {
            let rows = self
                .client
                .query(
                    MISALIGNED_SQL,
                    &[&interval.code(), &interval.seconds(), &FINDINGS_LIMIT],
                )
                .await?;
            for row in rows {
                findings.misaligned.push(AlignmentFinding {
                    asset: row.try_get(0)?,
                    interval: interval.code().to_string(),
                    open_time: row.try_get(1)?,
                });
            }
        }

        findings.enforce(strict)
    }
}

#[async_trait]
impl SampleStore for PostgresStore {
    async fn store_samples(&self, samples: &[PriceSample]) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let assets: Vec<&str> = samples.iter().map(|s| s.asset.as_str()).collect();
        let observed: Vec<DateTime<Utc>> = samples.iter().map(|s| s.observed_at).collect();
        let prices: Vec<f64> = samples.iter().map(|s| s.price).collect();
        let volumes: Vec<Option<f64>> = samples.iter().map(|s| s.volume).collect();
        let caps: Vec<Option<f64>> = samples.iter().map(|s| s.market_cap).collect();

        let stored = self
            .client
            .execute(
                "INSERT INTO price_samples (asset, observed_at, price, volume, market_cap)
                 SELECT * FROM UNNEST($1::text[], $2::timestamptz[], $3::float8[], $4::float8[], $5::float8[])
                 ON CONFLICT (asset, observed_at) DO NOTHING",
                &[&assets, &observed, &prices, &volumes, &caps],
            )
            .await?;
        Ok(stored)
    }

    async fn samples(
        &self,
        asset: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PriceSample>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT asset, observed_at, price, volume, market_cap
                 FROM price_samples
                 WHERE asset = $1
                   AND ($2::timestamptz IS NULL OR observed_at >= $2)
                   AND ($3::timestamptz IS NULL OR observed_at < $3)
                 ORDER BY observed_at ASC",
                &[&asset, &start, &end],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(PriceSample {
                    asset: row.try_get(0)?,
                    observed_at: row.try_get(1)?,
                    price: row.try_get(2)?,
                    volume: row.try_get(3)?,
                    market_cap: row.try_get(4)?,
                })
            })
            .collect()
    }

    async fn latest_sample_time(&self, asset: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = self
            .client
            .query_one(
                "SELECT MAX(observed_at) FROM price_samples WHERE asset = $1",
                &[&asset],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}
