use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use common::{ActiveTradingSignal, SignalStatus, TradingSignal, WebhookSignal};
use rust_decimal::Decimal;
use signal_rules::{SignalOrder, SignalQuery, SignalStore, StorageStats};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

const SIGNAL_COLUMNS: &str =
    "id, symbol, action, price, timestamp, signal_type, unique_key, used, resolved, swing";

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS active_trading_signals (
        id UUID PRIMARY KEY,
        symbol TEXT NOT NULL,
        action TEXT NOT NULL,
        price NUMERIC(20, 8) NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        signal_type TEXT NOT NULL,
        unique_key TEXT NOT NULL UNIQUE,
        used BOOLEAN NOT NULL DEFAULT FALSE,
        resolved BOOLEAN NOT NULL DEFAULT FALSE,
        swing NUMERIC(20, 8),
        created_at TIMESTAMPTZ DEFAULT NOW(),
        updated_at TIMESTAMPTZ DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_active_signals_resolved ON active_trading_signals(resolved)",
    "CREATE INDEX IF NOT EXISTS idx_active_signals_symbol_type ON active_trading_signals(symbol, signal_type)",
    r#"
    CREATE TABLE IF NOT EXISTS trading_signals (
        id UUID PRIMARY KEY,
        symbol TEXT NOT NULL,
        signal_type TEXT NOT NULL,
        action TEXT NOT NULL,
        price NUMERIC(20, 8) NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        message TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_trading_signals_created_at ON trading_signals(created_at)",
];

#[derive(Debug, FromRow)]
struct SignalRow {
    id: Uuid,
    symbol: String,
    action: String,
    price: Decimal,
    timestamp: DateTime<Utc>,
    signal_type: String,
    unique_key: String,
    used: bool,
    resolved: bool,
    swing: Option<Decimal>,
}

impl TryFrom<SignalRow> for ActiveTradingSignal {
    type Error = anyhow::Error;

    fn try_from(row: SignalRow) -> Result<Self> {
        Ok(ActiveTradingSignal {
            id: row.id,
            symbol: row.symbol,
            action: row.action.parse()?,
            price: row.price,
            timestamp: row.timestamp,
            signal_type: row.signal_type,
            unique_key: row.unique_key,
            used: row.used,
            resolved: row.resolved,
            swing: row.swing,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    symbol: String,
    signal_type: String,
    action: String,
    price: Decimal,
    timestamp: DateTime<Utc>,
    message: Option<String>,
    status: String,
}

impl TryFrom<EventRow> for TradingSignal {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "Pending" => SignalStatus::Pending,
            "Processed" => SignalStatus::Processed,
            other => return Err(anyhow!("unknown signal status {:?}", other)),
        };
        Ok(TradingSignal {
            id: row.id,
            symbol: row.symbol,
            signal_type: row.signal_type,
            action: row.action.parse()?,
            price: row.price,
            timestamp: row.timestamp,
            message: row.message,
            status,
        })
    }
}

fn into_signals(rows: Vec<SignalRow>) -> Result<Vec<ActiveTradingSignal>> {
    rows.into_iter().map(ActiveTradingSignal::try_from).collect()
}

/// PostgreSQL-backed active signal store
pub struct PostgresSignalStore {
    pool: PgPool,
}

impl PostgresSignalStore {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to signal database")?;

        info!("✅ Connected to signal database");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create signal tables")?;
        }

        info!("✅ Initialized signal tables");
        Ok(())
    }

    fn build_query(query: &SignalQuery) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {} FROM active_trading_signals WHERE TRUE",
            SIGNAL_COLUMNS
        ));

        if let Some(symbol) = &query.symbol {
            builder.push(" AND symbol = ").push_bind(symbol.as_str());
        }
        if let Some(signal_type) = &query.signal_type {
            builder
                .push(" AND LOWER(signal_type) = LOWER(")
                .push_bind(signal_type.as_str())
                .push(")");
        }
        if let Some(resolved) = query.resolved {
            builder.push(" AND resolved = ").push_bind(resolved);
        }
        if let Some(used) = query.used {
            builder.push(" AND used = ").push_bind(used);
        }
        match query.has_swing {
            Some(true) => {
                builder.push(" AND swing IS NOT NULL");
            }
            Some(false) => {
                builder.push(" AND swing IS NULL");
            }
            None => {}
        }

        builder.push(match query.order {
            SignalOrder::NewestFirst => " ORDER BY timestamp DESC",
            SignalOrder::TypeThenNewest => " ORDER BY LOWER(signal_type) ASC, timestamp DESC",
        });

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        builder
    }
}

#[async_trait::async_trait]
impl SignalStore for PostgresSignalStore {
    async fn upsert(&self, webhook: &WebhookSignal) -> Result<ActiveTradingSignal> {
        let row = sqlx::query_as::<_, SignalRow>(&format!(
            r#"
            INSERT INTO active_trading_signals
                (id, symbol, action, price, timestamp, signal_type, unique_key, used, resolved, swing)
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, FALSE, $8)
            ON CONFLICT (unique_key) DO UPDATE
            SET action = EXCLUDED.action,
                price = EXCLUDED.price,
                timestamp = EXCLUDED.timestamp,
                swing = EXCLUDED.swing,
                used = FALSE,
                resolved = FALSE,
                updated_at = NOW()
            RETURNING {}
            "#,
            SIGNAL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&webhook.symbol)
        .bind(webhook.action.as_str())
        .bind(webhook.price)
        .bind(webhook.timestamp)
        .bind(&webhook.signal_type)
        .bind(webhook.unique_key())
        .bind(webhook.swing)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert active signal")?;

        debug!("Upserted active signal {}", row.unique_key);
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<ActiveTradingSignal>> {
        let row = sqlx::query_as::<_, SignalRow>(&format!(
            "SELECT {} FROM active_trading_signals WHERE id = $1",
            SIGNAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch active signal")?;

        row.map(ActiveTradingSignal::try_from).transpose()
    }

    async fn get_by_key(&self, unique_key: &str) -> Result<Option<ActiveTradingSignal>> {
        let row = sqlx::query_as::<_, SignalRow>(&format!(
            "SELECT {} FROM active_trading_signals WHERE unique_key = $1",
            SIGNAL_COLUMNS
        ))
        .bind(unique_key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch active signal by key")?;

        row.map(ActiveTradingSignal::try_from).transpose()
    }

    async fn query(&self, query: &SignalQuery) -> Result<Vec<ActiveTradingSignal>> {
        let rows = Self::build_query(query)
            .build_query_as::<SignalRow>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query active signals")?;

        into_signals(rows)
    }

    async fn save(&self, signals: &[ActiveTradingSignal]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for signal in signals {
            sqlx::query(
                r#"
                INSERT INTO active_trading_signals
                    (id, symbol, action, price, timestamp, signal_type, unique_key, used, resolved, swing)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE
                SET symbol = EXCLUDED.symbol,
                    action = EXCLUDED.action,
                    price = EXCLUDED.price,
                    timestamp = EXCLUDED.timestamp,
                    signal_type = EXCLUDED.signal_type,
                    unique_key = EXCLUDED.unique_key,
                    used = EXCLUDED.used,
                    resolved = EXCLUDED.resolved,
                    swing = EXCLUDED.swing,
                    updated_at = NOW()
                "#,
            )
            .bind(signal.id)
            .bind(&signal.symbol)
            .bind(signal.action.as_str())
            .bind(signal.price)
            .bind(signal.timestamp)
            .bind(&signal.signal_type)
            .bind(&signal.unique_key)
            .bind(signal.used)
            .bind(signal.resolved)
            .bind(signal.swing)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save signal {}", signal.unique_key))?;
        }

        tx.commit().await.context("Failed to commit signal updates")?;
        Ok(signals.len())
    }

    async fn mark_resolved(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE active_trading_signals
            SET resolved = TRUE, updated_at = NOW()
            WHERE id = ANY($1) AND resolved = FALSE
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .context("Failed to resolve signals")?;

        Ok(result.rows_affected() as usize)
    }

    async fn resolve_loaded(&self, loaded: &[(Uuid, DateTime<Utc>)]) -> Result<usize> {
        if loaded.is_empty() {
            return Ok(0);
        }
        let (ids, timestamps): (Vec<Uuid>, Vec<DateTime<Utc>>) = loaded.iter().copied().unzip();
        let result = sqlx::query(
            r#"
            UPDATE active_trading_signals AS s
            SET resolved = TRUE, updated_at = NOW()
            FROM UNNEST($1::uuid[], $2::timestamptz[]) AS loaded(id, timestamp)
            WHERE s.id = loaded.id
              AND s.timestamp = loaded.timestamp
              AND s.resolved = FALSE
            "#,
        )
        .bind(ids)
        .bind(timestamps)
        .execute(&self.pool)
        .await
        .context("Failed to resolve loaded signals")?;

        Ok(result.rows_affected() as usize)
    }

    async fn apply_rule_changes(&self, signal: &ActiveTradingSignal) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE active_trading_signals
            SET swing = $1,
                resolved = resolved OR $2,
                updated_at = NOW()
            WHERE id = $3 AND timestamp = $4
            "#,
        )
        .bind(signal.swing)
        .bind(signal.resolved)
        .bind(signal.id)
        .bind(signal.timestamp)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to apply rule changes to {}", signal.unique_key))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE active_trading_signals SET used = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark signal used")?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_swing(&self, id: Uuid, swing: Decimal) -> Result<bool> {
        if swing <= Decimal::ZERO {
            bail!("Swing must be greater than 0");
        }
        let result = sqlx::query(
            "UPDATE active_trading_signals SET swing = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(swing)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update swing")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM active_trading_signals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete signal")?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_event(&self, event: &TradingSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_signals (id, symbol, signal_type, action, price, timestamp, message, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.symbol)
        .bind(&event.signal_type)
        .bind(event.action.as_str())
        .bind(event.price)
        .bind(event.timestamp)
        .bind(&event.message)
        .bind(event.status.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to record webhook event")?;

        Ok(())
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE trading_signals SET status = $1 WHERE id = $2")
            .bind(SignalStatus::Processed.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update webhook event status")?;

        Ok(())
    }

    async fn events(&self, limit: usize) -> Result<Vec<TradingSignal>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, symbol, signal_type, action, price, timestamp, message, status
            FROM trading_signals
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch webhook events")?;

        rows.into_iter().map(TradingSignal::try_from).collect()
    }

    async fn stats(&self) -> Result<StorageStats> {
        let signals = self.query(&SignalQuery::new()).await?;
        let (history,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trading_signals")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count webhook events")?;

        Ok(StorageStats::from_signals(&signals, history as usize))
    }
}
