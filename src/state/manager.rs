//! PostgreSQL state manager

use super::{SwapRecord, SwapStats, SwapStore};
use crate::config::DatabaseConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::swap::{HashLock, LegRecord, SwapState};

use alloy_primitives::B256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> ResolverResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> ResolverResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS swaps (
                id UUID PRIMARY KEY,
                state VARCHAR(32) NOT NULL,
                src_chain_id BIGINT NOT NULL,
                dst_chain_id BIGINT NOT NULL,
                order_hash VARCHAR(66),
                hash_lock VARCHAR(66),
                src_leg JSONB NOT NULL,
                dst_leg JSONB NOT NULL,
                halt_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_state
            ON swaps (state)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

fn to_json(leg: &LegRecord) -> ResolverResult<serde_json::Value> {
    serde_json::to_value(leg).map_err(|e| ResolverError::Internal(e.to_string()))
}

fn from_row(row: PgRow) -> ResolverResult<SwapRecord> {
    let leg = |column: &str| -> ResolverResult<LegRecord> {
        serde_json::from_value(row.get::<serde_json::Value, _>(column))
            .map_err(|e| ResolverError::Internal(format!("corrupt {}: {}", column, e)))
    };
    let word = |raw: Option<String>| -> ResolverResult<Option<B256>> {
        raw.map(|s| {
            s.parse::<B256>()
                .map_err(|e| ResolverError::Internal(format!("corrupt hash {}: {}", s, e)))
        })
        .transpose()
    };

    Ok(SwapRecord {
        id: row.get::<Uuid, _>("id"),
        state: row.get::<String, _>("state").parse::<SwapState>()?,
        src_chain_id: row.get::<i64, _>("src_chain_id") as u64,
        dst_chain_id: row.get::<i64, _>("dst_chain_id") as u64,
        order_hash: word(row.get("order_hash"))?,
        hash_lock: word(row.get("hash_lock"))?.map(HashLock::from_b256),
        src: leg("src_leg")?,
        dst: leg("dst_leg")?,
        halt_reason: row.get("halt_reason"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

#[async_trait]
impl SwapStore for StateManager {
    async fn save(&self, record: &SwapRecord) -> ResolverResult<()> {
        sqlx::query(
            r#"
            INSERT INTO swaps
                (id, state, src_chain_id, dst_chain_id, order_hash, hash_lock,
                 src_leg, dst_leg, halt_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id)
            DO UPDATE SET state = $2, order_hash = $5, hash_lock = $6, src_leg = $7,
                          dst_leg = $8, halt_reason = $9, updated_at = $11
            "#,
        )
        .bind(record.id)
        .bind(record.state.as_str())
        .bind(record.src_chain_id as i64)
        .bind(record.dst_chain_id as i64)
        .bind(record.order_hash.map(|h| h.to_string()))
        .bind(record.hash_lock.map(|h| h.value().to_string()))
        .bind(to_json(&record.src)?)
        .bind(to_json(&record.dst)?)
        .bind(record.halt_reason.as_deref())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved swap {} in state {}", record.id, record.state);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> ResolverResult<Option<SwapRecord>> {
        let row = sqlx::query("SELECT * FROM swaps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(from_row).transpose()
    }

    async fn list(&self) -> ResolverResult<Vec<SwapRecord>> {
        let rows = sqlx::query("SELECT * FROM swaps ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn stats(&self) -> ResolverResult<SwapStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state NOT IN ('withdrawn', 'cancelled')) as active,
                COUNT(*) FILTER (WHERE state = 'withdrawn') as withdrawn,
                COUNT(*) FILTER (WHERE state = 'cancelled') as cancelled,
                COUNT(*) FILTER (WHERE halt_reason IS NOT NULL) as halted
            FROM swaps
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SwapStats {
            active: row.get::<i64, _>("active") as u64,
            withdrawn: row.get::<i64, _>("withdrawn") as u64,
            cancelled: row.get::<i64, _>("cancelled") as u64,
            halted: row.get::<i64, _>("halted") as u64,
        })
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
