use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{InteractionStore, StoreError};
use crate::config::DatabaseConfig;
use crate::interaction::{InteractionKind, ResolvedInteraction};

/// Drops, recreates and reseeds every kiosk table.
const SCHEMA: &str = include_str!("../../../migrations/20241022000000_kiosk_schema.sql");

/// An `InteractionStore` backed by PostgreSQL.
pub struct PgStore {
    pool: PgPool,
}

pub type PgStoreResult<T> = std::result::Result<T, StoreError>;

impl PgStore {
    pub async fn new(config: &DatabaseConfig) -> PgStoreResult<Self> {
        info!("Connecting to the database");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .connect(&config.database_url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;
        info!("Database connection established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Recreate the schema from scratch, discarding every stored interaction and
    /// reseeding the reference tables.
    pub async fn reset_schema(&self) -> PgStoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "RESET".to_owned(),
                error,
            })?;

        info!("Database reset");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl InteractionStore for PgStore {
    async fn lookup(
        &self,
        kind: InteractionKind,
        natural_value: i16,
    ) -> PgStoreResult<Option<i16>> {
        // Identifiers come from `InteractionKind`, never from input.
        let query = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            kind.reference_id_column(),
            kind.reference_table(),
            kind.natural_key_column(),
        );

        let id = sqlx::query_scalar::<_, i16>(&query)
            .bind(natural_value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        debug!(%kind, natural_value, ?id, "reference lookup");
        Ok(id)
    }

    async fn insert(&self, interaction: &ResolvedInteraction) -> PgStoreResult<()> {
        let kind = interaction.kind();
        let query = format!(
            "INSERT INTO {} (exhibition_id, {}, event_at) VALUES ($1, $2, $3)",
            kind.interaction_table(),
            kind.reference_id_column(),
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::QueryError {
                command: "BEGIN".to_owned(),
                error,
            })?;

        // An early return drops `tx`, which rolls the row back.
        sqlx::query(&query)
            .bind(interaction.exhibit_id())
            .bind(interaction.reference_id())
            .bind(interaction.occurred_at())
            .execute(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        tx.commit().await.map_err(|error| StoreError::QueryError {
            command: "COMMIT".to_owned(),
            error,
        })?;

        Ok(())
    }
}
