use async_trait::async_trait;
use thiserror::Error;

use crate::interaction::{InteractionKind, ResolvedInteraction};

pub mod memory;
pub mod postgres;

/// Enumeration of errors for operations against the interaction store.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: String,
        error: sqlx::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The relational store kiosk interactions land in: small reference tables to resolve
/// against, and one interaction table per kind.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Find the surrogate id of the reference row for `kind` whose natural value is
    /// `natural_value`. `Ok(None)` means no such row.
    async fn lookup(
        &self,
        kind: InteractionKind,
        natural_value: i16,
    ) -> Result<Option<i16>, StoreError>;

    /// Persist a single interaction row. The row is either committed or not written at all.
    async fn insert(&self, interaction: &ResolvedInteraction) -> Result<(), StoreError>;
}
