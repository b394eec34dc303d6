use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::interaction::{classify, Interaction, InteractionKind, ResolvedInteraction};
use crate::record::RawRecord;
use crate::resolver::{DimensionResolver, ResolveError};
use crate::store::{InteractionStore, StoreError};
use crate::validation::{validate, ValidationError};
use crate::writer::{InteractionWriter, WriteFailure};

/// Why a single record did not end up as a row. None of these stop a run.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record rejected: {0}")]
    Rejected(#[from] ValidationError),
    #[error("no {kind} reference row for value {value} (exhibit {exhibit_id} at {occurred_at})")]
    LookupMiss {
        kind: InteractionKind,
        value: i16,
        exhibit_id: i16,
        occurred_at: NaiveDateTime,
    },
    #[error("{kind} reference lookup failed for exhibit {exhibit_id} at {occurred_at}: {source}")]
    LookupFailed {
        kind: InteractionKind,
        exhibit_id: i16,
        occurred_at: NaiveDateTime,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    WriteFailed(#[from] WriteFailure),
}

impl RecordError {
    /// True when the store itself misbehaved, as opposed to the record being unusable.
    pub fn is_store_failure(&self) -> bool {
        match self {
            RecordError::LookupFailed { .. } | RecordError::WriteFailed(_) => true,
            RecordError::Rejected(_) | RecordError::LookupMiss { .. } => false,
        }
    }

    fn from_resolve(error: ResolveError, interaction: &Interaction) -> Self {
        match error {
            ResolveError::LookupMiss { kind, value } => RecordError::LookupMiss {
                kind,
                value,
                exhibit_id: interaction.exhibit_id(),
                occurred_at: interaction.occurred_at(),
            },
            ResolveError::Store { kind, source } => RecordError::LookupFailed {
                kind,
                exhibit_id: interaction.exhibit_id(),
                occurred_at: interaction.occurred_at(),
                source,
            },
        }
    }
}

/// validate -> classify -> resolve -> write, for one record at a time.
pub struct Pipeline {
    resolver: DimensionResolver,
    writer: InteractionWriter,
}

impl Pipeline {
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self {
            resolver: DimensionResolver::new(store.clone()),
            writer: InteractionWriter::new(store),
        }
    }

    pub async fn process(
        &self,
        raw: &RawRecord,
        now: DateTime<Utc>,
    ) -> Result<ResolvedInteraction, RecordError> {
        let record = validate(raw, now)?;
        let interaction = classify(&record);

        let resolved = self
            .resolver
            .resolve(interaction)
            .await
            .map_err(|error| RecordError::from_resolve(error, &interaction))?;

        self.writer.write(&resolved).await?;
        Ok(resolved)
    }
}
