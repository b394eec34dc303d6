use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::debug;

use crate::interaction::{InteractionKind, ResolvedInteraction};
use crate::metrics_consts::INTERACTIONS_WRITTEN;
use crate::store::{InteractionStore, StoreError};

#[derive(Error, Debug)]
#[error("failed to write {kind} interaction for exhibit {exhibit_id} at {occurred_at}: {source}")]
pub struct WriteFailure {
    pub kind: InteractionKind,
    pub exhibit_id: i16,
    pub occurred_at: NaiveDateTime,
    #[source]
    pub source: StoreError,
}

/// Writes resolved interactions, one row and one transaction per record.
pub struct InteractionWriter {
    store: Arc<dyn InteractionStore>,
}

impl InteractionWriter {
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self { store }
    }

    pub async fn write(&self, interaction: &ResolvedInteraction) -> Result<(), WriteFailure> {
        let kind = interaction.kind();

        self.store
            .insert(interaction)
            .await
            .map_err(|source| WriteFailure {
                kind,
                exhibit_id: interaction.exhibit_id(),
                occurred_at: interaction.occurred_at(),
                source,
            })?;

        metrics::counter!(INTERACTIONS_WRITTEN, "kind" => kind.as_str()).increment(1);
        debug!(
            %kind,
            exhibit_id = interaction.exhibit_id(),
            occurred_at = %interaction.occurred_at(),
            "Imported interaction"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::NaiveDate;

    fn rating() -> ResolvedInteraction {
        ResolvedInteraction::Rating {
            occurred_at: NaiveDate::from_ymd_opt(2024, 10, 22)
                .unwrap()
                .and_hms_opt(14, 5, 0)
                .unwrap(),
            exhibit_id: 4,
            rating_id: 2,
        }
    }

    #[tokio::test]
    async fn writes_a_row() {
        let store = Arc::new(MemoryStore::seeded());
        let writer = InteractionWriter::new(store.clone());

        writer.write(&rating()).await.unwrap();

        assert_eq!(store.rows(), vec![rating()]);
    }

    #[tokio::test]
    async fn failure_carries_record_context() {
        let store = Arc::new(MemoryStore::seeded());
        store.fail_writes(true);
        let writer = InteractionWriter::new(store.clone());

        let failure = writer.write(&rating()).await.unwrap_err();

        assert_eq!(failure.kind, InteractionKind::Rating);
        assert_eq!(failure.exhibit_id, 4);
        assert_eq!(failure.occurred_at, rating().occurred_at());
        assert!(failure
            .to_string()
            .starts_with("failed to write rating interaction for exhibit 4 at 2024-10-22 14:05:00"));
        assert!(store.rows().is_empty());
    }
}
