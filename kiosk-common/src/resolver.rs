use std::sync::Arc;

use quick_cache::sync::Cache;
use thiserror::Error;

use crate::interaction::{Interaction, InteractionKind, ResolvedInteraction};
use crate::metrics_consts::REFERENCE_CACHE;
use crate::store::{InteractionStore, StoreError};

// Reference tables hold a handful of rows; this comfortably fits all of them.
const REFERENCE_CACHE_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no {kind} reference row for value {value}")]
    LookupMiss { kind: InteractionKind, value: i16 },
    #[error("{kind} reference lookup failed: {source}")]
    Store {
        kind: InteractionKind,
        #[source]
        source: StoreError,
    },
}

/// Translates natural reference values (request types, rating values) into the surrogate
/// ids the interaction tables point at.
///
/// Found ids are cached for the resolver's lifetime: reference tables are seeded before a
/// run and never written during one. Misses are not cached.
pub struct DimensionResolver {
    store: Arc<dyn InteractionStore>,
    cache: Cache<(InteractionKind, i16), i16>,
}

impl DimensionResolver {
    pub fn new(store: Arc<dyn InteractionStore>) -> Self {
        Self {
            store,
            cache: Cache::new(REFERENCE_CACHE_CAPACITY),
        }
    }

    pub async fn resolve_request(&self, request_type: i16) -> Result<i16, ResolveError> {
        self.lookup(InteractionKind::Request, request_type).await
    }

    pub async fn resolve_rating(&self, rating_value: i16) -> Result<i16, ResolveError> {
        self.lookup(InteractionKind::Rating, rating_value).await
    }

    pub async fn resolve(&self, interaction: Interaction) -> Result<ResolvedInteraction, ResolveError> {
        match interaction {
            Interaction::Request {
                occurred_at,
                exhibit_id,
                request_type,
            } => Ok(ResolvedInteraction::Request {
                occurred_at,
                exhibit_id,
                request_id: self.resolve_request(request_type).await?,
            }),
            Interaction::Rating {
                occurred_at,
                exhibit_id,
                rating_value,
            } => Ok(ResolvedInteraction::Rating {
                occurred_at,
                exhibit_id,
                rating_id: self.resolve_rating(rating_value).await?,
            }),
        }
    }

    async fn lookup(&self, kind: InteractionKind, value: i16) -> Result<i16, ResolveError> {
        if let Some(id) = self.cache.get(&(kind, value)) {
            metrics::counter!(REFERENCE_CACHE, "action" => "hit").increment(1);
            return Ok(id);
        }

        match self.store.lookup(kind, value).await {
            Ok(Some(id)) => {
                metrics::counter!(REFERENCE_CACHE, "action" => "miss").increment(1);
                self.cache.insert((kind, value), id);
                Ok(id)
            }
            Ok(None) => Err(ResolveError::LookupMiss { kind, value }),
            Err(source) => Err(ResolveError::Store { kind, source }),
        }
    }
}
