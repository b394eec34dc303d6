use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{InteractionStore, StoreError};
use crate::interaction::{InteractionKind, ResolvedInteraction};

/// In-memory store for tests and dry runs.
///
/// Reference rows are whatever the caller seeds; lookups and writes can be made to fail on
/// demand to exercise error paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    reference: HashMap<(InteractionKind, i16), i16>,
    rows: Vec<ResolvedInteraction>,
    lookups: usize,
    fail_lookups: bool,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the same reference rows the schema migration seeds.
    pub fn seeded() -> Self {
        let store = Self::new()
            .with_reference(InteractionKind::Request, 0, 1)
            .with_reference(InteractionKind::Request, 1, 2);
        (0..=4).fold(store, |store, value| {
            store.with_reference(InteractionKind::Rating, value, value + 1)
        })
    }

    pub fn with_reference(self, kind: InteractionKind, natural_value: i16, id: i16) -> Self {
        self.lock().reference.insert((kind, natural_value), id);
        self
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.lock().fail_lookups = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Every row written so far, in write order.
    pub fn rows(&self) -> Vec<ResolvedInteraction> {
        self.lock().rows.clone()
    }

    /// How many lookups reached the store.
    pub fn lookup_count(&self) -> usize {
        self.lock().lookups
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("poisoned MemoryStore mutex")
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn lookup(
        &self,
        kind: InteractionKind,
        natural_value: i16,
    ) -> Result<Option<i16>, StoreError> {
        let mut inner = self.lock();
        inner.lookups += 1;
        if inner.fail_lookups {
            return Err(StoreError::Unavailable(format!("{kind} lookup refused")));
        }
        Ok(inner.reference.get(&(kind, natural_value)).copied())
    }

    async fn insert(&self, interaction: &ResolvedInteraction) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(StoreError::Unavailable(format!(
                "{} insert refused",
                interaction.kind()
            )));
        }
        inner.rows.push(*interaction);
        Ok(())
    }
}
