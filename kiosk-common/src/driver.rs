use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::health::Liveness;
use crate::interaction::ResolvedInteraction;
use crate::metrics_consts::{
    EMPTY_POLLS, LOOKUP_MISSES, MALFORMED_PAYLOADS, RECORDS_RECEIVED, RECORDS_REJECTED,
    SOURCE_TRANSPORT_ERRORS, STORE_FAILURES, STORE_UNAVAILABLE,
};
use crate::pipeline::{Pipeline, RecordError};
use crate::record::RawRecord;
use crate::source::{RecordSource, SourceError, SourceRecord};
use crate::store::InteractionStore;
use crate::writer::WriteFailure;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Per-outcome record counts for one batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub written: usize,
    pub rejected: usize,
    pub lookup_misses: usize,
    pub store_failures: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &Result<ResolvedInteraction, RecordError>) {
        self.received += 1;
        match outcome {
            Ok(_) => self.written += 1,
            Err(RecordError::Rejected(_)) => self.rejected += 1,
            Err(RecordError::LookupMiss { .. }) => self.lookup_misses += 1,
            Err(RecordError::LookupFailed { .. } | RecordError::WriteFailed(_)) => {
                self.store_failures += 1
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreakChange {
    Unchanged,
    Escalated,
    Recovered,
}

/// Counts consecutive records the store failed on. Records that never reached the store
/// (rejections) leave the streak alone; any answer from the store, including a miss,
/// ends it. A threshold of 0 disables escalation.
struct StoreFailureStreak {
    threshold: u32,
    consecutive: u32,
    escalated: bool,
}

impl StoreFailureStreak {
    fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
            escalated: false,
        }
    }

    fn failure(&mut self) -> StreakChange {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.threshold > 0 && !self.escalated && self.consecutive >= self.threshold {
            self.escalated = true;
            return StreakChange::Escalated;
        }
        StreakChange::Unchanged
    }

    fn success(&mut self) -> StreakChange {
        self.consecutive = 0;
        if self.escalated {
            self.escalated = false;
            return StreakChange::Recovered;
        }
        StreakChange::Unchanged
    }
}

/// Drives records from a batch or a stream through the pipeline, one at a time and in
/// source order. Every per-record failure is logged and dropped; nothing a single record
/// does can end a run.
pub struct IngestionDriver {
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    store_failures: StoreFailureStreak,
    liveness: Option<Liveness>,
}

impl IngestionDriver {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        clock: Arc<dyn Clock>,
        max_consecutive_store_failures: u32,
    ) -> Self {
        Self {
            pipeline: Pipeline::new(store),
            clock,
            store_failures: StoreFailureStreak::new(max_consecutive_store_failures),
            liveness: None,
        }
    }

    /// Report loop progress here, and mark it unhealthy while the store is unavailable.
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Whether the consecutive store failure threshold has been reached and not yet cleared.
    pub fn store_unavailable(&self) -> bool {
        self.store_failures.escalated
    }

    /// Run a single record through the pipeline and log the outcome.
    pub async fn ingest(&mut self, raw: &RawRecord) -> Result<ResolvedInteraction, RecordError> {
        metrics::counter!(RECORDS_RECEIVED).increment(1);

        let outcome = self.pipeline.process(raw, self.clock.now()).await;
        self.report(raw, &outcome);
        outcome
    }

    /// Ingest a finite sequence in order, stopping after `limit` records if one is given.
    pub async fn run_batch<I>(&mut self, records: I, limit: Option<usize>) -> BatchSummary
    where
        I: IntoIterator<Item = RawRecord>,
    {
        info!(?limit, "Starting import of kiosk data");
        let mut summary = BatchSummary::default();

        for raw in records.into_iter().take(limit.unwrap_or(usize::MAX)) {
            let outcome = self.ingest(&raw).await;
            summary.record(&outcome);
        }

        info!(
            received = summary.received,
            written = summary.written,
            rejected = summary.rejected,
            lookup_misses = summary.lookup_misses,
            store_failures = summary.store_failures,
            "Finished importing kiosk data"
        );
        summary
    }

    /// Poll `source` until `shutdown` is cancelled. A cancellation only interrupts the wait
    /// for the next record, never a record already being written.
    pub async fn run_stream<S>(
        &mut self,
        source: &S,
        poll_timeout: Duration,
        shutdown: CancellationToken,
    ) where
        S: RecordSource + ?Sized,
    {
        info!("Starting stream ingestion");

        while !shutdown.is_cancelled() {
            if let Some(liveness) = &self.liveness {
                liveness.report_healthy();
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = source.poll(poll_timeout) => polled,
            };

            self.handle_poll(polled).await;
        }

        info!("Stream ingestion stopped");
    }

    async fn handle_poll(&mut self, polled: Result<Option<SourceRecord>, SourceError>) {
        match polled {
            Ok(Some(SourceRecord { topic, record })) => {
                debug!(%topic, at = %record.timestamp_hint(), "Consumed event");
                // Logged and counted by `ingest`.
                drop(self.ingest(&record).await);
            }
            Ok(None) => {
                metrics::counter!(EMPTY_POLLS).increment(1);
                trace!("Waiting...");
            }
            Err(SourceError::Transport(error)) => {
                metrics::counter!(SOURCE_TRANSPORT_ERRORS).increment(1);
                error!(%error, "Record source error, treating as an empty poll");
            }
            Err(malformed @ SourceError::Malformed { .. }) => {
                metrics::counter!(MALFORMED_PAYLOADS).increment(1);
                warn!(error = %malformed, "Dropping malformed payload");
            }
        }
    }

    fn report(&mut self, raw: &RawRecord, outcome: &Result<ResolvedInteraction, RecordError>) {
        let change = match outcome {
            Ok(_) => self.store_failures.success(),
            Err(RecordError::Rejected(reason)) => {
                metrics::counter!(RECORDS_REJECTED, "reason" => reason.label()).increment(1);
                warn!(%reason, at = %raw.timestamp_hint(), "Invalid record");
                StreakChange::Unchanged
            }
            Err(RecordError::LookupMiss {
                kind,
                value,
                exhibit_id,
                occurred_at,
            }) => {
                metrics::counter!(LOOKUP_MISSES, "kind" => kind.as_str()).increment(1);
                error!(
                    %kind,
                    value,
                    exhibit_id,
                    %occurred_at,
                    "No reference row for value, record skipped"
                );
                self.store_failures.success()
            }
            Err(RecordError::LookupFailed {
                kind,
                exhibit_id,
                occurred_at,
                source,
            }) => {
                metrics::counter!(STORE_FAILURES, "stage" => "lookup").increment(1);
                error!(
                    %kind,
                    exhibit_id,
                    %occurred_at,
                    error = %source,
                    "Reference lookup failed, record skipped"
                );
                self.store_failures.failure()
            }
            Err(RecordError::WriteFailed(WriteFailure {
                kind,
                exhibit_id,
                occurred_at,
                source,
            })) => {
                metrics::counter!(STORE_FAILURES, "stage" => "write").increment(1);
                error!(
                    %kind,
                    exhibit_id,
                    %occurred_at,
                    error = %source,
                    "Failed to write interaction, record skipped"
                );
                self.store_failures.failure()
            }
        };

        match change {
            StreakChange::Unchanged => {}
            StreakChange::Escalated => {
                metrics::gauge!(STORE_UNAVAILABLE).set(1.0);
                error!(
                    consecutive_failures = self.store_failures.consecutive,
                    "Store appears unavailable, records are being dropped"
                );
                if let Some(liveness) = &self.liveness {
                    liveness.report_unhealthy();
                }
            }
            StreakChange::Recovered => {
                metrics::gauge!(STORE_UNAVAILABLE).set(0.0);
                info!("Store recovered");
                if let Some(liveness) = &self.liveness {
                    liveness.report_recovered();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::interaction::InteractionKind;
    use crate::store::memory::MemoryStore;
    use crate::validation::ValidationError;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 10, 23, 12, 0, 0).unwrap()))
    }

    fn raw(value: serde_json::Value) -> RawRecord {
        RawRecord::try_from(value).unwrap()
    }

    fn rating(site: &str, val: i64) -> RawRecord {
        raw(json!({"at": "2024-10-22T10:00:00", "site": site, "val": val}))
    }

    /// Hands out a fixed script of poll results, then cancels the run.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Option<SourceRecord>, SourceError>>>,
        shutdown: CancellationToken,
    }

    impl ScriptedSource {
        fn new(
            script: Vec<Result<Option<SourceRecord>, SourceError>>,
            shutdown: CancellationToken,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                shutdown,
            }
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn poll(&self, _timeout: Duration) -> Result<Option<SourceRecord>, SourceError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    self.shutdown.cancel();
                    Ok(None)
                }
            }
        }
    }

    fn message(record: RawRecord) -> Result<Option<SourceRecord>, SourceError> {
        Ok(Some(SourceRecord {
            topic: "lmnh".to_owned(),
            record,
        }))
    }

    #[tokio::test]
    async fn end_to_end_scenarios() {
        let store = Arc::new(MemoryStore::seeded());
        let mut driver = IngestionDriver::new(store.clone(), clock(), 10);

        let accepted = driver.ingest(&rating("2", 1)).await.unwrap();
        assert_eq!(
            accepted,
            ResolvedInteraction::Rating {
                occurred_at: accepted.occurred_at(),
                exhibit_id: 3,
                rating_id: 2,
            }
        );

        let accepted = driver
            .ingest(&raw(json!({"at": "2024-10-22T10:00:00", "site": "2", "val": -1, "type": 0})))
            .await
            .unwrap();
        assert_eq!(accepted.kind(), InteractionKind::Request);
        assert_eq!(accepted.exhibit_id(), 3);
        assert_eq!(accepted.reference_id(), 1);

        let rejections = [
            (rating("6", 1), "site out of range"),
            (
                raw(json!({"at": "2024-10-22T19:00:00", "site": "2", "val": 1})),
                "outside operating hours",
            ),
            (raw(json!({"site": "2", "val": 1})), "timestamp missing"),
        ];
        for (record, reason) in rejections {
            match driver.ingest(&record).await {
                Err(RecordError::Rejected(error)) => assert_eq!(error.to_string(), reason),
                other => panic!("expected a rejection, got {other:?}"),
            }
        }

        assert_eq!(store.rows().len(), 2);
    }

    #[tokio::test]
    async fn batch_respects_limit_and_order() {
        let store = Arc::new(MemoryStore::seeded());
        let mut driver = IngestionDriver::new(store.clone(), clock(), 10);

        let records = vec![rating("0", 0), rating("1", 1), rating("2", 2), rating("3", 3)];
        let summary = driver.run_batch(records, Some(3)).await;

        assert_eq!(
            summary,
            BatchSummary {
                received: 3,
                written: 3,
                ..Default::default()
            }
        );
        let exhibits: Vec<i16> = store.rows().iter().map(|row| row.exhibit_id()).collect();
        assert_eq!(exhibits, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn batch_continues_past_every_failure() {
        let store = Arc::new(
            MemoryStore::new()
                .with_reference(InteractionKind::Rating, 1, 2)
                .with_reference(InteractionKind::Rating, 2, 3),
        );
        let mut driver = IngestionDriver::new(store.clone(), clock(), 10);

        let records = vec![
            rating("0", 1),
            rating("7", 1),
            rating("0", 4),
            raw(json!({"at": "not a time", "site": "0", "val": 1})),
            rating("5", 2),
        ];
        let summary = driver.run_batch(records, None).await;

        assert_eq!(
            summary,
            BatchSummary {
                received: 5,
                written: 2,
                rejected: 2,
                lookup_misses: 1,
                store_failures: 0,
            }
        );
        let exhibits: Vec<i16> = store.rows().iter().map(|row| row.exhibit_id()).collect();
        assert_eq!(exhibits, vec![1, 6]);
    }

    #[tokio::test]
    async fn escalates_after_consecutive_store_failures_and_recovers() {
        let store = Arc::new(MemoryStore::seeded());
        let liveness = Liveness::new("ingest", Duration::from_secs(30));
        liveness.report_healthy();
        let mut driver =
            IngestionDriver::new(store.clone(), clock(), 3).with_liveness(liveness.clone());

        store.fail_writes(true);
        for _ in 0..2 {
            assert!(driver.ingest(&rating("1", 1)).await.is_err());
        }
        // Rejections never reach the store and leave the streak alone.
        assert!(matches!(
            driver.ingest(&rating("9", 1)).await,
            Err(RecordError::Rejected(ValidationError::SiteOutOfRange))
        ));
        assert!(!driver.store_unavailable());
        assert!(liveness.get_status().healthy);

        assert!(driver.ingest(&rating("1", 1)).await.is_err());
        assert!(driver.store_unavailable());
        assert!(!liveness.get_status().healthy);

        store.fail_writes(false);
        driver.ingest(&rating("1", 1)).await.unwrap();
        assert!(!driver.store_unavailable());
        assert!(liveness.get_status().healthy);
        assert_eq!(store.rows().len(), 1);
    }

    /// Keeps the fields of every event, rendered as strings.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<BTreeMap<String, String>>>>);

    struct FieldVisitor<'a>(&'a mut BTreeMap<String, String>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name().to_owned(), format!("{value:?}"));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = BTreeMap::new();
            event.record(&mut FieldVisitor(&mut fields));
            self.0.lock().unwrap().push(fields);
        }
    }

    #[tokio::test]
    async fn store_failures_are_logged_with_record_context() {
        let events = CapturedEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let store = Arc::new(MemoryStore::seeded());
        let mut driver = IngestionDriver::new(store.clone(), clock(), 10);

        store.fail_lookups(true);
        assert!(driver.ingest(&rating("2", 3)).await.is_err());
        store.fail_lookups(false);
        store.fail_writes(true);
        let request = raw(json!({"at": "2024-10-22T11:30:00", "site": "4", "val": -1, "type": 1}));
        assert!(driver.ingest(&request).await.is_err());

        let failures: Vec<BTreeMap<String, String>> = events
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|fields| fields.contains_key("error"))
            .cloned()
            .collect();
        assert_eq!(failures.len(), 2);

        assert_eq!(failures[0]["kind"], "rating");
        assert_eq!(failures[0]["exhibit_id"], "3");
        assert_eq!(failures[0]["occurred_at"], "2024-10-22 10:00:00");

        assert_eq!(failures[1]["kind"], "request");
        assert_eq!(failures[1]["exhibit_id"], "5");
        assert_eq!(failures[1]["occurred_at"], "2024-10-22 11:30:00");
    }

    #[tokio::test]
    async fn lookup_miss_ends_a_failure_streak() {
        let store = Arc::new(MemoryStore::new().with_reference(InteractionKind::Rating, 1, 2));
        let mut driver = IngestionDriver::new(store.clone(), clock(), 2);

        store.fail_lookups(true);
        assert!(driver.ingest(&rating("1", 1)).await.is_err());
        store.fail_lookups(false);
        assert!(matches!(
            driver.ingest(&rating("1", 3)).await,
            Err(RecordError::LookupMiss { .. })
        ));
        store.fail_lookups(true);
        assert!(driver.ingest(&rating("1", 1)).await.is_err());

        assert!(!driver.store_unavailable());
    }

    #[tokio::test]
    async fn stream_survives_empty_polls_and_source_errors() {
        let store = Arc::new(MemoryStore::seeded());
        let shutdown = CancellationToken::new();
        let source = ScriptedSource::new(
            vec![
                message(rating("0", 4)),
                Ok(None),
                Err(SourceError::Transport("broker down".to_owned())),
                Err(SourceError::Malformed {
                    topic: "lmnh".to_owned(),
                    reason: "not a JSON object".to_owned(),
                }),
                message(rating("8", 1)),
                message(raw(json!({"at": "2024-10-22T17:59:59", "site": "4", "val": -1, "type": 1}))),
            ],
            shutdown.clone(),
        );
        let liveness = Liveness::new("ingest", Duration::from_secs(30));
        let mut driver = IngestionDriver::new(store.clone(), clock(), 10).with_liveness(liveness.clone());

        driver
            .run_stream(&source, Duration::from_millis(10), shutdown.clone())
            .await;

        assert!(shutdown.is_cancelled());
        assert!(liveness.get_status().healthy);
        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind(), InteractionKind::Rating);
        assert_eq!(rows[0].reference_id(), 5);
        assert_eq!(rows[1].kind(), InteractionKind::Request);
        assert_eq!(rows[1].exhibit_id(), 5);
    }

    #[tokio::test]
    async fn stream_stops_immediately_when_already_cancelled() {
        let store = Arc::new(MemoryStore::seeded());
        let shutdown = CancellationToken::new();
        let source = ScriptedSource::new(vec![message(rating("0", 1))], shutdown.clone());
        shutdown.cancel();

        let mut driver = IngestionDriver::new(store.clone(), clock(), 10);
        driver
            .run_stream(&source, Duration::from_millis(10), shutdown)
            .await;

        assert!(store.rows().is_empty());
    }

    #[test]
    fn streak_escalates_once_and_recovers() {
        let mut streak = StoreFailureStreak::new(3);

        assert_eq!(streak.failure(), StreakChange::Unchanged);
        assert_eq!(streak.failure(), StreakChange::Unchanged);
        assert_eq!(streak.failure(), StreakChange::Escalated);
        assert_eq!(streak.failure(), StreakChange::Unchanged);
        assert!(streak.escalated);

        assert_eq!(streak.success(), StreakChange::Recovered);
        assert_eq!(streak.success(), StreakChange::Unchanged);
        assert_eq!(streak.consecutive, 0);
    }

    #[test]
    fn streak_resets_on_success() {
        let mut streak = StoreFailureStreak::new(2);

        assert_eq!(streak.failure(), StreakChange::Unchanged);
        assert_eq!(streak.success(), StreakChange::Unchanged);
        assert_eq!(streak.failure(), StreakChange::Unchanged);
        assert!(!streak.escalated);
    }

    #[test]
    fn zero_threshold_never_escalates() {
        let mut streak = StoreFailureStreak::new(0);
        for _ in 0..100 {
            assert_eq!(streak.failure(), StreakChange::Unchanged);
        }
    }
}
