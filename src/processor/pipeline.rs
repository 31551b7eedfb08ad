use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::{DocumentId, LocationInsertError, LocationStore, ProcessedEventStore, RawEventStore};
use crate::feed::{AlertFeed, FeedError};
use crate::models::RawAlertEvent;
use crate::processor::ledger::SessionLedger;

/// What one event contributed to the three collections.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub raw_id: Option<DocumentId>,
    pub processed_id: Option<DocumentId>,
    pub location_ids: Vec<DocumentId>,
    pub failures: usize,
}

/// Summary of one `run_once`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub raw_ids: Vec<DocumentId>,
    pub processed_ids: Vec<DocumentId>,
    pub location_ids: Vec<DocumentId>,
    pub failures: usize,
}

impl BatchReport {
    fn absorb(&mut self, outcome: EventOutcome) {
        self.raw_ids.extend(outcome.raw_id);
        self.processed_ids.extend(outcome.processed_id);
        self.location_ids.extend(outcome.location_ids);
        self.failures += outcome.failures;
    }

    pub fn wrote_anything(&self) -> bool {
        !(self.raw_ids.is_empty() && self.processed_ids.is_empty() && self.location_ids.is_empty())
    }
}

/// Fetches alert batches and fans each event out to the raw, parsed and
/// location collections.
///
/// Only feed failures escape `run_once`. A failing write or geocode affects
/// that one write; the rest of the event and the rest of the batch still go
/// through.
pub struct IngestionPipeline {
    feed: Arc<dyn AlertFeed>,
    raw: Arc<dyn RawEventStore>,
    processed: Arc<dyn ProcessedEventStore>,
    locations: Arc<dyn LocationStore>,
    ledger: SessionLedger,
}

impl IngestionPipeline {
    pub fn new(
        feed: Arc<dyn AlertFeed>,
        raw: Arc<dyn RawEventStore>,
        processed: Arc<dyn ProcessedEventStore>,
        locations: Arc<dyn LocationStore>,
        ledger: SessionLedger,
    ) -> Self {
        Self {
            feed,
            raw,
            processed,
            locations,
            ledger,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<RawAlertEvent>, FeedError> {
        self.feed.fetch_latest().await
    }

    /// One full cycle: fetch, then ingest whatever came back.
    pub async fn run_once(&self) -> Result<BatchReport, FeedError> {
        let batch = self.fetch().await?;
        Ok(self.ingest(batch).await)
    }

    /// Writes a fetched batch, in feed order.
    pub async fn ingest(&self, batch: Vec<RawAlertEvent>) -> BatchReport {
        let mut report = BatchReport {
            fetched: batch.len(),
            ..Default::default()
        };
        for event in &batch {
            let outcome = self.ingest_event(event).await;
            report.absorb(outcome);
        }
        report
    }

    pub async fn ingest_event(&self, event: &RawAlertEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        let id = &event.notification_id;

        // The parsed view is only written once the raw event is known to be stored.
        let raw_stored = match self.raw.insert_if_absent(event).await {
            Ok(Some(doc_id)) => {
                self.ledger.record(id.clone());
                info!("Added notification {} to raw alerts. id: {}", id, doc_id);
                outcome.raw_id = Some(doc_id);
                true
            }
            Ok(None) => true,
            Err(e) => {
                error!("Failed to store raw notification {}: {}", id, e);
                outcome.failures += 1;
                false
            }
        };

        if raw_stored {
            match self.processed.insert_from_raw(event).await {
                Ok(Some(doc_id)) => {
                    info!("Added notification {} to parsed alerts. id: {}", id, doc_id);
                    outcome.processed_id = Some(doc_id);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to store parsed notification {}: {}", id, e);
                    outcome.failures += 1;
                }
            }
        }

        for city in &event.cities {
            match self.locations.insert_if_absent(city).await {
                Ok(Some(doc_id)) => {
                    info!("Added location {} for notification {}. id: {}", city, id, doc_id);
                    outcome.location_ids.push(doc_id);
                }
                Ok(None) => {}
                // Not written, so it is tried again next time the city shows up.
                Err(LocationInsertError::Geocoding(e)) => {
                    warn!("Skipping location {} for notification {}: {}", city, id, e);
                    outcome.failures += 1;
                }
                Err(LocationInsertError::Store(e)) => {
                    error!("Failed to store location {} for notification {}: {}", city, id, e);
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }

    /// Ids newly written to the raw collection by this process, oldest first.
    pub fn session_ids(&self) -> Vec<String> {
        self.ledger.snapshot()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::{
        LocationsCollection, MemoryDocumentStore, ParsedAlertsCollection, RawAlertsCollection,
    };
    use crate::geo::testing::no_wait_policy;
    use crate::geo::{GeoLocator, Geocoder};
    use crate::processor::enricher::testing::FixedProvenance;
    use crate::processor::enricher::EventEnricher;

    pub fn event(id: &str, threat_code: i64, cities: &[&str]) -> RawAlertEvent {
        RawAlertEvent {
            notification_id: id.to_string(),
            occurred_at_unix: 1700000000,
            threat_code,
            is_drill: false,
            cities: cities.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub struct Harness {
        pub store: Arc<MemoryDocumentStore>,
        pub raw: Arc<RawAlertsCollection>,
        pub parsed: Arc<ParsedAlertsCollection>,
        pub locations: Arc<LocationsCollection>,
    }

    impl Harness {
        pub async fn new(geocoder: Arc<dyn Geocoder>) -> Self {
            let store = Arc::new(MemoryDocumentStore::new());
            let enricher = Arc::new(
                EventEnricher::new(chrono_tz::Asia::Jerusalem)
                    .with_provenance(FixedProvenance::listener()),
            );
            let locator = Arc::new(GeoLocator::new(geocoder, no_wait_policy(3)));
            Self {
                raw: Arc::new(
                    RawAlertsCollection::open(store.clone(), "raw_alerts")
                        .await
                        .unwrap(),
                ),
                parsed: Arc::new(
                    ParsedAlertsCollection::open(store.clone(), "parsed_alerts", enricher)
                        .await
                        .unwrap(),
                ),
                locations: Arc::new(
                    LocationsCollection::open(store.clone(), "locations", locator)
                        .await
                        .unwrap(),
                ),
                store,
            }
        }

        pub fn pipeline(&self, feed: Arc<dyn AlertFeed>) -> IngestionPipeline {
            IngestionPipeline::new(
                feed,
                self.raw.clone(),
                self.parsed.clone(),
                self.locations.clone(),
                SessionLedger::with_capacity(100),
            )
        }

        pub fn counts(&self) -> (usize, usize, usize) {
            (
                self.store.count("raw_alerts"),
                self.store.count("parsed_alerts"),
                self.store.count("locations"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::{StoreError, StoreResult};
    use crate::feed::testing::ScriptedFeed;
    use crate::geo::testing::FakeGeocoder;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn end_to_end_single_event() {
        let geocoder = Arc::new(FakeGeocoder::default().with_place("Haifa", 32.794, 34.9896));
        let harness = Harness::new(geocoder.clone()).await;
        let feed = Arc::new(ScriptedFeed::new().then_batch(vec![event("A1", 0, &["Haifa", "Haifa"])]));
        let pipeline = harness.pipeline(feed);

        let report = pipeline.run_once().await.unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.raw_ids.len(), 1);
        assert_eq!(report.processed_ids.len(), 1);
        assert_eq!(report.location_ids.len(), 1);
        assert_eq!(report.failures, 0);
        assert_eq!(harness.counts(), (1, 1, 1));

        let saved = harness.parsed.find_by_id("A1").await.unwrap().unwrap();
        assert_eq!(saved.processed_notification.threat_name, "ROCKET");
        assert_eq!(geocoder.calls(), 1);
        assert_eq!(pipeline.session_ids(), vec!["A1"]);
    }

    #[tokio::test]
    async fn same_event_twice_is_idempotent() {
        let harness = Harness::new(Arc::new(FakeGeocoder::default())).await;
        let a1 = event("A1", 0, &["Haifa", "Akko"]);
        let feed = Arc::new(
            ScriptedFeed::new()
                .then_batch(vec![a1.clone()])
                .then_batch(vec![a1.clone(), a1]),
        );
        let pipeline = harness.pipeline(feed);

        let first = pipeline.run_once().await.unwrap();
        let second = pipeline.run_once().await.unwrap();

        assert!(first.wrote_anything());
        assert!(!second.wrote_anything());
        assert_eq!(second.fetched, 2);
        assert_eq!(harness.counts(), (1, 1, 2));
        assert_eq!(pipeline.session_ids(), vec!["A1"]);
    }

    #[tokio::test]
    async fn ledger_follows_feed_order() {
        let harness = Harness::new(Arc::new(FakeGeocoder::default())).await;
        let feed = Arc::new(ScriptedFeed::new().then_batch(vec![
            event("e1", 0, &[]),
            event("e2", 5, &[]),
            event("e3", 99, &[]),
        ]));
        let pipeline = harness.pipeline(feed);

        pipeline.run_once().await.unwrap();

        assert_eq!(pipeline.session_ids(), vec!["e1", "e2", "e3"]);
        let names: Vec<String> = harness
            .parsed
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.processed_notification.threat_name)
            .collect();
        assert_eq!(names, vec!["ROCKET", "UAV", "UNKNOWN"]);
    }

    #[tokio::test]
    async fn cities_are_geocoded_in_listed_order() {
        let geocoder = Arc::new(FakeGeocoder::default());
        let harness = Harness::new(geocoder.clone()).await;
        let feed = Arc::new(ScriptedFeed::new().then_batch(vec![
            event("e1", 0, &["Sderot", "Netivot"]),
            event("e2", 0, &["Ofakim", "Sderot"]),
        ]));
        harness.pipeline(feed).run_once().await.unwrap();

        let queried = geocoder.queried.lock().unwrap().clone();
        assert_eq!(queried, vec!["Sderot", "Netivot", "Ofakim"]);
    }

    #[tokio::test]
    async fn fetch_failure_writes_nothing_and_next_cycle_recovers() {
        let harness = Harness::new(Arc::new(FakeGeocoder::default())).await;
        let feed = Arc::new(
            ScriptedFeed::new()
                .then_failure(502)
                .then_batch(vec![event("A1", 0, &["Haifa"])]),
        );
        let pipeline = harness.pipeline(feed);

        let failed = pipeline.run_once().await;
        assert!(matches!(failed, Err(FeedError::Status(502))));
        assert_eq!(harness.counts(), (0, 0, 0));

        pipeline.run_once().await.unwrap();
        assert_eq!(harness.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let harness = Harness::new(Arc::new(FakeGeocoder::default())).await;
        let pipeline = harness.pipeline(Arc::new(ScriptedFeed::new()));

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(harness.counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn geocoding_failure_is_isolated_to_its_city() {
        let geocoder = Arc::new(FakeGeocoder::default().failing_for("Sderot"));
        let harness = Harness::new(geocoder).await;
        let feed = Arc::new(ScriptedFeed::new().then_batch(vec![
            event("e1", 0, &["Sderot", "Netivot"]),
            event("e2", 5, &["Ofakim"]),
        ]));
        let pipeline = harness.pipeline(feed);

        let report = pipeline.run_once().await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.raw_ids.len(), 2);
        assert_eq!(report.processed_ids.len(), 2);
        assert_eq!(harness.counts(), (2, 2, 2));
        assert!(harness.locations.find_by_name("Sderot").await.unwrap().is_none());
        assert!(harness.locations.find_by_name("Netivot").await.unwrap().is_some());
    }

    /// Raw store whose writes fail for one id.
    struct FlakyRawStore {
        inner: Arc<dyn RawEventStore>,
        broken_id: &'static str,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl RawEventStore for FlakyRawStore {
        async fn find_by_id(&self, id: &str) -> StoreResult<Option<RawAlertEvent>> {
            self.inner.find_by_id(id).await
        }

        async fn insert_if_absent(&self, event: &RawAlertEvent) -> StoreResult<Option<DocumentId>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if event.notification_id == self.broken_id {
                return Err(StoreError::InvalidIdentifier("simulated outage".to_string()));
            }
            self.inner.insert_if_absent(event).await
        }

        async fn find_by_city(&self, city: &str) -> StoreResult<Vec<RawAlertEvent>> {
            self.inner.find_by_city(city).await
        }

        async fn find_by_time_range(&self, start: i64, end: i64) -> StoreResult<Vec<RawAlertEvent>> {
            self.inner.find_by_time_range(start, end).await
        }

        async fn list_all(&self) -> StoreResult<Vec<RawAlertEvent>> {
            self.inner.list_all().await
        }

        async fn update(&self, id: &str, patch: Value) -> StoreResult<u64> {
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: &str) -> StoreResult<u64> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn raw_store_failure_skips_parsed_view_but_not_siblings() {
        let harness = Harness::new(Arc::new(FakeGeocoder::default())).await;
        let raw = Arc::new(FlakyRawStore {
            inner: harness.raw.clone(),
            broken_id: "bad",
            attempts: AtomicU32::new(0),
        });
        let feed = Arc::new(ScriptedFeed::new().then_batch(vec![
            event("bad", 0, &["Haifa"]),
            event("good", 0, &["Akko"]),
        ]));
        let pipeline = IngestionPipeline::new(
            feed,
            raw.clone(),
            harness.parsed.clone(),
            harness.locations.clone(),
            SessionLedger::with_capacity(10),
        );

        let report = pipeline.run_once().await.unwrap();

        assert_eq!(raw.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(report.failures, 1);
        assert!(harness.parsed.find_by_id("bad").await.unwrap().is_none());
        assert!(harness.parsed.find_by_id("good").await.unwrap().is_some());
        // Locations of the failed event are still recorded.
        assert_eq!(harness.counts(), (1, 1, 2));
        assert_eq!(pipeline.session_ids(), vec!["good"]);
    }
}
