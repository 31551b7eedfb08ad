//! Typed views over the document store: raw alerts, parsed alerts and the
//! location gazetteer.
//!
//! Every insert is check-then-insert. The check avoids needless work
//! (enrichment, geocoding); the unique index each collection declares is what
//! actually keeps concurrent writers from persisting duplicates.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::{DocumentId, DocumentStore, Filter, StoreResult};
use crate::geo::{GeoError, GeoLocator};
use crate::models::{GeoLocation, RawAlertEvent, SavedNotification};
use crate::processor::enricher::EventEnricher;

const RAW_KEY: &str = "notificationId";
const PARSED_KEY: &str = "raw_notification.notificationId";
const LOCATION_KEY: &str = "location";

#[async_trait]
pub trait RawEventStore: Send + Sync {
    async fn find_by_id(&self, notification_id: &str) -> StoreResult<Option<RawAlertEvent>>;

    /// `None` means the event was already stored and nothing was written.
    async fn insert_if_absent(&self, event: &RawAlertEvent) -> StoreResult<Option<DocumentId>>;

    async fn find_by_city(&self, city: &str) -> StoreResult<Vec<RawAlertEvent>>;

    /// Events whose unix time lies in `[start, end]`.
    async fn find_by_time_range(&self, start: i64, end: i64) -> StoreResult<Vec<RawAlertEvent>>;

    async fn list_all(&self) -> StoreResult<Vec<RawAlertEvent>>;

    async fn update(&self, notification_id: &str, patch: Value) -> StoreResult<u64>;

    async fn delete(&self, notification_id: &str) -> StoreResult<u64>;
}

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn find_by_id(&self, notification_id: &str) -> StoreResult<Option<SavedNotification>>;

    async fn insert_if_absent(
        &self,
        notification: &SavedNotification,
    ) -> StoreResult<Option<DocumentId>>;

    /// Enriches and stores `raw` unless it is already present.
    async fn insert_from_raw(&self, raw: &RawAlertEvent) -> StoreResult<Option<DocumentId>>;

    async fn list_all(&self) -> StoreResult<Vec<SavedNotification>>;

    async fn update(&self, notification_id: &str, patch: Value) -> StoreResult<u64>;

    async fn delete(&self, notification_id: &str) -> StoreResult<u64>;
}

#[derive(Debug, Error)]
pub enum LocationInsertError {
    #[error(transparent)]
    Store(#[from] super::StoreError),

    #[error(transparent)]
    Geocoding(#[from] GeoError),
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn find_by_name(&self, city: &str) -> StoreResult<Option<GeoLocation>>;

    /// Geocodes and stores `city` unless it is already known. Unresolvable
    /// names are stored with `(0, 0)`; a geocoder that keeps failing is an
    /// error and nothing is written.
    async fn insert_if_absent(&self, city: &str) -> Result<Option<DocumentId>, LocationInsertError>;

    async fn list_all(&self) -> StoreResult<Vec<GeoLocation>>;

    async fn update(&self, city: &str, patch: Value) -> StoreResult<u64>;

    async fn delete(&self, city: &str) -> StoreResult<u64>;
}

fn decode<T: DeserializeOwned>(body: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(body)?)
}

fn decode_all<T: DeserializeOwned>(docs: Vec<super::Document>) -> StoreResult<Vec<T>> {
    docs.into_iter().map(|doc| decode(doc.body)).collect()
}

/// Creates `collection` and its unique key.
async fn prepare(store: &dyn DocumentStore, collection: &str, key: &str) -> StoreResult<()> {
    store.ensure_collection(collection).await?;
    store.ensure_unique_index(collection, key).await
}

pub struct RawAlertsCollection {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl RawAlertsCollection {
    pub async fn open(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> StoreResult<Self> {
        let collection = collection.into();
        prepare(store.as_ref(), &collection, RAW_KEY).await?;
        Ok(Self { store, collection })
    }
}

#[async_trait]
impl RawEventStore for RawAlertsCollection {
    async fn find_by_id(&self, notification_id: &str) -> StoreResult<Option<RawAlertEvent>> {
        let doc = self
            .store
            .find_one(&self.collection, &Filter::eq(RAW_KEY, notification_id))
            .await?;
        doc.map(|d| decode(d.body)).transpose()
    }

    async fn insert_if_absent(&self, event: &RawAlertEvent) -> StoreResult<Option<DocumentId>> {
        if self.find_by_id(&event.notification_id).await?.is_some() {
            debug!("Notification {} already in {}", event.notification_id, self.collection);
            return Ok(None);
        }
        let body = serde_json::to_value(event)?;
        self.store.insert_one(&self.collection, body).await
    }

    async fn find_by_city(&self, city: &str) -> StoreResult<Vec<RawAlertEvent>> {
        let docs = self
            .store
            .find_all(&self.collection, &Filter::contains("cities", city))
            .await?;
        decode_all(docs)
    }

    async fn find_by_time_range(&self, start: i64, end: i64) -> StoreResult<Vec<RawAlertEvent>> {
        let docs = self
            .store
            .find_all(&self.collection, &Filter::range("time", start, end))
            .await?;
        decode_all(docs)
    }

    async fn list_all(&self) -> StoreResult<Vec<RawAlertEvent>> {
        let docs = self.store.find_all(&self.collection, &Filter::All).await?;
        decode_all(docs)
    }

    async fn update(&self, notification_id: &str, patch: Value) -> StoreResult<u64> {
        self.store
            .update_one(&self.collection, &Filter::eq(RAW_KEY, notification_id), patch)
            .await
    }

    async fn delete(&self, notification_id: &str) -> StoreResult<u64> {
        self.store
            .delete_one(&self.collection, &Filter::eq(RAW_KEY, notification_id))
            .await
    }
}

pub struct ParsedAlertsCollection {
    store: Arc<dyn DocumentStore>,
    collection: String,
    enricher: Arc<EventEnricher>,
}

impl ParsedAlertsCollection {
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        enricher: Arc<EventEnricher>,
    ) -> StoreResult<Self> {
        let collection = collection.into();
        prepare(store.as_ref(), &collection, PARSED_KEY).await?;
        Ok(Self {
            store,
            collection,
            enricher,
        })
    }

    async fn exists(&self, notification_id: &str) -> StoreResult<bool> {
        let doc = self
            .store
            .find_one(&self.collection, &Filter::eq(PARSED_KEY, notification_id))
            .await?;
        Ok(doc.is_some())
    }
}

#[async_trait]
impl ProcessedEventStore for ParsedAlertsCollection {
    async fn find_by_id(&self, notification_id: &str) -> StoreResult<Option<SavedNotification>> {
        let doc = self
            .store
            .find_one(&self.collection, &Filter::eq(PARSED_KEY, notification_id))
            .await?;
        doc.map(|d| decode(d.body)).transpose()
    }

    async fn insert_if_absent(
        &self,
        notification: &SavedNotification,
    ) -> StoreResult<Option<DocumentId>> {
        if self.exists(notification.notification_id()).await? {
            debug!(
                "Notification {} already in {}",
                notification.notification_id(),
                self.collection
            );
            return Ok(None);
        }
        let body = serde_json::to_value(notification)?;
        self.store.insert_one(&self.collection, body).await
    }

    async fn insert_from_raw(&self, raw: &RawAlertEvent) -> StoreResult<Option<DocumentId>> {
        if self.exists(&raw.notification_id).await? {
            debug!("Notification {} already in {}", raw.notification_id, self.collection);
            return Ok(None);
        }
        let notification = self.enricher.enrich(raw).await;
        info!(
            "Adding {} ({}) to {}",
            notification.notification_id(),
            notification.processed_notification.threat_name,
            self.collection
        );
        let body = serde_json::to_value(&notification)?;
        self.store.insert_one(&self.collection, body).await
    }

    async fn list_all(&self) -> StoreResult<Vec<SavedNotification>> {
        let docs = self.store.find_all(&self.collection, &Filter::All).await?;
        decode_all(docs)
    }

    async fn update(&self, notification_id: &str, patch: Value) -> StoreResult<u64> {
        self.store
            .update_one(&self.collection, &Filter::eq(PARSED_KEY, notification_id), patch)
            .await
    }

    async fn delete(&self, notification_id: &str) -> StoreResult<u64> {
        self.store
            .delete_one(&self.collection, &Filter::eq(PARSED_KEY, notification_id))
            .await
    }
}

pub struct LocationsCollection {
    store: Arc<dyn DocumentStore>,
    collection: String,
    locator: Arc<GeoLocator>,
}

impl LocationsCollection {
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        locator: Arc<GeoLocator>,
    ) -> StoreResult<Self> {
        let collection = collection.into();
        prepare(store.as_ref(), &collection, LOCATION_KEY).await?;
        Ok(Self {
            store,
            collection,
            locator,
        })
    }
}

#[async_trait]
impl LocationStore for LocationsCollection {
    async fn find_by_name(&self, city: &str) -> StoreResult<Option<GeoLocation>> {
        let doc = self
            .store
            .find_one(&self.collection, &Filter::eq(LOCATION_KEY, city))
            .await?;
        doc.map(|d| decode(d.body)).transpose()
    }

    async fn insert_if_absent(&self, city: &str) -> Result<Option<DocumentId>, LocationInsertError> {
        if self.find_by_name(city).await?.is_some() {
            debug!("City {} already in {}", city, self.collection);
            return Ok(None);
        }

        let location = match self.locator.resolve(city).await? {
            Some(coordinates) => GeoLocation::resolved(city, coordinates),
            None => GeoLocation::unresolved(city),
        };
        if location.is_unresolved() {
            info!("No coordinates for {}, storing it unresolved", city);
        }

        let body = serde_json::to_value(&location).map_err(super::StoreError::from)?;
        Ok(self.store.insert_one(&self.collection, body).await?)
    }

    async fn list_all(&self) -> StoreResult<Vec<GeoLocation>> {
        let docs = self.store.find_all(&self.collection, &Filter::All).await?;
        decode_all(docs)
    }

    async fn update(&self, city: &str, patch: Value) -> StoreResult<u64> {
        self.store
            .update_one(&self.collection, &Filter::eq(LOCATION_KEY, city), patch)
            .await
    }

    async fn delete(&self, city: &str) -> StoreResult<u64> {
        self.store
            .delete_one(&self.collection, &Filter::eq(LOCATION_KEY, city))
            .await
    }
}
