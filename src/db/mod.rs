use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use thiserror::Error;

pub mod collections;
pub mod memory;
pub mod postgres;
pub mod queries;

pub use collections::{
    LocationInsertError, LocationStore, LocationsCollection, ParsedAlertsCollection,
    ProcessedEventStore, RawAlertsCollection, RawEventStore,
};
pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Identifier assigned by the store to a newly written document.
pub type DocumentId = String;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub body: Value,
}

/// Document selection. Field names are dotted paths into the document body,
/// e.g. `raw_notification.notificationId`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq { field: String, value: Value },
    /// The field is an array holding `value`.
    Contains { field: String, value: Value },
    /// Inclusive integer range.
    Range { field: String, start: i64, end: i64 },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, start: i64, end: i64) -> Self {
        Filter::Range {
            field: field.into(),
            start,
            end,
        }
    }
}

/// Generic keyed-document storage.
///
/// Implementations must be thread-safe; one store is shared by every
/// collection and by concurrent pipeline runs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, collection: &str) -> StoreResult<()>;

    /// Declare `field` unique within `collection`. Later inserts that collide
    /// are rejected by `insert_one`.
    async fn ensure_unique_index(&self, collection: &str, field: &str) -> StoreResult<()>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Matching documents in insertion order.
    async fn find_all(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Returns `None` when a unique index rejected the document.
    async fn insert_one(&self, collection: &str, body: Value) -> StoreResult<Option<DocumentId>>;

    /// Shallow-merges `patch` into the first matching document.
    async fn update_one(&self, collection: &str, filter: &Filter, patch: Value) -> StoreResult<u64>;

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;
}

pub(crate) fn validate_identifier(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Splits a dotted field path into validated segments.
pub(crate) fn field_path(field: &str) -> StoreResult<Vec<String>> {
    field
        .split('.')
        .map(|segment| validate_identifier(segment).map(|_| segment.to_string()))
        .collect()
}
