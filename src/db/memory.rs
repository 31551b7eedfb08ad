use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use super::{
    field_path, validate_identifier, Document, DocumentId, DocumentStore, Filter, StoreResult,
};

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    unique_fields: Vec<Vec<String>>,
}

impl MemoryCollection {
    fn violates_unique(&self, body: &Value) -> bool {
        self.unique_fields.iter().any(|path| match lookup(body, path) {
            // Like a SQL unique index, missing keys never collide.
            None | Some(Value::Null) => false,
            Some(candidate) => self
                .documents
                .iter()
                .any(|doc| lookup(&doc.body, path) == Some(candidate)),
        })
    }
}

/// In-process document store with the same semantics as the Postgres one,
/// unique indexes included. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, MemoryCollection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }
}

fn lookup<'a>(body: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(body, |current, segment| current.as_object()?.get(segment))
}

fn matches(body: &Value, filter: &Filter) -> StoreResult<bool> {
    let matched = match filter {
        Filter::All => true,
        Filter::Eq { field, value } => lookup(body, &field_path(field)?) == Some(value),
        Filter::Contains { field, value } => match lookup(body, &field_path(field)?) {
            Some(Value::Array(items)) => items.contains(value),
            _ => false,
        },
        Filter::Range { field, start, end } => match lookup(body, &field_path(field)?) {
            Some(Value::Number(n)) => n.as_i64().map_or(false, |n| n >= *start && n <= *end),
            Some(Value::String(s)) => s
                .parse::<i64>()
                .map_or(false, |n| n >= *start && n <= *end),
            _ => false,
        },
    };
    Ok(matched)
}

impl MemoryDocumentStore {
    fn position(
        &self,
        collection: &MemoryCollection,
        filter: &Filter,
    ) -> StoreResult<Option<usize>> {
        for (idx, doc) in collection.documents.iter().enumerate() {
            if matches(&doc.body, filter)? {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_collection(&self, collection: &str) -> StoreResult<()> {
        validate_identifier(collection)?;
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn ensure_unique_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        validate_identifier(collection)?;
        let path = field_path(field)?;
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = collections.entry(collection.to_string()).or_default();
        if !entry.unique_fields.contains(&path) {
            entry.unique_fields.push(path);
        }
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = collections.get(collection) else {
            return Ok(None);
        };
        Ok(self
            .position(entry, filter)?
            .map(|idx| entry.documents[idx].clone()))
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = collections.get(collection) else {
            return Ok(vec![]);
        };
        let mut found = Vec::new();
        for doc in &entry.documents {
            if matches(&doc.body, filter)? {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    async fn insert_one(&self, collection: &str, body: Value) -> StoreResult<Option<DocumentId>> {
        validate_identifier(collection)?;
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.violates_unique(&body) {
            return Ok(None);
        }
        let id = Uuid::new_v4().to_string();
        entry.documents.push(Document {
            id: id.clone(),
            body,
        });
        Ok(Some(id))
    }

    async fn update_one(&self, collection: &str, filter: &Filter, patch: Value) -> StoreResult<u64> {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let Some(idx) = self.position(entry, filter)? else {
            return Ok(0);
        };
        match (&mut entry.documents[idx].body, patch) {
            (Value::Object(target), Value::Object(fields)) => {
                for (key, value) in fields {
                    target.insert(key, value);
                }
            }
            (target, replacement) => *target = replacement,
        }
        Ok(1)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match self.position(entry, filter)? {
            Some(idx) => {
                entry.documents.remove(idx);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unique_index_rejects_second_insert() {
        let store = MemoryDocumentStore::new();
        store.ensure_unique_index("locations", "location").await.unwrap();

        let first = store
            .insert_one("locations", json!({"location": "Haifa", "lon": 35.0, "lat": 32.8}))
            .await
            .unwrap();
        let second = store
            .insert_one("locations", json!({"location": "Haifa", "lon": 0.0, "lat": 0.0}))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.count("locations"), 1);
    }

    #[tokio::test]
    async fn nested_unique_field() {
        let store = MemoryDocumentStore::new();
        store
            .ensure_unique_index("parsed_alerts", "raw_notification.notificationId")
            .await
            .unwrap();

        let doc = json!({"raw_notification": {"notificationId": "A1"}});
        assert!(store.insert_one("parsed_alerts", doc.clone()).await.unwrap().is_some());
        assert!(store.insert_one("parsed_alerts", doc).await.unwrap().is_none());
        assert!(store
            .insert_one("parsed_alerts", json!({"raw_notification": {"notificationId": "A2"}}))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn filters_select_expected_documents() {
        let store = MemoryDocumentStore::new();
        for (id, time, cities) in [
            ("A1", 100, vec!["Haifa"]),
            ("A2", 200, vec!["Sderot", "Haifa"]),
            ("A3", 300, vec!["Eilat"]),
        ] {
            store
                .insert_one(
                    "raw_alerts",
                    json!({"notificationId": id, "time": time, "cities": cities}),
                )
                .await
                .unwrap();
        }

        let haifa = store
            .find_all("raw_alerts", &Filter::contains("cities", "Haifa"))
            .await
            .unwrap();
        assert_eq!(haifa.len(), 2);

        let ranged = store
            .find_all("raw_alerts", &Filter::range("time", 150, 300))
            .await
            .unwrap();
        let ids: Vec<_> = ranged.iter().map(|d| d.body["notificationId"].clone()).collect();
        assert_eq!(ids, vec![json!("A2"), json!("A3")]);

        let one = store
            .find_one("raw_alerts", &Filter::eq("notificationId", "A3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one.body["time"], 300);

        assert!(store
            .find_one("missing", &Filter::All)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_and_delete_touch_first_match_only() {
        let store = MemoryDocumentStore::new();
        store.insert_one("c", json!({"k": 1, "v": "a"})).await.unwrap();
        store.insert_one("c", json!({"k": 1, "v": "b"})).await.unwrap();

        let updated = store
            .update_one("c", &Filter::eq("k", 1), json!({"v": "z"}))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let docs = store.find_all("c", &Filter::All).await.unwrap();
        assert_eq!(docs[0].body["v"], "z");
        assert_eq!(docs[1].body["v"], "b");

        assert_eq!(store.delete_one("c", &Filter::eq("k", 1)).await.unwrap(), 1);
        assert_eq!(store.count("c"), 1);
        assert_eq!(store.delete_one("c", &Filter::eq("k", 7)).await.unwrap(), 0);
    }
}
