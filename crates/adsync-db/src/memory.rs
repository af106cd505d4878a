//! In-process [`DocumentStore`] with the same semantics as the Postgres one.
//!
//! Used by pipeline tests; it also records every bulk call so tests can
//! assert that a batch was persisted with exactly one round trip, and every
//! `find` with the number of documents it returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::documents::{dedupe_replaces, project, DocumentStore, Filter, WriteOp};
use crate::DbError;

#[derive(Debug, Clone)]
struct Stored {
    key: Option<Map<String, Value>>,
    body: Value,
}

/// One recorded `upsert_bulk`, `insert_bulk` or `find` call.
///
/// For `find`, `ops` is the number of documents returned.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkCall {
    pub collection: String,
    pub ops: usize,
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Stored>>>,
    upserts: Mutex<Vec<BulkCall>>,
    inserts: Mutex<Vec<BulkCall>>,
    finds: Mutex<Vec<BulkCall>>,
    reject_writes: AtomicBool,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent bulk write fail with [`DbError::Rejected`].
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Snapshot of a collection's documents in insertion order.
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock_collections()
            .get(collection)
            .map(|docs| docs.iter().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn upsert_calls(&self) -> Vec<BulkCall> {
        self.upserts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn insert_calls(&self) -> Vec<BulkCall> {
        self.inserts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn find_calls(&self) -> Vec<BulkCall> {
        self.finds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn lock_collections(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Stored>>> {
        self.collections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), DbError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(DbError::Rejected("writes disabled".to_string()));
        }
        Ok(())
    }

    fn record(log: &Mutex<Vec<BulkCall>>, collection: &str, ops: usize) {
        log.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(BulkCall {
                collection: collection.to_string(),
                ops,
            });
    }
}

fn merge_into(body: &mut Value, set: &Map<String, Value>) {
    if let Value::Object(map) = body {
        for (k, v) in set {
            map.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert_bulk(&self, collection: &str, ops: &[WriteOp]) -> Result<u64, DbError> {
        Self::record(&self.upserts, collection, ops.len());
        self.check_writable()?;

        let (replaces, updates) = dedupe_replaces(ops);
        let mut collections = self.lock_collections();
        let docs = collections.entry(collection.to_string()).or_default();
        let mut affected = 0u64;

        for (key, document) in replaces {
            match docs.iter_mut().find(|d| d.key.as_ref() == Some(key)) {
                Some(existing) => existing.body = document.clone(),
                None => docs.push(Stored {
                    key: Some(key.clone()),
                    body: document.clone(),
                }),
            }
            affected += 1;
        }

        for (filter, set) in updates {
            for doc in docs.iter_mut().filter(|d| filter.matches(&d.body)) {
                merge_into(&mut doc.body, set);
                affected += 1;
            }
        }

        Ok(affected)
    }

    async fn insert_bulk(&self, collection: &str, documents: &[Value]) -> Result<u64, DbError> {
        Self::record(&self.inserts, collection, documents.len());
        self.check_writable()?;

        let mut collections = self.lock_collections();
        let docs = collections.entry(collection.to_string()).or_default();
        docs.extend(documents.iter().map(|body| Stored {
            key: None,
            body: body.clone(),
        }));
        Ok(documents.len() as u64)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Value>, DbError> {
        let collections = self.lock_collections();
        let found: Vec<Value> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(&d.body))
                    .map(|d| match projection {
                        Some(fields) => project(d.body.clone(), fields),
                        None => d.body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self::record(&self.finds, collection, found.len());
        Ok(found)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, DbError> {
        self.check_writable()?;
        let mut collections = self.lock_collections();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(&d.body));
        Ok((before - docs.len()) as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Map<String, Value>,
    ) -> Result<bool, DbError> {
        self.check_writable()?;
        let mut collections = self.lock_collections();
        let matched = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| filter.matches(&d.body)));
        match matched {
            Some(doc) => {
                merge_into(&mut doc.body, set);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn replace(account: &str, date: &str, spend: i64) -> WriteOp {
        let mut key = Map::new();
        key.insert("account_id".into(), json!(account));
        key.insert("date".into(), json!(date));
        WriteOp::Replace {
            key,
            document: json!({"account_id": account, "date": date, "data": {"spend": spend}}),
        }
    }

    #[tokio::test]
    async fn replaying_the_same_upsert_does_not_duplicate() {
        let store = MemoryDocumentStore::new();
        let ops = vec![replace("A1", "2024-01-01", 5), replace("A2", "2024-01-01", 7)];

        store.upsert_bulk("meta_insights_campaign", &ops).await.unwrap();
        store.upsert_bulk("meta_insights_campaign", &ops).await.unwrap();

        assert_eq!(store.documents("meta_insights_campaign").len(), 2);
        assert_eq!(store.upsert_calls().len(), 2);
    }

    #[tokio::test]
    async fn replace_overwrites_previous_body() {
        let store = MemoryDocumentStore::new();
        store
            .upsert_bulk("c", &[replace("A1", "2024-01-01", 5)])
            .await
            .unwrap();
        store
            .upsert_bulk("c", &[replace("A1", "2024-01-01", 9)])
            .await
            .unwrap();

        let docs = store.documents("c");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["data"]["spend"], json!(9));
    }

    #[tokio::test]
    async fn update_ops_merge_fields_into_matches() {
        let store = MemoryDocumentStore::new();
        store
            .insert_bulk(
                "meta_references",
                &[
                    json!({"reference": "r1", "status": 0}),
                    json!({"reference": "r2", "status": 0}),
                ],
            )
            .await
            .unwrap();

        let mut set = Map::new();
        set.insert("status".into(), json!(1));
        let updated = store
            .update_one("meta_references", &Filter::new().eq("reference", "r2"), &set)
            .await
            .unwrap();
        assert!(updated);

        let pending = store
            .find("meta_references", &Filter::new().eq("status", 0), None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["reference"], json!("r1"));
    }

    #[tokio::test]
    async fn rejected_writes_surface_an_error_and_persist_nothing() {
        let store = MemoryDocumentStore::new();
        store.reject_writes(true);
        let result = store.upsert_bulk("c", &[replace("A1", "2024-01-01", 1)]).await;
        assert!(matches!(result, Err(DbError::Rejected(_))));
        assert!(store.documents("c").is_empty());
    }

    #[tokio::test]
    async fn delete_removes_matching_documents() {
        let store = MemoryDocumentStore::new();
        store
            .insert_bulk("c", &[json!({"k": "a"}), json!({"k": "b"})])
            .await
            .unwrap();
        let removed = store.delete("c", &Filter::new().eq("k", "a")).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.documents("c"), vec![json!({"k": "b"})]);
    }

    #[tokio::test]
    async fn find_applies_projection() {
        let store = MemoryDocumentStore::new();
        store
            .insert_bulk("c", &[json!({"ad_id": "1", "account_id": "A", "data": {}})])
            .await
            .unwrap();
        let found = store
            .find("c", &Filter::new(), Some(&["ad_id"]))
            .await
            .unwrap();
        assert_eq!(found, vec![json!({"ad_id": "1"})]);
    }
}
