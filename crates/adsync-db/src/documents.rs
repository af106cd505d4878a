//! Document Upsert Sink: keyed JSON documents grouped into named collections.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;

use adsync_core::KeyedDocument;

use crate::DbError;

// ---------------------------------------------------------------------------
// Filters and write operations
// ---------------------------------------------------------------------------

/// Selects documents by top-level field equality, optionally narrowed to a
/// set of allowed values for one more field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub equals: Map<String, Value>,
    pub any_of: Option<(String, Vec<String>)>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.any_of = Some((field.into(), values));
        self
    }

    /// True if `body` satisfies every condition of the filter.
    #[must_use]
    pub fn matches(&self, body: &Value) -> bool {
        let equal = self
            .equals
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected));
        let allowed = match &self.any_of {
            None => true,
            Some((field, values)) => body
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| values.iter().any(|allowed| allowed == v)),
        };
        equal && allowed
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(equals: Map<String, Value>) -> Self {
        Self {
            equals,
            any_of: None,
        }
    }
}

/// One entry of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the document whose key equals `key`, inserting it if absent.
    Replace {
        key: Map<String, Value>,
        document: Value,
    },
    /// Merge `set` into every document matching `filter`.
    Update {
        filter: Filter,
        set: Map<String, Value>,
    },
}

impl WriteOp {
    /// Replace-upsert a record by its natural key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Encode`] if the record cannot be serialized.
    pub fn replace<D: KeyedDocument>(doc: &D) -> Result<Self, DbError> {
        Ok(WriteOp::Replace {
            key: doc.key(),
            document: serde_json::to_value(doc)?,
        })
    }

    #[must_use]
    pub fn update(filter: Filter, set: Map<String, Value>) -> Self {
        WriteOp::Update { filter, set }
    }
}

/// Collapse replaces sharing a key so the last one wins, preserving the
/// position of the first occurrence.
pub(crate) fn dedupe_replaces(
    ops: &[WriteOp],
) -> (Vec<(&Map<String, Value>, &Value)>, Vec<(&Filter, &Map<String, Value>)>) {
    let mut replaces: Vec<(&Map<String, Value>, &Value)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut updates = Vec::new();

    for op in ops {
        match op {
            WriteOp::Replace { key, document } => {
                let canonical = Value::Object(key.clone()).to_string();
                if let Some(&idx) = positions.get(&canonical) {
                    replaces[idx] = (key, document);
                } else {
                    positions.insert(canonical, replaces.len());
                    replaces.push((key, document));
                }
            }
            WriteOp::Update { filter, set } => updates.push((filter, set)),
        }
    }

    (replaces, updates)
}

/// Keep only the listed top-level fields.
#[must_use]
pub fn project(body: Value, fields: &[&str]) -> Value {
    match body {
        Value::Object(mut map) => {
            map.retain(|k, _| fields.contains(&k.as_str()));
            Value::Object(map)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply all operations as one atomic bulk write. Returns the number of
    /// documents written or modified.
    async fn upsert_bulk(&self, collection: &str, ops: &[WriteOp]) -> Result<u64, DbError>;

    /// Append documents unconditionally.
    async fn insert_bulk(&self, collection: &str, documents: &[Value]) -> Result<u64, DbError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Value>, DbError>;

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, DbError>;

    /// Merge `set` into the first matching document. Returns whether one matched.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Map<String, Value>,
    ) -> Result<bool, DbError>;
}

/// Serialize records and append them with [`DocumentStore::insert_bulk`].
///
/// # Errors
///
/// Returns [`DbError::Encode`] if a record cannot be serialized, or whatever
/// the store returns.
pub async fn insert_records<S, T>(store: &S, collection: &str, records: &[T]) -> Result<u64, DbError>
where
    S: DocumentStore + ?Sized,
    T: Serialize + Sync,
{
    let documents = records
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    store.insert_bulk(collection, &documents).await
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

/// Documents stored as JSONB rows of the `documents` table.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn any_of_parts(filter: &Filter) -> (Option<&str>, Vec<String>) {
    match &filter.any_of {
        Some((field, values)) => (Some(field.as_str()), values.clone()),
        None => (None, Vec::new()),
    }
}

// `$3` names the narrowed field (NULL disables the clause), `$4` the allowed values.
const FILTER_CLAUSE: &str = "collection = $1 \
     AND body @> $2::jsonb \
     AND ($3::text IS NULL OR body ->> $3::text = ANY($4::text[]))";

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn upsert_bulk(&self, collection: &str, ops: &[WriteOp]) -> Result<u64, DbError> {
        if ops.is_empty() {
            return Ok(0);
        }

        let (replaces, updates) = dedupe_replaces(ops);
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;

        if !replaces.is_empty() {
            let keys: Vec<Value> = replaces
                .iter()
                .map(|(k, _)| Value::Object((*k).clone()))
                .collect();
            let bodies: Vec<Value> = replaces.iter().map(|(_, d)| (*d).clone()).collect();

            affected += sqlx::query(
                "INSERT INTO documents (collection, doc_key, body) \
                 SELECT $1, * FROM UNNEST($2::jsonb[], $3::jsonb[]) \
                 ON CONFLICT (collection, doc_key) DO UPDATE SET \
                     body       = EXCLUDED.body, \
                     updated_at = NOW()",
            )
            .bind(collection)
            .bind(&keys)
            .bind(&bodies)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        for (filter, set) in updates {
            let (field, values) = any_of_parts(filter);
            affected += sqlx::query(&format!(
                "UPDATE documents SET body = body || $5::jsonb, updated_at = NOW() \
                 WHERE {FILTER_CLAUSE}"
            ))
            .bind(collection)
            .bind(Value::Object(filter.equals.clone()))
            .bind(field)
            .bind(&values)
            .bind(Value::Object(set.clone()))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn insert_bulk(&self, collection: &str, documents: &[Value]) -> Result<u64, DbError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let affected = sqlx::query(
            "INSERT INTO documents (collection, body) \
             SELECT $1, * FROM UNNEST($2::jsonb[])",
        )
        .bind(collection)
        .bind(documents)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Value>, DbError> {
        let (field, values) = any_of_parts(filter);
        let bodies = sqlx::query_scalar::<_, Value>(&format!(
            "SELECT body FROM documents WHERE {FILTER_CLAUSE} ORDER BY id"
        ))
        .bind(collection)
        .bind(Value::Object(filter.equals.clone()))
        .bind(field)
        .bind(&values)
        .fetch_all(&self.pool)
        .await?;

        Ok(match projection {
            Some(fields) => bodies.into_iter().map(|b| project(b, fields)).collect(),
            None => bodies,
        })
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, DbError> {
        let (field, values) = any_of_parts(filter);
        let affected = sqlx::query(&format!("DELETE FROM documents WHERE {FILTER_CLAUSE}"))
            .bind(collection)
            .bind(Value::Object(filter.equals.clone()))
            .bind(field)
            .bind(&values)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Map<String, Value>,
    ) -> Result<bool, DbError> {
        let (field, values) = any_of_parts(filter);
        let affected = sqlx::query(&format!(
            "UPDATE documents SET body = body || $5::jsonb, updated_at = NOW() \
             WHERE id = (SELECT id FROM documents WHERE {FILTER_CLAUSE} ORDER BY id LIMIT 1)"
        ))
        .bind(collection)
        .bind(Value::Object(filter.equals.clone()))
        .bind(field)
        .bind(&values)
        .bind(Value::Object(set.clone()))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }
}
