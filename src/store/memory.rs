//! In-process document store.
//!
//! Mirrors the observable contract of the gateway client closely enough for
//! local runs and the test suite: create-if-absent semantics, partition-key
//! checks on every item call, opaque continuation tokens, and store-managed
//! system properties (`_etag`, `_ts`) that the repository must filter out.

use super::{
    ContainerProperties, ContainerRef, DatabaseProperties, DocumentStore, PageRequest,
    ProvisionOutcome, Provisioned, QueryPage, SCAN_ALL_QUERY,
};
use crate::error::{ResourceKind, StoreError, StoreResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

const CONTINUATION_PREFIX: &str = "mem:";

#[derive(Debug, Default)]
struct MemoryDatabase {
    containers: IndexMap<String, MemoryContainer>,
}

#[derive(Debug)]
struct MemoryContainer {
    properties: ContainerProperties,
    throughput: Option<u32>,
    items: IndexMap<String, Value>,
}

/// Thread-safe in-memory backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    databases: RwLock<IndexMap<String, MemoryDatabase>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_count(&self) -> usize {
        self.databases.read().len()
    }

    pub fn container_count(&self, database: &str) -> usize {
        self.databases
            .read()
            .get(database)
            .map(|db| db.containers.len())
            .unwrap_or(0)
    }

    /// Provisioned throughput of a container, if it exists.
    pub fn container_throughput(&self, target: &ContainerRef) -> Option<u32> {
        self.databases
            .read()
            .get(&target.database)
            .and_then(|db| db.containers.get(&target.container))
            .and_then(|container| container.throughput)
    }

    pub fn item_count(&self, target: &ContainerRef) -> usize {
        self.databases
            .read()
            .get(&target.database)
            .and_then(|db| db.containers.get(&target.container))
            .map(|container| container.items.len())
            .unwrap_or(0)
    }

    fn with_container<T>(
        &self,
        target: &ContainerRef,
        f: impl FnOnce(&MemoryContainer) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let databases = self.databases.read();
        let database = databases
            .get(&target.database)
            .ok_or_else(|| StoreError::not_found(ResourceKind::Database, &target.database))?;
        let container = database
            .containers
            .get(&target.container)
            .ok_or_else(|| StoreError::not_found(ResourceKind::Container, target.link()))?;
        f(container)
    }

    fn with_container_mut<T>(
        &self,
        target: &ContainerRef,
        f: impl FnOnce(&mut MemoryContainer) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut databases = self.databases.write();
        let database = databases
            .get_mut(&target.database)
            .ok_or_else(|| StoreError::not_found(ResourceKind::Database, &target.database))?;
        let container = database
            .containers
            .get_mut(&target.container)
            .ok_or_else(|| StoreError::not_found(ResourceKind::Container, target.link()))?;
        f(container)
    }
}

impl MemoryContainer {
    /// Validate the item against the declared partition key and stamp system fields.
    fn prepare(&self, partition_key: &str, mut item: Value) -> StoreResult<(String, Value)> {
        let id = match item.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(StoreError::status(400, "item must carry a string `id`")),
        };

        let declared = self
            .properties
            .partition_key_path()
            .and_then(|path| value_at_path(&item, path))
            .and_then(Value::as_str);
        if declared != Some(partition_key) {
            return Err(StoreError::status(
                400,
                format!("partition key `{partition_key}` does not match item `{id}`"),
            ));
        }

        if let Value::Object(object) = &mut item {
            object.insert(
                "_etag".to_string(),
                Value::String(format!("\"{}\"", uuid::Uuid::new_v4())),
            );
            object.insert(
                "_ts".to_string(),
                Value::from(chrono::Utc::now().timestamp()),
            );
        }
        Ok((id, item))
    }

    fn lookup(&self, id: &str, partition_key: &str) -> Option<&Value> {
        let item = self.items.get(id)?;
        let stored_key = self
            .properties
            .partition_key_path()
            .and_then(|path| value_at_path(item, path))
            .and_then(Value::as_str);
        (stored_key == Some(partition_key)).then_some(item)
    }
}

fn value_at_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    path.trim_start_matches('/')
        .split('/')
        .try_fold(item, |current, segment| current.get(segment))
}

fn normalize_statement(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

fn parse_continuation(token: Option<&str>) -> StoreResult<usize> {
    match token {
        None => Ok(0),
        Some(token) => token
            .strip_prefix(CONTINUATION_PREFIX)
            .and_then(|offset| offset.parse::<usize>().ok())
            .ok_or_else(|| StoreError::status(400, format!("malformed continuation `{token}`"))),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_database_if_not_exists(
        &self,
        database: &str,
    ) -> StoreResult<Provisioned<DatabaseProperties>> {
        let mut databases = self.databases.write();
        let outcome = if databases.contains_key(database) {
            ProvisionOutcome::Existing
        } else {
            databases.insert(database.to_string(), MemoryDatabase::default());
            ProvisionOutcome::Created
        };
        Ok(Provisioned {
            resource: DatabaseProperties {
                id: database.to_string(),
            },
            outcome,
        })
    }

    async fn create_container_if_not_exists(
        &self,
        database: &str,
        properties: &ContainerProperties,
        throughput: Option<u32>,
    ) -> StoreResult<Provisioned<ContainerProperties>> {
        let mut databases = self.databases.write();
        let db = databases
            .get_mut(database)
            .ok_or_else(|| StoreError::not_found(ResourceKind::Database, database))?;

        if let Some(existing) = db.containers.get(&properties.id) {
            return Ok(Provisioned {
                resource: existing.properties.clone(),
                outcome: ProvisionOutcome::Existing,
            });
        }

        db.containers.insert(
            properties.id.clone(),
            MemoryContainer {
                properties: properties.clone(),
                throughput,
                items: IndexMap::new(),
            },
        );
        Ok(Provisioned {
            resource: properties.clone(),
            outcome: ProvisionOutcome::Created,
        })
    }

    async fn read_container(&self, target: &ContainerRef) -> StoreResult<ContainerProperties> {
        self.with_container(target, |container| Ok(container.properties.clone()))
    }

    async fn create_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value> {
        self.with_container_mut(target, |container| {
            let (id, item) = container.prepare(partition_key, item)?;
            if container.items.contains_key(&id) {
                return Err(StoreError::conflict(ResourceKind::Document, id));
            }
            container.items.insert(id, item.clone());
            Ok(item)
        })
    }

    async fn upsert_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value> {
        self.with_container_mut(target, |container| {
            let (id, item) = container.prepare(partition_key, item)?;
            container.items.insert(id, item.clone());
            Ok(item)
        })
    }

    async fn read_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Value> {
        self.with_container(target, |container| {
            container
                .lookup(id, partition_key)
                .cloned()
                .ok_or_else(|| StoreError::not_found(ResourceKind::Document, id))
        })
    }

    async fn delete_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<()> {
        self.with_container_mut(target, |container| {
            if container.lookup(id, partition_key).is_none() {
                return Err(StoreError::not_found(ResourceKind::Document, id));
            }
            // shift_remove keeps the remaining scan order stable
            container.items.shift_remove(id);
            Ok(())
        })
    }

    async fn query_items(
        &self,
        target: &ContainerRef,
        query: &str,
        page: &PageRequest,
    ) -> StoreResult<QueryPage> {
        if normalize_statement(query) != normalize_statement(SCAN_ALL_QUERY) {
            return Err(StoreError::status(
                400,
                format!("unsupported query `{query}`; only `{SCAN_ALL_QUERY}` is served"),
            ));
        }
        if page.max_item_count == 0 {
            return Err(StoreError::status(400, "max item count must be positive"));
        }

        let offset = parse_continuation(page.continuation.as_deref())?;
        self.with_container(target, |container| {
            let end = offset
                .saturating_add(page.max_item_count as usize)
                .min(container.items.len());
            let documents = container
                .items
                .values()
                .skip(offset)
                .take(end.saturating_sub(offset))
                .cloned()
                .collect();
            let continuation =
                (end < container.items.len()).then(|| format!("{CONTINUATION_PREFIX}{end}"));
            Ok(QueryPage {
                documents,
                continuation,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn provisioned() -> (InMemoryStore, ContainerRef) {
        let store = InMemoryStore::new();
        store.create_database_if_not_exists("db").await.unwrap();
        store
            .create_container_if_not_exists("db", &ContainerProperties::new("items", "/id"), None)
            .await
            .unwrap();
        (store, ContainerRef::new("db", "items"))
    }

    #[tokio::test]
    async fn create_if_absent_reports_existing() {
        let store = InMemoryStore::new();
        let first = store.create_database_if_not_exists("db").await.unwrap();
        let second = store.create_database_if_not_exists("db").await.unwrap();
        assert_eq!(first.outcome, ProvisionOutcome::Created);
        assert_eq!(second.outcome, ProvisionOutcome::Existing);
        assert_eq!(store.database_count(), 1);
    }

    #[tokio::test]
    async fn container_requires_database() {
        let store = InMemoryStore::new();
        let err = store
            .create_container_if_not_exists("missing", &ContainerProperties::new("c", "/id"), None)
            .await
            .expect_err("no database");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn create_conflicts_on_duplicate_id() {
        let (store, target) = provisioned().await;
        store
            .create_item(&target, "a", json!({"id": "a", "name": "one"}))
            .await
            .unwrap();
        let err = store
            .create_item(&target, "a", json!({"id": "a", "name": "two"}))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn partition_key_must_match_item() {
        let (store, target) = provisioned().await;
        let err = store
            .create_item(&target, "other", json!({"id": "a"}))
            .await
            .expect_err("mismatch");
        assert!(matches!(err, StoreError::Status { status: 400, .. }));

        store
            .create_item(&target, "a", json!({"id": "a"}))
            .await
            .unwrap();
        let err = store
            .read_item(&target, "a", "other")
            .await
            .expect_err("wrong partition");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn writes_stamp_system_properties() {
        let (store, target) = provisioned().await;
        let stored = store
            .upsert_item(&target, "a", json!({"id": "a", "name": "x"}))
            .await
            .unwrap();
        assert!(stored.get("_etag").is_some());
        assert!(stored.get("_ts").is_some());
    }

    #[tokio::test]
    async fn query_pages_follow_continuation() {
        let (store, target) = provisioned().await;
        for i in 0..5 {
            let id = format!("item-{i}");
            store
                .create_item(&target, &id, json!({"id": id}))
                .await
                .unwrap();
        }

        let mut continuation = None;
        let mut sizes = Vec::new();
        loop {
            let page = store
                .query_items(
                    &target,
                    "select *  from c",
                    &PageRequest {
                        max_item_count: 2,
                        continuation: continuation.clone(),
                    },
                )
                .await
                .unwrap();
            sizes.push(page.documents.len());
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn query_rejects_other_statements_and_bad_tokens() {
        let (store, target) = provisioned().await;
        let page = PageRequest {
            max_item_count: 10,
            continuation: None,
        };
        let err = store
            .query_items(&target, "SELECT c.id FROM c WHERE c.name = 'x'", &page)
            .await
            .expect_err("filtered query");
        assert!(matches!(err, StoreError::Status { status: 400, .. }));

        let bad = PageRequest {
            max_item_count: 10,
            continuation: Some("garbage".to_string()),
        };
        assert!(
            store
                .query_items(&target, SCAN_ALL_QUERY, &bad)
                .await
                .is_err()
        );
    }
}
