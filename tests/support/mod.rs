#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_cosmos::store::{
    ContainerProperties, ContainerRef, DatabaseProperties, PageRequest, Provisioned, QueryPage,
};
use async_cosmos::{
    ConnectionManager, DocumentStore, InMemoryStore, ProjectRepository, ProvisioningOptions,
    ScanOptions, StoreError, StoreResult, ensure_ready,
};
use async_trait::async_trait;
use serde_json::Value;

pub const DATABASE: &str = "test-db";
pub const CONTAINER: &str = "projects";

const EMPTY_PAGE_PREFIX: &str = "empty:";

/// In-memory store with scripted faults on top.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    query_calls: AtomicUsize,
    fail_query_call: Option<usize>,
    leading_empty_pages: usize,
    fail_provisioning: Option<u16>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `call`-th query (0-based) fails with a 503.
    pub fn failing_query_call(mut self, call: usize) -> Self {
        self.fail_query_call = Some(call);
        self
    }

    /// The first `count` queries return no documents but a continuation.
    pub fn with_leading_empty_pages(mut self, count: usize) -> Self {
        self.leading_empty_pages = count;
        self
    }

    /// Database creation fails with `status`.
    pub fn failing_provisioning(mut self, status: u16) -> Self {
        self.fail_provisioning = Some(status);
        self
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty-memory"
    }

    async fn create_database_if_not_exists(
        &self,
        database: &str,
    ) -> StoreResult<Provisioned<DatabaseProperties>> {
        if let Some(status) = self.fail_provisioning {
            return Err(StoreError::status(status, "provisioning refused"));
        }
        self.inner.create_database_if_not_exists(database).await
    }

    async fn create_container_if_not_exists(
        &self,
        database: &str,
        properties: &ContainerProperties,
        throughput: Option<u32>,
    ) -> StoreResult<Provisioned<ContainerProperties>> {
        self.inner
            .create_container_if_not_exists(database, properties, throughput)
            .await
    }

    async fn read_container(&self, target: &ContainerRef) -> StoreResult<ContainerProperties> {
        self.inner.read_container(target).await
    }

    async fn create_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value> {
        self.inner.create_item(target, partition_key, item).await
    }

    async fn upsert_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value> {
        self.inner.upsert_item(target, partition_key, item).await
    }

    async fn read_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Value> {
        self.inner.read_item(target, id, partition_key).await
    }

    async fn delete_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<()> {
        self.inner.delete_item(target, id, partition_key).await
    }

    async fn query_items(
        &self,
        target: &ContainerRef,
        query: &str,
        page: &PageRequest,
    ) -> StoreResult<QueryPage> {
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_query_call == Some(call) {
            return Err(StoreError::status(503, "service unavailable"));
        }

        let continuation = match page.continuation.as_deref() {
            Some(token) => token
                .strip_prefix(EMPTY_PAGE_PREFIX)
                .map(|rest| (!rest.is_empty()).then(|| rest.to_string()))
                .unwrap_or_else(|| Some(token.to_string())),
            None => None,
        };

        if call < self.leading_empty_pages {
            return Ok(QueryPage {
                documents: Vec::new(),
                continuation: Some(format!(
                    "{EMPTY_PAGE_PREFIX}{}",
                    continuation.unwrap_or_default()
                )),
            });
        }

        let request = PageRequest {
            max_item_count: page.max_item_count,
            continuation,
        };
        self.inner.query_items(target, query, &request).await
    }
}

/// A repository over a freshly provisioned container, plus what it runs on.
pub struct TestRepo<S> {
    pub manager: ConnectionManager,
    pub store: Arc<S>,
    pub repository: ProjectRepository,
}

pub async fn repository_over<S>(store: S, scan: ScanOptions) -> TestRepo<S>
where
    S: DocumentStore + 'static,
{
    let store = Arc::new(store);
    let manager = ConnectionManager::new();
    let handle = manager
        .attach(store.clone() as Arc<dyn DocumentStore>)
        .expect("attach store");
    let container = ensure_ready(&handle, &ProvisioningOptions::new(DATABASE, CONTAINER))
        .await
        .expect("provision");
    TestRepo {
        manager,
        store,
        repository: ProjectRepository::with_scan_options(container, scan),
    }
}

pub async fn memory_repository() -> TestRepo<InMemoryStore> {
    repository_over(InMemoryStore::new(), ScanOptions::default()).await
}

pub fn target() -> ContainerRef {
    ContainerRef::new(DATABASE, CONTAINER)
}
