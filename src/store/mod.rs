//! The seam between the repository and a concrete document store.
//!
//! `DocumentStore` carries exactly the operation shapes the repository needs:
//! create-if-absent for databases and containers, create/upsert/read/delete of a
//! single item addressed by id plus partition key, and one page of a query
//! addressed by statement text and continuation token. Documents travel as raw
//! `serde_json::Value`; turning them into domain entities is the repository's job.

pub mod memory;

use crate::error::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use memory::InMemoryStore;

/// The unfiltered scan statement used by `find_all`.
pub const SCAN_ALL_QUERY: &str = "SELECT * FROM c";

/// Address of a container inside a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    pub database: String,
    pub container: String,
}

impl ContainerRef {
    pub fn new(database: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            container: container.into(),
        }
    }

    /// Resource link in the store's `dbs/{db}/colls/{coll}` form.
    pub fn link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.container)
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.container)
    }
}

/// Whether a create-if-absent call made something new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionOutcome {
    Created,
    Existing,
}

impl fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionOutcome::Created => write!(f, "created"),
            ProvisionOutcome::Existing => write!(f, "existing"),
        }
    }
}

/// Descriptor returned by create-if-absent calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned<T> {
    pub resource: T,
    pub outcome: ProvisionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseProperties {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyDefinition {
    pub paths: Vec<String>,
    #[serde(default = "PartitionKeyDefinition::default_kind")]
    pub kind: String,
}

impl PartitionKeyDefinition {
    pub fn hash(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            kind: Self::default_kind(),
        }
    }

    fn default_kind() -> String {
        "Hash".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingPolicy {
    pub automatic: bool,
    pub indexing_mode: String,
}

impl IndexingPolicy {
    pub fn new(automatic: bool) -> Self {
        Self {
            automatic,
            indexing_mode: "consistent".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    pub id: String,
    pub partition_key: PartitionKeyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexing_policy: Option<IndexingPolicy>,
}

impl ContainerProperties {
    pub fn new(id: impl Into<String>, partition_key_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: PartitionKeyDefinition::hash(partition_key_path),
            indexing_policy: None,
        }
    }

    pub fn with_indexing_policy(mut self, policy: IndexingPolicy) -> Self {
        self.indexing_policy = Some(policy);
        self
    }

    pub fn partition_key_path(&self) -> Option<&str> {
        self.partition_key.paths.first().map(String::as_str)
    }
}

/// Paging parameters for one query round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub max_item_count: u32,
    pub continuation: Option<String>,
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub documents: Vec<Value>,
    /// `None` when the store has no more pages.
    pub continuation: Option<String>,
}

/// Operations a document store offers to the repository.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend label for logs and health output.
    fn backend_name(&self) -> &'static str;

    async fn create_database_if_not_exists(
        &self,
        database: &str,
    ) -> StoreResult<Provisioned<DatabaseProperties>>;

    async fn create_container_if_not_exists(
        &self,
        database: &str,
        properties: &ContainerProperties,
        throughput: Option<u32>,
    ) -> StoreResult<Provisioned<ContainerProperties>>;

    async fn read_container(&self, target: &ContainerRef) -> StoreResult<ContainerProperties>;

    /// Insert a new item; an existing id is a `Conflict`.
    async fn create_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value>;

    /// Insert or replace an item in one call.
    async fn upsert_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value>;

    async fn read_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Value>;

    async fn delete_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<()>;

    /// Fetch one page of `query` results.
    async fn query_items(
        &self,
        target: &ContainerRef,
        query: &str,
        page: &PageRequest,
    ) -> StoreResult<QueryPage>;

    /// Release transport resources. Called once by the connection manager at shutdown.
    async fn close(&self) {}
}
