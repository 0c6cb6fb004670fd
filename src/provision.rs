//! Startup provisioning of the database and the projects container.

use crate::connection::ConnectionHandle;
use crate::error::{ResourceKind, StoreError, StoreResult};
use crate::store::{ContainerProperties, ContainerRef, IndexingPolicy, ProvisionOutcome};
use std::time::Instant;

pub const DEFAULT_PARTITION_KEY_PATH: &str = "/id";
pub const DEFAULT_THROUGHPUT: u32 = 400;

const SLOW_PROVISIONING_MS: u64 = 5_000;

/// What to create when it does not exist yet.
///
/// Throughput and indexing only apply at creation; an existing container keeps
/// whatever it was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningOptions {
    pub database: String,
    pub container: String,
    pub partition_key_path: String,
    pub throughput: Option<u32>,
    pub automatic_indexing: bool,
}

impl ProvisioningOptions {
    pub fn new(database: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            container: container.into(),
            partition_key_path: DEFAULT_PARTITION_KEY_PATH.to_string(),
            throughput: Some(DEFAULT_THROUGHPUT),
            automatic_indexing: false,
        }
    }

    pub fn with_throughput(mut self, throughput: Option<u32>) -> Self {
        self.throughput = throughput;
        self
    }

    pub fn with_automatic_indexing(mut self, automatic: bool) -> Self {
        self.automatic_indexing = automatic;
        self
    }

    pub fn container_properties(&self) -> ContainerProperties {
        ContainerProperties::new(&self.container, &self.partition_key_path)
            .with_indexing_policy(IndexingPolicy::new(self.automatic_indexing))
    }

    pub fn target(&self) -> ContainerRef {
        ContainerRef::new(&self.database, &self.container)
    }
}

/// A container known to exist, ready for document traffic.
///
/// Only [`ensure_ready`] produces one, so a repository built from it never
/// issues a document call before provisioning has succeeded.
#[derive(Debug, Clone)]
pub struct ProvisionedContainer {
    handle: ConnectionHandle,
    target: ContainerRef,
    properties: ContainerProperties,
    database_outcome: ProvisionOutcome,
    container_outcome: ProvisionOutcome,
}

impl ProvisionedContainer {
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn target(&self) -> &ContainerRef {
        &self.target
    }

    pub fn properties(&self) -> &ContainerProperties {
        &self.properties
    }

    pub fn database_outcome(&self) -> ProvisionOutcome {
        self.database_outcome
    }

    pub fn container_outcome(&self) -> ProvisionOutcome {
        self.container_outcome
    }
}

/// Create the database, then the container, each only if absent.
///
/// Either step failing is fatal to startup and is returned as
/// `StoreError::Provisioning` naming the resource that failed. Nothing here retries.
pub async fn ensure_ready(
    handle: &ConnectionHandle,
    options: &ProvisioningOptions,
) -> StoreResult<ProvisionedContainer> {
    let store = handle.store()?;
    let started = Instant::now();

    let database = match store.create_database_if_not_exists(&options.database).await {
        Ok(database) => {
            tracing::info!(
                database = %database.resource.id,
                outcome = %database.outcome,
                "database ready"
            );
            database
        }
        Err(err) => {
            tracing::error!(database = %options.database, error = %err, "database provisioning failed");
            let err = StoreError::provisioning(ResourceKind::Database, &options.database, err);
            err.track("provision_database");
            return Err(err);
        }
    };

    let properties = options.container_properties();
    let container = match store
        .create_container_if_not_exists(&options.database, &properties, options.throughput)
        .await
    {
        Ok(container) => {
            tracing::info!(
                database = %options.database,
                container = %container.resource.id,
                partition_key = container.resource.partition_key_path().unwrap_or("none"),
                throughput = ?options.throughput,
                outcome = %container.outcome,
                "container ready"
            );
            container
        }
        Err(err) => {
            tracing::error!(
                database = %options.database,
                container = %options.container,
                error = %err,
                "container provisioning failed"
            );
            let err = StoreError::provisioning(ResourceKind::Container, &options.container, err);
            err.track("provision_container");
            return Err(err);
        }
    };

    if container.resource.partition_key_path() != Some(options.partition_key_path.as_str()) {
        tracing::warn!(
            container = %options.container,
            expected = %options.partition_key_path,
            actual = container.resource.partition_key_path().unwrap_or("none"),
            "existing container uses a different partition key"
        );
    }

    crate::log_slow_operation!(
        started.elapsed(),
        SLOW_PROVISIONING_MS,
        database = %options.database,
        container = %options.container,
        "provisioning complete"
    );

    Ok(ProvisionedContainer {
        handle: handle.clone(),
        target: options.target(),
        properties: container.resource,
        database_outcome: database.outcome,
        container_outcome: container.outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_projects_layout() {
        let options = ProvisioningOptions::new("db", "projects");
        assert_eq!(options.partition_key_path, "/id");
        assert_eq!(options.throughput, Some(400));
        assert!(!options.automatic_indexing);

        let properties = options.container_properties();
        assert_eq!(properties.partition_key_path(), Some("/id"));
        assert_eq!(properties.indexing_policy, Some(IndexingPolicy::new(false)));
        assert_eq!(options.target().link(), "dbs/db/colls/projects");
    }

    #[test]
    fn container_body_disables_automatic_indexing() {
        let body = serde_json::to_value(ProvisioningOptions::new("db", "projects").container_properties())
            .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "id": "projects",
                "partitionKey": {"paths": ["/id"], "kind": "Hash"},
                "indexingPolicy": {"automatic": false, "indexingMode": "consistent"}
            })
        );
    }
}
