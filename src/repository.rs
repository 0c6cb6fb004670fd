//! CRUD and scan operations for `Project` documents.

use crate::error::{StoreError, StoreResult};
use crate::model::{Project, validate_id};
use crate::pagination::{PageCursor, ScanOptions};
use crate::provision::ProvisionedContainer;
use crate::store::{ContainerRef, DocumentStore, SCAN_ALL_QUERY};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// A stream of non-empty batches, one per store page.
pub type ProjectBatches = BoxStream<'static, StoreResult<Vec<Project>>>;

/// Repository over the provisioned projects container.
///
/// Every document's id doubles as its partition key. Cloning is cheap; clones
/// share the same connection.
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    container: ProvisionedContainer,
    scan: ScanOptions,
}

impl ProjectRepository {
    pub fn new(container: ProvisionedContainer) -> Self {
        Self::with_scan_options(container, ScanOptions::default())
    }

    pub fn with_scan_options(container: ProvisionedContainer, scan: ScanOptions) -> Self {
        Self { container, scan }
    }

    pub fn target(&self) -> &ContainerRef {
        self.container.target()
    }

    pub fn scan_options(&self) -> ScanOptions {
        self.scan
    }

    fn store(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        self.container.handle().store()
    }

    /// Persist a new project under a freshly generated id.
    ///
    /// Any id already on `project` is replaced.
    #[instrument(skip_all, fields(container = %self.target()))]
    pub async fn save(&self, mut project: Project) -> StoreResult<Project> {
        let id = Uuid::new_v4().to_string();
        project.id = Some(id.clone());
        let result = async {
            let document = project.to_document()?;
            let stored = self
                .store()?
                .create_item(self.target(), &id, document)
                .await?;
            Project::from_document(&stored)
        }
        .await;
        self.finish("save", result)
    }

    /// Overwrite the stored document with the same id, creating it if absent.
    #[instrument(skip_all, fields(container = %self.target(), id = project.id().unwrap_or("")))]
    pub async fn update(&self, project: Project) -> StoreResult<Project> {
        let result = async {
            let id = project.id().ok_or(StoreError::MissingId)?;
            validate_id(id)?;
            let document = project.to_document()?;
            let stored = self
                .store()?
                .upsert_item(self.target(), id, document)
                .await?;
            Project::from_document(&stored)
        }
        .await;
        self.finish("update", result)
    }

    /// Every project in the container, one batch per page.
    ///
    /// Nothing is read until the stream is polled. Batches keep the store's
    /// order; no ordering is promised across scans.
    pub fn find_all(&self) -> ProjectBatches {
        tracing::debug!(
            container = %self.target(),
            page_size = self.scan.page_size,
            cap = ?self.scan.result_cap,
            "starting scan"
        );
        PageCursor::new(
            self.container.handle().clone(),
            self.target().clone(),
            SCAN_ALL_QUERY,
            self.scan,
        )
        .into_stream()
        .map(|page| {
            let batch = page.and_then(|documents| {
                documents.iter().map(Project::from_document).collect::<StoreResult<Vec<_>>>()
            });
            if let Err(err) = &batch {
                tracing::warn!(error = %err, "scan failed");
                err.track("find_all");
            }
            batch
        })
        .boxed()
    }

    /// The project with `id`; `NotFound` if absent.
    #[instrument(skip(self), fields(container = %self.target()))]
    pub async fn find_by_id(&self, id: &str) -> StoreResult<Project> {
        let result = async {
            validate_id(id)?;
            let document = self.store()?.read_item(self.target(), id, id).await?;
            Project::from_document(&document)
        }
        .await;
        self.finish("find_by_id", result)
    }

    /// Remove the project with `id`; `NotFound` if absent.
    #[instrument(skip(self), fields(container = %self.target()))]
    pub async fn delete_by_id(&self, id: &str) -> StoreResult<()> {
        let result = async {
            validate_id(id)?;
            self.store()?.delete_item(self.target(), id, id).await
        }
        .await;
        self.finish("delete_by_id", result)
    }

    fn finish<T>(&self, operation: &'static str, result: StoreResult<T>) -> StoreResult<T> {
        match &result {
            Ok(_) => tracing::debug!(operation, "ok"),
            Err(err) if err.is_not_found() => tracing::debug!(operation, error = %err, "not found"),
            Err(err) => tracing::warn!(operation, error = %err, "operation failed"),
        }
        if let Err(err) = &result {
            err.track(operation);
        }
        result
    }
}
