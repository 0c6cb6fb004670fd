//! Lazy, page-at-a-time scans over a container.

use crate::connection::ConnectionHandle;
use crate::error::StoreResult;
use crate::store::{ContainerRef, PageRequest};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_RESULT_CAP: u32 = 100_000;

/// Page size and upper bound for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Documents requested per round trip. The store may return fewer.
    pub page_size: u32,
    /// Stop after this many documents; `None` scans everything.
    pub result_cap: Option<u32>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            result_cap: Some(DEFAULT_RESULT_CAP),
        }
    }
}

/// A query plus its position in the store's result sequence.
///
/// Nothing is fetched until the stream is polled, and each poll fetches at most
/// one page. Empty pages that still carry a continuation are skipped, so every
/// yielded batch is non-empty. The first error ends the stream; batches already
/// yielded stay valid.
#[derive(Debug, Clone)]
pub struct PageCursor {
    handle: ConnectionHandle,
    target: ContainerRef,
    query: String,
    options: ScanOptions,
}

impl PageCursor {
    pub fn new(
        handle: ConnectionHandle,
        target: ContainerRef,
        query: impl Into<String>,
        options: ScanOptions,
    ) -> Self {
        Self {
            handle,
            target,
            query: query.into(),
            options,
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, StoreResult<Vec<Value>>> {
        let state = ScanState {
            remaining: self.options.result_cap.map(|cap| cap as usize),
            page_size: self.options.page_size.max(1),
            handle: self.handle,
            target: self.target,
            query: self.query,
            continuation: None,
            exhausted: false,
            pages: 0,
            delivered: 0,
        };

        stream::try_unfold(state, next_batch).boxed()
    }
}

struct ScanState {
    handle: ConnectionHandle,
    target: ContainerRef,
    query: String,
    page_size: u32,
    remaining: Option<usize>,
    continuation: Option<String>,
    exhausted: bool,
    pages: usize,
    delivered: usize,
}

impl ScanState {
    fn request_size(&self) -> u32 {
        match self.remaining {
            Some(remaining) => self
                .page_size
                .min(u32::try_from(remaining).unwrap_or(u32::MAX)),
            None => self.page_size,
        }
    }
}

async fn next_batch(mut state: ScanState) -> StoreResult<Option<(Vec<Value>, ScanState)>> {
    loop {
        if state.exhausted || state.remaining == Some(0) {
            tracing::debug!(
                container = %state.target,
                pages = state.pages,
                documents = state.delivered,
                capped = state.remaining == Some(0) && !state.exhausted,
                "scan finished"
            );
            return Ok(None);
        }

        let store = state.handle.store()?;
        let request = PageRequest {
            max_item_count: state.request_size(),
            continuation: state.continuation.take(),
        };
        let page = store
            .query_items(&state.target, &state.query, &request)
            .await?;
        state.pages += 1;

        match page.continuation {
            Some(token) => state.continuation = Some(token),
            None => state.exhausted = true,
        }

        let mut documents = page.documents;
        if let Some(remaining) = state.remaining.as_mut() {
            documents.truncate(*remaining);
            *remaining -= documents.len();
        }

        if documents.is_empty() {
            tracing::trace!(container = %state.target, page = state.pages, "empty page skipped");
            continue;
        }

        state.delivered += documents.len();
        tracing::trace!(
            container = %state.target,
            page = state.pages,
            documents = documents.len(),
            "page fetched"
        );
        return Ok(Some((documents, state)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::store::{ContainerProperties, DocumentStore, InMemoryStore, SCAN_ALL_QUERY};
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::Arc;

    async fn seeded(count: usize) -> (ConnectionManager, ConnectionHandle, ContainerRef) {
        let store = Arc::new(InMemoryStore::new());
        store.create_database_if_not_exists("db").await.unwrap();
        store
            .create_container_if_not_exists("db", &ContainerProperties::new("c", "/id"), None)
            .await
            .unwrap();
        let target = ContainerRef::new("db", "c");
        for i in 0..count {
            let id = format!("doc-{i:03}");
            store
                .create_item(&target, &id, json!({"id": id, "name": "n"}))
                .await
                .unwrap();
        }
        let manager = ConnectionManager::new();
        let handle = manager.attach(store).unwrap();
        (manager, handle, target)
    }

    #[tokio::test]
    async fn yields_one_batch_per_page() {
        let (_manager, handle, target) = seeded(5).await;
        let options = ScanOptions {
            page_size: 2,
            result_cap: None,
        };
        let batches: Vec<Vec<Value>> = PageCursor::new(handle, target, SCAN_ALL_QUERY, options)
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn cap_truncates_scan() {
        let (_manager, handle, target) = seeded(7).await;
        let options = ScanOptions {
            page_size: 3,
            result_cap: Some(4),
        };
        let batches: Vec<Vec<Value>> = PageCursor::new(handle, target, SCAN_ALL_QUERY, options)
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[tokio::test]
    async fn empty_container_yields_nothing() {
        let (_manager, handle, target) = seeded(0).await;
        let mut stream =
            PageCursor::new(handle, target, SCAN_ALL_QUERY, ScanOptions::default()).into_stream();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_connection_surfaces_on_first_poll() {
        let (manager, handle, target) = seeded(3).await;
        let mut stream =
            PageCursor::new(handle, target, SCAN_ALL_QUERY, ScanOptions::default()).into_stream();
        manager.shutdown().await;
        let first = stream.next().await.expect("an item");
        assert!(matches!(first, Err(crate::error::StoreError::ConnectionClosed)));
        assert!(stream.next().await.is_none());
    }
}
