//! Error taxonomy for the document repository
//!
//! This module provides:
//! - `StoreError`, the single error type every store, provisioning and repository call returns
//! - `ErrorKind` classification (category names, transient vs permanent)
//! - In-process error counters keyed by kind and operation

use anyhow::Context as _;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// RESOURCE KINDS
// =============================================================================

/// Store resource a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Account,
    Database,
    Container,
    Document,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Account => write!(f, "account"),
            ResourceKind::Database => write!(f, "database"),
            ResourceKind::Container => write!(f, "container"),
            ResourceKind::Document => write!(f, "document"),
        }
    }
}

// =============================================================================
// STORE ERROR
// =============================================================================

/// Errors surfaced by the connection, provisioning and repository layers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: ResourceKind, id: String },

    /// A create request collided with an existing resource.
    #[error("{resource} already exists: {id}")]
    Conflict { resource: ResourceKind, id: String },

    /// Database or container provisioning failed; startup must abort.
    #[error("provisioning {resource} `{id}` failed: {source}")]
    Provisioning {
        resource: ResourceKind,
        id: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Any other non-success status returned by the store.
    #[error("store responded with status {status}: {message}")]
    Status {
        status: u16,
        sub_status: Option<u32>,
        message: String,
    },

    /// Network or TLS failure before a response was received.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A stored document could not be turned into a domain entity.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The caller passed an id the store cannot address.
    #[error("invalid id `{0}`")]
    InvalidId(String),

    /// An operation that needs an id received an entity without one.
    #[error("entity has no id")]
    MissingId,

    /// Connection options were rejected before any request was made.
    #[error("configuration error: {0}")]
    Config(String),

    /// `connect` was called while a connection is already live.
    #[error("a store connection is already established")]
    AlreadyConnected,

    /// The connection was torn down (or never established).
    #[error("store connection is closed")]
    ConnectionClosed,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(resource: ResourceKind, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn conflict(resource: ResourceKind, id: impl Into<String>) -> Self {
        StoreError::Conflict {
            resource,
            id: id.into(),
        }
    }

    pub fn provisioning(resource: ResourceKind, id: impl Into<String>, source: StoreError) -> Self {
        StoreError::Provisioning {
            resource,
            id: id.into(),
            source: Box::new(source),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        StoreError::Status {
            status,
            sub_status: None,
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::Provisioning { .. } => ErrorKind::Provisioning,
            StoreError::Status { status, .. } => match status {
                401 | 403 => ErrorKind::Unauthorized,
                408 | 429 | 449 | 500..=599 => ErrorKind::Transient,
                _ => ErrorKind::Rejected,
            },
            StoreError::Transport(_) => ErrorKind::Transient,
            StoreError::InvalidDocument(_) | StoreError::Serialization(_) => {
                ErrorKind::InvalidDocument
            }
            StoreError::InvalidId(_) | StoreError::MissingId => ErrorKind::InvalidInput,
            StoreError::Config(_) | StoreError::AlreadyConnected => ErrorKind::Config,
            StoreError::ConnectionClosed => ErrorKind::ConnectionClosed,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Record this error against `operation` in the global counters.
    pub fn track(&self, operation: &str) {
        ERROR_METRICS.record_error(self.kind(), Some(operation));
    }
}

// =============================================================================
// ERROR KINDS
// =============================================================================

/// Coarse classification used for counters and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Provisioning,
    Unauthorized,
    Transient,
    Rejected,
    InvalidDocument,
    InvalidInput,
    Config,
    ConnectionClosed,
}

impl ErrorKind {
    /// Whether a higher layer could reasonably retry. Nothing in this crate retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "resource_not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Provisioning => "provisioning",
            ErrorKind::Unauthorized => "auth_error",
            ErrorKind::Transient => "transient",
            ErrorKind::Rejected => "store_rejected",
            ErrorKind::InvalidDocument => "invalid_document",
            ErrorKind::InvalidInput => "client_error",
            ErrorKind::Config | ErrorKind::ConnectionClosed => "lifecycle",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// ERROR TELEMETRY
// =============================================================================

/// Error counters for telemetry
#[derive(Debug)]
pub struct ErrorMetrics {
    /// Total error count by kind
    kind_counts: RwLock<HashMap<ErrorKind, AtomicU64>>,
    /// Error count by repository operation
    operation_errors: RwLock<HashMap<String, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            kind_counts: RwLock::new(HashMap::new()),
            operation_errors: RwLock::new(HashMap::new()),
        }
    }

    /// Record an error occurrence
    pub fn record_error(&self, kind: ErrorKind, operation: Option<&str>) {
        {
            let map = self.kind_counts.read();
            if let Some(counter) = map.get(&kind) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(map);
                let mut map = self.kind_counts.write();
                map.entry(kind)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(operation) = operation {
            let map = self.operation_errors.read();
            if let Some(counter) = map.get(operation) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(map);
                let mut map = self.operation_errors.write();
                map.entry(operation.to_string())
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::debug!(
            error_kind = %kind,
            operation = operation,
            category = kind.category(),
            "error recorded"
        );
    }

    pub fn get_kind_count(&self, kind: ErrorKind) -> u64 {
        self.kind_counts
            .read()
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_operation_count(&self, operation: &str) -> u64 {
        self.operation_errors
            .read()
            .get(operation)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get all error statistics
    pub fn get_stats(&self) -> ErrorStats {
        let kind_counts = self
            .kind_counts
            .read()
            .iter()
            .map(|(kind, counter)| (*kind, counter.load(Ordering::Relaxed)))
            .collect();

        let operation_errors = self
            .operation_errors
            .read()
            .iter()
            .map(|(op, counter)| (op.clone(), counter.load(Ordering::Relaxed)))
            .collect();

        ErrorStats {
            kind_counts,
            operation_errors,
        }
    }

    pub fn reset(&self) {
        self.kind_counts.write().clear();
        self.operation_errors.write().clear();
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Error statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub kind_counts: HashMap<ErrorKind, u64>,
    pub operation_errors: HashMap<String, u64>,
}

/// Global error metrics instance
pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);

// =============================================================================
// CONTEXT HELPERS
// =============================================================================

/// Extension trait for adding startup context to store results
pub trait ResultExt<T> {
    /// Add operation context
    fn with_operation(self, operation: &str) -> anyhow::Result<T>;
}

impl<T> ResultExt<T> for StoreResult<T> {
    fn with_operation(self, operation: &str) -> anyhow::Result<T> {
        self.with_context(|| format!("operation '{}' failed", operation))
    }
}
