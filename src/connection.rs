//! Ownership of the one live store client.
//!
//! The manager holds the only strong reference to the store. Everything else
//! receives a [`ConnectionHandle`] (a weak reference), so after [`ConnectionManager::shutdown`]
//! every outstanding handle reports `ConnectionClosed` instead of reaching a
//! half-torn-down client.

use crate::config::{ConnectionMode, ConsistencyLevel};
use crate::cosmos::CosmosClient;
use crate::error::{StoreError, StoreResult};
use crate::store::DocumentStore;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

/// Account master key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey(String);

impl AccountKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// Everything needed to open a client against one account.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub endpoint: String,
    pub key: AccountKey,
    /// Most preferred first.
    pub preferred_regions: Vec<String>,
    pub consistency: ConsistencyLevel,
    pub mode: ConnectionMode,
    /// Only for the local emulator's self-signed certificate.
    pub accept_invalid_certs: bool,
}

impl ConnectionOptions {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: AccountKey::new(key),
            preferred_regions: vec!["East US 2".to_string()],
            consistency: ConsistencyLevel::Session,
            mode: ConnectionMode::Gateway,
            accept_invalid_certs: false,
        }
    }
}

/// Owns the process-wide store client for its whole lifetime.
#[derive(Default)]
pub struct ConnectionManager {
    slot: RwLock<Option<Arc<dyn DocumentStore>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gateway client from `options` and keep it as the live connection.
    ///
    /// No request is sent here; the first store call reaches the network.
    pub fn connect(&self, options: &ConnectionOptions) -> StoreResult<ConnectionHandle> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(StoreError::AlreadyConnected);
        }
        let client = CosmosClient::new(options)?;
        tracing::info!(
            endpoint = %client.endpoint(),
            regions = ?options.preferred_regions,
            consistency = %options.consistency,
            mode = %options.mode,
            "store client created"
        );
        let store: Arc<dyn DocumentStore> = Arc::new(client);
        let handle = ConnectionHandle::new(&store);
        *slot = Some(store);
        Ok(handle)
    }

    /// Adopt an already-built store (the in-memory backend, or a test double).
    pub fn attach(&self, store: Arc<dyn DocumentStore>) -> StoreResult<ConnectionHandle> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(StoreError::AlreadyConnected);
        }
        tracing::info!(backend = store.backend_name(), "store attached");
        let handle = ConnectionHandle::new(&store);
        *slot = Some(store);
        Ok(handle)
    }

    /// A new handle to the live connection.
    pub fn handle(&self) -> StoreResult<ConnectionHandle> {
        self.slot
            .read()
            .as_ref()
            .map(ConnectionHandle::new)
            .ok_or(StoreError::ConnectionClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Drop the live client and release its resources. Idempotent.
    pub async fn shutdown(&self) {
        let store = self.slot.write().take();
        match store {
            Some(store) => {
                let backend = store.backend_name();
                store.close().await;
                drop(store);
                tracing::info!(backend, "store connection closed");
            }
            None => tracing::debug!("store connection already closed"),
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Non-owning reference to the live store.
#[derive(Clone)]
pub struct ConnectionHandle {
    store: Weak<dyn DocumentStore>,
}

impl ConnectionHandle {
    fn new(store: &Arc<dyn DocumentStore>) -> Self {
        Self {
            store: Arc::downgrade(store),
        }
    }

    /// The store, or `ConnectionClosed` once the manager has shut down.
    pub fn store(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        self.store.upgrade().ok_or(StoreError::ConnectionClosed)
    }

    pub fn is_open(&self) -> bool {
        self.store.strong_count() > 0
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("open", &self.is_open())
            .finish()
    }
}
