//! Catalog store port.
//!
//! The catalog is the durable source of truth for servers, their capabilities,
//! clients, tool groups and the config singleton. Multi-record mutations go
//! through [`CatalogTx`], which applies all of its changes on `commit` or none
//! of them when dropped.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    CapabilityKind, CapabilityRecord, ClientRecord, ConfigRecord, ServerMode, ServerRecord,
    ToolGroupRecord,
};

pub use memory::MemoryCatalog;

/// Result type for catalog store operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Errors returned by catalog store implementations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// A record with the same key already exists.
    #[error("duplicate {0}: {1}")]
    Duplicate(String, String),

    /// The referenced record does not exist.
    #[error("missing {0}: {1}")]
    Missing(String, String),

    /// Backend failure (connection, constraint, serialization).
    #[error("backend error: {0}")]
    Backend(String),
}

impl CatalogError {
    /// Convert into a gateway error for `operation`. Backend detail is logged
    /// here and not passed on to the caller.
    pub(crate) fn during(self, operation: &str) -> crate::SwitchyardError {
        match self {
            CatalogError::Duplicate(kind, name) => crate::SwitchyardError::AlreadyExists(kind, name),
            CatalogError::Missing(kind, name) => crate::SwitchyardError::NotFound(kind, name),
            CatalogError::Backend(detail) => {
                tracing::warn!(operation = %operation, error = %detail, "catalog store failure");
                crate::SwitchyardError::Store(operation.to_string())
            }
        }
    }
}

/// Persistence contract for the gateway catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Returns the config singleton; uninitialized when never written.
    async fn load_config(&self) -> CatalogResult<ConfigRecord>;

    /// Marks the catalog initialized in `mode`.
    ///
    /// Fails with [`CatalogError::Duplicate`] when already initialized.
    async fn initialize(&self, mode: ServerMode) -> CatalogResult<ConfigRecord>;

    /// Stores a new server. Fails with [`CatalogError::Duplicate`] on a name clash.
    async fn insert_server(&self, server: &ServerRecord) -> CatalogResult<()>;

    async fn find_server(&self, name: &str) -> CatalogResult<Option<ServerRecord>>;

    /// All servers ordered by name.
    async fn list_servers(&self) -> CatalogResult<Vec<ServerRecord>>;

    /// Creates or refreshes a capability. A refresh keeps the stored `enabled`
    /// flag. Returns the record as stored.
    ///
    /// Fails with [`CatalogError::Missing`] when the owning server does not exist.
    async fn upsert_capability(&self, record: &CapabilityRecord)
    -> CatalogResult<CapabilityRecord>;

    async fn find_capability(
        &self,
        kind: CapabilityKind,
        server: &str,
        name: &str,
    ) -> CatalogResult<Option<CapabilityRecord>>;

    /// Capabilities of `kind`, optionally restricted to one server, ordered by
    /// qualified name.
    async fn list_capabilities(
        &self,
        kind: CapabilityKind,
        server: Option<&str>,
    ) -> CatalogResult<Vec<CapabilityRecord>>;

    /// Sets `enabled` on every `(server, name)` target, atomically. Fails with
    /// [`CatalogError::Missing`] without changing anything if any target is absent.
    async fn set_enabled(
        &self,
        kind: CapabilityKind,
        targets: &[(String, String)],
        enabled: bool,
    ) -> CatalogResult<()>;

    /// Opens a transaction for multi-record deletes.
    async fn begin(&self) -> CatalogResult<Box<dyn CatalogTx>>;

    async fn insert_client(&self, client: &ClientRecord) -> CatalogResult<()>;

    async fn find_client(&self, name: &str) -> CatalogResult<Option<ClientRecord>>;

    async fn list_clients(&self) -> CatalogResult<Vec<ClientRecord>>;

    async fn delete_client(&self, name: &str) -> CatalogResult<()>;

    async fn insert_group(&self, group: &ToolGroupRecord) -> CatalogResult<()>;

    async fn find_group(&self, name: &str) -> CatalogResult<Option<ToolGroupRecord>>;

    async fn list_groups(&self) -> CatalogResult<Vec<ToolGroupRecord>>;

    async fn delete_group(&self, name: &str) -> CatalogResult<()>;
}

/// A unit of work over the catalog. Dropping without `commit` rolls back.
#[async_trait]
pub trait CatalogTx: Send {
    async fn delete_capability(
        &mut self,
        kind: CapabilityKind,
        server: &str,
        name: &str,
    ) -> CatalogResult<()>;

    /// Deletes a server record. Fails while capabilities still reference it.
    async fn delete_server(&mut self, name: &str) -> CatalogResult<()>;

    async fn commit(self: Box<Self>) -> CatalogResult<()>;
}
