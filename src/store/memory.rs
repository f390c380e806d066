//! In-memory transactional catalog.
//!
//! Transactions take the catalog lock for their whole lifetime and mutate a
//! staged copy; `commit` swaps the copy in, drop discards it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    CapabilityKind, CapabilityRecord, ClientRecord, ConfigRecord, ServerMode, ServerRecord,
    ToolGroupRecord,
};
use crate::store::{CatalogError, CatalogResult, CatalogStore, CatalogTx};

type CapabilityKey = (CapabilityKind, String, String);

#[derive(Debug, Clone, Default)]
struct CatalogState {
    config: ConfigRecord,
    servers: BTreeMap<String, ServerRecord>,
    capabilities: BTreeMap<CapabilityKey, CapabilityRecord>,
    clients: BTreeMap<String, ClientRecord>,
    groups: BTreeMap<String, ToolGroupRecord>,
}

/// Injected failures, keyed by qualified capability name.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
struct FaultPlan {
    fail_delete: std::collections::HashSet<String>,
    fail_upsert: std::collections::HashSet<String>,
}

/// Thread-safe in-memory catalog store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
    #[cfg(test)]
    faults: Arc<std::sync::Mutex<FaultPlan>>,
}

impl MemoryCatalog {
    /// Creates an empty, uninitialized catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transactional delete of `qualified` fail.
    #[cfg(test)]
    pub(crate) fn fail_delete_of(&self, qualified: &str) {
        self.faults
            .lock()
            .unwrap()
            .fail_delete
            .insert(qualified.to_string());
    }

    /// Make every upsert of `qualified` fail.
    #[cfg(test)]
    pub(crate) fn fail_upsert_of(&self, qualified: &str) {
        self.faults
            .lock()
            .unwrap()
            .fail_upsert
            .insert(qualified.to_string());
    }

    #[cfg(test)]
    fn injected(&self, qualified: &str, delete: bool) -> CatalogResult<()> {
        let faults = self.faults.lock().unwrap();
        let set = if delete {
            &faults.fail_delete
        } else {
            &faults.fail_upsert
        };
        if set.contains(qualified) {
            return Err(CatalogError::Backend(format!(
                "injected fault on '{qualified}'"
            )));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected(&self, _qualified: &str, _delete: bool) -> CatalogResult<()> {
        Ok(())
    }
}

fn capability_key(kind: CapabilityKind, server: &str, name: &str) -> CapabilityKey {
    (kind, server.to_string(), name.to_string())
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn load_config(&self) -> CatalogResult<ConfigRecord> {
        Ok(self.state.lock().await.config)
    }

    async fn initialize(&self, mode: ServerMode) -> CatalogResult<ConfigRecord> {
        let mut state = self.state.lock().await;
        if state.config.initialized {
            return Err(CatalogError::Duplicate(
                "config".to_string(),
                state.config.mode.to_string(),
            ));
        }
        state.config = ConfigRecord {
            initialized: true,
            mode,
        };
        Ok(state.config)
    }

    async fn insert_server(&self, server: &ServerRecord) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        if state.servers.contains_key(&server.name) {
            return Err(CatalogError::Duplicate(
                "server".to_string(),
                server.name.clone(),
            ));
        }
        state.servers.insert(server.name.clone(), server.clone());
        Ok(())
    }

    async fn find_server(&self, name: &str) -> CatalogResult<Option<ServerRecord>> {
        Ok(self.state.lock().await.servers.get(name).cloned())
    }

    async fn list_servers(&self) -> CatalogResult<Vec<ServerRecord>> {
        Ok(self.state.lock().await.servers.values().cloned().collect())
    }

    async fn upsert_capability(
        &self,
        record: &CapabilityRecord,
    ) -> CatalogResult<CapabilityRecord> {
        self.injected(&record.qualified_name(), false)?;
        let mut state = self.state.lock().await;
        if !state.servers.contains_key(&record.server) {
            return Err(CatalogError::Missing(
                "server".to_string(),
                record.server.clone(),
            ));
        }
        let key = capability_key(record.kind, &record.server, &record.name);
        let mut stored = record.clone();
        if let Some(existing) = state.capabilities.get(&key) {
            stored.enabled = existing.enabled;
        }
        state.capabilities.insert(key, stored.clone());
        Ok(stored)
    }

    async fn find_capability(
        &self,
        kind: CapabilityKind,
        server: &str,
        name: &str,
    ) -> CatalogResult<Option<CapabilityRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .capabilities
            .get(&capability_key(kind, server, name))
            .cloned())
    }

    async fn list_capabilities(
        &self,
        kind: CapabilityKind,
        server: Option<&str>,
    ) -> CatalogResult<Vec<CapabilityRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<CapabilityRecord> = state
            .capabilities
            .values()
            .filter(|r| r.kind == kind && server.is_none_or(|s| r.server == s))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.qualified_name());
        Ok(records)
    }

    async fn set_enabled(
        &self,
        kind: CapabilityKind,
        targets: &[(String, String)],
        enabled: bool,
    ) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        for (server, name) in targets {
            if !state
                .capabilities
                .contains_key(&capability_key(kind, server, name))
            {
                return Err(CatalogError::Missing(
                    kind.to_string(),
                    format!("{server}{}{name}", crate::namespace::SEPARATOR),
                ));
            }
        }
        for (server, name) in targets {
            if let Some(record) = state
                .capabilities
                .get_mut(&capability_key(kind, server, name))
            {
                record.enabled = enabled;
            }
        }
        Ok(())
    }

    async fn begin(&self) -> CatalogResult<Box<dyn CatalogTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            catalog: self.clone(),
        }))
    }

    async fn insert_client(&self, client: &ClientRecord) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        if state.clients.contains_key(&client.name) {
            return Err(CatalogError::Duplicate(
                "client".to_string(),
                client.name.clone(),
            ));
        }
        state.clients.insert(client.name.clone(), client.clone());
        Ok(())
    }

    async fn find_client(&self, name: &str) -> CatalogResult<Option<ClientRecord>> {
        Ok(self.state.lock().await.clients.get(name).cloned())
    }

    async fn list_clients(&self) -> CatalogResult<Vec<ClientRecord>> {
        Ok(self.state.lock().await.clients.values().cloned().collect())
    }

    async fn delete_client(&self, name: &str) -> CatalogResult<()> {
        match self.state.lock().await.clients.remove(name) {
            Some(_) => Ok(()),
            None => Err(CatalogError::Missing("client".to_string(), name.to_string())),
        }
    }

    async fn insert_group(&self, group: &ToolGroupRecord) -> CatalogResult<()> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(&group.name) {
            return Err(CatalogError::Duplicate(
                "tool group".to_string(),
                group.name.clone(),
            ));
        }
        state.groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn find_group(&self, name: &str) -> CatalogResult<Option<ToolGroupRecord>> {
        Ok(self.state.lock().await.groups.get(name).cloned())
    }

    async fn list_groups(&self) -> CatalogResult<Vec<ToolGroupRecord>> {
        Ok(self.state.lock().await.groups.values().cloned().collect())
    }

    async fn delete_group(&self, name: &str) -> CatalogResult<()> {
        match self.state.lock().await.groups.remove(name) {
            Some(_) => Ok(()),
            None => Err(CatalogError::Missing(
                "tool group".to_string(),
                name.to_string(),
            )),
        }
    }
}

/// Staged transaction over [`MemoryCatalog`].
struct MemoryTx {
    guard: OwnedMutexGuard<CatalogState>,
    staged: CatalogState,
    catalog: MemoryCatalog,
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn delete_capability(
        &mut self,
        kind: CapabilityKind,
        server: &str,
        name: &str,
    ) -> CatalogResult<()> {
        let qualified = format!("{server}{}{name}", crate::namespace::SEPARATOR);
        self.catalog.injected(&qualified, true)?;
        match self
            .staged
            .capabilities
            .remove(&capability_key(kind, server, name))
        {
            Some(_) => Ok(()),
            None => Err(CatalogError::Missing(kind.to_string(), qualified)),
        }
    }

    async fn delete_server(&mut self, name: &str) -> CatalogResult<()> {
        if self.staged.capabilities.values().any(|r| r.server == name) {
            return Err(CatalogError::Backend(format!(
                "server '{name}' is still referenced by capabilities"
            )));
        }
        match self.staged.servers.remove(name) {
            Some(_) => Ok(()),
            None => Err(CatalogError::Missing("server".to_string(), name.to_string())),
        }
    }

    async fn commit(self: Box<Self>) -> CatalogResult<()> {
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
