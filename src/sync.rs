//! Registry synchronization: the only code path that mutates both the catalog
//! store and the dispatch table.
//!
//! Every mutation runs under one async mutation lock. Store writes happen
//! first, then the matching [`DispatchChange`] is applied in one batch, so an
//! invocation sees the table either before or after the whole operation.
//! Deregistration is the exception: routes are pulled before the store
//! transaction and put back if the transaction fails.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{Prompt, Tool};
use tokio::sync::Mutex;

use crate::dispatch::{DispatchChange, DispatchTable, Route};
use crate::error::SwitchyardError;
use crate::model::{CapabilityKind, CapabilityRecord, ServerRecord};
use crate::namespace::decompose;
use crate::store::{CatalogStore, CatalogTx};

/// How [`apply_batch`] treats a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Log the failure, skip the item and keep going.
    BestEffort,
    /// Stop at the first failure and return it.
    AllOrNothing,
}

/// One unit of work applied to each item of a batch.
#[async_trait]
pub(crate) trait BatchStep<I: Sync>: Send {
    type Output: Send;

    async fn apply(&mut self, item: &I) -> crate::Result<Self::Output>;

    /// Name used when logging a failed item.
    fn label(&self, item: &I) -> String;
}

#[derive(Debug)]
pub(crate) struct BatchOutcome<O> {
    pub applied: Vec<O>,
    pub skipped: usize,
}

/// Run `step` over `items` under `policy`.
pub(crate) async fn apply_batch<I, S>(
    policy: BatchPolicy,
    items: &[I],
    step: &mut S,
) -> crate::Result<BatchOutcome<S::Output>>
where
    I: Sync,
    S: BatchStep<I>,
{
    let mut outcome = BatchOutcome {
        applied: Vec::with_capacity(items.len()),
        skipped: 0,
    };
    for item in items {
        match step.apply(item).await {
            Ok(output) => outcome.applied.push(output),
            Err(e) => match policy {
                BatchPolicy::BestEffort => {
                    tracing::warn!(item = %step.label(item), error = %e, "skipping capability");
                    outcome.skipped += 1;
                }
                BatchPolicy::AllOrNothing => {
                    tracing::debug!(item = %step.label(item), error = %e, "batch aborted");
                    return Err(e);
                }
            },
        }
    }
    Ok(outcome)
}

/// Capabilities reported by an upstream server during registration.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub tools: Vec<Tool>,
    pub prompts: Vec<Prompt>,
}

enum Offered {
    Tool(Tool),
    Prompt(Prompt),
}

/// Converts an upstream definition to a record, checks that a route can be
/// built from it and persists it.
struct Persist<'a> {
    store: &'a dyn CatalogStore,
    server: &'a str,
}

#[async_trait]
impl<'a> BatchStep<Offered> for Persist<'a> {
    type Output = (CapabilityRecord, Route);

    async fn apply(&mut self, item: &Offered) -> crate::Result<Self::Output> {
        let record = match item {
            Offered::Tool(tool) => CapabilityRecord::from_upstream_tool(self.server, tool)?,
            Offered::Prompt(prompt) => CapabilityRecord::from_upstream_prompt(self.server, prompt)?,
        };
        let route = Route::from_record(&record)?;
        let stored = self
            .store
            .upsert_capability(&record)
            .await
            .map_err(|e| e.during(&format!("persist {} {}", record.kind, record.qualified_name())))?;
        Ok((stored, route))
    }

    fn label(&self, item: &Offered) -> String {
        match item {
            Offered::Tool(tool) => format!("tool {}/{}", self.server, tool.name),
            Offered::Prompt(prompt) => format!("prompt {}/{}", self.server, prompt.name),
        }
    }
}

/// Deletes capability records inside an open transaction.
struct Delete<'a> {
    tx: &'a mut Box<dyn CatalogTx>,
}

#[async_trait]
impl<'a> BatchStep<CapabilityRecord> for Delete<'a> {
    type Output = ();

    async fn apply(&mut self, record: &CapabilityRecord) -> crate::Result<()> {
        self.tx
            .delete_capability(record.kind, &record.server, &record.name)
            .await
            .map_err(|e| e.during(&format!("delete {} {}", record.kind, record.qualified_name())))
    }

    fn label(&self, record: &CapabilityRecord) -> String {
        format!("{} {}", record.kind, record.qualified_name())
    }
}

/// Guarded mutation path over the catalog store and dispatch table.
pub struct Synchronizer {
    store: Arc<dyn CatalogStore>,
    table: Arc<DispatchTable>,
    mutation: Mutex<()>,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn CatalogStore>, table: Arc<DispatchTable>) -> Self {
        Self {
            store,
            table,
            mutation: Mutex::new(()),
        }
    }

    /// Fill the dispatch table from every enabled capability in the catalog.
    ///
    /// Records whose definition cannot be rebuilt are logged and skipped.
    /// Returns the number of routes installed.
    pub async fn load_routes(&self) -> crate::Result<usize> {
        let _guard = self.mutation.lock().await;
        let mut change = DispatchChange::default();
        for kind in [CapabilityKind::Tool, CapabilityKind::Prompt] {
            let records = self
                .store
                .list_capabilities(kind, None)
                .await
                .map_err(|e| e.during("load routes"))?;
            for record in records.into_iter().filter(|r| r.enabled) {
                match Route::from_record(&record) {
                    Ok(route) => change.insert.push((record.qualified_name(), route)),
                    Err(e) => {
                        tracing::warn!(capability = %record.qualified_name(), error = %e, "skipping unroutable capability")
                    }
                }
            }
        }
        let count = change.insert.len();
        self.table.apply(change).await;
        Ok(count)
    }

    /// Persist a server and, best-effort, the capabilities it reported, then
    /// route every persisted enabled capability.
    ///
    /// Fails with `AlreadyExists` when the name is taken. Individual capability
    /// failures are logged and never reach the caller.
    pub async fn apply_registration(
        &self,
        server: &ServerRecord,
        discovered: Discovered,
    ) -> crate::Result<()> {
        let _guard = self.mutation.lock().await;

        self.store
            .insert_server(server)
            .await
            .map_err(|e| e.during(&format!("register server {}", server.name)))?;

        let items: Vec<Offered> = discovered
            .tools
            .into_iter()
            .map(Offered::Tool)
            .chain(discovered.prompts.into_iter().map(Offered::Prompt))
            .collect();
        let offered = items.len();

        let mut step = Persist {
            store: self.store.as_ref(),
            server: &server.name,
        };
        let outcome = apply_batch(BatchPolicy::BestEffort, &items, &mut step).await?;

        let persisted = outcome.applied.len();
        let change = DispatchChange {
            insert: outcome
                .applied
                .into_iter()
                .filter(|(record, _)| record.enabled)
                .map(|(record, route)| (record.qualified_name(), route))
                .collect(),
            remove: Vec::new(),
        };
        let routed = change.insert.len();
        self.table.apply(change).await;

        tracing::info!(
            server = %server.name,
            transport = server.transport.label(),
            offered,
            persisted,
            skipped = outcome.skipped,
            routed,
            "server registered"
        );
        Ok(())
    }

    /// Remove a server and everything it owns from the table and the store.
    ///
    /// All capability deletes and the server delete share one store
    /// transaction. On any failure the transaction is rolled back, the routes
    /// are reinstalled and `ConsistencyFailure` is returned.
    pub async fn apply_deregistration(&self, name: &str) -> crate::Result<()> {
        let _guard = self.mutation.lock().await;
        let operation = format!("deregister server {name}");

        if self
            .store
            .find_server(name)
            .await
            .map_err(|e| e.during(&operation))?
            .is_none()
        {
            return Err(SwitchyardError::NotFound(
                "server".to_string(),
                name.to_string(),
            ));
        }

        let mut owned = self
            .store
            .list_capabilities(CapabilityKind::Tool, Some(name))
            .await
            .map_err(|e| e.during(&operation))?;
        owned.extend(
            self.store
                .list_capabilities(CapabilityKind::Prompt, Some(name))
                .await
                .map_err(|e| e.during(&operation))?,
        );

        let pulled = self
            .table
            .apply(DispatchChange {
                insert: Vec::new(),
                remove: owned
                    .iter()
                    .map(|r| (r.kind, r.qualified_name()))
                    .collect(),
            })
            .await;

        if let Err(e) = self.delete_owned(name, &owned).await {
            self.table.restore(pulled).await;
            tracing::error!(server = %name, error = %e, "deregistration rolled back");
            return Err(SwitchyardError::ConsistencyFailure(operation, e.to_string()));
        }

        tracing::info!(server = %name, capabilities = owned.len(), "server deregistered");
        Ok(())
    }

    async fn delete_owned(&self, name: &str, owned: &[CapabilityRecord]) -> crate::Result<()> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| e.during("begin transaction"))?;
        apply_batch(
            BatchPolicy::AllOrNothing,
            owned,
            &mut Delete { tx: &mut tx },
        )
        .await?;
        tx.delete_server(name)
            .await
            .map_err(|e| e.during(&format!("delete server {name}")))?;
        tx.commit().await.map_err(|e| e.during("commit"))
    }

    /// Flip `enabled` on every capability of `kind` matched by `selector` and
    /// route or unroute them accordingly.
    ///
    /// A selector containing the separator names one capability; otherwise
    /// it names a server and matches all of its capabilities of `kind`.
    /// Returns the affected qualified names, sorted.
    pub async fn apply_enable_disable(
        &self,
        kind: CapabilityKind,
        selector: &str,
        enabled: bool,
    ) -> crate::Result<Vec<String>> {
        let _guard = self.mutation.lock().await;
        let operation = format!("{} {kind} {selector}", if enabled { "enable" } else { "disable" });

        let targets: Vec<CapabilityRecord> = match decompose(selector) {
            Some((server, local)) => self
                .store
                .find_capability(kind, server, local)
                .await
                .map_err(|e| e.during(&operation))?
                .into_iter()
                .collect(),
            None => self
                .store
                .list_capabilities(kind, Some(selector))
                .await
                .map_err(|e| e.during(&operation))?,
        };
        if targets.is_empty() {
            return Err(SwitchyardError::NotFound(
                kind.to_string(),
                selector.to_string(),
            ));
        }

        let change = if enabled {
            let mut insert = Vec::with_capacity(targets.len());
            for record in &targets {
                insert.push((record.qualified_name(), Route::from_record(record)?));
            }
            DispatchChange {
                insert,
                remove: Vec::new(),
            }
        } else {
            DispatchChange {
                insert: Vec::new(),
                remove: targets.iter().map(|r| (kind, r.qualified_name())).collect(),
            }
        };

        let pairs: Vec<(String, String)> = targets
            .iter()
            .map(|r| (r.server.clone(), r.name.clone()))
            .collect();
        self.store
            .set_enabled(kind, &pairs, enabled)
            .await
            .map_err(|e| e.during(&operation))?;
        self.table.apply(change).await;

        let mut names: Vec<String> = targets.iter().map(|r| r.qualified_name()).collect();
        names.sort();
        tracing::info!(kind = %kind, selector = %selector, enabled, count = names.len(), "capabilities toggled");
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCatalog;
    use crate::test_support::{http_server, object_tool, prompt, tool};
    use serde_json::json;

    fn setup() -> (MemoryCatalog, Arc<DispatchTable>, Synchronizer) {
        let catalog = MemoryCatalog::new();
        let table = Arc::new(DispatchTable::new());
        let sync = Synchronizer::new(Arc::new(catalog.clone()), table.clone());
        (catalog, table, sync)
    }

    fn discovered() -> Discovered {
        Discovered {
            tools: vec![object_tool("list"), object_tool("create")],
            prompts: vec![prompt("review")],
        }
    }

    struct Flaky;

    #[async_trait]
    impl BatchStep<u32> for Flaky {
        type Output = u32;

        async fn apply(&mut self, item: &u32) -> crate::Result<u32> {
            if *item % 2 == 0 {
                Err(SwitchyardError::Store(format!("item {item}")))
            } else {
                Ok(*item * 10)
            }
        }

        fn label(&self, item: &u32) -> String {
            item.to_string()
        }
    }

    #[tokio::test]
    async fn test_batch_policies() {
        let items = [1, 2, 3];
        let outcome = apply_batch(BatchPolicy::BestEffort, &items, &mut Flaky)
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec![10, 30]);
        assert_eq!(outcome.skipped, 1);

        let result = apply_batch(BatchPolicy::AllOrNothing, &items, &mut Flaky).await;
        assert!(matches!(result, Err(SwitchyardError::Store(detail)) if detail == "item 2"));
    }

    #[tokio::test]
    async fn test_registration_routes_all_capabilities() {
        let (catalog, table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();

        assert!(catalog.find_server("gh").await.unwrap().is_some());
        assert_eq!(
            table.names(CapabilityKind::Tool).await,
            vec!["gh__create", "gh__list"]
        );
        assert_eq!(table.names(CapabilityKind::Prompt).await, vec!["gh__review"]);
    }

    #[tokio::test]
    async fn test_registration_skips_broken_schema() {
        let (catalog, table, sync) = setup();
        let found = Discovered {
            tools: vec![
                object_tool("a"),
                tool("broken", json!({"type": "array"})),
                object_tool("c"),
            ],
            prompts: vec![],
        };
        sync.apply_registration(&http_server("s"), found)
            .await
            .unwrap();

        let stored = catalog
            .list_capabilities(CapabilityKind::Tool, Some("s"))
            .await
            .unwrap();
        let names: Vec<String> = stored.iter().map(|r| r.qualified_name()).collect();
        assert_eq!(names, vec!["s__a", "s__c"]);
        assert_eq!(table.names(CapabilityKind::Tool).await, vec!["s__a", "s__c"]);
    }

    #[tokio::test]
    async fn test_registration_skips_store_failure() {
        let (catalog, table, sync) = setup();
        catalog.fail_upsert_of("gh__create");
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        assert_eq!(table.names(CapabilityKind::Tool).await, vec!["gh__list"]);
    }

    #[tokio::test]
    async fn test_registration_rejects_duplicate_name() {
        let (_catalog, table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        let revision = table.revision();

        let again = sync
            .apply_registration(&http_server("gh"), discovered())
            .await;
        assert!(matches!(again, Err(SwitchyardError::AlreadyExists(kind, name)) if kind == "server" && name == "gh"));
        assert_eq!(table.revision(), revision);
    }

    #[tokio::test]
    async fn test_deregistration_removes_everything() {
        let (catalog, table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        sync.apply_registration(
            &http_server("jira"),
            Discovered {
                tools: vec![object_tool("search")],
                prompts: vec![],
            },
        )
        .await
        .unwrap();

        sync.apply_deregistration("gh").await.unwrap();

        assert!(catalog.find_server("gh").await.unwrap().is_none());
        assert!(catalog
            .list_capabilities(CapabilityKind::Tool, Some("gh"))
            .await
            .unwrap()
            .is_empty());
        assert!(catalog
            .list_capabilities(CapabilityKind::Prompt, Some("gh"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(table.names(CapabilityKind::Tool).await, vec!["jira__search"]);
        assert!(table.names(CapabilityKind::Prompt).await.is_empty());

        // The name is immediately reusable.
        sync.apply_registration(&http_server("gh"), Discovered::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deregistration_is_atomic_on_store_fault() {
        let (catalog, table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        sync.apply_enable_disable(CapabilityKind::Tool, "gh__create", false)
            .await
            .unwrap();
        catalog.fail_delete_of("gh__review");

        let before_tools = catalog
            .list_capabilities(CapabilityKind::Tool, None)
            .await
            .unwrap();
        let before_routes = table.names(CapabilityKind::Tool).await;

        let result = sync.apply_deregistration("gh").await;
        assert!(matches!(result, Err(SwitchyardError::ConsistencyFailure(op, _)) if op.contains("gh")));

        assert!(catalog.find_server("gh").await.unwrap().is_some());
        assert_eq!(
            catalog
                .list_capabilities(CapabilityKind::Tool, None)
                .await
                .unwrap(),
            before_tools
        );
        assert_eq!(
            catalog
                .list_capabilities(CapabilityKind::Prompt, Some("gh"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(table.names(CapabilityKind::Tool).await, before_routes);
        assert_eq!(table.names(CapabilityKind::Prompt).await, vec!["gh__review"]);
    }

    #[tokio::test]
    async fn test_deregistration_of_unknown_server() {
        let (_catalog, _table, sync) = setup();
        assert!(matches!(
            sync.apply_deregistration("ghost").await,
            Err(SwitchyardError::NotFound(kind, name)) if kind == "server" && name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_disable_server_keeps_records() {
        let (catalog, table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();

        let affected = sync
            .apply_enable_disable(CapabilityKind::Tool, "gh", false)
            .await
            .unwrap();
        assert_eq!(affected, vec!["gh__create", "gh__list"]);
        assert!(table.names(CapabilityKind::Tool).await.is_empty());

        let records = catalog
            .list_capabilities(CapabilityKind::Tool, Some("gh"))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.enabled));

        // Prompts are toggled independently.
        assert_eq!(table.names(CapabilityKind::Prompt).await, vec!["gh__review"]);

        let affected = sync
            .apply_enable_disable(CapabilityKind::Tool, "gh__list", true)
            .await
            .unwrap();
        assert_eq!(affected, vec!["gh__list"]);
        assert_eq!(table.names(CapabilityKind::Tool).await, vec!["gh__list"]);
    }

    #[tokio::test]
    async fn test_enable_disable_unknown_selector() {
        let (_catalog, _table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        for selector in ["gh__nope", "ghost"] {
            assert!(matches!(
                sync.apply_enable_disable(CapabilityKind::Tool, selector, false).await,
                Err(SwitchyardError::NotFound(..))
            ));
        }
        assert!(matches!(
            sync.apply_enable_disable(CapabilityKind::Prompt, "gh__list", false).await,
            Err(SwitchyardError::NotFound(kind, _)) if kind == "prompt"
        ));
    }

    #[tokio::test]
    async fn test_load_routes_skips_disabled() {
        let (catalog, _table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        sync.apply_enable_disable(CapabilityKind::Tool, "gh__list", false)
            .await
            .unwrap();

        let fresh_table = Arc::new(DispatchTable::new());
        let restarted = Synchronizer::new(Arc::new(catalog), fresh_table.clone());
        assert_eq!(restarted.load_routes().await.unwrap(), 2);
        assert_eq!(fresh_table.names(CapabilityKind::Tool).await, vec!["gh__create"]);
        assert_eq!(fresh_table.names(CapabilityKind::Prompt).await, vec!["gh__review"]);
    }

    #[tokio::test]
    async fn test_each_mutation_bumps_revision_once() {
        let (_catalog, table, sync) = setup();
        sync.apply_registration(&http_server("gh"), discovered())
            .await
            .unwrap();
        assert_eq!(table.revision(), 1);
        sync.apply_enable_disable(CapabilityKind::Tool, "gh", false)
            .await
            .unwrap();
        assert_eq!(table.revision(), 2);
        sync.apply_deregistration("gh").await.unwrap();
        assert_eq!(table.revision(), 3);
    }
}
