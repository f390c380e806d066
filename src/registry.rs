//! SwitchyardRegistry: the single public entry point for gateway operations.
//!
//! Ties the catalog store, dispatch table, synchronizer and forwarder
//! together, and owns the thinner catalog concerns: the config singleton,
//! clients, tool groups and read-only listings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, GetPromptRequestParams, GetPromptResult, Prompt, Tool,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::CallContext;
use crate::config::{ServerConfig, SwitchyardConfig};
use crate::dispatch::DispatchTable;
use crate::error::SwitchyardError;
use crate::forward::Forwarder;
use crate::model::{
    CapabilityKind, CapabilityRecord, ClientRecord, ConfigRecord, ServerMode, ServerRecord,
    ToolGroupRecord,
};
use crate::namespace::{decompose, validate_name};
use crate::store::{CatalogStore, MemoryCatalog};
use crate::sync::{Discovered, Synchronizer};
use crate::upstream::{RmcpConnector, SessionConnector};

/// Registry-synchronized MCP gateway.
pub struct SwitchyardRegistry {
    store: Arc<dyn CatalogStore>,
    table: Arc<DispatchTable>,
    connector: Arc<dyn SessionConnector>,
    sync: Synchronizer,
    forwarder: Forwarder,
}

impl SwitchyardRegistry {
    /// Open a registry over an existing catalog, routing every enabled
    /// capability it already holds.
    pub async fn open(
        store: Arc<dyn CatalogStore>,
        connector: Arc<dyn SessionConnector>,
        audit: Arc<dyn AuditSink>,
        call_timeout: Duration,
    ) -> crate::Result<Self> {
        let table = Arc::new(DispatchTable::new());
        let sync = Synchronizer::new(store.clone(), table.clone());
        let routed = sync.load_routes().await?;
        tracing::debug!(routes = routed, "dispatch table loaded");
        let forwarder = Forwarder::new(
            store.clone(),
            table.clone(),
            connector.clone(),
            audit,
            call_timeout,
        );
        Ok(Self {
            store,
            table,
            connector,
            sync,
            forwarder,
        })
    }

    /// Build an in-memory registry from validated config and seed it.
    ///
    /// Calls `config.validate()` first. Seed servers are registered
    /// best-effort: a server that cannot be reached is logged and skipped.
    pub async fn from_config(config: SwitchyardConfig) -> crate::Result<Self> {
        config.validate()?;

        let audit = TracingAuditSink::new();
        if !config.audit.enabled {
            audit.close();
        }
        let registry = Self::open(
            Arc::new(MemoryCatalog::new()),
            Arc::new(RmcpConnector::new(Duration::from_secs(
                config.handshake_timeout_secs,
            ))),
            Arc::new(audit),
            Duration::from_secs(config.call_timeout_secs),
        )
        .await?;
        registry.bootstrap(&config).await?;
        Ok(registry)
    }

    /// Initialize if needed, then register seed servers and create clients
    /// and groups that do not exist yet. Safe to run again on the same catalog.
    pub async fn bootstrap(&self, config: &SwitchyardConfig) -> crate::Result<()> {
        self.initialize(config.mode).await?;

        for server in config.servers.values() {
            if self.find_server(&server.name).await?.is_some() {
                tracing::debug!(server = %server.name, "seed server already registered");
                continue;
            }
            if let Err(e) = self.register_server(server.clone()).await {
                tracing::warn!(server = %server.name, error = %e, "failed to register seed server");
            }
        }

        for (name, client) in &config.clients {
            if self.store_find_client(name).await?.is_some() {
                continue;
            }
            self.create_client(name, client.description.clone(), client.allow.clone())
                .await?;
        }

        for (name, group) in &config.groups {
            if self
                .store
                .find_group(name)
                .await
                .map_err(|e| e.during("bootstrap groups"))?
                .is_some()
            {
                continue;
            }
            if let Err(e) = self
                .create_group(name, group.description.clone(), group.tools.clone())
                .await
            {
                tracing::warn!(group = %name, error = %e, "failed to create seed tool group");
            }
        }

        tracing::info!(
            mode = %config.mode,
            servers = self.list_servers().await?.len(),
            tools = self.table.names(CapabilityKind::Tool).await.len(),
            prompts = self.table.names(CapabilityKind::Prompt).await.len(),
            "registry bootstrapped"
        );
        Ok(())
    }

    // ---- config singleton ----

    /// Fix the gateway mode. Repeating the call with the same mode is a no-op;
    /// a different mode fails with `AlreadyInitialized`.
    pub async fn initialize(&self, mode: ServerMode) -> crate::Result<ConfigRecord> {
        let current = self.config().await?;
        if current.initialized {
            if current.mode == mode {
                return Ok(current);
            }
            return Err(SwitchyardError::AlreadyInitialized(current.mode.to_string()));
        }
        let config = self
            .store
            .initialize(mode)
            .await
            .map_err(|e| e.during("initialize"))?;
        tracing::info!(mode = %mode, "gateway initialized");
        Ok(config)
    }

    pub async fn config(&self) -> crate::Result<ConfigRecord> {
        self.store
            .load_config()
            .await
            .map_err(|e| e.during("load config"))
    }

    async fn mode(&self) -> crate::Result<ServerMode> {
        let config = self.config().await?;
        if !config.initialized {
            return Err(SwitchyardError::NotInitialized);
        }
        Ok(config.mode)
    }

    async fn require_mode(&self, operation: &str, required: ServerMode) -> crate::Result<()> {
        if self.mode().await? != required {
            return Err(SwitchyardError::RequiresMode(
                operation.to_string(),
                required.to_string(),
            ));
        }
        Ok(())
    }

    // ---- server lifecycle ----

    /// Register an upstream server and every capability it reports.
    ///
    /// The upstream session is used only to list tools and prompts and is
    /// closed before anything is persisted. A listing failure is logged and
    /// treated as an empty list.
    pub async fn register_server(&self, config: ServerConfig) -> crate::Result<ServerRecord> {
        self.mode().await?;
        let record = config.into_record()?;
        if self.find_server(&record.name).await?.is_some() {
            return Err(SwitchyardError::AlreadyExists(
                "server".to_string(),
                record.name.clone(),
            ));
        }

        let mut session = self.connector.open(&record).await?;
        let tools = session.list_tools().await.unwrap_or_else(|e| {
            tracing::warn!(server = %record.name, error = %e, "listing tools failed");
            Vec::new()
        });
        let prompts = session.list_prompts().await.unwrap_or_else(|e| {
            tracing::warn!(server = %record.name, error = %e, "listing prompts failed");
            Vec::new()
        });
        session.close().await;

        self.sync
            .apply_registration(&record, Discovered { tools, prompts })
            .await?;
        Ok(record)
    }

    /// Remove a server with all of its tools and prompts, or nothing at all.
    pub async fn deregister_server(&self, name: &str) -> crate::Result<()> {
        self.mode().await?;
        self.sync.apply_deregistration(name).await
    }

    pub async fn enable_tools(&self, selector: &str) -> crate::Result<Vec<String>> {
        self.toggle(CapabilityKind::Tool, selector, true).await
    }

    pub async fn disable_tools(&self, selector: &str) -> crate::Result<Vec<String>> {
        self.toggle(CapabilityKind::Tool, selector, false).await
    }

    pub async fn enable_prompts(&self, selector: &str) -> crate::Result<Vec<String>> {
        self.toggle(CapabilityKind::Prompt, selector, true).await
    }

    pub async fn disable_prompts(&self, selector: &str) -> crate::Result<Vec<String>> {
        self.toggle(CapabilityKind::Prompt, selector, false).await
    }

    async fn toggle(
        &self,
        kind: CapabilityKind,
        selector: &str,
        enabled: bool,
    ) -> crate::Result<Vec<String>> {
        self.mode().await?;
        self.sync.apply_enable_disable(kind, selector, enabled).await
    }

    // ---- reads ----

    async fn find_server(&self, name: &str) -> crate::Result<Option<ServerRecord>> {
        self.store
            .find_server(name)
            .await
            .map_err(|e| e.during("find server"))
    }

    pub async fn list_servers(&self) -> crate::Result<Vec<ServerRecord>> {
        self.store
            .list_servers()
            .await
            .map_err(|e| e.during("list servers"))
    }

    pub async fn get_server(&self, name: &str) -> crate::Result<ServerRecord> {
        self.find_server(name)
            .await?
            .ok_or_else(|| SwitchyardError::NotFound("server".to_string(), name.to_string()))
    }

    pub async fn list_tools(&self) -> crate::Result<Vec<CapabilityRecord>> {
        self.list_capabilities(CapabilityKind::Tool, None).await
    }

    pub async fn list_tools_by_server(&self, server: &str) -> crate::Result<Vec<CapabilityRecord>> {
        self.get_server(server).await?;
        self.list_capabilities(CapabilityKind::Tool, Some(server))
            .await
    }

    pub async fn get_tool(&self, qualified: &str) -> crate::Result<CapabilityRecord> {
        self.get_capability(CapabilityKind::Tool, qualified).await
    }

    pub async fn list_prompts(&self) -> crate::Result<Vec<CapabilityRecord>> {
        self.list_capabilities(CapabilityKind::Prompt, None).await
    }

    pub async fn list_prompts_by_server(
        &self,
        server: &str,
    ) -> crate::Result<Vec<CapabilityRecord>> {
        self.get_server(server).await?;
        self.list_capabilities(CapabilityKind::Prompt, Some(server))
            .await
    }

    pub async fn get_prompt_record(&self, qualified: &str) -> crate::Result<CapabilityRecord> {
        self.get_capability(CapabilityKind::Prompt, qualified).await
    }

    async fn list_capabilities(
        &self,
        kind: CapabilityKind,
        server: Option<&str>,
    ) -> crate::Result<Vec<CapabilityRecord>> {
        self.store
            .list_capabilities(kind, server)
            .await
            .map_err(|e| e.during(&format!("list {kind}s")))
    }

    async fn get_capability(
        &self,
        kind: CapabilityKind,
        qualified: &str,
    ) -> crate::Result<CapabilityRecord> {
        let (server, local) = decompose(qualified).ok_or_else(|| {
            SwitchyardError::InvalidName(
                qualified.to_string(),
                "expected <server>__<name>".to_string(),
            )
        })?;
        self.store
            .find_capability(kind, server, local)
            .await
            .map_err(|e| e.during(&format!("find {kind}")))?
            .ok_or_else(|| SwitchyardError::NotFound(kind.to_string(), qualified.to_string()))
    }

    // ---- clients ----

    async fn store_find_client(&self, name: &str) -> crate::Result<Option<ClientRecord>> {
        self.store
            .find_client(name)
            .await
            .map_err(|e| e.during("find client"))
    }

    /// Register a client allowed to reach `allow`. Production mode only.
    pub async fn create_client(
        &self,
        name: &str,
        description: Option<String>,
        allow: Vec<String>,
    ) -> crate::Result<ClientRecord> {
        self.require_mode("create client", ServerMode::Production)
            .await?;
        validate_name(name)?;
        for server in &allow {
            validate_name(server)?;
        }
        let client = ClientRecord {
            name: name.to_string(),
            description,
            allow_list: allow,
        };
        self.store
            .insert_client(&client)
            .await
            .map_err(|e| e.during("create client"))?;
        tracing::info!(client = %client.name, servers = client.allow_list.len(), "client created");
        Ok(client)
    }

    pub async fn get_client(&self, name: &str) -> crate::Result<ClientRecord> {
        self.require_mode("get client", ServerMode::Production)
            .await?;
        self.store_find_client(name)
            .await?
            .ok_or_else(|| SwitchyardError::NotFound("client".to_string(), name.to_string()))
    }

    pub async fn list_clients(&self) -> crate::Result<Vec<ClientRecord>> {
        self.require_mode("list clients", ServerMode::Production)
            .await?;
        self.store
            .list_clients()
            .await
            .map_err(|e| e.during("list clients"))
    }

    pub async fn delete_client(&self, name: &str) -> crate::Result<()> {
        self.require_mode("delete client", ServerMode::Production)
            .await?;
        self.store
            .delete_client(name)
            .await
            .map_err(|e| e.during("delete client"))
    }

    /// Resolve the call context for a caller.
    ///
    /// Development mode ignores `client`. In production mode a missing or
    /// unknown client yields an unresolved context: the forwarder refuses it
    /// and records the refusal under the presented name.
    pub async fn context_for(
        &self,
        client: Option<&str>,
        cancel: CancellationToken,
    ) -> crate::Result<CallContext> {
        let ctx = match (self.mode().await?, client) {
            (ServerMode::Development, _) => CallContext::development(),
            (ServerMode::Production, None) => CallContext::unresolved(None),
            (ServerMode::Production, Some(name)) => match self.store_find_client(name).await? {
                Some(record) => CallContext::production(record),
                None => {
                    tracing::debug!(client = %name, "unknown client");
                    CallContext::unresolved(Some(name))
                }
            },
        };
        Ok(ctx.with_cancel(cancel))
    }

    // ---- tool groups ----

    /// Create a tool group over existing catalog tools.
    pub async fn create_group(
        &self,
        name: &str,
        description: Option<String>,
        tools: Vec<String>,
    ) -> crate::Result<ToolGroupRecord> {
        self.mode().await?;
        let group = ToolGroupRecord::new(name, description, tools)?;
        for member in &group.tools {
            self.get_tool(member).await?;
        }
        self.store
            .insert_group(&group)
            .await
            .map_err(|e| e.during("create tool group"))?;
        tracing::info!(group = %group.name, tools = group.tools.len(), "tool group created");
        Ok(group)
    }

    pub async fn get_group(&self, name: &str) -> crate::Result<ToolGroupRecord> {
        self.store
            .find_group(name)
            .await
            .map_err(|e| e.during("find tool group"))?
            .ok_or_else(|| SwitchyardError::NotFound("tool group".to_string(), name.to_string()))
    }

    pub async fn list_groups(&self) -> crate::Result<Vec<ToolGroupRecord>> {
        self.store
            .list_groups()
            .await
            .map_err(|e| e.during("list tool groups"))
    }

    pub async fn delete_group(&self, name: &str) -> crate::Result<()> {
        self.store
            .delete_group(name)
            .await
            .map_err(|e| e.during("delete tool group"))
    }

    /// Currently routable members of a group, in group order. Disabled or
    /// deleted members stay in the group but are left out here.
    pub async fn group_tools(&self, name: &str) -> crate::Result<Vec<Tool>> {
        let group = self.get_group(name).await?;
        let mut routed: HashMap<String, Tool> = self
            .table
            .tools()
            .await
            .into_iter()
            .map(|tool| (tool.name.to_string(), tool))
            .collect();
        Ok(group
            .tools
            .iter()
            .filter_map(|member| routed.remove(member))
            .collect())
    }

    /// Forward a tool call made through a group endpoint.
    pub async fn call_group_tool(
        &self,
        ctx: &CallContext,
        group: &str,
        params: CallToolRequestParams,
    ) -> crate::Result<CallToolResult> {
        let group = self.get_group(group).await?;
        if !group.contains(&params.name) {
            return Err(SwitchyardError::NotFound(
                "tool".to_string(),
                format!("{} (group {})", params.name, group.name),
            ));
        }
        self.call_tool(ctx, params).await
    }

    // ---- invocation ----

    pub async fn call_tool(
        &self,
        ctx: &CallContext,
        params: CallToolRequestParams,
    ) -> crate::Result<CallToolResult> {
        self.mode().await?;
        self.forwarder.call_tool(ctx, params).await
    }

    pub async fn get_prompt(
        &self,
        ctx: &CallContext,
        params: GetPromptRequestParams,
    ) -> crate::Result<GetPromptResult> {
        self.mode().await?;
        self.forwarder.get_prompt(ctx, params).await
    }

    /// Namespaced definitions of every routable tool, sorted by name.
    pub async fn tools(&self) -> Vec<Tool> {
        self.table.tools().await
    }

    /// Namespaced definitions of every routable prompt, sorted by name.
    pub async fn prompts(&self) -> Vec<Prompt> {
        self.table.prompts().await
    }

    /// Watch dispatch table revisions; a change means the listings changed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.table.subscribe()
    }
}
