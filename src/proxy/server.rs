//! SwitchyardMcpServer: rmcp ServerHandler backed by SwitchyardRegistry.
//!
//! Every session clone shares the registry and the peers list. Downstream
//! callers see namespaced definitions and never talk to upstream servers
//! directly; each call goes through the registry's forwarder.

use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, GetPromptRequestParams, GetPromptResult,
    ListPromptsResult, ListToolsResult, PaginatedRequestParams, Prompt, ServerCapabilities,
    ServerInfo, Tool,
};
use rmcp::service::{NotificationContext, Peer, RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use tokio_util::sync::CancellationToken;

use crate::error::SwitchyardError;
use crate::registry::SwitchyardRegistry;

/// Which part of the catalog a server instance exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every routable tool and prompt.
    All,
    /// Only the routable tools of one tool group. No prompts.
    Group(String),
}

/// Shared list of connected session peers.
pub type Peers = Arc<tokio::sync::Mutex<Vec<Peer<RoleServer>>>>;

/// MCP server backed by a SwitchyardRegistry.
#[derive(Clone)]
pub struct SwitchyardMcpServer {
    registry: Arc<SwitchyardRegistry>,
    scope: Scope,
    /// Client name used to build the call context in production mode.
    client: Option<String>,
    peers: Peers,
}

impl SwitchyardMcpServer {
    pub fn new(registry: Arc<SwitchyardRegistry>, scope: Scope) -> Self {
        Self {
            registry,
            scope,
            client: None,
            peers: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    /// Identify every call made through this server as `client`.
    pub fn with_client(mut self, client: Option<String>) -> Self {
        self.client = client;
        self
    }

    /// Share an existing peers list, so one notifier task serves several scopes.
    pub fn with_peers(mut self, peers: Peers) -> Self {
        self.peers = peers;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Return the peers handle for the change notifier.
    pub fn peers_handle(&self) -> Peers {
        self.peers.clone()
    }

    pub(crate) async fn scoped_tools(&self) -> crate::Result<Vec<Tool>> {
        match &self.scope {
            Scope::All => Ok(self.registry.tools().await),
            Scope::Group(group) => self.registry.group_tools(group).await,
        }
    }

    pub(crate) async fn scoped_prompts(&self) -> Vec<Prompt> {
        match &self.scope {
            Scope::All => self.registry.prompts().await,
            Scope::Group(_) => Vec::new(),
        }
    }

    pub(crate) async fn forward_tool(
        &self,
        params: CallToolRequestParams,
        cancel: CancellationToken,
    ) -> crate::Result<CallToolResult> {
        let ctx = self
            .registry
            .context_for(self.client.as_deref(), cancel)
            .await?;
        match &self.scope {
            Scope::All => self.registry.call_tool(&ctx, params).await,
            Scope::Group(group) => self.registry.call_group_tool(&ctx, group, params).await,
        }
    }

    pub(crate) async fn forward_prompt(
        &self,
        params: GetPromptRequestParams,
        cancel: CancellationToken,
    ) -> crate::Result<GetPromptResult> {
        if let Scope::Group(group) = &self.scope {
            return Err(SwitchyardError::NotFound(
                "prompt".to_string(),
                format!("{} (group {group})", params.name),
            ));
        }
        let ctx = self
            .registry
            .context_for(self.client.as_deref(), cancel)
            .await?;
        self.registry.get_prompt(&ctx, params).await
    }
}

/// Map a gateway error onto the MCP error the downstream client sees.
pub(crate) fn to_mcp_error(err: SwitchyardError) -> McpError {
    match err {
        SwitchyardError::InvalidName(..) | SwitchyardError::NotFound(..) => {
            McpError::invalid_params(err.to_string(), None)
        }
        SwitchyardError::Forbidden(..) => McpError::invalid_request(err.to_string(), None),
        other => McpError::internal_error(other.to_string(), None),
    }
}

impl ServerHandler for SwitchyardMcpServer {
    fn get_info(&self) -> ServerInfo {
        let (instructions, capabilities) = match &self.scope {
            Scope::All => (
                "Switchyard MCP gateway. Tools and prompts are named <server>__<name>.".to_string(),
                ServerCapabilities::builder()
                    .enable_tools()
                    .enable_tool_list_changed()
                    .enable_prompts()
                    .enable_prompts_list_changed()
                    .build(),
            ),
            Scope::Group(group) => (
                format!("Switchyard MCP gateway, tool group '{group}'."),
                ServerCapabilities::builder()
                    .enable_tools()
                    .enable_tool_list_changed()
                    .build(),
            ),
        };
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "switchyard".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(instructions),
            capabilities,
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self.scoped_tools().await.map_err(to_mcp_error)?;
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.forward_tool(request, context.ct.clone())
            .await
            .map_err(to_mcp_error)
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            prompts: self.scoped_prompts().await,
            next_cursor: None,
            meta: None,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        self.forward_prompt(request, context.ct.clone())
            .await
            .map_err(to_mcp_error)
    }

    /// Remember the peer so list-changed notifications reach it.
    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        tracing::info!(scope = ?self.scope, "MCP client initialized");
        self.peers.lock().await.push(context.peer.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rmcp::model::ErrorCode;

    use crate::audit::MemoryAuditSink;
    use crate::config::ServerConfig;
    use crate::model::ServerMode;
    use crate::store::MemoryCatalog;
    use crate::test_support::{
        call_params, object_tool, prompt, prompt_params, FakeConnector, FakeUpstream,
    };

    async fn registry(mode: ServerMode) -> Arc<SwitchyardRegistry> {
        let connector = FakeConnector::new().with_upstream(
            "gh",
            FakeUpstream {
                tools: vec![object_tool("list_repos"), object_tool("create_issue")],
                prompts: vec![prompt("review")],
                ..FakeUpstream::default()
            },
        );
        let registry = SwitchyardRegistry::open(
            Arc::new(MemoryCatalog::new()),
            Arc::new(connector),
            Arc::new(MemoryAuditSink::new()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        registry.initialize(mode).await.unwrap();
        registry
            .register_server(ServerConfig::streamable_http("gh", "http://gh.invalid/mcp"))
            .await
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_get_info_per_scope() {
        let registry = registry(ServerMode::Development).await;
        let info = SwitchyardMcpServer::new(registry.clone(), Scope::All).get_info();
        assert_eq!(info.server_info.name, "switchyard");
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.prompts.is_some());

        let info = SwitchyardMcpServer::new(registry, Scope::Group("dev".to_string())).get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.prompts.is_none());
        assert!(info.instructions.unwrap().contains("dev"));
    }

    #[tokio::test]
    async fn test_whole_catalog_scope() {
        let server = SwitchyardMcpServer::new(registry(ServerMode::Development).await, Scope::All);
        assert_eq!(server.scoped_tools().await.unwrap().len(), 2);
        assert_eq!(server.scoped_prompts().await.len(), 1);

        let result = server
            .forward_tool(call_params("gh__list_repos"), CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        server
            .forward_prompt(prompt_params("gh__review"), CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_scope_limits_view_and_calls() {
        let registry = registry(ServerMode::Development).await;
        registry
            .create_group("triage", None, vec!["gh__create_issue".to_string()])
            .await
            .unwrap();
        let server = SwitchyardMcpServer::new(registry, Scope::Group("triage".to_string()));

        let tools = server.scoped_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "gh__create_issue");
        assert!(server.scoped_prompts().await.is_empty());

        let outside = server
            .forward_tool(call_params("gh__list_repos"), CancellationToken::new())
            .await;
        assert!(matches!(outside, Err(SwitchyardError::NotFound(..))));
        server
            .forward_tool(call_params("gh__create_issue"), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            server
                .forward_prompt(prompt_params("gh__review"), CancellationToken::new())
                .await,
            Err(SwitchyardError::NotFound(..))
        ));
    }

    #[tokio::test]
    async fn test_unknown_group_scope_is_not_found() {
        let server = SwitchyardMcpServer::new(
            registry(ServerMode::Development).await,
            Scope::Group("ghost".to_string()),
        );
        let err = server.scoped_tools().await.unwrap_err();
        assert_eq!(to_mcp_error(err).code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_production_client_identity() {
        let registry = registry(ServerMode::Production).await;
        registry
            .create_client("cursor", None, vec!["gh".to_string()])
            .await
            .unwrap();

        let anonymous = SwitchyardMcpServer::new(registry.clone(), Scope::All);
        let err = anonymous
            .forward_tool(call_params("gh__list_repos"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(to_mcp_error(err).code, ErrorCode::INVALID_REQUEST);

        let named = anonymous.clone().with_client(Some("cursor".to_string()));
        named
            .forward_tool(call_params("gh__list_repos"), CancellationToken::new())
            .await
            .unwrap();
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (
                SwitchyardError::InvalidName("x".to_string(), "bad".to_string()),
                ErrorCode::INVALID_PARAMS,
            ),
            (
                SwitchyardError::NotFound("tool".to_string(), "gh__x".to_string()),
                ErrorCode::INVALID_PARAMS,
            ),
            (
                SwitchyardError::Forbidden("cursor".to_string(), "gh".to_string()),
                ErrorCode::INVALID_REQUEST,
            ),
            (
                SwitchyardError::CallTimeout("gh".to_string()),
                ErrorCode::INTERNAL_ERROR,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(to_mcp_error(err).code, code);
        }
    }

    #[tokio::test]
    async fn test_clones_share_peers() {
        let server = SwitchyardMcpServer::new(registry(ServerMode::Development).await, Scope::All);
        let handle = server.peers_handle();
        let group = SwitchyardMcpServer::new(server.registry.clone(), Scope::Group("g".to_string()))
            .with_peers(handle.clone());
        assert!(Arc::ptr_eq(&server.peers, &handle));
        assert!(Arc::ptr_eq(&group.peers, &server.clone().peers));
    }
}
