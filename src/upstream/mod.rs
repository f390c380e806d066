//! Ephemeral upstream sessions.
//!
//! A session is opened for a single registration listing or a single call and
//! closed right after. There is no pooling and no retry: a failed open surfaces
//! as [`SwitchyardError::UpstreamUnreachable`], a failed remote call as
//! [`SwitchyardError::UpstreamCallFailed`].

pub mod http;
pub mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, GetPromptRequestParams, GetPromptResult, Prompt, Tool,
};
use rmcp::service::RunningService;
use rmcp::RoleClient;
use tokio::process::Child;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::SwitchyardError;
use crate::model::{ServerRecord, TransportSpec};

/// An open session to one upstream server.
#[async_trait]
pub trait UpstreamSession: Send {
    async fn list_tools(&mut self) -> crate::Result<Vec<Tool>>;

    async fn list_prompts(&mut self) -> crate::Result<Vec<Prompt>>;

    async fn call_tool(&mut self, params: CallToolRequestParams) -> crate::Result<CallToolResult>;

    async fn get_prompt(
        &mut self,
        params: GetPromptRequestParams,
    ) -> crate::Result<GetPromptResult>;

    /// Tear the session down. Never fails; problems are logged.
    async fn close(self: Box<Self>);
}

/// Opens sessions from stored connection parameters.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, server: &ServerRecord) -> crate::Result<Box<dyn UpstreamSession>>;
}

/// Connector backed by the `rmcp` client for both supported transports.
#[derive(Debug, Clone)]
pub struct RmcpConnector {
    handshake_timeout: Duration,
}

impl RmcpConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for RmcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SessionConnector for RmcpConnector {
    async fn open(&self, server: &ServerRecord) -> crate::Result<Box<dyn UpstreamSession>> {
        let cancel = CancellationToken::new();
        tracing::debug!(
            server = %server.name,
            transport = server.transport.label(),
            "opening upstream session"
        );
        let (running, child) = match &server.transport {
            TransportSpec::StreamableHttp { url, bearer_token } => {
                let running = http::connect_and_handshake(
                    &server.name,
                    url,
                    bearer_token.as_deref(),
                    self.handshake_timeout,
                    cancel.clone(),
                )
                .await?;
                (running, None)
            }
            TransportSpec::LocalProcess {
                command,
                args,
                env,
                cwd,
            } => {
                let launch = stdio::Launch {
                    command,
                    args,
                    env,
                    cwd: cwd.as_deref(),
                };
                let (running, child) = stdio::spawn_and_handshake(
                    &server.name,
                    &launch,
                    self.handshake_timeout,
                    cancel.clone(),
                )
                .await?;
                (running, Some(child))
            }
        };
        Ok(Box::new(RmcpSession {
            server: server.name.clone(),
            running,
            child,
            _io_guard: cancel.drop_guard(),
        }))
    }
}

/// Live `rmcp` client session. Dropping it stops the IO tasks and kills a
/// spawned child process.
pub struct RmcpSession {
    server: String,
    running: RunningService<RoleClient, ()>,
    child: Option<Child>,
    _io_guard: DropGuard,
}

impl RmcpSession {
    fn call_failed(&self, err: impl std::fmt::Display) -> SwitchyardError {
        SwitchyardError::UpstreamCallFailed(self.server.clone(), err.to_string())
    }
}

#[async_trait]
impl UpstreamSession for RmcpSession {
    async fn list_tools(&mut self) -> crate::Result<Vec<Tool>> {
        self.running
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| self.call_failed(e))
    }

    async fn list_prompts(&mut self) -> crate::Result<Vec<Prompt>> {
        self.running
            .peer()
            .list_all_prompts()
            .await
            .map_err(|e| self.call_failed(e))
    }

    async fn call_tool(&mut self, params: CallToolRequestParams) -> crate::Result<CallToolResult> {
        self.running
            .peer()
            .call_tool(params)
            .await
            .map_err(|e| self.call_failed(e))
    }

    async fn get_prompt(
        &mut self,
        params: GetPromptRequestParams,
    ) -> crate::Result<GetPromptResult> {
        self.running
            .peer()
            .get_prompt(params)
            .await
            .map_err(|e| self.call_failed(e))
    }

    async fn close(self: Box<Self>) {
        let RmcpSession {
            server,
            running,
            child,
            _io_guard,
        } = *self;
        if let Err(e) = running.cancel().await {
            tracing::debug!(server = %server, error = %e, "upstream session task ended abnormally");
        }
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(server = %server, error = %e, "failed to kill upstream process");
            }
        }
        tracing::debug!(server = %server, "upstream session closed");
    }
}
