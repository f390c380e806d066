//! Mode-aware authorization of forwarded calls.
//!
//! Request metadata travels in an explicit [`CallContext`] built by the
//! registry for each call, so the check never depends on transport state.

use tokio_util::sync::CancellationToken;

use crate::error::SwitchyardError;
use crate::model::{ClientRecord, ServerMode};

/// Identity recorded for every call made in development mode.
pub const DEV_CLIENT_NAME: &str = "dev-client";

/// Identity recorded when a production call carries no client.
const ANONYMOUS: &str = "anonymous";

/// Per-call metadata threaded through the forwarder.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub mode: ServerMode,
    /// Resolved client; required in production mode.
    pub client: Option<ClientRecord>,
    /// Name the caller presented that matched no registered client.
    pub unresolved: Option<String>,
    /// Cancelled when the caller disconnects or gives up.
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Context for an open-mode call.
    pub fn development() -> Self {
        Self {
            mode: ServerMode::Development,
            client: None,
            unresolved: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for a restricted-mode call made by `client`.
    pub fn production(client: ClientRecord) -> Self {
        Self {
            mode: ServerMode::Production,
            client: Some(client),
            unresolved: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Restricted-mode context for a caller that did not resolve to a client.
    /// `claimed` is the name it presented, if any. Every access check fails.
    pub fn unresolved(claimed: Option<&str>) -> Self {
        Self {
            mode: ServerMode::Production,
            client: None,
            unresolved: claimed.map(str::to_string),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Name recorded in audit events for this caller.
    pub fn calling_identity(&self) -> &str {
        match (self.mode, &self.client) {
            (ServerMode::Development, _) => DEV_CLIENT_NAME,
            (ServerMode::Production, Some(client)) => &client.name,
            (ServerMode::Production, None) => self.unresolved.as_deref().unwrap_or(ANONYMOUS),
        }
    }
}

/// Check whether the caller in `ctx` may reach `server`.
///
/// Development mode authorizes everything. Production mode requires a client
/// whose allow-list contains the server.
pub fn check_access(ctx: &CallContext, server: &str) -> crate::Result<()> {
    match ctx.mode {
        ServerMode::Development => Ok(()),
        ServerMode::Production => match &ctx.client {
            Some(client) if client.has_server_access(server) => Ok(()),
            _ => Err(SwitchyardError::Forbidden(
                ctx.calling_identity().to_string(),
                server.to_string(),
            )),
        },
    }
}
