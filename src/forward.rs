//! Per-invocation call forwarding.
//!
//! Each call walks `Received -> Authorized -> Dispatching -> Forwarding` and
//! ends `Completed` or `Failed`. Name and route problems fail before any audit
//! event; an authorization failure emits a lone completion event; everything
//! after that emits a start and a completion event sharing one request id.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, GetPromptRequestParams, GetPromptResult};
use uuid::Uuid;

use crate::audit::{AuditSink, CallRecord};
use crate::auth::{check_access, CallContext};
use crate::dispatch::{DispatchTable, RouteTarget};
use crate::error::SwitchyardError;
use crate::model::CapabilityKind;
use crate::namespace::decompose;
use crate::store::CatalogStore;
use crate::upstream::{SessionConnector, UpstreamSession};

/// States of a forwarded call, reported in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Received,
    Authorized,
    Dispatching,
    Forwarding,
    Completed,
    Failed,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CallPhase::Received => "received",
            CallPhase::Authorized => "authorized",
            CallPhase::Dispatching => "dispatching",
            CallPhase::Forwarding => "forwarding",
            CallPhase::Completed => "completed",
            CallPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A downstream request that can be forwarded to an upstream session.
#[async_trait]
pub(crate) trait Invocation: Send + Sized {
    type Reply: Send;

    const KIND: CapabilityKind;

    /// The qualified name the caller asked for.
    fn qualified(&self) -> &str;

    /// Rewrite to `local` and send over `session`.
    async fn send(self, session: &mut dyn UpstreamSession, local: String)
    -> crate::Result<Self::Reply>;
}

#[async_trait]
impl Invocation for CallToolRequestParams {
    type Reply = CallToolResult;

    const KIND: CapabilityKind = CapabilityKind::Tool;

    fn qualified(&self) -> &str {
        &self.name
    }

    async fn send(
        mut self,
        session: &mut dyn UpstreamSession,
        local: String,
    ) -> crate::Result<CallToolResult> {
        self.name = local.into();
        session.call_tool(self).await
    }
}

#[async_trait]
impl Invocation for GetPromptRequestParams {
    type Reply = GetPromptResult;

    const KIND: CapabilityKind = CapabilityKind::Prompt;

    fn qualified(&self) -> &str {
        &self.name
    }

    async fn send(
        mut self,
        session: &mut dyn UpstreamSession,
        local: String,
    ) -> crate::Result<GetPromptResult> {
        self.name = local.into();
        session.get_prompt(self).await
    }
}

/// Forwards invocations resolved through the dispatch table.
pub struct Forwarder {
    store: Arc<dyn CatalogStore>,
    table: Arc<DispatchTable>,
    connector: Arc<dyn SessionConnector>,
    audit: Arc<dyn AuditSink>,
    call_timeout: Duration,
}

impl Forwarder {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        table: Arc<DispatchTable>,
        connector: Arc<dyn SessionConnector>,
        audit: Arc<dyn AuditSink>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            table,
            connector,
            audit,
            call_timeout,
        }
    }

    /// Invoke a tool by qualified name. The result is relayed unchanged.
    pub async fn call_tool(
        &self,
        ctx: &CallContext,
        params: CallToolRequestParams,
    ) -> crate::Result<CallToolResult> {
        self.forward(ctx, params).await
    }

    /// Render a prompt by qualified name. The result is relayed unchanged.
    pub async fn get_prompt(
        &self,
        ctx: &CallContext,
        params: GetPromptRequestParams,
    ) -> crate::Result<GetPromptResult> {
        self.forward(ctx, params).await
    }

    async fn forward<V: Invocation>(&self, ctx: &CallContext, invocation: V) -> crate::Result<V::Reply> {
        let qualified = invocation.qualified().to_string();
        tracing::trace!(capability = %qualified, phase = %CallPhase::Received);

        if decompose(&qualified).is_none() {
            return Err(SwitchyardError::InvalidName(
                qualified,
                "expected <server>__<name>".to_string(),
            ));
        }
        let target = self
            .table
            .lookup(V::KIND, &qualified)
            .await
            .ok_or_else(|| SwitchyardError::NotFound(V::KIND.to_string(), qualified.clone()))?;

        let record = CallRecord {
            request_id: Uuid::new_v4(),
            calling_identity: ctx.calling_identity().to_string(),
            server_name: target.server.clone(),
            capability_name: target.local.clone(),
            capability_kind: V::KIND,
        };

        if let Err(e) = check_access(ctx, &target.server) {
            tracing::debug!(
                request_id = %record.request_id,
                capability = %qualified,
                phase = %CallPhase::Failed,
                error = %e,
                "call rejected"
            );
            self.audit
                .record(&record.complete(Duration::ZERO, Some(e.to_string())));
            return Err(e);
        }
        tracing::trace!(request_id = %record.request_id, phase = %CallPhase::Authorized);

        self.audit.record(&record.start());
        let started = Instant::now();
        let result = self.dispatch(ctx, &record, target, invocation).await;
        let elapsed = started.elapsed();

        let phase = if result.is_ok() {
            CallPhase::Completed
        } else {
            CallPhase::Failed
        };
        tracing::debug!(
            request_id = %record.request_id,
            capability = %qualified,
            phase = %phase,
            duration_ms = elapsed.as_millis() as u64,
            "call finished"
        );
        self.audit.record(
            &record.complete(elapsed, result.as_ref().err().map(ToString::to_string)),
        );
        result
    }

    async fn dispatch<V: Invocation>(
        &self,
        ctx: &CallContext,
        record: &CallRecord,
        target: RouteTarget,
        invocation: V,
    ) -> crate::Result<V::Reply> {
        tracing::trace!(request_id = %record.request_id, phase = %CallPhase::Dispatching);
        let server = self
            .store
            .find_server(&target.server)
            .await
            .map_err(|e| e.during(&format!("resolve server {}", target.server)))?
            .ok_or_else(|| SwitchyardError::NotFound("server".to_string(), target.server.clone()))?;

        tracing::trace!(request_id = %record.request_id, phase = %CallPhase::Forwarding);
        let name = server.name.clone();
        let work = async {
            let mut session = self.connector.open(&server).await?;
            let result = invocation.send(session.as_mut(), target.local).await;
            session.close().await;
            result
        };

        // Dropping `work` on cancel or timeout drops the session, which stops
        // its IO tasks and kills any spawned process.
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(SwitchyardError::Cancelled(name)),
            outcome = tokio::time::timeout(self.call_timeout, work) => match outcome {
                Ok(result) => result,
                Err(_elapsed) => Err(SwitchyardError::CallTimeout(name)),
            },
        }
    }
}
