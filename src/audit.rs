//! Audit events for forwarded calls.
//!
//! Every forwarded invocation emits a start event and a completion event that
//! share one request identifier. Sinks must never block or fail the call path:
//! emission errors are swallowed inside the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::model::CapabilityKind;

/// Phase of a forwarded call an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditPhase {
    Start,
    Complete,
}

/// One audit record. `success`, `duration_ms` and `error_message` are only
/// set on completion events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub request_id: Uuid,
    pub calling_identity: String,
    pub server_name: String,
    pub capability_name: String,
    pub capability_kind: CapabilityKind,
    pub phase: AuditPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Correlation data shared by the start and completion events of one call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub request_id: Uuid,
    pub calling_identity: String,
    pub server_name: String,
    pub capability_name: String,
    pub capability_kind: CapabilityKind,
}

impl CallRecord {
    pub fn start(&self) -> AuditEvent {
        AuditEvent {
            request_id: self.request_id,
            calling_identity: self.calling_identity.clone(),
            server_name: self.server_name.clone(),
            capability_name: self.capability_name.clone(),
            capability_kind: self.capability_kind,
            phase: AuditPhase::Start,
            success: None,
            duration_ms: None,
            error_message: None,
        }
    }

    pub fn complete(&self, elapsed: Duration, error: Option<String>) -> AuditEvent {
        AuditEvent {
            phase: AuditPhase::Complete,
            success: Some(error.is_none()),
            duration_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            error_message: error,
            ..self.start()
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events as structured `tracing` events on the
/// `switchyard::audit` target. Once closed, events are dropped.
#[derive(Debug, Default)]
pub struct TracingAuditSink {
    closed: AtomicBool,
}

impl TracingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop emitting. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        if !self.is_healthy() {
            return;
        }
        match event.phase {
            AuditPhase::Start => tracing::info!(
                target: "switchyard::audit",
                event_type = "mcp_call_start",
                request_id = %event.request_id,
                client_name = %event.calling_identity,
                server_name = %event.server_name,
                capability = %event.capability_name,
                kind = %event.capability_kind,
                "MCP call started"
            ),
            AuditPhase::Complete if event.success == Some(true) => tracing::info!(
                target: "switchyard::audit",
                event_type = "mcp_call",
                request_id = %event.request_id,
                client_name = %event.calling_identity,
                server_name = %event.server_name,
                capability = %event.capability_name,
                kind = %event.capability_kind,
                success = true,
                duration_ms = event.duration_ms.unwrap_or_default(),
                "MCP call completed"
            ),
            AuditPhase::Complete => tracing::error!(
                target: "switchyard::audit",
                event_type = "mcp_call",
                request_id = %event.request_id,
                client_name = %event.calling_identity,
                server_name = %event.server_name,
                capability = %event.capability_name,
                kind = %event.capability_kind,
                success = false,
                duration_ms = event.duration_ms.unwrap_or_default(),
                error = event.error_message.as_deref().unwrap_or_default(),
                "MCP call failed"
            ),
        }
    }
}

/// Keeps events in memory, for embedding hosts that ship them elsewhere and
/// for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in emission order.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> CallRecord {
        CallRecord {
            request_id: Uuid::new_v4(),
            calling_identity: "dev-client".to_string(),
            server_name: "gh".to_string(),
            capability_name: "list_repos".to_string(),
            capability_kind: CapabilityKind::Tool,
        }
    }

    #[test]
    fn test_start_and_complete_share_request_id() {
        let call = call();
        let start = call.start();
        let done = call.complete(Duration::from_millis(120), None);
        assert_eq!(start.request_id, done.request_id);
        assert_eq!(start.phase, AuditPhase::Start);
        assert_eq!(start.success, None);
        assert_eq!(done.success, Some(true));
        assert_eq!(done.duration_ms, Some(120));
    }

    #[test]
    fn test_failed_completion_carries_error() {
        let done = call().complete(Duration::from_millis(5), Some("boom".to_string()));
        assert_eq!(done.success, Some(false));
        assert_eq!(done.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_event_serialization_skips_unset_fields() {
        let start = serde_json::to_value(call().start()).unwrap();
        assert_eq!(start["phase"], "start");
        assert_eq!(start["capability_kind"], "tool");
        assert!(start.get("success").is_none());
        assert!(start.get("duration_ms").is_none());
    }

    #[test]
    fn test_tracing_sink_close() {
        let sink = TracingAuditSink::new();
        assert!(sink.is_healthy());
        sink.record(&call().start());
        sink.close();
        sink.close();
        assert!(!sink.is_healthy());
        // Recording after close is silently dropped.
        sink.record(&call().start());
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        let call = call();
        sink.record(&call.start());
        sink.record(&call.complete(Duration::ZERO, None));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, AuditPhase::Start);
        assert_eq!(events[1].phase, AuditPhase::Complete);
    }
}
