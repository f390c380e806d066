//! Switchyard: registry-synchronized MCP proxy gateway.
//! Registers upstream MCP servers (streamable HTTP or local process), keeps a
//! persistent catalog and an in-memory dispatch table of their namespaced tools
//! and prompts in step, and forwards each call over a fresh upstream session
//! with mode-aware authorization and audit events.

pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod model;
pub mod namespace;
pub mod proxy;
pub mod registry;
pub mod store;
pub mod sync;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use audit::{AuditEvent, AuditPhase, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth::{check_access, CallContext};
pub use config::{
    parse_env_ref, resolve_env_vars, AuditConfig, ClientConfig, GroupConfig, ServerConfig,
    SwitchyardConfig, TransportKind,
};
pub use error::{Result, SwitchyardError};
pub use model::{
    CapabilityKind, CapabilityRecord, ClientRecord, ConfigRecord, ServerMode, ServerRecord,
    ToolGroupRecord, TransportSpec,
};
pub use namespace::{compose, decompose, SEPARATOR};
pub use proxy::{run_change_notifier, Scope, SwitchyardMcpServer};
pub use registry::SwitchyardRegistry;
pub use store::{CatalogError, CatalogStore, MemoryCatalog};
pub use upstream::{RmcpConnector, SessionConnector, UpstreamSession};
