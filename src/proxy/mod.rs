//! MCP surface of the gateway: the rmcp server handler and the task that
//! tells connected clients when the routable listings change.

pub mod notify;
pub mod server;

pub use notify::run_change_notifier;
pub use server::{Scope, SwitchyardMcpServer};
