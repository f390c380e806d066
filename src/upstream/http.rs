//! Streamable HTTP upstream sessions.
//!
//! No subprocess management here: build the transport from the server URL,
//! perform the MCP handshake within the configured timeout, hand back the
//! running client.

use std::time::Duration;

use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use tokio_util::sync::CancellationToken;

use crate::error::SwitchyardError;

/// Connect to a remote Streamable HTTP MCP server and perform the handshake.
pub async fn connect_and_handshake(
    server: &str,
    url: &str,
    bearer_token: Option<&str>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
) -> crate::Result<RunningService<RoleClient, ()>> {
    let transport = match bearer_token {
        Some(token) => {
            let mut config = StreamableHttpClientTransportConfig::with_uri(url.to_string());
            config.auth_header = Some(token.to_string());
            StreamableHttpClientTransport::from_config(config)
        }
        None => StreamableHttpClientTransport::from_uri(url.to_string()),
    };

    let handshake_result =
        tokio::time::timeout(handshake_timeout, ().serve_with_ct(transport, cancel)).await;

    match handshake_result {
        Err(_elapsed) => Err(SwitchyardError::UpstreamUnreachable(
            server.to_string(),
            format!(
                "HTTP MCP handshake timed out after {}s",
                handshake_timeout.as_secs()
            ),
        )),
        Ok(Err(e)) => Err(SwitchyardError::UpstreamUnreachable(
            server.to_string(),
            e.to_string(),
        )),
        Ok(Ok(running)) => {
            tracing::debug!(server = %server, url = %url, "HTTP MCP handshake complete");
            Ok(running)
        }
    }
}
