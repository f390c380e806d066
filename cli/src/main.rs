//! Switchyard: registry-synchronized MCP proxy gateway.
//!
//! Subcommands:
//! - `switchyard serve`: Streamable HTTP MCP server, whole catalog at `/mcp`
//!   and each tool group at `/groups/<name>/mcp`
//! - `switchyard stdio`: STDIO transport for STDIO-based MCP clients
//! - `switchyard check`: validate a config file without contacting any server

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, MethodRouter};
use axum::Router;
use clap::{Parser, Subcommand};
use nimbus_switchyard::{
    run_change_notifier, Scope, SwitchyardConfig, SwitchyardMcpServer, SwitchyardRegistry,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as TowerServiceExt;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "switchyard.toml";

/// Switchyard: registry-synchronized MCP proxy gateway.
#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Switchyard: registry-synchronized MCP proxy gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the gateway over Streamable HTTP
    Serve {
        /// Path to switchyard.toml [default: ./switchyard.toml or ~/.config/switchyard/switchyard.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// HTTP port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Client identity for every call (production mode)
        #[arg(long)]
        client: Option<String>,
    },
    /// Serve the gateway over STDIO
    Stdio {
        /// Path to switchyard.toml [default: ./switchyard.toml or ~/.config/switchyard/switchyard.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Client identity for every call (production mode)
        #[arg(long)]
        client: Option<String>,
        /// Expose only this tool group
        #[arg(long)]
        group: Option<String>,
    },
    /// Parse and validate a config file
    Check {
        /// Path to switchyard.toml [default: ./switchyard.toml or ~/.config/switchyard/switchyard.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity; stdout is reserved for the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down Switchyard...");
        cancel_for_signal.cancel();
    });

    match cli.command {
        Commands::Serve {
            config,
            port,
            host,
            client,
        } => {
            let config = resolve_config(config)?;
            run_serve(config, host, port, client, cancel).await?;
        }
        Commands::Stdio {
            config,
            client,
            group,
        } => {
            let config = resolve_config(config)?;
            run_stdio(config, client, group, cancel).await?;
        }
        Commands::Check { config } => {
            let config_path = resolve_config(config)?;
            let config = load_config(&config_path).await?;
            eprintln!(
                "{}: ok ({} mode, {} servers, {} clients, {} groups)",
                config_path.display(),
                config.mode,
                config.servers.len(),
                config.clients.len(),
                config.groups.len()
            );
        }
    }

    Ok(())
}

async fn build_registry(config_path: &Path) -> Result<Arc<SwitchyardRegistry>> {
    let config = load_config(config_path).await?;
    let registry = SwitchyardRegistry::from_config(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to build Switchyard registry: {}", e))?;
    Ok(Arc::new(registry))
}

/// Wrap one MCP server scope in a Streamable HTTP route.
fn mcp_route(server: SwitchyardMcpServer, cancel: &CancellationToken) -> MethodRouter {
    let http_config = StreamableHttpServerConfig {
        cancellation_token: cancel.child_token(),
        ..Default::default()
    };
    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        http_config,
    );
    any(move |req: Request<Body>| {
        let svc = mcp_service.clone();
        async move {
            match svc.oneshot(req).await {
                Ok(response) => response.into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
            }
        }
    })
}

/// Serve the whole catalog and every tool group over Streamable HTTP.
async fn run_serve(
    config_path: PathBuf,
    host: String,
    port: u16,
    client: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let registry = build_registry(&config_path).await?;

    let server = SwitchyardMcpServer::new(registry.clone(), Scope::All).with_client(client.clone());
    let peers = server.peers_handle();
    let mut app = Router::new().route("/mcp", mcp_route(server, &cancel));

    let groups = registry
        .list_groups()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to list tool groups: {}", e))?;
    for group in &groups {
        let scoped = SwitchyardMcpServer::new(registry.clone(), Scope::Group(group.name.clone()))
            .with_client(client.clone())
            .with_peers(peers.clone());
        let path = format!("/groups/{}/mcp", group.name);
        tracing::info!(group = %group.name, path = %path, "serving tool group");
        app = app.route(&path, mcp_route(scoped, &cancel));
    }

    tokio::spawn(run_change_notifier(
        registry.subscribe(),
        peers,
        cancel.child_token(),
    ));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!(host = %host, port = %port, groups = groups.len(), "Switchyard HTTP server listening");
    tracing::info!("Connect your MCP client to http://{}:{}/mcp", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| anyhow::anyhow!("Switchyard HTTP server error: {}", e))?;

    tracing::info!("Switchyard HTTP server stopped");
    Ok(())
}

/// Serve one scope over stdin/stdout.
async fn run_stdio(
    config_path: PathBuf,
    client: Option<String>,
    group: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let registry = build_registry(&config_path).await?;

    let scope = match group {
        Some(name) => {
            registry
                .get_group(&name)
                .await
                .map_err(|e| anyhow::anyhow!("Cannot serve tool group: {}", e))?;
            Scope::Group(name)
        }
        None => Scope::All,
    };
    let server = SwitchyardMcpServer::new(registry.clone(), scope).with_client(client);

    tokio::spawn(run_change_notifier(
        registry.subscribe(),
        server.peers_handle(),
        cancel.child_token(),
    ));

    let transport = (tokio::io::stdin(), tokio::io::stdout());
    let running = server
        .serve_with_ct(transport, cancel.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize Switchyard stdio transport: {:?}", e))?;

    tracing::info!("Switchyard stdio transport initialized, waiting for messages");

    tokio::select! {
        result = running.waiting() => {
            match result {
                Ok(reason) => {
                    tracing::info!(?reason, "Switchyard stdio transport completed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Switchyard stdio transport error");
                    return Err(anyhow::anyhow!("Switchyard stdio transport error: {}", e));
                }
            }
        }
        _ = cancel.cancelled() => {
            tracing::info!("Switchyard stdio transport cancelled");
        }
    }

    Ok(())
}

/// Resolve config file path: explicit flag → ./switchyard.toml → ~/.config/switchyard/switchyard.toml.
fn resolve_config(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let local = Path::new(CONFIG_FILE);
    if local.exists() {
        return Ok(local.to_path_buf());
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("switchyard").join(CONFIG_FILE);
        if xdg.exists() {
            return Ok(xdg);
        }
    }

    Err(anyhow::anyhow!(
        "No switchyard.toml found. Searched ./switchyard.toml and ~/.config/switchyard/switchyard.toml. \
         Use --config to specify a path."
    ))
}

/// Load, parse and validate a switchyard.toml config file.
async fn load_config(config_path: &Path) -> Result<SwitchyardConfig> {
    let content = tokio::fs::read_to_string(config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", config_path, e))?;
    SwitchyardConfig::from_toml_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", config_path, e))
}
