//! Switchyard configuration: deserialization and validation.
//!
//! `ServerConfig` doubles as the registration input of
//! [`SwitchyardRegistry::register_server`](crate::SwitchyardRegistry::register_server).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::SwitchyardError;
use crate::model::{ServerMode, ServerRecord, ToolGroupRecord, TransportSpec};
use crate::namespace::validate_name;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve env values for a spawned process.
///
/// `${VAR}` values are read from the gateway's environment; unknown variables
/// resolve to the empty string. Any other value is passed through as-is.
pub fn resolve_env_vars(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            let resolved = match parse_env_ref(v) {
                Some(var_name) => std::env::var(var_name).unwrap_or_default(),
                None => v.clone(),
            };
            (k.clone(), resolved)
        })
        .collect()
}

/// Top-level Switchyard configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchyardConfig {
    /// Mode used when the catalog is initialized for the first time.
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub audit: AuditConfig,
    /// Servers registered at startup, best-effort.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Clients keyed by name. Production mode only.
    #[serde(default)]
    pub clients: BTreeMap<String, ClientConfig>,
    /// Tool groups keyed by name.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::default(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            audit: AuditConfig::default(),
            servers: BTreeMap::new(),
            clients: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Registration input for one upstream MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub description: Option<String>,
    pub transport: TransportKind,
    // Streamable HTTP fields
    pub url: Option<String>,
    pub bearer_token: Option<String>,
    // Local process fields
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Supported upstream transports.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    StreamableHttp,
    #[serde(alias = "stdio")]
    LocalProcess,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    pub description: Option<String>,
    /// Server names the client may call. Empty means none.
    #[serde(default)]
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    pub description: Option<String>,
    /// Qualified tool names, in the order they are served.
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    60
}

impl ServerConfig {
    /// A streamable HTTP server with no credentials.
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            transport: TransportKind::StreamableHttp,
            url: Some(url.into()),
            bearer_token: None,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// A local process server launched as `command args...`.
    pub fn local_process(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            transport: TransportKind::LocalProcess,
            url: None,
            bearer_token: None,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Check the name and that exactly the selected transport's fields are set.
    pub fn validate(&self) -> crate::Result<()> {
        validate_name(&self.name)?;
        let name = &self.name;
        let invalid = |msg: String| Err(SwitchyardError::InvalidConfig(name.clone(), msg));

        match self.transport {
            TransportKind::StreamableHttp => {
                let Some(url) = self.url.as_deref() else {
                    return invalid("streamable-http transport requires 'url' field".to_string());
                };
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return invalid(format!("url must be http(s), got '{url}'"));
                }
                if self.command.is_some()
                    || !self.args.is_empty()
                    || !self.env.is_empty()
                    || self.cwd.is_some()
                {
                    return invalid(
                        "streamable-http transport must not set local-process fields".to_string(),
                    );
                }
            }
            TransportKind::LocalProcess => {
                match self.command.as_deref() {
                    Some(command) if !command.trim().is_empty() => {}
                    _ => {
                        return invalid(
                            "local-process transport requires non-empty 'command' field"
                                .to_string(),
                        );
                    }
                }
                if self.url.is_some() || self.bearer_token.is_some() {
                    return invalid(
                        "local-process transport must not set 'url' or 'bearer_token'".to_string(),
                    );
                }
                for (key, value) in &self.env {
                    if value.starts_with("${") && parse_env_ref(value).is_none_or(str::is_empty) {
                        return invalid(format!(
                            "env value for key '{key}' is a malformed ${{VAR}} reference: '{value}'"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate and convert into the stored server record.
    pub fn into_record(self) -> crate::Result<ServerRecord> {
        self.validate()?;
        let transport = match self.transport {
            TransportKind::StreamableHttp => TransportSpec::StreamableHttp {
                url: self.url.unwrap_or_default(),
                bearer_token: self.bearer_token,
            },
            TransportKind::LocalProcess => TransportSpec::LocalProcess {
                command: self.command.unwrap_or_default(),
                args: self.args,
                env: self.env,
                cwd: self.cwd,
            },
        };
        Ok(ServerRecord {
            name: self.name,
            description: self.description,
            transport,
        })
    }
}

impl SwitchyardConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: SwitchyardConfig = toml::from_str(content)
            .map_err(|e| SwitchyardError::InvalidConfig("config".to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config, failing fast before anything is registered.
    pub fn validate(&self) -> crate::Result<()> {
        if self.handshake_timeout_secs == 0 || self.call_timeout_secs == 0 {
            return Err(SwitchyardError::InvalidConfig(
                "config".to_string(),
                "timeouts must be greater than zero".to_string(),
            ));
        }

        let mut seen_servers: HashSet<&str> = HashSet::new();
        for server in self.servers.values() {
            server.validate()?;
            if !seen_servers.insert(server.name.as_str()) {
                return Err(SwitchyardError::AlreadyExists(
                    "server".to_string(),
                    server.name.clone(),
                ));
            }
        }

        if !self.clients.is_empty() && self.mode != ServerMode::Production {
            return Err(SwitchyardError::RequiresMode(
                "[clients]".to_string(),
                ServerMode::Production.to_string(),
            ));
        }
        for (name, client) in &self.clients {
            validate_name(name)?;
            for server in &client.allow {
                validate_name(server)?;
            }
        }

        for (name, group) in &self.groups {
            ToolGroupRecord::new(name, group.description.clone(), group.tools.clone())?;
        }

        Ok(())
    }
}
