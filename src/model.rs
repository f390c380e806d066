//! Catalog records persisted by the store and shared across the gateway.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rmcp::model::{Prompt, PromptArgument, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwitchyardError;
use crate::namespace::{compose, namespace_prompt, namespace_tool, validate_name};

/// Gateway operating mode, fixed when the gateway is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Open mode: every call is authorized under a placeholder identity.
    #[default]
    Development,
    /// Restricted mode: callers must be registered clients with an allow-list.
    Production,
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Development => f.write_str("development"),
            ServerMode::Production => f.write_str("production"),
        }
    }
}

/// Process-wide singleton configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub initialized: bool,
    pub mode: ServerMode,
}

/// Connection parameters for an upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportSpec {
    StreamableHttp {
        url: String,
        bearer_token: Option<String>,
    },
    LocalProcess {
        command: String,
        args: Vec<String>,
        /// Values may be `${VAR}` references, resolved at spawn time.
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    },
}

impl TransportSpec {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            TransportSpec::StreamableHttp { .. } => "streamable-http",
            TransportSpec::LocalProcess { .. } => "local-process",
        }
    }
}

/// A registered upstream MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: String,
    pub description: Option<String>,
    pub transport: TransportSpec,
}

/// Which kind of capability a record or route refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Tool => f.write_str("tool"),
            CapabilityKind::Prompt => f.write_str("prompt"),
        }
    }
}

/// A tool or prompt exposed by a registered server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub kind: CapabilityKind,
    pub server: String,
    /// Local (un-namespaced) name, unique per server and kind.
    pub name: String,
    pub description: Option<String>,
    /// Tools: the input JSON schema object. Prompts: the argument list.
    pub schema: Value,
    pub output_schema: Option<Value>,
    pub enabled: bool,
}

impl CapabilityRecord {
    /// Build a tool record from an upstream tool definition.
    ///
    /// Fails when the tool name is not a valid local name or the input schema
    /// does not describe an object.
    pub fn from_upstream_tool(server: &str, tool: &Tool) -> crate::Result<Self> {
        let qualified = compose(server, &tool.name)?;
        match tool.input_schema.get("type") {
            None => {}
            Some(Value::String(t)) if t == "object" => {}
            Some(other) => {
                return Err(SwitchyardError::InvalidConfig(
                    qualified,
                    format!("input schema must describe an object, got type {other}"),
                ));
            }
        }
        Ok(Self {
            kind: CapabilityKind::Tool,
            server: server.to_string(),
            name: tool.name.to_string(),
            description: tool.description.as_ref().map(|d| d.to_string()),
            schema: Value::Object((*tool.input_schema).clone()),
            output_schema: tool
                .output_schema
                .as_ref()
                .map(|s| Value::Object((**s).clone())),
            enabled: true,
        })
    }

    /// Build a prompt record from an upstream prompt definition.
    pub fn from_upstream_prompt(server: &str, prompt: &Prompt) -> crate::Result<Self> {
        let qualified = compose(server, &prompt.name)?;
        let arguments = prompt.arguments.as_deref().unwrap_or_default();
        if let Some(unnamed) = arguments.iter().position(|a| a.name.trim().is_empty()) {
            return Err(SwitchyardError::InvalidConfig(
                qualified,
                format!("prompt argument #{unnamed} has an empty name"),
            ));
        }
        let schema = match &prompt.arguments {
            None => Value::Null,
            Some(args) => serde_json::to_value(args)
                .map_err(|e| SwitchyardError::InvalidConfig(qualified, e.to_string()))?,
        };
        Ok(Self {
            kind: CapabilityKind::Prompt,
            server: server.to_string(),
            name: prompt.name.clone(),
            description: prompt.description.clone(),
            schema,
            output_schema: None,
            enabled: true,
        })
    }

    /// `server__name`.
    pub fn qualified_name(&self) -> String {
        format!("{}{}{}", self.server, crate::namespace::SEPARATOR, self.name)
    }

    /// Downstream (namespaced) MCP tool definition for this record.
    pub fn tool_definition(&self) -> crate::Result<Tool> {
        let Value::Object(input) = &self.schema else {
            return Err(SwitchyardError::InvalidConfig(
                self.qualified_name(),
                "stored tool schema is not an object".to_string(),
            ));
        };
        let mut tool = Tool::new(self.name.clone(), String::new(), Arc::new(input.clone()));
        tool.description = self.description.clone().map(Into::into);
        tool.output_schema = match &self.output_schema {
            Some(Value::Object(output)) => Some(Arc::new(output.clone())),
            _ => None,
        };
        Ok(namespace_tool(&self.server, tool))
    }

    /// Downstream (namespaced) MCP prompt definition for this record.
    pub fn prompt_definition(&self) -> crate::Result<Prompt> {
        let arguments: Option<Vec<PromptArgument>> = match &self.schema {
            Value::Null => None,
            schema => Some(serde_json::from_value(schema.clone()).map_err(|e| {
                SwitchyardError::InvalidConfig(self.qualified_name(), e.to_string())
            })?),
        };
        let prompt = Prompt::new(self.name.clone(), self.description.clone(), arguments);
        Ok(namespace_prompt(&self.server, prompt))
    }
}

/// A downstream MCP client allowed to call a set of servers (production mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub name: String,
    pub description: Option<String>,
    /// Server names this client may reach. Empty means no access.
    pub allow_list: Vec<String>,
}

impl ClientRecord {
    pub fn has_server_access(&self, server: &str) -> bool {
        self.allow_list.iter().any(|allowed| allowed == server)
    }
}

/// A named, ordered subset of qualified tool names served on its own endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolGroupRecord {
    pub name: String,
    pub description: Option<String>,
    pub tools: Vec<String>,
}

impl ToolGroupRecord {
    /// Validate the group name and normalize its members, dropping duplicates
    /// while keeping first-seen order.
    pub fn new(name: &str, description: Option<String>, tools: Vec<String>) -> crate::Result<Self> {
        validate_name(name)?;
        let mut members: Vec<String> = Vec::with_capacity(tools.len());
        for tool in tools {
            let Some((server, local)) = crate::namespace::decompose(&tool) else {
                return Err(SwitchyardError::InvalidName(
                    tool,
                    "group members must be qualified tool names".to_string(),
                ));
            };
            compose(server, local)?;
            if !members.contains(&tool) {
                members.push(tool);
            }
        }
        Ok(Self {
            name: name.to_string(),
            description,
            tools: members,
        })
    }

    pub fn contains(&self, qualified: &str) -> bool {
        self.tools.iter().any(|t| t == qualified)
    }
}
