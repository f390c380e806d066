//! Fake upstream collaborators shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, GetPromptRequestParams, GetPromptResult,
    Prompt, Tool,
};
use serde_json::{json, Value};

use crate::error::SwitchyardError;
use crate::model::{ServerRecord, TransportSpec};
use crate::upstream::{SessionConnector, UpstreamSession};

pub(crate) fn tool(name: &str, schema: Value) -> Tool {
    Tool {
        name: name.to_string().into(),
        title: None,
        description: Some(format!("{name} tool").into()),
        input_schema: Arc::new(schema.as_object().cloned().unwrap_or_default()),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

pub(crate) fn object_tool(name: &str) -> Tool {
    tool(name, json!({"type": "object", "properties": {}}))
}

pub(crate) fn prompt(name: &str) -> Prompt {
    serde_json::from_value(json!({
        "name": name,
        "description": format!("{name} prompt"),
        "arguments": [{"name": "topic", "required": false}]
    }))
    .unwrap()
}

pub(crate) fn http_server(name: &str) -> ServerRecord {
    ServerRecord {
        name: name.to_string(),
        description: None,
        transport: TransportSpec::StreamableHttp {
            url: format!("http://{name}.invalid/mcp"),
            bearer_token: None,
        },
    }
}

pub(crate) fn call_params(name: &str) -> CallToolRequestParams {
    CallToolRequestParams {
        name: name.to_string().into(),
        arguments: Some(json!({"q": 1}).as_object().unwrap().clone()),
        task: None,
        meta: None,
    }
}

pub(crate) fn prompt_params(name: &str) -> GetPromptRequestParams {
    serde_json::from_value(json!({"name": name, "arguments": {"topic": "rust"}})).unwrap()
}

/// Behaviour of one fake upstream server.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeUpstream {
    pub tools: Vec<Tool>,
    pub prompts: Vec<Prompt>,
    pub unreachable: bool,
    pub fail_listing: bool,
    pub fail_calls: bool,
    pub delay: Option<Duration>,
}

/// Connector that serves [`FakeUpstream`]s and counts session traffic.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeConnector {
    upstreams: Arc<Mutex<HashMap<String, FakeUpstream>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upstream(self, server: &str, upstream: FakeUpstream) -> Self {
        self.set_upstream(server, upstream);
        self
    }

    pub fn set_upstream(&self, server: &str, upstream: FakeUpstream) {
        self.upstreams
            .lock()
            .unwrap()
            .insert(server.to_string(), upstream);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sessions dropped, whether closed explicitly or abandoned mid-call.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// `(server, local name)` of every forwarded call, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn open(&self, server: &ServerRecord) -> crate::Result<Box<dyn UpstreamSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let upstream = self
            .upstreams
            .lock()
            .unwrap()
            .get(&server.name)
            .cloned()
            .unwrap_or_default();
        if upstream.unreachable {
            return Err(SwitchyardError::UpstreamUnreachable(
                server.name.clone(),
                "connection refused".to_string(),
            ));
        }
        Ok(Box::new(FakeSession {
            server: server.name.clone(),
            upstream,
            closes: self.closes.clone(),
            releases: self.releases.clone(),
            calls: self.calls.clone(),
        }))
    }
}

struct FakeSession {
    server: String,
    upstream: FakeUpstream,
    closes: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeSession {
    async fn invoke(&self, local: &str) -> crate::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((self.server.clone(), local.to_string()));
        if let Some(delay) = self.upstream.delay {
            tokio::time::sleep(delay).await;
        }
        if self.upstream.fail_calls {
            return Err(SwitchyardError::UpstreamCallFailed(
                self.server.clone(),
                format!("{local} exploded"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamSession for FakeSession {
    async fn list_tools(&mut self) -> crate::Result<Vec<Tool>> {
        if self.upstream.fail_listing {
            return Err(SwitchyardError::UpstreamCallFailed(
                self.server.clone(),
                "tools/list failed".to_string(),
            ));
        }
        Ok(self.upstream.tools.clone())
    }

    async fn list_prompts(&mut self) -> crate::Result<Vec<Prompt>> {
        if self.upstream.fail_listing {
            return Err(SwitchyardError::UpstreamCallFailed(
                self.server.clone(),
                "prompts/list failed".to_string(),
            ));
        }
        Ok(self.upstream.prompts.clone())
    }

    async fn call_tool(&mut self, params: CallToolRequestParams) -> crate::Result<CallToolResult> {
        self.invoke(&params.name).await?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{}:{}",
            self.server, params.name
        ))]))
    }

    async fn get_prompt(
        &mut self,
        params: GetPromptRequestParams,
    ) -> crate::Result<GetPromptResult> {
        self.invoke(&params.name).await?;
        Ok(serde_json::from_value(json!({
            "description": format!("{} rendered", params.name),
            "messages": [
                {"role": "user", "content": {"type": "text", "text": format!("about {}", params.name)}}
            ]
        }))
        .unwrap())
    }

    async fn close(self: Box<Self>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
