//! Live dispatch table: qualified capability name -> upstream route.
//!
//! Every inbound call resolves its target here. The table only changes through
//! [`DispatchTable::apply`], which installs a whole [`DispatchChange`] under one
//! write guard, so readers observe either the state before a registry
//! operation or the state after it.

use std::collections::HashMap;

use rmcp::model::{Prompt, Tool};
use tokio::sync::{watch, RwLock};

use crate::model::{CapabilityKind, CapabilityRecord};

/// Forwarding target of a route: the owning server and the local name to use
/// on the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub server: String,
    pub local: String,
}

/// The downstream MCP definition served for a route.
#[derive(Debug, Clone)]
pub enum RouteDefinition {
    Tool(Tool),
    Prompt(Prompt),
}

#[derive(Debug, Clone)]
pub struct Route {
    pub target: RouteTarget,
    pub definition: RouteDefinition,
}

impl Route {
    /// Build the route for a catalog record.
    pub fn from_record(record: &CapabilityRecord) -> crate::Result<Self> {
        let definition = match record.kind {
            CapabilityKind::Tool => RouteDefinition::Tool(record.tool_definition()?),
            CapabilityKind::Prompt => RouteDefinition::Prompt(record.prompt_definition()?),
        };
        Ok(Self {
            target: RouteTarget {
                server: record.server.clone(),
                local: record.name.clone(),
            },
            definition,
        })
    }

    pub fn kind(&self) -> CapabilityKind {
        match self.definition {
            RouteDefinition::Tool(_) => CapabilityKind::Tool,
            RouteDefinition::Prompt(_) => CapabilityKind::Prompt,
        }
    }
}

/// A batch of inserts and removals applied atomically.
#[derive(Debug, Default)]
pub struct DispatchChange {
    pub insert: Vec<(String, Route)>,
    pub remove: Vec<(CapabilityKind, String)>,
}

impl DispatchChange {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Default)]
struct Routes {
    tools: HashMap<String, Route>,
    prompts: HashMap<String, Route>,
}

impl Routes {
    fn map_mut(&mut self, kind: CapabilityKind) -> &mut HashMap<String, Route> {
        match kind {
            CapabilityKind::Tool => &mut self.tools,
            CapabilityKind::Prompt => &mut self.prompts,
        }
    }

    fn map(&self, kind: CapabilityKind) -> &HashMap<String, Route> {
        match kind {
            CapabilityKind::Tool => &self.tools,
            CapabilityKind::Prompt => &self.prompts,
        }
    }
}

/// In-memory routing table read concurrently by every invocation.
pub struct DispatchTable {
    routes: RwLock<Routes>,
    /// Bumped after every applied change; drives list-changed notifications.
    revision: watch::Sender<u64>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            routes: RwLock::new(Routes::default()),
            revision,
        }
    }

    /// Look up a route by kind and qualified name.
    pub async fn lookup(&self, kind: CapabilityKind, qualified: &str) -> Option<RouteTarget> {
        self.routes
            .read()
            .await
            .map(kind)
            .get(qualified)
            .map(|route| route.target.clone())
    }

    /// Snapshot of all routed tool definitions, sorted by name.
    pub async fn tools(&self) -> Vec<Tool> {
        let routes = self.routes.read().await;
        let mut tools: Vec<Tool> = routes
            .tools
            .values()
            .filter_map(|route| match &route.definition {
                RouteDefinition::Tool(tool) => Some(tool.clone()),
                RouteDefinition::Prompt(_) => None,
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Snapshot of all routed prompt definitions, sorted by name.
    pub async fn prompts(&self) -> Vec<Prompt> {
        let routes = self.routes.read().await;
        let mut prompts: Vec<Prompt> = routes
            .prompts
            .values()
            .filter_map(|route| match &route.definition {
                RouteDefinition::Prompt(prompt) => Some(prompt.clone()),
                RouteDefinition::Tool(_) => None,
            })
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    /// Qualified names currently routed for `kind`, sorted.
    pub async fn names(&self, kind: CapabilityKind) -> Vec<String> {
        let mut names: Vec<String> = self.routes.read().await.map(kind).keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply a change under one write guard. Inserting an existing name
    /// overwrites it; removing an absent name is a no-op.
    ///
    /// Returns the routes that were removed or overwritten, so the caller can
    /// undo the change with [`DispatchTable::restore`].
    pub async fn apply(&self, change: DispatchChange) -> Vec<(String, Route)> {
        if change.is_empty() {
            return Vec::new();
        }
        let mut displaced = Vec::new();
        {
            let mut routes = self.routes.write().await;
            for (kind, name) in change.remove {
                if let Some(route) = routes.map_mut(kind).remove(&name) {
                    displaced.push((name, route));
                }
            }
            for (name, route) in change.insert {
                if let Some(previous) = routes.map_mut(route.kind()).insert(name.clone(), route) {
                    displaced.push((name, previous));
                }
            }
        }
        self.revision.send_modify(|rev| *rev += 1);
        displaced
    }

    /// Reinstall routes previously returned by [`DispatchTable::apply`].
    pub async fn restore(&self, routes: Vec<(String, Route)>) {
        self.apply(DispatchChange {
            insert: routes,
            remove: Vec::new(),
        })
        .await;
    }

    /// Subscribe to table revisions.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: CapabilityKind, server: &str, name: &str) -> CapabilityRecord {
        CapabilityRecord {
            kind,
            server: server.to_string(),
            name: name.to_string(),
            description: None,
            schema: match kind {
                CapabilityKind::Tool => json!({"type": "object"}),
                CapabilityKind::Prompt => json!([]),
            },
            output_schema: None,
            enabled: true,
        }
    }

    fn insert_change(records: &[CapabilityRecord]) -> DispatchChange {
        DispatchChange {
            insert: records
                .iter()
                .map(|r| (r.qualified_name(), Route::from_record(r).unwrap()))
                .collect(),
            remove: vec![],
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let table = DispatchTable::new();
        table
            .apply(insert_change(&[record(CapabilityKind::Tool, "gh", "list")]))
            .await;

        let target = table.lookup(CapabilityKind::Tool, "gh__list").await.unwrap();
        assert_eq!(target.server, "gh");
        assert_eq!(target.local, "list");
        assert!(table.lookup(CapabilityKind::Prompt, "gh__list").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_twice_overwrites() {
        let table = DispatchTable::new();
        let r = record(CapabilityKind::Tool, "gh", "list");
        table.apply(insert_change(&[r.clone()])).await;
        let displaced = table.apply(insert_change(&[r])).await;
        assert_eq!(displaced.len(), 1);
        assert_eq!(table.tools().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let table = DispatchTable::new();
        let displaced = table
            .apply(DispatchChange {
                insert: vec![],
                remove: vec![(CapabilityKind::Tool, "gh__missing".to_string())],
            })
            .await;
        assert!(displaced.is_empty());
    }

    #[tokio::test]
    async fn test_restore_undoes_removal() {
        let table = DispatchTable::new();
        table
            .apply(insert_change(&[
                record(CapabilityKind::Tool, "gh", "a"),
                record(CapabilityKind::Prompt, "gh", "p"),
            ]))
            .await;

        let removed = table
            .apply(DispatchChange {
                insert: vec![],
                remove: vec![
                    (CapabilityKind::Tool, "gh__a".to_string()),
                    (CapabilityKind::Prompt, "gh__p".to_string()),
                ],
            })
            .await;
        assert!(table.tools().await.is_empty());

        table.restore(removed).await;
        assert_eq!(table.names(CapabilityKind::Tool).await, vec!["gh__a"]);
        assert_eq!(table.names(CapabilityKind::Prompt).await, vec!["gh__p"]);
    }

    #[tokio::test]
    async fn test_revision_bumps_per_change() {
        let table = DispatchTable::new();
        let rx = table.subscribe();
        assert_eq!(table.revision(), 0);
        table
            .apply(insert_change(&[record(CapabilityKind::Tool, "gh", "a")]))
            .await;
        assert_eq!(*rx.borrow(), 1);
        table.apply(DispatchChange::default()).await;
        assert_eq!(table.revision(), 1, "empty changes do not bump the revision");
    }

    #[tokio::test]
    async fn test_definitions_are_namespaced() {
        let table = DispatchTable::new();
        table
            .apply(insert_change(&[
                record(CapabilityKind::Tool, "gh", "b"),
                record(CapabilityKind::Tool, "gh", "a"),
                record(CapabilityKind::Prompt, "gh", "review"),
            ]))
            .await;
        let names: Vec<String> = table.tools().await.iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec!["gh__a".to_string(), "gh__b".to_string()]);
        assert_eq!(table.prompts().await[0].name, "gh__review");
    }

    #[tokio::test]
    async fn test_concurrent_reads_are_stable() {
        let table = std::sync::Arc::new(DispatchTable::new());
        table
            .apply(insert_change(&[record(CapabilityKind::Tool, "gh", "list")]))
            .await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    assert!(table.lookup(CapabilityKind::Tool, "gh__list").await.is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
