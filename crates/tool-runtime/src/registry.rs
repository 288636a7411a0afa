use crate::tool::{Tool, ToolCapability};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Aggregated tool catalog across every connected server.
///
/// Keyed by `(server_label, tool_name)`. Iteration order is deterministic
/// regardless of the order servers finished discovery in.
pub struct ToolRegistry {
    tools: BTreeMap<(String, String), Arc<dyn Tool>>,
    servers: HashMap<String, ServerEntry>,
}

#[derive(Debug, Clone, Default)]
struct ServerEntry {
    requires_approval: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            servers: HashMap::new(),
        }
    }

    /// Register every tool of one server. Either all tools are added or none:
    /// a duplicate `(server_label, tool_name)` pair rejects the whole batch.
    pub fn register_server(
        &mut self,
        server_label: &str,
        requires_approval: bool,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<usize, RegistryError> {
        let mut batch = BTreeSet::new();
        for tool in &tools {
            let name = tool.definition().name;
            let key = (server_label.to_string(), name.clone());
            if self.tools.contains_key(&key) || !batch.insert(name.clone()) {
                return Err(RegistryError::Duplicate {
                    server_label: server_label.to_string(),
                    tool_name: name,
                });
            }
        }

        let count = tools.len();
        for tool in tools {
            let name = tool.definition().name;
            self.tools.insert((server_label.to_string(), name), tool);
        }

        let entry = self.servers.entry(server_label.to_string()).or_default();
        entry.requires_approval |= requires_approval;

        tracing::debug!(server = %server_label, count, requires_approval, "Registered server tools");
        Ok(count)
    }

    /// Register a single tool under a server label.
    pub fn register(
        &mut self,
        server_label: &str,
        tool: impl Tool + 'static,
    ) -> Result<(), RegistryError> {
        self.register_server(server_label, false, vec![Arc::new(tool)])
            .map(|_| ())
    }

    /// Look up the tool that serves `(server_label, tool_name)`.
    pub fn resolve(&self, server_label: &str, tool_name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .get(&(server_label.to_string(), tool_name.to_string()))
            .cloned()
    }

    /// Whether calls routed to this server must pass the approval gate.
    ///
    /// Servers the registry has never seen are treated as gated.
    pub fn requires_approval(&self, server_label: &str) -> bool {
        self.servers
            .get(server_label)
            .map_or(true, |s| s.requires_approval)
    }

    /// Catalog entries for every registered tool (for sending to the engine).
    pub fn capabilities(&self) -> Vec<ToolCapability> {
        self.tools
            .iter()
            .map(|((server_label, _), tool)| {
                let def = tool.definition();
                ToolCapability {
                    server_label: server_label.clone(),
                    tool_name: def.name,
                    description: def.description,
                    parameter_schema: def.input_schema,
                }
            })
            .collect()
    }

    /// Labels of every registered server, sorted.
    pub fn server_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.servers.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool '{tool_name}' is already registered for server '{server_label}'")]
    Duplicate {
        server_label: String,
        tool_name: String,
    },
}
