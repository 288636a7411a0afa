//! Connects a set of tool servers and builds the shared catalog.

use futures::future::join_all;
use std::sync::Arc;

use toolgate_core::{Timeouts, ToolServerDescriptor};
use toolgate_tool_runtime::{ToolCapability, ToolRegistry};

use crate::client::McpClient;
use crate::error::McpError;

/// Every reachable tool server plus the registry built from them.
///
/// A server that cannot be connected, initialized or listed is excluded
/// and the rest still load.
pub struct ToolHub {
    clients: Vec<McpClient>,
    registry: Arc<ToolRegistry>,
    excluded: Vec<(String, McpError)>,
}

impl ToolHub {
    /// Connect to all servers concurrently.
    ///
    /// Registration happens afterwards in descriptor order, so the outcome
    /// does not depend on which server answered first.
    pub async fn connect_all(descriptors: &[ToolServerDescriptor], timeouts: &Timeouts) -> Self {
        let attempts = join_all(
            descriptors
                .iter()
                .map(|descriptor| McpClient::connect(descriptor, timeouts)),
        )
        .await;

        let mut registry = ToolRegistry::new();
        let mut clients = Vec::new();
        let mut excluded = Vec::new();

        for (descriptor, attempt) in descriptors.iter().zip(attempts) {
            let client = match attempt {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(server = %descriptor.name, error = %e, "Excluding tool server");
                    excluded.push((descriptor.name.clone(), e));
                    continue;
                }
            };

            match registry.register_server(
                client.label(),
                client.requires_approval(),
                client.create_tool_adapters(),
            ) {
                Ok(_) => clients.push(client),
                Err(e) => {
                    tracing::warn!(server = %descriptor.name, error = %e, "Excluding tool server");
                    client.close().await;
                    excluded.push((descriptor.name.clone(), McpError::Protocol(e.to_string())));
                }
            }
        }

        tracing::info!(
            connected = clients.len(),
            excluded = excluded.len(),
            tools = registry.len(),
            "Tool catalog ready"
        );

        Self {
            clients,
            registry: Arc::new(registry),
            excluded,
        }
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn capabilities(&self) -> Vec<ToolCapability> {
        self.registry.capabilities()
    }

    pub fn clients(&self) -> &[McpClient] {
        &self.clients
    }

    /// Servers left out of the catalog, with the reason.
    pub fn excluded(&self) -> &[(String, McpError)] {
        &self.excluded
    }

    pub async fn close_all(&self) {
        join_all(self.clients.iter().map(|client| client.close())).await;
    }
}
