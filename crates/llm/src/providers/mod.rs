pub mod responses;

use std::sync::Arc;

use toolgate_core::{ConfigError, EngineConfig};

use crate::credential::{CredentialProvider, MissingCredential, StaticCredential};
use responses::HttpResponseEngine;

/// Create the response engine described by config.
pub fn create_engine(config: &EngineConfig) -> Result<HttpResponseEngine, ConfigError> {
    let endpoint = config.require_endpoint()?;

    let credential: Arc<dyn CredentialProvider> = match &config.api_key {
        Some(key) => Arc::new(StaticCredential::new(key.clone())),
        None => {
            tracing::warn!("API_KEY not set, engine requests will fail");
            Arc::new(MissingCredential {
                hint: "API_KEY is not set".to_string(),
            })
        }
    };

    let engine = HttpResponseEngine::new(endpoint, config.model.clone(), credential);
    Ok(match &config.agent_name {
        Some(agent) => engine.with_agent(agent.clone()),
        None => engine,
    })
}
