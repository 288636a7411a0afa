use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use toolgate_core::descriptor::validate_all;
use toolgate_core::ToolServerDescriptor;

const FILE_NAME: &str = "toolgate.toml";

/// Shape of the tool server file: a list of `[[server]]` tables.
#[derive(Debug, Default, Deserialize)]
struct ServersFile {
    #[serde(default, rename = "server")]
    servers: Vec<ToolServerDescriptor>,
}

/// Return the default config directory path: ~/.config/toolgate/
pub fn default_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("could not determine user config directory")?
        .join("toolgate");
    Ok(config_dir)
}

/// Parse and validate tool server descriptors from TOML text.
pub fn parse_servers(content: &str) -> Result<Vec<ToolServerDescriptor>> {
    let file: ServersFile = toml::from_str(content).context("invalid tool server file")?;
    validate_all(&file.servers)?;
    Ok(file.servers)
}

/// Load tool servers from `path`, or from the first default location that
/// exists. No file at any default location means no servers.
pub fn load_servers(path: Option<&Path>) -> Result<Vec<ToolServerDescriptor>> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_locations()?.into_iter().find(|p| p.exists()) {
            Some(found) => found,
            None => {
                debug!("No tool server file found, starting without servers");
                return Ok(Vec::new());
            }
        },
    };

    debug!(?config_path, "Loading tool servers");
    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    parse_servers(&content).with_context(|| format!("failed to load {}", config_path.display()))
}

fn default_locations() -> Result<Vec<PathBuf>> {
    Ok(vec![
        PathBuf::from(FILE_NAME),
        default_config_dir()?.join(FILE_NAME),
    ])
}
