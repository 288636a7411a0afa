//! Tool server descriptors.
//!
//! A descriptor identifies one tool server and how to reach it. Descriptors are
//! immutable once a session starts; they are usually read from the `[[server]]`
//! tables of a TOML file.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Wire family used to reach a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Subprocess speaking newline-delimited JSON-RPC on stdin/stdout.
    Process,
    /// One HTTP request per JSON-RPC exchange.
    Http,
    /// Long-lived WebSocket multiplexed by request id.
    Socket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Process => "process",
            Self::Http => "http",
            Self::Socket => "socket",
        })
    }
}

/// Where a tool server lives, tagged by transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Process {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        headers: BTreeMap<String, String>,
    },
    Socket {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl Endpoint {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Process { .. } => TransportKind::Process,
            Self::Http { .. } => TransportKind::Http,
            Self::Socket { .. } => TransportKind::Socket,
        }
    }

    /// Human-readable target for logs. Header and env values are left out.
    pub fn target(&self) -> String {
        match self {
            Self::Process { command, args, .. } => {
                if args.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, args.join(" "))
                }
            }
            Self::Http { url, .. } | Self::Socket { url, .. } => url.clone(),
        }
    }
}

/// Identifies one tool server for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor", into = "RawDescriptor")]
pub struct ToolServerDescriptor {
    /// Server label; unique within a session and used as the catalog key prefix.
    pub name: String,
    pub endpoint: Endpoint,
    /// Every call to this server's tools must pass the approval gate.
    pub requires_approval: bool,
    /// Tool names an allow-list policy approves without asking.
    pub allow: Vec<String>,
}

impl ToolServerDescriptor {
    pub fn process(name: impl Into<String>, command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::Process {
                command: command.into(),
                args: args.iter().map(|a| a.to_string()).collect(),
                env: BTreeMap::new(),
            },
            requires_approval: false,
            allow: Vec::new(),
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            requires_approval: false,
            allow: Vec::new(),
        }
    }

    pub fn socket(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: Endpoint::Socket {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            requires_approval: false,
            allow: Vec::new(),
        }
    }

    pub fn with_approval(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    /// Add a static header (http/socket) or environment variable (process).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.endpoint {
            Endpoint::Process { env, .. } => {
                env.insert(key.into(), value.into());
            }
            Endpoint::Http { headers, .. } | Endpoint::Socket { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
        }
        self
    }

    pub fn transport(&self) -> TransportKind {
        self.endpoint.kind()
    }

    /// Check that the descriptor names a reachable endpoint of its kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidServer {
            server: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(ConfigError::Missing("server name".to_string()));
        }

        match &self.endpoint {
            Endpoint::Process { command, .. } => {
                if command.trim().is_empty() {
                    return Err(invalid("process transport requires a command".to_string()));
                }
            }
            Endpoint::Http { url, .. } => check_scheme(url, &["http", "https"]).map_err(invalid)?,
            Endpoint::Socket { url, .. } => check_scheme(url, &["ws", "wss"]).map_err(invalid)?,
        }
        Ok(())
    }
}

/// Validate a list of descriptors: each must be valid and names must be unique.
pub fn validate_all(descriptors: &[ToolServerDescriptor]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for d in descriptors {
        d.validate()?;
        if !seen.insert(d.name.as_str()) {
            return Err(ConfigError::DuplicateServer(d.name.clone()));
        }
    }
    Ok(())
}

fn check_scheme(raw: &str, allowed: &[&str]) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url '{}': {}", raw, e))?;
    if allowed.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(format!(
            "url scheme '{}' not allowed here (expected {})",
            parsed.scheme(),
            allowed.join(" or ")
        ))
    }
}

// ── TOML / serde shape ────────────────────────────────────────

/// Flat on-disk shape of a `[[server]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDescriptor {
    name: String,
    transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    require_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    allow: Vec<String>,
}

impl TryFrom<RawDescriptor> for ToolServerDescriptor {
    type Error = ConfigError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        let missing = |field: &str| ConfigError::InvalidServer {
            server: raw.name.clone(),
            reason: format!("{} transport requires '{}'", raw.transport, field),
        };

        let endpoint = match raw.transport {
            TransportKind::Process => Endpoint::Process {
                command: raw.command.clone().ok_or_else(|| missing("command"))?,
                args: raw.args.clone(),
                env: raw.env.clone(),
            },
            TransportKind::Http => Endpoint::Http {
                url: raw.url.clone().ok_or_else(|| missing("url"))?,
                headers: raw.headers.clone(),
            },
            TransportKind::Socket => Endpoint::Socket {
                url: raw.url.clone().ok_or_else(|| missing("url"))?,
                headers: raw.headers.clone(),
            },
        };

        let descriptor = ToolServerDescriptor {
            name: raw.name,
            endpoint,
            requires_approval: raw.require_approval,
            allow: raw.allow,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl From<ToolServerDescriptor> for RawDescriptor {
    fn from(d: ToolServerDescriptor) -> Self {
        let transport = d.transport();
        let mut raw = RawDescriptor {
            name: d.name,
            transport,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            url: None,
            headers: BTreeMap::new(),
            require_approval: d.requires_approval,
            allow: d.allow,
        };
        match d.endpoint {
            Endpoint::Process { command, args, env } => {
                raw.command = Some(command);
                raw.args = args;
                raw.env = env;
            }
            Endpoint::Http { url, headers } | Endpoint::Socket { url, headers } => {
                raw.url = Some(url);
                raw.headers = headers;
            }
        }
        raw
    }
}
