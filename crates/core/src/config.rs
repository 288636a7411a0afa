use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Key/value source the config is assembled from. `from_env` uses the process
/// environment; tests pass a closure over a map.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: Lookup<'_>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

fn profiled_or(lookup: Lookup<'_>, profile: &str, key: &str, default: &str) -> String {
    profiled_opt(lookup, profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_parse<T: std::str::FromStr>(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match profiled_opt(lookup, profile, key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            reason: format!("cannot parse '{}'", raw),
        }),
        None => Ok(default),
    }
}

fn profiled_secs(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    profiled_parse(lookup, profile, key, default).map(Duration::from_secs)
}

// ── Top-level config ──────────────────────────────────────────

/// Session-wide configuration, assembled once at startup and passed by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub timeouts: Timeouts,
    pub approval_mode: ApprovalMode,
    pub max_round_trips: usize,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TOOLGATE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Build config from an arbitrary key/value source.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let profile = lookup("TOOLGATE_PROFILE")
            .unwrap_or_default()
            .to_uppercase();
        let p = profile.as_str();

        let approval_mode = profiled_or(lookup, p, "APPROVAL_MODE", "manual")
            .parse::<ApprovalMode>()?;

        Ok(Self {
            profile: profile.clone(),
            engine: EngineConfig::from_lookup(lookup, p),
            timeouts: Timeouts::from_lookup(lookup, p)?,
            approval_mode,
            max_round_trips: profiled_parse(lookup, p, "MAX_ROUND_TRIPS", 8)?,
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:    endpoint={}, model={}, agent={}, credential={}",
            self.engine.endpoint.as_deref().unwrap_or("(none)"),
            self.engine.model,
            self.engine.agent_name.as_deref().unwrap_or("(none)"),
            if self.engine.api_key.is_some() { "set" } else { "unset" },
        );
        tracing::info!(
            "  timeouts:  connect={:?}, list_tools={:?}, invoke={:?}, approval={:?}",
            self.timeouts.connect,
            self.timeouts.list_tools,
            self.timeouts.invoke,
            self.timeouts.approval,
        );
        tracing::info!(
            "  approvals: mode={}, max_round_trips={}",
            self.approval_mode,
            self.max_round_trips
        );
    }
}

// ── Response engine ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the response engine (e.g. a project endpoint).
    pub endpoint: Option<String>,
    /// Model or deployment identifier sent with every request.
    pub model: String,
    /// Optional agent reference forwarded with every request.
    pub agent_name: Option<String>,
    /// Bearer credential. Never logged.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl EngineConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Self {
        Self {
            endpoint: profiled_opt(lookup, p, "RESPONSES_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string()),
            model: profiled_or(lookup, p, "MODEL_DEPLOYMENT", "gpt-4.1"),
            agent_name: profiled_opt(lookup, p, "AGENT_NAME"),
            api_key: profiled_opt(lookup, p, "API_KEY"),
        }
    }

    /// The endpoint, or an error naming the setting that is missing.
    pub fn require_endpoint(&self) -> Result<&str, ConfigError> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("RESPONSES_ENDPOINT".to_string()))
    }
}

// ── Timeouts ──────────────────────────────────────────────────

/// Per-operation timeouts. Each transport call is bounded independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub connect: Duration,
    pub list_tools: Duration,
    pub invoke: Duration,
    pub approval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            list_tools: Duration::from_secs(10),
            invoke: Duration::from_secs(30),
            approval: Duration::from_secs(120),
        }
    }
}

impl Timeouts {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            connect: profiled_secs(lookup, p, "CONNECT_TIMEOUT_SECS", d.connect.as_secs())?,
            list_tools: profiled_secs(lookup, p, "LIST_TOOLS_TIMEOUT_SECS", d.list_tools.as_secs())?,
            invoke: profiled_secs(lookup, p, "INVOKE_TIMEOUT_SECS", d.invoke.as_secs())?,
            approval: profiled_secs(lookup, p, "APPROVAL_TIMEOUT_SECS", d.approval.as_secs())?,
        })
    }
}

// ── Approval mode ─────────────────────────────────────────────

/// How approval requests are decided when the front end does not override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Ask the caller for every request.
    Manual,
    /// Approve everything.
    Auto,
    /// Deny everything.
    Deny,
}

impl std::str::FromStr for ApprovalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" | "ask" => Ok(Self::Manual),
            "auto" | "auto_approve" => Ok(Self::Auto),
            "deny" => Ok(Self::Deny),
            other => Err(ConfigError::Invalid {
                key: "APPROVAL_MODE".to_string(),
                reason: format!("expected manual, auto or deny, got '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Deny => "deny",
        })
    }
}
