//! Endpoint probe: finds which tool-listing API version an engine endpoint
//! answers, trying newer versions first.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

pub const API_VERSIONS: &[&str] = &[
    "2025-05-15-preview",
    "2024-12-01-preview",
    "2024-10-01-preview",
    "2024-08-01-preview",
];

/// What one version attempt returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Available,
    NotFound,
    Unauthorized(u16),
    Failed { status: u16, body: String },
    Unreachable(String),
}

impl ProbeStatus {
    fn from_status(status: u16, body: String) -> Self {
        match status {
            200 => Self::Available,
            404 => Self::NotFound,
            401 | 403 => Self::Unauthorized(status),
            _ => Self::Failed { status, body },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Available => "available".to_string(),
            Self::NotFound => "not found (404)".to_string(),
            Self::Unauthorized(status) => format!("unauthorized ({})", status),
            Self::Failed { status, body } => format!("failed ({}): {}", status, body),
            Self::Unreachable(reason) => format!("unreachable: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub version: String,
    pub url: String,
    pub status: ProbeStatus,
}

/// Try each version in order and stop at the first one that answers 200.
pub async fn probe(
    endpoint: &str,
    token: Option<&str>,
    versions: &[&str],
    timeout: Duration,
) -> Result<Vec<ProbeAttempt>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;
    let base = endpoint.trim_end_matches('/');

    let mut attempts = Vec::new();
    for version in versions {
        let url = format!("{}/mcp_tools?api-version={}", base, version);
        debug!(url = %url, "Probing");

        let mut request = client.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let status = match request.send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                ProbeStatus::from_status(code, body)
            }
            Err(e) => ProbeStatus::Unreachable(e.to_string()),
        };

        let found = status == ProbeStatus::Available;
        attempts.push(ProbeAttempt {
            version: version.to_string(),
            url,
            status,
        });
        if found {
            info!(version = %version, "Endpoint answers tool listing");
            break;
        }
    }
    Ok(attempts)
}
