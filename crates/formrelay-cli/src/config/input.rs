//! Integration and event files.

use std::fs;
use std::path::Path;

use anyhow::Context;
use formrelay_core::{EventPayload, IntegrationConfig};

/// Parses a JSON array of integration configs.
pub fn parse_integrations(json: &str) -> anyhow::Result<Vec<IntegrationConfig>> {
    serde_json::from_str(json).context("integrations must be a JSON array of integration configs")
}

/// Parses an event payload.
pub fn parse_event(json: &str) -> anyhow::Result<EventPayload> {
    serde_json::from_str(json).context("event must be a JSON event payload")
}

/// Reads the integration configs in `path`.
pub fn load_integrations(path: &Path) -> anyhow::Result<Vec<IntegrationConfig>> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read integrations from {}", path.display()))?;
    parse_integrations(&json).with_context(|| format!("invalid integrations in {}", path.display()))
}

/// Reads the event payload in `path`.
pub fn load_event(path: &Path) -> anyhow::Result<EventPayload> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read event from {}", path.display()))?;
    parse_event(&json).with_context(|| format!("invalid event in {}", path.display()))
}
