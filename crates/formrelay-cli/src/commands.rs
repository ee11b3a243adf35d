//! Command execution.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use formrelay_core::{DeliveryResult, DispatchSummary, IntegrationConfig, ProviderDescriptor};
use formrelay_dispatch::{IntegrationManager, IntegrationRegistry, ManagerConfig};
use formrelay_webhook::{DeliveryTransport, TransportConfig};
use serde::Serialize;
use uuid::Uuid;

use crate::TRACING_TARGET_COMMAND;
use crate::config::{Cli, Command, load_event, load_integrations};

/// Output of the `dispatch` command.
#[derive(Debug, Serialize)]
pub struct DispatchReport {
    /// Success and failure counts.
    pub summary: DispatchSummary,
    /// One result per selected integration.
    pub results: Vec<DeliveryResult>,
}

/// Runs the selected command, printing its JSON output to stdout.
///
/// Returns whether every delivery succeeded.
pub async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let (output, success) = match &cli.command {
        Command::Providers => {
            let registry = build_registry(&cli.transport)?;
            (serde_json::to_value(providers(&registry))?, true)
        }
        Command::Dispatch {
            integrations,
            event,
        } => {
            let manager = build_manager(&cli.transport, &cli.manager)?;
            cancel_on_ctrl_c(&manager);
            let report = dispatch(&manager, integrations, event).await?;
            let success = report.summary.is_complete();
            (serde_json::to_value(report)?, success)
        }
        Command::Test { integrations, id } => {
            let manager = build_manager(&cli.transport, &cli.manager)?;
            cancel_on_ctrl_c(&manager);
            let result = check_integration(&manager, integrations, *id).await?;
            let success = result.success;
            (serde_json::to_value(result)?, success)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(success)
}

/// Builds the registry of built-in providers.
pub fn build_registry(transport: &TransportConfig) -> anyhow::Result<IntegrationRegistry> {
    let transport =
        DeliveryTransport::new(transport.clone()).context("failed to create delivery transport")?;
    Ok(IntegrationRegistry::with_defaults(transport))
}

/// Builds a manager over the built-in providers.
pub fn build_manager(
    transport: &TransportConfig,
    manager: &ManagerConfig,
) -> anyhow::Result<IntegrationManager> {
    let registry = build_registry(transport)?;
    Ok(IntegrationManager::new(Arc::new(registry), manager.clone()))
}

/// Descriptors of every provider.
pub fn providers(registry: &IntegrationRegistry) -> Vec<&'static ProviderDescriptor> {
    registry.list()
}

/// Registers every config, failing on the first invalid one.
pub async fn register_all(
    manager: &IntegrationManager,
    configs: Vec<IntegrationConfig>,
) -> anyhow::Result<usize> {
    let count = configs.len();
    for config in configs {
        let id = config.id;
        manager
            .register_config(config)
            .await
            .with_context(|| format!("integration {id} was rejected"))?;
    }
    Ok(count)
}

/// Loads the integrations and the event, then dispatches the event.
pub async fn dispatch(
    manager: &IntegrationManager,
    integrations: &Path,
    event: &Path,
) -> anyhow::Result<DispatchReport> {
    let registered = register_all(manager, load_integrations(integrations)?).await?;
    let payload = load_event(event)?;

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        integrations = registered,
        form_id = %payload.form_id,
        event = %payload.event_kind,
        "dispatching event"
    );

    let results = manager
        .dispatch(&payload.form_id, &payload)
        .await
        .context("dispatch was rejected")?;

    Ok(DispatchReport {
        summary: DispatchSummary::from_results(&results),
        results,
    })
}

/// Loads the integrations and runs the connectivity check of `id`.
pub async fn check_integration(
    manager: &IntegrationManager,
    integrations: &Path,
    id: Uuid,
) -> anyhow::Result<DeliveryResult> {
    register_all(manager, load_integrations(integrations)?).await?;

    manager
        .test_config(id)
        .await
        .with_context(|| format!("failed to test integration {id}"))
}

/// Shuts the manager down on Ctrl-C, cancelling in-flight deliveries.
fn cancel_on_ctrl_c(manager: &IntegrationManager) {
    let manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(
                target: TRACING_TARGET_COMMAND,
                "interrupt received, cancelling deliveries"
            );
            manager.shutdown();
        }
    });
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use formrelay_webhook::testing::{MockEndpoint, MockReply};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn write_json(dir: &TempDir, name: &str, contents: &serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents.to_string()).unwrap();
        path
    }

    fn manager() -> IntegrationManager {
        build_manager(
            &TransportConfig::default().with_attempt_timeout(2).with_backoff(5, 20),
            &ManagerConfig::default(),
        )
        .unwrap()
    }

    fn event_file(dir: &TempDir) -> PathBuf {
        write_json(
            dir,
            "event.json",
            &json!({
                "eventKind": "submission",
                "formId": "f1",
                "formName": "Contact",
                "data": {"name": "Ann"}
            }),
        )
    }

    #[test]
    fn test_providers_lists_builtins() {
        let registry = build_registry(&TransportConfig::default()).unwrap();
        let json = serde_json::to_value(providers(&registry)).unwrap();

        assert_eq!(json.as_array().unwrap().len(), 4);
        assert_eq!(json[2]["destination_type"], "webhook");
        assert_eq!(json[2]["settings"][0]["key"], "url");
    }

    #[tokio::test]
    async fn test_dispatch_reports_mixed_results() {
        let dir = TempDir::new().unwrap();
        let ok = MockEndpoint::start().await;
        let broken = MockEndpoint::with_replies([MockReply::status(410)]).await;

        let integrations = write_json(
            &dir,
            "integrations.json",
            &json!([
                {
                    "id": Uuid::now_v7(),
                    "destinationType": "webhook",
                    "enabled": true,
                    "formId": "f1",
                    "settings": {"url": ok.url("/hook").as_str()},
                    "subscribedEvents": ["submission"]
                },
                {
                    "id": Uuid::now_v7(),
                    "destinationType": "webhook",
                    "enabled": true,
                    "formId": "f1",
                    "settings": {"url": broken.url("/hook").as_str()},
                    "subscribedEvents": ["submission"]
                }
            ]),
        );

        let report = dispatch(&manager(), &integrations, &event_file(&dir))
            .await
            .unwrap();

        assert_eq!(report.summary.delivered, 1);
        assert_eq!(report.summary.failed, 1);
        assert!(report.summary.is_partial_failure());
        assert_eq!(ok.requests().len(), 1);
        assert_eq!(broken.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_invalid_integration() {
        let dir = TempDir::new().unwrap();
        let integrations = write_json(
            &dir,
            "integrations.json",
            &json!([{
                "id": Uuid::now_v7(),
                "destinationType": "webhook",
                "enabled": true,
                "formId": "f1",
                "settings": {"url": "not a url"},
                "subscribedEvents": ["submission"]
            }]),
        );

        let err = dispatch(&manager(), &integrations, &event_file(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("was rejected"));
    }

    #[tokio::test]
    async fn test_connectivity_check() {
        let dir = TempDir::new().unwrap();
        let endpoint = MockEndpoint::start().await;
        let id = Uuid::now_v7();
        let integrations = write_json(
            &dir,
            "integrations.json",
            &json!([{
                "id": id,
                "destinationType": "webhook",
                "enabled": true,
                "formId": "f1",
                "settings": {"url": endpoint.url("/hook").as_str()},
                "subscribedEvents": ["submission"]
            }]),
        );

        let result = check_integration(&manager(), &integrations, id).await.unwrap();
        assert!(result.success);
        assert_eq!(endpoint.requests()[0].header("x-event"), Some("test"));

        assert!(
            check_integration(&manager(), &integrations, Uuid::now_v7())
                .await
                .is_err()
        );

        let path = dir.path().to_path_buf();
        dir.close().unwrap();
        assert!(!path.exists());
    }
}
