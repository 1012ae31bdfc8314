//! Builds the production object graph from `AppConfig`

use std::sync::Arc;

use anyhow::{Context, Result};

use super::reconciler::{Reconciler, SyncTarget};
use super::sync_orchestrator::{SyncOptions, SyncOrchestrator};
use crate::domain::TargetSpec;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::csv_source::{CsvSource, HttpCsvSource};
use crate::infrastructure::http_client::{ReqwestTransport, ResilientHttpClient, Transport};
use crate::infrastructure::record_store::{BubbleDataApiStore, ParseServerStore};

pub struct Services {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub csv_source: Arc<dyn CsvSource>,
}

/// Both targets over one shared transport.
pub fn build_targets(config: &AppConfig, transport: Arc<dyn Transport>) -> Vec<SyncTarget> {
    let bubble_spec = TargetSpec::bubble();
    let bubble_client = ResilientHttpClient::new(
        bubble_spec.name.clone(),
        Arc::clone(&transport),
        config.retry.clone(),
    )
    .with_header(
        "Authorization",
        format!("Bearer {}", config.bubble.api_token.expose()),
    );
    let bubble_store = BubbleDataApiStore::new(
        bubble_client,
        config.bubble.base_url.clone(),
        config.bubble.table.clone(),
        config.bubble.search_key.clone(),
        config.bubble.page_size,
    );

    let back4app_spec = TargetSpec::back4app();
    let back4app_client = ResilientHttpClient::new(
        back4app_spec.name.clone(),
        transport,
        config.retry.clone(),
    )
    .with_header("X-Parse-Application-Id", config.back4app.app_id.clone())
    .with_header("X-Parse-Master-Key", config.back4app.master_key.expose());
    let back4app_store = ParseServerStore::new(
        back4app_client,
        config.back4app.base_url.clone(),
        config.back4app.table.clone(),
        back4app_spec.identity_field.clone(),
        config.back4app.page_size,
    );

    vec![
        SyncTarget::new(bubble_spec, Arc::new(bubble_store)),
        SyncTarget::new(back4app_spec, Arc::new(back4app_store)),
    ]
}

pub fn build_services(config: &AppConfig) -> Result<Services> {
    let transport = ReqwestTransport::new(&config.http).context("Failed to build HTTP client")?;
    let csv_source: Arc<dyn CsvSource> = Arc::new(HttpCsvSource::new(transport.client().clone()));

    let targets = build_targets(config, Arc::new(transport));
    let reconciler = Reconciler::new(targets).context("Invalid target field layout")?;
    let orchestrator = SyncOrchestrator::new(Arc::new(reconciler), SyncOptions::from(&config.sync));

    Ok(Services {
        orchestrator: Arc::new(orchestrator),
        csv_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::EnvSettings;
    use crate::infrastructure::http_client::TransportResponse;
    use crate::test_utils::ScriptedTransport;
    use serde_json::json;
    use std::collections::HashMap;

    fn config() -> AppConfig {
        let vars: HashMap<String, String> = [
            ("BUBBLE_API_BASE_URL", "https://app.test/api/1.1/obj"),
            ("BUBBLE_API_TOKEN", "tok"),
            ("BUBBLE_TABLE_NAME", "users"),
            ("BACK4APP_API_BASE_URL", "https://parse.test/classes"),
            ("BACK4APP_APP_ID", "app"),
            ("BACK4APP_MASTER_KEY", "master"),
            ("SYNC_TRIGGER_SECRET", "s"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        AppConfig::from_settings(EnvSettings::from_map(vars).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_targets_carry_their_auth_headers() {
        let transport = Arc::new(ScriptedTransport::new([
            Ok(TransportResponse::new(201, "{}")),
            Ok(TransportResponse::new(201, "{}")),
        ]));
        let targets = build_targets(&config(), transport.clone());
        assert_eq!(targets.len(), 2);

        for target in &targets {
            target.store.create(&json!({})).await.unwrap();
        }

        let sent = transport.requests();
        assert_eq!(sent[0].url.as_str(), "https://app.test/api/1.1/obj/users");
        assert!(sent[0]
            .headers
            .contains(&("Authorization".to_string(), "Bearer tok".to_string())));
        assert_eq!(
            sent[1].url.as_str(),
            "https://parse.test/classes/API_Connector_Users"
        );
        assert!(sent[1]
            .headers
            .contains(&("X-Parse-Application-Id".to_string(), "app".to_string())));
        assert!(sent[1]
            .headers
            .contains(&("X-Parse-Master-Key".to_string(), "master".to_string())));
    }

    #[test]
    fn test_build_services() {
        let services = build_services(&config()).unwrap();
        assert_eq!(services.orchestrator.options().chunk_size, 25);
    }
}
