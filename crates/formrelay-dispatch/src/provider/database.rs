//! Workspace database destination: one page per event.

use formrelay_core::{
    DeliveryResult, EventPayload, FieldSpec, FieldType, IntegrationConfig, Provider,
    ProviderDescriptor, Result,
};
use formrelay_webhook::{DeliveryTransport, OutboundRequest, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{api_url, cell_text, parse_http_url, require_setting};

/// Destination type served by [`DatabaseProvider`].
pub const DESTINATION_TYPE: &str = "workspace-database";

const API_KEY_CREDENTIAL: &str = "api_key";
const DEFAULT_TITLE_PROPERTY: &str = "Name";
const DEFAULT_API_BASE_URL: &str = "https://api.notion.com/v1";

/// API version sent with every request.
const API_VERSION: &str = "2022-06-28";

/// Longest text a single rich-text object may hold.
const RICH_TEXT_LIMIT: usize = 2000;

static DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    destination_type: DESTINATION_TYPE,
    name: "Notion",
    icon: "notion",
    idempotent: false,
    settings: &[
        FieldSpec::required("database_id", "Database ID", FieldType::Text),
        FieldSpec::optional("title_property", "Title property", FieldType::Text)
            .with_default(DEFAULT_TITLE_PROPERTY)
            .with_help("Name of the database's title column"),
        FieldSpec::optional("api_base_url", "API base URL", FieldType::Url)
            .with_default(DEFAULT_API_BASE_URL),
    ],
    credentials: &[
        FieldSpec::required("api_key", "Integration token", FieldType::Secret)
            .with_help("The database must be shared with this integration"),
    ],
};

/// Typed settings of a workspace database integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Target database.
    #[serde(default)]
    pub database_id: String,
    /// Title column of the database.
    #[serde(default = "default_title_property")]
    pub title_property: String,
    /// API root.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_title_property() -> String {
    DEFAULT_TITLE_PROPERTY.to_owned()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_owned()
}

impl DatabaseSettings {
    /// Reads and validates the settings and credentials of `config`.
    pub fn from_config(config: &IntegrationConfig) -> Result<Self> {
        let settings: Self = config.settings_as()?;
        require_setting("database_id", &settings.database_id)?;
        require_setting("title_property", &settings.title_property)?;
        parse_http_url("api_base_url", &settings.api_base_url)?;
        config.credentials.require(API_KEY_CREDENTIAL)?;
        Ok(settings)
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        api_url(&parse_http_url("api_base_url", &self.api_base_url)?, segments)
    }
}

fn rich_text(content: &str) -> Value {
    let content: String = content.chars().take(RICH_TEXT_LIMIT).collect();
    json!([{ "type": "text", "text": { "content": content } }])
}

/// Builds the page body: the title column plus one rich-text property per answer.
pub(crate) fn page(settings: &DatabaseSettings, payload: &EventPayload) -> Value {
    let title_property = settings.title_property.trim();

    let mut properties = Map::new();
    for (label, value) in &payload.data {
        if label != title_property {
            properties.insert(label.clone(), json!({ "rich_text": rich_text(&cell_text(value)) }));
        }
    }
    properties.insert(
        title_property.to_owned(),
        json!({ "title": rich_text(&format!("{} response", payload.form_name)) }),
    );

    json!({
        "parent": { "database_id": settings.database_id.trim() },
        "properties": properties,
    })
}

/// Creates one page per event in a workspace database.
#[derive(Debug, Clone)]
pub struct DatabaseProvider {
    transport: DeliveryTransport,
}

impl DatabaseProvider {
    /// Creates a database provider on top of `transport`.
    pub fn new(transport: DeliveryTransport) -> Self {
        Self { transport }
    }

    fn authorized(request: OutboundRequest, config: &IntegrationConfig) -> Result<OutboundRequest> {
        let api_key = config.credentials.require(API_KEY_CREDENTIAL)?;
        Ok(request
            .with_bearer(api_key)
            .with_header("Notion-Version", API_VERSION))
    }

    fn page_request(config: &IntegrationConfig, payload: &EventPayload) -> Result<OutboundRequest> {
        let settings = DatabaseSettings::from_config(config)?;
        let request = OutboundRequest::post(settings.url(["pages"])?)
            .with_event(payload.event_kind.to_string())
            .with_json(&page(&settings, payload))?;
        Self::authorized(request, config)
    }
}

#[async_trait::async_trait]
impl Provider for DatabaseProvider {
    fn descriptor(&self) -> &'static ProviderDescriptor {
        &DESCRIPTOR
    }

    fn validate(&self, config: &IntegrationConfig) -> Result<()> {
        DatabaseSettings::from_config(config).map(|_| ())
    }

    async fn test(&self, config: &IntegrationConfig, cancel: &CancellationToken) -> DeliveryResult {
        let request = DatabaseSettings::from_config(config).and_then(|settings| {
            let url = settings.url(["databases", settings.database_id.trim()])?;
            Self::authorized(OutboundRequest::get(url), config)
        });
        let request = match request {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        self.transport
            .deliver(&request, &RetryPolicy::no_retry(), cancel)
            .await
            .into_result(config)
    }

    async fn send(
        &self,
        payload: &EventPayload,
        config: &IntegrationConfig,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let request = match Self::page_request(config, payload) {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        self.transport
            .deliver(&request, &RetryPolicy::no_retry(), cancel)
            .await
            .into_result(config)
    }
}

#[cfg(test)]
mod tests {
    use formrelay_core::{ErrorKind, EventKind};
    use formrelay_webhook::TransportConfig;
    use formrelay_webhook::testing::{MockEndpoint, MockReply};

    use super::*;

    fn provider() -> DatabaseProvider {
        DatabaseProvider::new(
            DeliveryTransport::new(TransportConfig::default().with_attempt_timeout(2)).unwrap(),
        )
    }

    fn config(base: &str) -> IntegrationConfig {
        IntegrationConfig::new(DESTINATION_TYPE, "f1")
            .with_event(EventKind::Submission)
            .with_setting("database_id", "db-1")
            .with_setting("api_base_url", base)
            .with_credential("api_key", "secret_abc")
    }

    fn payload() -> EventPayload {
        EventPayload::new(EventKind::Submission, "f1", "Contact")
            .with_field("Email", "a@b.com")
            .with_field("Rating", 5)
    }

    #[test]
    fn test_validate() {
        let provider = provider();
        assert!(provider.validate(&config("https://api.example.com/v1")).is_ok());
        assert!(!provider.is_valid(&config("https://api.example.com/v1").with_setting("database_id", "")));
        assert!(!provider.is_valid(&config("not a url")));

        let mut no_key = config("https://api.example.com/v1");
        no_key.credentials = Default::default();
        assert_eq!(
            provider.validate(&no_key).unwrap_err().kind,
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_page_properties() {
        let config = config("https://api.example.com/v1");
        let settings = DatabaseSettings::from_config(&config).unwrap();
        let page = page(&settings, &payload());

        assert_eq!(page["parent"]["database_id"], "db-1");
        assert_eq!(
            page["properties"]["Name"]["title"][0]["text"]["content"],
            "Contact response"
        );
        assert_eq!(
            page["properties"]["Email"]["rich_text"][0]["text"]["content"],
            "a@b.com"
        );
        assert_eq!(
            page["properties"]["Rating"]["rich_text"][0]["text"]["content"],
            "5"
        );
    }

    #[test]
    fn test_long_answers_are_truncated() {
        let config = config("https://api.example.com/v1");
        let settings = DatabaseSettings::from_config(&config).unwrap();
        let payload = EventPayload::new(EventKind::Submission, "f1", "Contact")
            .with_field("Notes", "x".repeat(5000));

        let page = page(&settings, &payload);
        let content = page["properties"]["Notes"]["rich_text"][0]["text"]["content"]
            .as_str()
            .unwrap();
        assert_eq!(content.len(), RICH_TEXT_LIMIT);
    }

    #[tokio::test]
    async fn test_send_creates_page() {
        let endpoint =
            MockEndpoint::with_replies([MockReply::json(200, json!({"id": "page-42"}))]).await;
        let config = config(endpoint.url("/v1").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.external_id.as_deref(), Some("page-42"));

        let request = &endpoint.requests()[0];
        assert_eq!(request.path, "/v1/pages");
        assert_eq!(request.header("notion-version"), Some(API_VERSION));
        assert_eq!(request.header("authorization"), Some("Bearer secret_abc"));
        assert_eq!(request.json().unwrap()["parent"]["database_id"], "db-1");
    }

    #[tokio::test]
    async fn test_send_failure_is_single_attempt() {
        let endpoint = MockEndpoint::with_replies([MockReply::status(502)]).await;
        let config = config(endpoint.url("/v1").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(endpoint.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_check_reads_database() {
        let endpoint =
            MockEndpoint::with_replies([MockReply::json(200, json!({"id": "db-1"}))]).await;
        let config = config(endpoint.url("/v1").as_str());

        let result = provider().test(&config, &CancellationToken::new()).await;
        assert!(result.success);

        let request = &endpoint.requests()[0];
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/v1/databases/db-1");
    }
}
