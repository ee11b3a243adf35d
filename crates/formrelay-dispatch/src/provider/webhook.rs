//! Generic HTTP webhook destination.

use std::collections::BTreeMap;

use formrelay_core::{
    DeliveryResult, Error, EventPayload, FieldSpec, FieldType, IntegrationConfig, Provider,
    ProviderDescriptor, Result,
};
use formrelay_webhook::{DeliveryTransport, Envelope, MAX_ATTEMPTS_LIMIT, OutboundRequest};
use reqwest::Method;
use reqwest::header::HeaderName;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::parse_http_url;

/// Destination type served by [`WebhookProvider`].
pub const DESTINATION_TYPE: &str = "webhook";

/// Credential holding the optional signing secret.
const SECRET_CREDENTIAL: &str = "secret";

/// Default number of attempts per delivery.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

static DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    destination_type: DESTINATION_TYPE,
    name: "Webhook",
    icon: "webhook",
    idempotent: true,
    settings: &[
        FieldSpec::required("url", "Endpoint URL", FieldType::Url)
            .with_help("Absolute http or https URL that receives the events"),
        FieldSpec::optional(
            "method",
            "HTTP method",
            FieldType::Select(&["POST", "PUT", "PATCH"]),
        )
        .with_default("POST"),
        FieldSpec::optional("headers", "Custom headers", FieldType::KeyValue)
            .with_help("Signature, event and delivery headers cannot be overridden"),
        FieldSpec::optional("retry_enabled", "Retry failed deliveries", FieldType::Boolean)
            .with_default("true"),
        FieldSpec::optional("max_attempts", "Maximum attempts", FieldType::Number)
            .with_default("3")
            .with_help("Between 1 and 10"),
    ],
    credentials: &[
        FieldSpec::optional("secret", "Signing secret", FieldType::Secret)
            .with_help("Signs each body with HMAC-SHA256 in the X-Signature header"),
    ],
};

/// HTTP method used for webhook deliveries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    /// `POST`
    #[default]
    #[serde(alias = "post")]
    Post,
    /// `PUT`
    #[serde(alias = "put")]
    Put,
    /// `PATCH`
    #[serde(alias = "patch")]
    Patch,
}

impl From<WebhookMethod> for Method {
    fn from(method: WebhookMethod) -> Self {
        match method {
            WebhookMethod::Post => Method::POST,
            WebhookMethod::Put => Method::PUT,
            WebhookMethod::Patch => Method::PATCH,
        }
    }
}

/// Typed settings of a webhook integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Endpoint URL.
    #[serde(default)]
    pub url: String,
    /// HTTP method.
    #[serde(default)]
    pub method: WebhookMethod,
    /// Extra headers sent with every delivery.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Whether failed deliveries are retried.
    #[serde(default = "default_retry_enabled")]
    pub retry_enabled: bool,
    /// Attempts per delivery, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl WebhookSettings {
    /// Reads and validates the settings of `config`.
    pub fn from_config(config: &IntegrationConfig) -> Result<Self> {
        let settings: Self = config.settings_as()?;
        settings.endpoint()?;

        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&settings.max_attempts) {
            return Err(Error::validation().with_message(format!(
                "'max_attempts' must be between 1 and {MAX_ATTEMPTS_LIMIT}"
            )));
        }

        if let Some(name) = settings
            .headers
            .keys()
            .find(|name| HeaderName::from_bytes(name.as_bytes()).is_err())
        {
            return Err(Error::validation().with_message(format!("invalid header name '{name}'")));
        }

        Ok(settings)
    }

    /// Parses the endpoint URL.
    pub fn endpoint(&self) -> Result<Url> {
        parse_http_url("url", &self.url)
    }
}

/// Delivers events as signed JSON envelopes to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookProvider {
    transport: DeliveryTransport,
}

impl WebhookProvider {
    /// Creates a webhook provider on top of `transport`.
    pub fn new(transport: DeliveryTransport) -> Self {
        Self { transport }
    }

    fn request(
        settings: &WebhookSettings,
        config: &IntegrationConfig,
        envelope: &Envelope<'_>,
    ) -> Result<OutboundRequest> {
        Ok(
            OutboundRequest::new(settings.method.into(), settings.endpoint()?)
                .with_event(envelope.event)
                .with_headers(settings.headers.clone())
                .with_body(envelope.to_bytes()?)
                .with_secret(config.credentials.get(SECRET_CREDENTIAL)),
        )
    }
}

#[async_trait::async_trait]
impl Provider for WebhookProvider {
    fn descriptor(&self) -> &'static ProviderDescriptor {
        &DESCRIPTOR
    }

    fn validate(&self, config: &IntegrationConfig) -> Result<()> {
        WebhookSettings::from_config(config).map(|_| ())
    }

    async fn test(&self, config: &IntegrationConfig, cancel: &CancellationToken) -> DeliveryResult {
        let mut data = Map::new();
        data.insert(
            "message".to_owned(),
            Value::from("Test delivery from formrelay"),
        );
        let form_name = if config.display_name.is_empty() {
            "Test form"
        } else {
            config.display_name.as_str()
        };
        let envelope = Envelope::test(&config.form_id, form_name, &data);

        let request = match WebhookSettings::from_config(config)
            .and_then(|settings| Self::request(&settings, config, &envelope))
        {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        let policy = formrelay_webhook::RetryPolicy::no_retry();
        self.transport
            .deliver(&request, &policy, cancel)
            .await
            .into_result(config)
    }

    async fn send(
        &self,
        payload: &EventPayload,
        config: &IntegrationConfig,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let settings = match WebhookSettings::from_config(config) {
            Ok(settings) => settings,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        let envelope = Envelope::from_payload(payload);
        let request = match Self::request(&settings, config, &envelope) {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        let policy = self
            .transport
            .retry_policy(settings.max_attempts)
            .with_enabled(settings.retry_enabled);

        self.transport
            .deliver(&request, &policy, cancel)
            .await
            .into_result(config)
    }
}

#[cfg(test)]
mod tests {
    use formrelay_core::{AttemptOutcome, ErrorKind, EventKind};
    use formrelay_webhook::testing::{MockEndpoint, MockReply};
    use formrelay_webhook::{TransportConfig, verify_signature};
    use serde_json::json;

    use super::*;

    fn provider() -> WebhookProvider {
        let config = TransportConfig::default()
            .with_attempt_timeout(2)
            .with_backoff(5, 20);
        WebhookProvider::new(DeliveryTransport::new(config).unwrap())
    }

    fn config(url: &str) -> IntegrationConfig {
        IntegrationConfig::new(DESTINATION_TYPE, "f1")
            .with_event(EventKind::Submission)
            .with_setting("url", url)
    }

    fn payload() -> EventPayload {
        EventPayload::new(EventKind::Submission, "f1", "Contact")
            .with_field("name", "Ann")
            .with_field("email", "a@b.com")
    }

    #[test]
    fn test_settings_defaults() {
        let settings = WebhookSettings::from_config(&config("https://example.com/h")).unwrap();
        assert_eq!(settings.method, WebhookMethod::Post);
        assert!(settings.retry_enabled);
        assert_eq!(settings.max_attempts, 3);
        assert!(settings.headers.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let provider = provider();

        assert!(provider.validate(&config("https://example.com/h")).is_ok());
        assert!(!provider.is_valid(&config("")));
        assert!(!provider.is_valid(&config("example.com/h")));
        assert!(!provider.is_valid(&config("https://example.com").with_setting("max_attempts", 0)));
        assert!(!provider.is_valid(&config("https://example.com").with_setting("max_attempts", 11)));
        assert!(!provider.is_valid(&config("https://example.com").with_setting("method", "DELETE")));
        assert!(
            !provider.is_valid(
                &config("https://example.com").with_setting("headers", json!({"bad header": "x"}))
            )
        );

        let err = provider.validate(&config("ftp://example.com")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_lowercase_method_is_accepted() {
        let settings = WebhookSettings::from_config(
            &config("https://example.com/h").with_setting("method", "put"),
        )
        .unwrap();
        assert_eq!(Method::from(settings.method), Method::PUT);
    }

    #[tokio::test]
    async fn test_send_signed_envelope() {
        let endpoint = MockEndpoint::start().await;
        let config = config(endpoint.url("/hook").as_str())
            .with_credential("secret", "s3cr3t")
            .with_setting("method", "PUT")
            .with_setting("headers", json!({"X-Tenant": "acme", "X-Signature": "forged"}));

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.config_id, config.id);

        let requests = endpoint.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "PUT");
        assert_eq!(request.header("x-tenant"), Some("acme"));
        assert!(verify_signature(
            "s3cr3t",
            &request.body,
            request.header("x-signature").unwrap()
        ));

        let body = request.json().unwrap();
        assert_eq!(body["event"], "submission");
        assert_eq!(body["form"], json!({"id": "f1", "name": "Contact"}));
        assert_eq!(body["data"], json!({"name": "Ann", "email": "a@b.com"}));
    }

    #[tokio::test]
    async fn test_send_retries_then_succeeds() {
        let endpoint = MockEndpoint::with_replies([
            MockReply::status(500),
            MockReply::status(500),
            MockReply::json(200, json!({"id": "evt_9"})),
        ])
        .await;
        let config = config(endpoint.url("/hook").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(result.external_id.as_deref(), Some("evt_9"));
    }

    #[tokio::test]
    async fn test_send_not_found_is_terminal() {
        let endpoint = MockEndpoint::with_replies([MockReply::status(404)]).await;
        let config = config(endpoint.url("/hook").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TerminalDelivery));
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::Terminal);
    }

    #[tokio::test]
    async fn test_send_with_retries_disabled() {
        let endpoint = MockEndpoint::with_replies([MockReply::status(503)]).await;
        let config = config(endpoint.url("/hook").as_str()).with_setting("retry_enabled", false);

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts.len(), 1);
        assert!(result.is_retryable());
        assert_eq!(endpoint.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_check_sends_test_event() {
        let endpoint = MockEndpoint::start().await;
        let config = config(endpoint.url("/hook").as_str()).with_display_name("Contact hook");

        let result = provider().test(&config, &CancellationToken::new()).await;
        assert!(result.success);

        let request = &endpoint.requests()[0];
        assert_eq!(request.header("x-event"), Some("test"));
        assert!(request.header("x-signature").is_none());
        assert_eq!(request.json().unwrap()["form"]["name"], "Contact hook");
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_request() {
        let result = provider()
            .send(&payload(), &config(""), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Validation));
        assert!(result.attempts.is_empty());
    }
}
