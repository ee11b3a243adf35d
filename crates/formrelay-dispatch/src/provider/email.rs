//! Email destination: one notification message per event.

use std::sync::Arc;

use formrelay_core::{
    DeliveryResult, Error, EventPayload, FieldSpec, FieldType, IntegrationConfig, Provider,
    ProviderDescriptor, Result,
};
use formrelay_webhook::{DeliveryTransport, OutboundRequest, RetryPolicy};
use handlebars::{Handlebars, Template};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{api_url, cell_text, parse_http_url, require_setting};

/// Destination type served by [`EmailProvider`].
pub const DESTINATION_TYPE: &str = "email";

const API_KEY_CREDENTIAL: &str = "api_key";
const DEFAULT_SUBJECT: &str = "New {{event}} for {{form}}";
const DEFAULT_API_BASE_URL: &str = "https://api.resend.com";

const HTML_BODY: &str = concat!(
    "<h2>{{form}}</h2><p>Event: {{event}}</p><table>",
    "{{#each answers}}<tr><th align=\"left\">{{label}}</th><td>{{value}}</td></tr>{{/each}}",
    "</table>",
);
const TEXT_BODY: &str = "{{form}} ({{event}})\n\n{{#each answers}}{{label}}: {{value}}\n{{/each}}";

static DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    destination_type: DESTINATION_TYPE,
    name: "Email",
    icon: "mail",
    idempotent: false,
    settings: &[
        FieldSpec::required("to", "Recipients", FieldType::EmailList),
        FieldSpec::required("from", "Sender", FieldType::Text)
            .with_help("A sender address on a verified domain"),
        FieldSpec::optional("subject", "Subject", FieldType::Text)
            .with_default(DEFAULT_SUBJECT)
            .with_help("Handlebars template; {{event}} and {{form}} are the event and form name"),
        FieldSpec::optional("api_base_url", "API base URL", FieldType::Url)
            .with_default(DEFAULT_API_BASE_URL),
    ],
    credentials: &[FieldSpec::required("api_key", "API key", FieldType::Secret)],
};

/// Typed settings of an email integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    /// Recipient addresses.
    #[serde(default)]
    pub to: Vec<String>,
    /// Sender address.
    #[serde(default)]
    pub from: String,
    /// Subject template.
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Email API root.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_owned()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_owned()
}

/// Loose address check: something before and after a single `@`.
fn is_email_address(address: &str) -> bool {
    match address.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.trim().contains(char::is_whitespace)
        }
        None => false,
    }
}

impl EmailSettings {
    /// Reads and validates the settings and credentials of `config`.
    pub fn from_config(config: &IntegrationConfig) -> Result<Self> {
        let settings: Self = config.settings_as()?;

        if settings.to.is_empty() {
            return Err(Error::validation().with_message("'to' needs at least one recipient"));
        }

        if let Some(address) = settings.to.iter().find(|address| !is_email_address(address)) {
            return Err(
                Error::validation().with_message(format!("'{address}' is not an email address"))
            );
        }

        require_setting("from", &settings.from)?;
        Template::compile(&settings.subject).map_err(|err| {
            Error::validation().with_message(format!("'subject' is not a valid template: {err}"))
        })?;
        parse_http_url("api_base_url", &settings.api_base_url)?;
        config.credentials.require(API_KEY_CREDENTIAL)?;
        Ok(settings)
    }

    fn url(&self, segment: &str) -> Result<Url> {
        api_url(&parse_http_url("api_base_url", &self.api_base_url)?, [segment])
    }
}

/// Template data for one event.
fn message_data(payload: &EventPayload) -> Value {
    let answers: Vec<Value> = payload
        .data
        .iter()
        .map(|(label, value)| json!({ "label": label, "value": cell_text(value) }))
        .collect();

    json!({
        "event": payload.event_kind.to_string(),
        "form": payload.form_name,
        "answers": answers,
    })
}

/// Handlebars registries for the message parts.
///
/// The HTML body is rendered with the default HTML escaping; the subject and
/// the text body are plain text and rendered verbatim.
struct MessageTemplates {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
}

impl MessageTemplates {
    fn new() -> Self {
        let mut plain = Handlebars::new();
        plain.register_escape_fn(handlebars::no_escape);

        Self {
            html: Handlebars::new(),
            plain,
        }
    }

    fn render(registry: &Handlebars<'static>, template: &str, data: &Value) -> Result<String> {
        registry.render_template(template, data).map_err(|err| {
            Error::validation().with_message(format!("failed to render email template: {err}"))
        })
    }

    /// Renders the subject template for `payload`.
    fn subject(&self, settings: &EmailSettings, data: &Value) -> Result<String> {
        Self::render(&self.plain, &settings.subject, data)
    }

    /// Renders the answers as an HTML table.
    fn html_body(&self, data: &Value) -> Result<String> {
        Self::render(&self.html, HTML_BODY, data)
    }

    /// Renders the answers as plain text, one `label: answer` line each.
    fn text_body(&self, data: &Value) -> Result<String> {
        Self::render(&self.plain, TEXT_BODY, data)
    }
}

/// Sends a notification email per event through an HTTP email API.
#[derive(Clone)]
pub struct EmailProvider {
    transport: DeliveryTransport,
    templates: Arc<MessageTemplates>,
}

impl std::fmt::Debug for EmailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailProvider")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl EmailProvider {
    /// Creates an email provider on top of `transport`.
    pub fn new(transport: DeliveryTransport) -> Self {
        Self {
            transport,
            templates: Arc::new(MessageTemplates::new()),
        }
    }

    /// Renders the subject of the message sent for `payload`.
    pub fn render_subject(&self, settings: &EmailSettings, payload: &EventPayload) -> Result<String> {
        self.templates.subject(settings, &message_data(payload))
    }

    fn message_request(
        &self,
        config: &IntegrationConfig,
        payload: &EventPayload,
    ) -> Result<OutboundRequest> {
        let settings = EmailSettings::from_config(config)?;
        let api_key = config.credentials.require(API_KEY_CREDENTIAL)?;
        let data = message_data(payload);

        let message: Value = json!({
            "from": settings.from.trim(),
            "to": settings.to.iter().map(|address| address.trim()).collect::<Vec<_>>(),
            "subject": self.templates.subject(&settings, &data)?,
            "html": self.templates.html_body(&data)?,
            "text": self.templates.text_body(&data)?,
        });

        OutboundRequest::post(settings.url("emails")?)
            .with_event(payload.event_kind.to_string())
            .with_bearer(api_key)
            .with_json(&message)
    }
}

#[async_trait::async_trait]
impl Provider for EmailProvider {
    fn descriptor(&self) -> &'static ProviderDescriptor {
        &DESCRIPTOR
    }

    fn validate(&self, config: &IntegrationConfig) -> Result<()> {
        EmailSettings::from_config(config).map(|_| ())
    }

    /// Lists the sending domains, which checks the API key without sending mail.
    async fn test(&self, config: &IntegrationConfig, cancel: &CancellationToken) -> DeliveryResult {
        let request = EmailSettings::from_config(config).and_then(|settings| {
            let api_key = config.credentials.require(API_KEY_CREDENTIAL)?;
            Ok(OutboundRequest::get(settings.url("domains")?).with_bearer(api_key))
        });
        let request = match request {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        self.transport
            .deliver(&request, &RetryPolicy::no_retry(), cancel)
            .await
            .into_result_with(config, |_| None)
    }

    async fn send(
        &self,
        payload: &EventPayload,
        config: &IntegrationConfig,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let request = match self.message_request(config, payload) {
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

    fn provider() -> EmailProvider {
        EmailProvider::new(
            DeliveryTransport::new(TransportConfig::default().with_attempt_timeout(2)).unwrap(),
        )
    }

    fn config(base: &str) -> IntegrationConfig {
        IntegrationConfig::new(DESTINATION_TYPE, "f1")
            .with_event(EventKind::Submission)
            .with_setting("to", json!(["owner@example.com", "team@example.com"]))
            .with_setting("from", "forms@example.com")
            .with_setting("api_base_url", base)
            .with_credential("api_key", "re_123")
    }

    fn payload() -> EventPayload {
        EventPayload::new(EventKind::Submission, "f1", "Contact & Support")
            .with_field("name", "<b>Ann</b>")
            .with_field("email", "a@b.com")
    }

    #[test]
    fn test_validate_recipients() {
        let provider = provider();
        let base = "https://mail.example.com";
        assert!(provider.validate(&config(base)).is_ok());

        let err = provider
            .validate(&config(base).with_setting("to", json!([])))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        assert!(!provider.is_valid(&config(base).with_setting("to", json!(["not-an-address"]))));
        assert!(!provider.is_valid(&config(base).with_setting("to", json!(["a@@b.com"]))));
        assert!(!provider.is_valid(&config(base).with_setting("from", "")));
    }

    #[test]
    fn test_subject_template() {
        let provider = provider();
        let settings = EmailSettings::from_config(&config("https://mail.example.com")).unwrap();
        assert_eq!(
            provider.render_subject(&settings, &payload()).unwrap(),
            "New submission for Contact & Support"
        );

        let custom = config("https://mail.example.com")
            .with_setting("subject", "[{{form}}] {{event}}");
        let settings = EmailSettings::from_config(&custom).unwrap();
        assert_eq!(
            provider.render_subject(&settings, &payload()).unwrap(),
            "[Contact & Support] submission"
        );
    }

    #[test]
    fn test_invalid_subject_template_is_rejected() {
        let config = config("https://mail.example.com").with_setting("subject", "New {{#if}}");
        let err = provider().validate(&config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_bodies_escape_answers() {
        let templates = MessageTemplates::new();
        let data = message_data(&payload());

        let html = templates.html_body(&data).unwrap();
        assert!(html.contains("<h2>Contact &amp; Support</h2>"));
        assert!(html.contains("<td>&lt;b&gt;Ann&lt;/b&gt;</td>"));
        assert!(!html.contains("<b>Ann</b>"));

        let text = templates.text_body(&data).unwrap();
        assert!(text.starts_with("Contact & Support (submission)"));
        assert!(text.contains("name: <b>Ann</b>\n"));
        assert!(text.contains("email: a@b.com\n"));
    }

    #[tokio::test]
    async fn test_send_posts_message() {
        let endpoint =
            MockEndpoint::with_replies([MockReply::json(200, json!({"id": "msg_1"}))]).await;
        let config = config(endpoint.url("/").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.external_id.as_deref(), Some("msg_1"));

        let request = &endpoint.requests()[0];
        assert_eq!(request.path, "/emails");
        assert_eq!(request.header("authorization"), Some("Bearer re_123"));

        let message = request.json().unwrap();
        assert_eq!(message["from"], "forms@example.com");
        assert_eq!(message["to"][1], "team@example.com");
        assert_eq!(message["subject"], "New submission for Contact & Support");
        assert!(message["html"].as_str().unwrap().contains("&lt;b&gt;Ann&lt;/b&gt;"));
    }

    #[tokio::test]
    async fn test_rejected_message_is_terminal() {
        let endpoint = MockEndpoint::with_replies([MockReply::json(
            422,
            json!({"message": "invalid from address"}),
        )])
        .await;
        let config = config(endpoint.url("/").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::TerminalDelivery));
        assert!(result.error.unwrap().contains("invalid from address"));
    }

    #[tokio::test]
    async fn test_connectivity_check_does_not_send_mail() {
        let endpoint = MockEndpoint::start().await;
        let config = config(endpoint.url("/").as_str());

        let result = provider().test(&config, &CancellationToken::new()).await;
        assert!(result.success);

        let request = &endpoint.requests()[0];
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/domains");
    }
}
