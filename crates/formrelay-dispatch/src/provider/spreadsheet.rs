//! Spreadsheet destination: one appended row per event.

use formrelay_core::{
    DeliveryResult, EventPayload, FieldSpec, FieldType, IntegrationConfig, Provider,
    ProviderDescriptor, Result,
};
use formrelay_webhook::{DeliveryTransport, OutboundRequest, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{api_url, cell_text, parse_http_url, require_setting};

/// Destination type served by [`SpreadsheetProvider`].
pub const DESTINATION_TYPE: &str = "spreadsheet";

const ACCESS_TOKEN_CREDENTIAL: &str = "access_token";
const DEFAULT_SHEET_NAME: &str = "Sheet1";
const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com/v4";

static DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    destination_type: DESTINATION_TYPE,
    name: "Google Sheets",
    icon: "sheets",
    idempotent: false,
    settings: &[
        FieldSpec::required("spreadsheet_id", "Spreadsheet ID", FieldType::Text)
            .with_help("The id from the spreadsheet URL"),
        FieldSpec::optional("sheet_name", "Sheet name", FieldType::Text)
            .with_default(DEFAULT_SHEET_NAME),
        FieldSpec::optional("api_base_url", "API base URL", FieldType::Url)
            .with_default(DEFAULT_API_BASE_URL),
    ],
    credentials: &[FieldSpec::required(
        "access_token",
        "OAuth access token",
        FieldType::Secret,
    )],
};

/// Typed settings of a spreadsheet integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetSettings {
    /// Target spreadsheet.
    #[serde(default)]
    pub spreadsheet_id: String,
    /// Sheet (tab) rows are appended to.
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    /// Sheets API root.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_sheet_name() -> String {
    DEFAULT_SHEET_NAME.to_owned()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_owned()
}

impl SpreadsheetSettings {
    /// Reads and validates the settings and credentials of `config`.
    pub fn from_config(config: &IntegrationConfig) -> Result<Self> {
        let settings: Self = config.settings_as()?;
        require_setting("spreadsheet_id", &settings.spreadsheet_id)?;
        require_setting("sheet_name", &settings.sheet_name)?;
        settings.base_url()?;
        config.credentials.require(ACCESS_TOKEN_CREDENTIAL)?;
        Ok(settings)
    }

    fn base_url(&self) -> Result<Url> {
        parse_http_url("api_base_url", &self.api_base_url)
    }

    /// URL of the `values:append` call for the configured sheet.
    pub fn append_url(&self) -> Result<Url> {
        let range = format!("{}!A1:append", self.sheet_name.trim());
        let mut url = api_url(
            &self.base_url()?,
            [
                "spreadsheets",
                self.spreadsheet_id.trim(),
                "values",
                range.as_str(),
            ],
        )?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }

    /// URL of the spreadsheet metadata, used for connectivity checks.
    pub fn metadata_url(&self) -> Result<Url> {
        let mut url = api_url(
            &self.base_url()?,
            ["spreadsheets", self.spreadsheet_id.trim()],
        )?;
        url.query_pairs_mut()
            .append_pair("fields", "spreadsheetId,properties.title");
        Ok(url)
    }
}

/// Builds the appended row: timestamp, event kind, then each answer in form order.
pub(crate) fn row(payload: &EventPayload) -> Vec<Value> {
    let mut row = Vec::with_capacity(payload.data.len() + 2);
    row.push(Value::from(payload.timestamp.to_string()));
    row.push(Value::from(payload.event_kind.to_string()));
    row.extend(payload.data.values().map(|value| Value::from(cell_text(value))));
    row
}

/// Appends one row per event to a spreadsheet.
#[derive(Debug, Clone)]
pub struct SpreadsheetProvider {
    transport: DeliveryTransport,
}

impl SpreadsheetProvider {
    /// Creates a spreadsheet provider on top of `transport`.
    pub fn new(transport: DeliveryTransport) -> Self {
        Self { transport }
    }

    fn append_request(config: &IntegrationConfig, payload: &EventPayload) -> Result<OutboundRequest> {
        let settings = SpreadsheetSettings::from_config(config)?;
        let token = config.credentials.require(ACCESS_TOKEN_CREDENTIAL)?;

        OutboundRequest::post(settings.append_url()?)
            .with_event(payload.event_kind.to_string())
            .with_bearer(token)
            .with_json(&json!({ "values": [row(payload)] }))
    }
}

#[async_trait::async_trait]
impl Provider for SpreadsheetProvider {
    fn descriptor(&self) -> &'static ProviderDescriptor {
        &DESCRIPTOR
    }

    fn validate(&self, config: &IntegrationConfig) -> Result<()> {
        SpreadsheetSettings::from_config(config).map(|_| ())
    }

    async fn test(&self, config: &IntegrationConfig, cancel: &CancellationToken) -> DeliveryResult {
        let request = SpreadsheetSettings::from_config(config).and_then(|settings| {
            let token = config.credentials.require(ACCESS_TOKEN_CREDENTIAL)?;
            Ok(OutboundRequest::get(settings.metadata_url()?).with_bearer(token))
        });
        let request = match request {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        self.transport
            .deliver(&request, &RetryPolicy::no_retry(), cancel)
            .await
            .into_result_with(config, |response| response.body_str("/spreadsheetId"))
    }

    async fn send(
        &self,
        payload: &EventPayload,
        config: &IntegrationConfig,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let request = match Self::append_request(config, payload) {
            Ok(request) => request,
            Err(err) => return DeliveryResult::failed(config, &err),
        };

        self.transport
            .deliver(&request, &RetryPolicy::no_retry(), cancel)
            .await
            .into_result_with(config, |response| {
                response.body_str("/updates/updatedRange")
            })
    }
}

#[cfg(test)]
mod tests {
    use formrelay_core::{ErrorKind, EventKind};
    use formrelay_webhook::TransportConfig;
    use formrelay_webhook::testing::{MockEndpoint, MockReply};

    use super::*;

    fn provider() -> SpreadsheetProvider {
        SpreadsheetProvider::new(
            DeliveryTransport::new(TransportConfig::default().with_attempt_timeout(2)).unwrap(),
        )
    }

    fn config(base: &str) -> IntegrationConfig {
        IntegrationConfig::new(DESTINATION_TYPE, "f1")
            .with_event(EventKind::Submission)
            .with_setting("spreadsheet_id", "sheet-123")
            .with_setting("sheet_name", "Responses")
            .with_setting("api_base_url", base)
            .with_credential("access_token", "ya29.token")
    }

    fn payload() -> EventPayload {
        EventPayload::new(EventKind::Submission, "f1", "Contact")
            .with_field("name", "Ann")
            .with_field("age", 41)
            .with_field("colors", json!(["red", "blue"]))
    }

    #[test]
    fn test_validate() {
        let provider = provider();
        assert!(provider.validate(&config("https://sheets.example.com/v4")).is_ok());

        let mut missing_token = config("https://sheets.example.com/v4");
        missing_token.credentials = Default::default();
        let err = provider.validate(&missing_token).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let missing_id = config("https://sheets.example.com/v4").with_setting("spreadsheet_id", " ");
        assert!(!provider.is_valid(&missing_id));
    }

    #[test]
    fn test_defaults() {
        let config = IntegrationConfig::new(DESTINATION_TYPE, "f1")
            .with_setting("spreadsheet_id", "abc")
            .with_credential("access_token", "t");
        let settings = SpreadsheetSettings::from_config(&config).unwrap();

        assert_eq!(settings.sheet_name, "Sheet1");
        assert_eq!(
            settings.append_url().unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/Sheet1!A1:append\
             ?valueInputOption=USER_ENTERED&insertDataOption=INSERT_ROWS"
        );
    }

    #[test]
    fn test_row_layout() {
        let payload = payload();
        let row = row(&payload);

        assert_eq!(row.len(), 5);
        assert_eq!(row[0], Value::from(payload.timestamp.to_string()));
        assert_eq!(row[1], "submission");
        assert_eq!(row[2], "Ann");
        assert_eq!(row[3], "41");
        assert_eq!(row[4], "red, blue");
    }

    #[tokio::test]
    async fn test_send_appends_row() {
        let endpoint = MockEndpoint::with_replies([MockReply::json(
            200,
            json!({"updates": {"updatedRange": "Responses!A2:E2"}}),
        )])
        .await;
        let config = config(endpoint.url("/v4").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.external_id.as_deref(), Some("Responses!A2:E2"));

        let request = &endpoint.requests()[0];
        assert_eq!(request.method, "POST");
        assert!(
            request
                .path
                .starts_with("/v4/spreadsheets/sheet-123/values/Responses!A1:append?")
        );
        assert_eq!(request.header("authorization"), Some("Bearer ya29.token"));
        assert_eq!(request.json().unwrap()["values"][0][2], "Ann");
    }

    #[tokio::test]
    async fn test_send_is_single_attempt() {
        let endpoint = MockEndpoint::with_replies([MockReply::status(503)]).await;
        let config = config(endpoint.url("/v4").as_str());

        let result = provider()
            .send(&payload(), &config, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.error_kind, Some(ErrorKind::TransientDelivery));
        assert_eq!(endpoint.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_check_reads_metadata() {
        let endpoint = MockEndpoint::with_replies([MockReply::json(
            200,
            json!({"spreadsheetId": "sheet-123"}),
        )])
        .await;
        let config = config(endpoint.url("/v4").as_str());

        let result = provider().test(&config, &CancellationToken::new()).await;
        assert!(result.success);
        assert_eq!(result.external_id.as_deref(), Some("sheet-123"));

        let request = &endpoint.requests()[0];
        assert_eq!(request.method, "GET");
        assert!(request.path.starts_with("/v4/spreadsheets/sheet-123?fields="));
        assert!(request.body.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal() {
        let endpoint = MockEndpoint::with_replies([MockReply::status(401)]).await;
        let config = config(endpoint.url("/v4").as_str());

        let result = provider().test(&config, &CancellationToken::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::TerminalDelivery));
    }
}
