//! Form lifecycle events that get fanned out to integrations.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::{Error, Result};

/// Defines the form lifecycle events an integration can subscribe to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumIter, EnumString, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    /// A respondent submitted the form.
    Submission,
    /// A respondent saved a partially completed form.
    PartialSave,
    /// A respondent left the form without submitting.
    Abandoned,
    /// The form was opened.
    Viewed,
    /// A respondent answered the first question.
    Started,
    /// A stored response was edited.
    ResponseUpdated,
    /// A stored response was removed.
    ResponseDeleted,
}

/// Optional request-level details that accompany an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Identifier of the stored response, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Browser user agent of the respondent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Page that linked to the form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Seconds the respondent spent completing the form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time_seconds: Option<u64>,
}

impl EventMetadata {
    /// Returns true if no metadata field is set.
    pub fn is_empty(&self) -> bool {
        self.response_id.is_none()
            && self.user_agent.is_none()
            && self.referrer.is_none()
            && self.completion_time_seconds.is_none()
    }
}

/// A single form lifecycle event, constructed fresh by the form runtime.
///
/// `data` maps field labels to answers and keeps insertion order, so the
/// order respondents saw is the order destinations receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// The lifecycle event that occurred.
    pub event_kind: EventKind,
    /// When the event occurred.
    #[serde(default = "Timestamp::now")]
    pub timestamp: Timestamp,
    /// The form the event belongs to.
    pub form_id: String,
    /// Human-readable form name.
    pub form_name: String,
    /// Field label to answer mapping.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Optional request-level details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl EventPayload {
    /// Creates a new payload stamped with the current time.
    pub fn new(
        event_kind: EventKind,
        form_id: impl Into<String>,
        form_name: impl Into<String>,
    ) -> Self {
        Self {
            event_kind,
            timestamp: Timestamp::now(),
            form_id: form_id.into(),
            form_name: form_name.into(),
            data: Map::new(),
            metadata: None,
        }
    }

    /// Appends a field answer, keeping field order.
    pub fn with_field(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(label.into(), value.into());
        self
    }

    /// Replaces all field answers.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Sets the request-level metadata.
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    /// Overrides the event timestamp.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Checks the payload is well formed for dispatch to `form_id`.
    pub fn ensure_for_form(&self, form_id: &str) -> Result<()> {
        if self.form_id.trim().is_empty() {
            return Err(Error::invalid_input().with_message("event payload has an empty form id"));
        }

        if self.form_id != form_id {
            return Err(Error::invalid_input().with_message(format!(
                "event payload belongs to form '{}', not '{form_id}'",
                self.form_id
            )));
        }

        Ok(())
    }
}
