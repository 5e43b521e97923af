//! E-mail message item.

use crate::batch::Weighted;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_SESSION_KEY: &str = "DEFAULT";

/// One e-mail send request, serialized with the send API's camelCase names.
///
/// Unset optional fields serialize as empty strings, matching what the API
/// expects for a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to_email: String,
    pub from_email: String,
    pub subject: String,
    #[serde(default)]
    pub to_name: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub plaintext_body: String,
    #[serde(default)]
    pub html_body: String,
    #[serde(default = "default_session_key")]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Map::is_empty", rename = "customHeaders")]
    pub custom_headers: Map<String, Value>,
}

fn default_session_key() -> String {
    DEFAULT_SESSION_KEY.to_string()
}

impl EmailMessage {
    pub fn new(
        to_email: impl Into<String>,
        from_email: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            to_email: to_email.into(),
            from_email: from_email.into(),
            subject: subject.into(),
            to_name: String::new(),
            from_name: String::new(),
            plaintext_body: String::new(),
            html_body: String::new(),
            session_key: default_session_key(),
            custom_headers: Map::new(),
        }
    }

    pub fn with_to_name(mut self, name: impl Into<String>) -> Self {
        self.to_name = name.into();
        self
    }

    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = name.into();
        self
    }

    pub fn with_plaintext_body(mut self, body: impl Into<String>) -> Self {
        self.plaintext_body = body.into();
        self
    }

    pub fn with_html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = body.into();
        self
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers
            .insert(name.into(), Value::String(value.into()));
        self
    }
}

impl Weighted for EmailMessage {
    /// Byte length of the html body, else the plaintext body, else the subject.
    fn weight(&self) -> usize {
        [&self.html_body, &self.plaintext_body, &self.subject]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or(0, |s| s.len())
    }
}
