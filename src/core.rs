use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static PORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^COM\d+$|^/dev/tty(USB|ACM)\d+$").unwrap());

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub code: Option<String>,
    pub board: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub code: Option<String>,
    pub board: Option<String>,
    pub port: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub message: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Treats absent and empty fields the same way, matching the original
/// service's behavior where an empty string failed the presence check.
pub fn require_field(field: &Option<String>) -> Option<&str> {
    match field.as_deref() {
        Some(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// Accepts `COM<n>` or `/dev/tty{USB,ACM}<n>` and nothing else.
pub fn is_valid_serial_port(port: &str) -> bool {
    PORT_REGEX.is_match(port)
}
