//! JSON response envelope returned by the web service.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Discriminates successful responses from errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Sync,
    Error,
}

/// Response body for every service route except `/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "status-code")]
    pub status_code: u16,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Envelope {
    /// A `200 OK` envelope carrying a human-readable message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, ResponseType::Sync, message.into())
    }

    /// An error envelope with the given status.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, ResponseType::Error, message.into())
    }

    fn new(status: StatusCode, kind: ResponseType, message: String) -> Self {
        Self {
            status_code: status.as_u16(),
            status: status.canonical_reason().unwrap_or_default().to_string(),
            kind,
            result: Some(json!({ "message": message })),
        }
    }

    /// The message carried in `result`, if any.
    pub fn result_message(&self) -> Option<&str> {
        self.result.as_ref()?.get("message")?.as_str()
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
