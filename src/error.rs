use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors raised by the agent connector.
///
/// Startup variants abort the boot sequence and the process never serves.
/// Request-level variants are caught at the HTTP boundary and rendered as a
/// 400 response carrying `{error-code, message}`.
#[derive(Error, Debug)]
pub enum AgentError {
    // ---- fatal at startup ----
    #[error("configuration file missing; check {0:?}")]
    MissingConfig(Vec<PathBuf>),

    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error("agent profile {profile} configured for unsupported role {role}")]
    UnsupportedRole { profile: String, role: String },

    #[error("cannot open pool: {0}")]
    Pool(String),

    #[error("cannot open wallet: {0}")]
    Wallet(String),

    #[error("agent {0} requires Trust Anchor agent, but it is not responding")]
    TrustAnchorUnavailable(String),

    #[error("boot sequence failed: {0}")]
    Boot(String),

    // ---- request-level, recoverable ----
    /// Failure surfaced by the identity/ledger SDK, with its native code.
    #[error("{message}")]
    Sdk { code: i64, message: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn sdk(code: i64, message: impl Into<String>) -> Self {
        Self::Sdk {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Machine-checkable code for the response envelope: the SDK's native
    /// numeric code when one exists, 400 otherwise.
    pub fn error_code(&self) -> i64 {
        match self {
            Self::Sdk { code, .. } => *code,
            _ => 400,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error-code": self.error_code(),
            "message": self.to_string(),
        });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdk_code_is_preserved() {
        let err = AgentError::sdk(212, "no such item");
        assert_eq!(err.error_code(), 212);
    }

    #[test]
    fn generic_errors_map_to_400() {
        assert_eq!(AgentError::bad_request("nope").error_code(), 400);
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(AgentError::from(json_err).error_code(), 400);
    }
}
