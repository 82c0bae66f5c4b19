use std::fmt;

use serde::Serialize;

use quillgate_core::claims::TokenError;
use quillgate_core::services::TenantError;

/// Wire payload for `connect_document_error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u32>,
}

const INTERNAL_CONNECT_MESSAGE: &str = "Failed to connect client to document.";

/// Connection-pipeline rejection. Caller errors carry their own status code
/// and message; internal faults always render as the opaque 500 so backend
/// detail never reaches the client.
#[derive(Debug)]
pub struct GatewayError {
    code: u16,
    message: String,
    retry_after: Option<u32>,
    source: Option<anyhow::Error>,
}

impl GatewayError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    pub fn internal(source: anyhow::Error) -> Self {
        let mut error = Self::new(500, INTERNAL_CONNECT_MESSAGE);
        error.source = Some(source);
        error
    }

    pub fn with_retry_after(mut self, seconds: u32) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after(&self) -> Option<u32> {
        self.retry_after
    }

    pub fn body(&self) -> ConnectErrorBody {
        ConnectErrorBody {
            code: self.code,
            message: self.message.clone(),
            retry_after: self.retry_after,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| AsRef::<dyn std::error::Error>::as_ref(err))
    }
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

impl From<TenantError> for GatewayError {
    fn from(err: TenantError) -> Self {
        Self::new(err.status.unwrap_or(401), err.message)
    }
}
