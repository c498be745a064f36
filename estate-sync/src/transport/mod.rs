//! REST and WebSocket collaborators for the agency API.

mod rest;
mod ws;

pub use rest::{RestClient, RestFetcher, RestMutations};
pub use ws::{WsPushChannel, WsSubscription};

use crate::config::AuthConfig;
use crate::error::RawError;
use estate_core::AgencyId;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<ClientError> for RawError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api {
                status,
                code,
                message,
            } => {
                let raw = RawError::new(message).with_status(status);
                match code {
                    Some(code) => raw.with_code(code),
                    None => raw,
                }
            }
            ClientError::Http(err) => {
                let status = err.status().map(|status| status.as_u16());
                let raw = RawError::new(err.to_string());
                match status {
                    Some(status) => raw.with_status(status),
                    None => raw,
                }
            }
            ClientError::Config(message) => RawError::not_configured(message),
            other => RawError::new(other.to_string()),
        }
    }
}

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: String,
}

fn build_auth_headers(auth: &AuthConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &auth.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key).map_err(|e| ClientError::Config(e.to_string()))?,
        );
    }
    if let Some(jwt) = &auth.jwt {
        let value = format!("Bearer {}", jwt);
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&value).map_err(|e| ClientError::Config(e.to_string()))?,
        );
    }
    Ok(headers)
}

fn agency_header(agency_id: AgencyId) -> (HeaderName, HeaderValue) {
    // A hyphenated UUID is always a valid header value.
    let value = HeaderValue::from_str(&agency_id.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static(""));
    (HeaderName::from_static("x-agency-id"), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorKind};

    #[test]
    fn test_api_error_keeps_status_and_code() {
        let raw: RawError = ClientError::Api {
            status: 403,
            code: Some("42501".to_string()),
            message: "permission denied for table properties".to_string(),
        }
        .into();
        assert_eq!(raw.status, Some(403));
        assert_eq!(raw.code.as_deref(), Some("42501"));
        assert_eq!(classify(&raw).kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_config_error_is_config_missing() {
        let raw: RawError = ClientError::Config("no base url".to_string()).into();
        assert_eq!(classify(&raw).kind, ErrorKind::ConfigMissing);
    }

    #[test]
    fn test_auth_headers() {
        let headers = build_auth_headers(&AuthConfig {
            api_key: Some("key-1".to_string()),
            jwt: Some("token".to_string()),
        })
        .unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "key-1");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer token");

        let err = build_auth_headers(&AuthConfig {
            api_key: Some("bad\nkey".to_string()),
            jwt: None,
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
