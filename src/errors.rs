//! Router error taxonomy.
//!
//! Every failure a proxied request can hit is expressed as a
//! [`RouterError`] variant. The enum implements
//! [`axum::response::IntoResponse`] so the HTTP layer can simply return
//! `Err(RouterError::..)`; terminal errors surface as S3-style XML bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::selector::Target;
use crate::xml::render_error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Errors produced while routing one request.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The inbound request did not carry a usable signing scope or bucket.
    #[error("could not extract source bucket: {0}")]
    Extraction(String),

    /// Cloud credentials could not be obtained for a region.
    #[error("could not get credentials for region {region}: {source}")]
    Credentials {
        region: String,
        #[source]
        source: anyhow::Error,
    },

    /// Every endpoint in every eligible role is missing or offline.
    #[error("no endpoints available")]
    NoEndpointsAvailable,

    /// A request could not be signed or assembled.
    #[error("could not sign {stage} request: {message}")]
    Signing { stage: &'static str, message: String },

    /// The outbound call itself failed (connect, timeout, reset).
    #[error("{target} request failed: {source}")]
    Transport {
        target: Target,
        #[source]
        source: anyhow::Error,
    },

    /// The outbound call panicked and was contained at the attempt boundary.
    #[error("panic during {target} request: {message}")]
    Panic { target: Target, message: String },

    /// A cross-region redirect could not be followed.
    #[error("could not follow region redirect: {0}")]
    Redirect(String),

    /// The directory service could not be queried or decoded.
    #[error("could not refresh endpoint directory: {0}")]
    Directory(String),

    /// The caller went away or the process is shutting down.
    #[error("request cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RouterError {
    /// Return the S3 XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::Extraction(_) => "InvalidRequest",
            RouterError::Credentials { .. } => "InvalidAccessKeyId",
            RouterError::NoEndpointsAvailable => "ServiceUnavailable",
            RouterError::Cancelled => "RequestCancelled",
            RouterError::Signing { .. }
            | RouterError::Transport { .. }
            | RouterError::Panic { .. }
            | RouterError::Redirect(_)
            | RouterError::Directory(_)
            | RouterError::Internal(_) => "InternalError",
        }
    }

    /// Return the HTTP status code presented to the calling SDK.
    ///
    /// Extraction failures are the client's fault; everything else is a
    /// 500-class response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RouterError::Extraction(_) => StatusCode::BAD_REQUEST,
            RouterError::NoEndpointsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error counts as a transport-class failure for failover.
    ///
    /// Panics are treated exactly like transport errors.
    pub fn is_transport_class(&self) -> bool {
        matches!(
            self,
            RouterError::Transport { .. } | RouterError::Panic { .. }
        )
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let body = render_error(self.code(), &self.to_string(), "", &request_id);

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", "Sidekick".to_string()),
            ],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_16_uppercase_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_panic_message_names_target() {
        let err = RouterError::Panic {
            target: Target::Bolt,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "panic during bolt request: boom");
        assert!(err.is_transport_class());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RouterError::Extraction("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RouterError::Redirect("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(!RouterError::Cancelled.is_transport_class());
        assert!(!RouterError::Redirect("x".into()).is_transport_class());
    }

    #[test]
    fn test_into_response_has_xml_body_headers() {
        let resp = RouterError::NoEndpointsAvailable.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/xml"
        );
        assert!(resp.headers().contains_key("x-amz-request-id"));
        assert_eq!(resp.headers().get("server").unwrap(), "Sidekick");
    }
}
