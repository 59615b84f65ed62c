//! Gateway error kinds. All three carry the fixed `POST-API` namespace used
//! in the response envelope; the numeric `code` mirrors the HTTP status the
//! original error was "morally" equivalent to, even though the gateway
//! never actually returns a non-200 status (see `[RFC] dispatch.rs`).

use crate::types::Response;

pub const ERR_NAMESPACE: &str = "POST-API";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("request timeout")]
    RequestTimeout,

    #[error("{0}")]
    InternalServerError(String),
}

impl GatewayError {
    pub fn code(&self) -> u64 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::RequestTimeout => 408,
            GatewayError::InternalServerError(_) => 500,
        }
    }

    /// A stable, opaque identifier for this occurrence of the error. The
    /// original carried a per-instance `err_id`; this crate just reuses the
    /// kind name since nothing downstream correlates on it today.
    pub fn err_id(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::RequestTimeout => "request_timeout",
            GatewayError::InternalServerError(_) => "internal_server_error",
        }
    }

    /// Renders this error as a top-level (non-per-call) response envelope.
    pub fn into_response(self) -> Response {
        Response {
            code: self.code(),
            message: self.to_string(),
            err_id: self.err_id().to_string(),
            err_namespace: ERR_NAMESPACE.to_string(),
            ..Default::default()
        }
    }
}
