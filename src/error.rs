//! Service error kinds and their HTTP mapping.
//!
//! Every error the lifecycle engine or the API surface can produce maps to
//! one of these kinds; store errors never cross the HTTP boundary
//! untranslated. Error bodies are plain text.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Public error kinds of the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed body, invalid request id, empty submission.
    #[error("{0}")]
    BadRequest(String),

    /// Shared bearer credential missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// Interaction token missing, wrong, or expired by row TTL.
    #[error("forbidden")]
    Forbidden,

    /// Request past its deadline at the moment of interaction.
    #[error("expired")]
    Gone,

    /// Unknown request id with no pending creation.
    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    /// Anything else; the caller may retry.
    #[error("internal error")]
    Internal(String),
}

impl ServiceError {
    #[must_use]
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Gone => StatusCode::GONE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(detail, "internal error");
        }
        let body = self.to_string();
        let mut response = (self.status(), body).into_response();
        if matches!(self, Self::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Bearer realm="ask4me""#),
            );
        }
        response
    }
}
