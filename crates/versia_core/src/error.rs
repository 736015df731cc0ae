/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};

/// Terminal failure of an inbox request. Each variant maps to exactly one
/// status code.
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    /// Malformed input: bad UUID, missing header, body that fails to decode.
    #[error("{0}")]
    Validation(String),
    /// Well-formed input that federation policy refuses.
    #[error("{0}")]
    BadRequest(String),
    /// Carries only a generic message; details go to the log.
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Timeout(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl InboxError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            InboxError::Validation(_) | InboxError::BadRequest(_) => StatusCode::BAD_REQUEST,
            InboxError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            InboxError::Forbidden(_) => StatusCode::FORBIDDEN,
            InboxError::NotFound(_) => StatusCode::NOT_FOUND,
            InboxError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            InboxError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            InboxError::Internal(e) => serde_json::json!({
                "error": "Failed to process request",
                "message": format!("{e:#}"),
            }),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for InboxError {
    fn into_response(self) -> Response<Body> {
        json(self.status(), &self.body())
    }
}

/// Successful terminal result of an inbox request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Text(StatusCode, String),
    /// Status only, no body. Used for defederated senders.
    Empty(StatusCode),
}

impl Outcome {
    pub fn ok(msg: impl Into<String>) -> Self {
        Outcome::Text(StatusCode::OK, msg.into())
    }

    pub fn created(msg: impl Into<String>) -> Self {
        Outcome::Text(StatusCode::CREATED, msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Outcome::Text(s, _) | Outcome::Empty(s) => *s,
        }
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response<Body> {
        match self {
            Outcome::Text(status, msg) => {
                let mut resp = Response::new(Body::from(msg));
                *resp.status_mut() = status;
                resp.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                resp
            }
            Outcome::Empty(status) => {
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = status;
                resp
            }
        }
    }
}

pub type InboxResult = Result<Outcome, InboxError>;

pub(crate) fn json(status: StatusCode, value: &serde_json::Value) -> Response<Body> {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(InboxError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(InboxError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(InboxError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(InboxError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(InboxError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(InboxError::Timeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        let internal: InboxError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_body_has_error_and_message() {
        let internal: InboxError = anyhow::anyhow!("disk on fire").into();
        let body = internal.body();
        assert_eq!(body["error"], "Failed to process request");
        assert_eq!(body["message"], "disk on fire");
    }

    #[test]
    fn not_found_body_is_error_only() {
        let body = InboxError::not_found("Like not found or not owned by user").body();
        assert_eq!(body, serde_json::json!({ "error": "Like not found or not owned by user" }));
    }
}
