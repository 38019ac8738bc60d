//! The API error taxonomy and its mapping to HTTP responses.
//!
//! Every error response has the body `{"code": <status>, "message": <localized>}`.
//! WebSocket paths send the localized message as one text frame instead.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::i18n::{Lang, MessageKey};

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body or route parameter.
    InvalidArgument(String),
    /// Unknown, already-attached, or offline session.
    InvalidSessionId { session_id: String },
    /// Registry/storage corruption.
    LoadSession(String),
    /// Backend driver handshake failure.
    ConnectServer(String),
    /// Admin-only route invoked by a non-admin.
    NoPerm { perm: &'static str },
    /// Upstream gateway rejected a close/monitor request.
    BadRequest(String),
    /// Persistence or unexpected server-side failure.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSessionId { .. } => StatusCode::BAD_REQUEST,
            ApiError::LoadSession(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ConnectServer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NoPerm { .. } => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self, lang: &Lang) -> String {
        match self {
            ApiError::InvalidArgument(err) => lang.localize(MessageKey::InvalidArgument, &[("err", err)]),
            ApiError::InvalidSessionId { session_id } => {
                lang.localize(MessageKey::InvalidSessionId, &[("session_id", session_id)])
            }
            ApiError::LoadSession(err) => lang.localize(MessageKey::LoadSession, &[("err", err)]),
            ApiError::ConnectServer(err) => lang.localize(MessageKey::ConnectServer, &[("err", err)]),
            ApiError::NoPerm { perm } => lang.localize(MessageKey::NoPerm, &[("perm", perm)]),
            ApiError::BadRequest(err) => lang.localize(MessageKey::BadRequest, &[("err", err)]),
            ApiError::Internal(_) => lang.localize(MessageKey::Internal, &[]),
        }
    }

    /// Bind a locale so the error can be returned from a handler.
    pub fn localized(self, lang: &Lang) -> ApiFailure {
        ApiFailure {
            error: self,
            lang: lang.clone(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// An [`ApiError`] paired with the locale it should be rendered in.
#[derive(Debug)]
pub struct ApiFailure {
    error: ApiError,
    lang: Lang,
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let body = json!({
            "code": status.as_u16(),
            "message": self.error.message(&self.lang),
        });
        (status, Json(body)).into_response()
    }
}

/// Standard success envelope: `{"code": 0, "message": "ok", "data": ...}`.
#[derive(Debug, Serialize)]
pub struct HttpResponse<T: Serialize> {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl HttpResponse<()> {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data: None,
        }
    }
}

impl<T: Serialize> HttpResponse<T> {
    pub fn with_data(data: T) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ApiError::ConnectServer("refused".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::InvalidSessionId { session_id: "x".into() }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NoPerm { perm: "monitor session" }.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn messages_localize_with_context() {
        let lang = Lang::default();
        let err = ApiError::InvalidSessionId { session_id: "s-1".into() };
        assert_eq!(err.message(&lang), "invalid session id s-1");

        let err = ApiError::Internal("secret detail".into());
        // Internal details never leak into the body.
        assert_eq!(err.message(&lang), "internal server error");
    }

    #[test]
    fn success_envelope_shape() {
        let body = serde_json::to_value(HttpResponse::with_data(vec![1, 2])).unwrap();
        assert_eq!(body["code"], 0);
        assert_eq!(body["message"], "ok");
        assert_eq!(body["data"], serde_json::json!([1, 2]));

        let body = serde_json::to_value(HttpResponse::ok()).unwrap();
        assert!(body.get("data").is_none());
    }
}
