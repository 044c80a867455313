// Error Design - typed failure kinds shared across the search and AI subsystems
//
// Every failure a client can observe is one of these variants; handlers never
// hand a raw error string to the HTTP layer. Each variant maps to a fixed
// status code and a localized human message drawn from the central table
// below. Internal details stay in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Languages supported by the client-facing message table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageLang {
    #[default]
    Ko,
    En,
}

impl MessageLang {
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.to_ascii_lowercase().starts_with("en") => Self::En,
            _ => Self::Ko,
        }
    }
}

/// Unified error union for the core subsystems
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("provider '{provider}' failed: {message}")]
    Provider {
        provider: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("embedding backend failed: {0}")]
    Embedding(String),

    #[error("router failed: {0}")]
    Router(String),

    #[error("another job is already running: {0}")]
    ConflictBusy(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal failure: {0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status this error kind maps to.
    ///
    /// ConflictBusy intentionally maps to 200: callers receive a
    /// `status: already_*` body rather than a failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Provider { .. } => StatusCode::BAD_GATEWAY,
            Self::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Router(_) => StatusCode::BAD_GATEWAY,
            Self::ConflictBusy(_) => StatusCode::OK,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Localized human message. Internal details are deliberately not
    /// interpolated for opaque kinds.
    pub fn user_message(&self, lang: MessageLang) -> String {
        match (self, lang) {
            (Self::InvalidInput(detail), MessageLang::Ko) => {
                format!("요청이 유효하지 않습니다: {detail}")
            }
            (Self::InvalidInput(detail), MessageLang::En) => {
                format!("Request failed validation: {detail}")
            }
            (Self::NotFound(what), MessageLang::Ko) => format!("{what}을(를) 찾을 수 없습니다"),
            (Self::NotFound(what), MessageLang::En) => format!("{what} not found"),
            (Self::PermissionDenied, MessageLang::Ko) => "접근 권한이 없습니다".to_string(),
            (Self::PermissionDenied, MessageLang::En) => "Access denied".to_string(),
            (Self::Provider { provider, .. }, MessageLang::Ko) => {
                format!("AI 제공자({provider}) 호출에 실패했습니다")
            }
            (Self::Provider { provider, .. }, MessageLang::En) => {
                format!("Upstream AI provider '{provider}' call failed")
            }
            (Self::Embedding(_), MessageLang::Ko) => "임베딩 생성에 실패했습니다".to_string(),
            (Self::Embedding(_), MessageLang::En) => "Embedding generation failed".to_string(),
            (Self::Router(msg), MessageLang::Ko) => {
                format!("사용 가능한 AI 모델이 없습니다: {msg}")
            }
            (Self::Router(msg), MessageLang::En) => format!("No usable AI model: {msg}"),
            (Self::ConflictBusy(job), MessageLang::Ko) => {
                format!("{job} 작업이 이미 진행 중입니다")
            }
            (Self::ConflictBusy(job), MessageLang::En) => format!("{job} is already running"),
            (Self::Unauthorized, MessageLang::Ko) => "인증이 필요합니다".to_string(),
            (Self::Unauthorized, MessageLang::En) => "Authentication required".to_string(),
            (Self::Internal(_), MessageLang::Ko) => "내부 오류가 발생했습니다".to_string(),
            (Self::Internal(_), MessageLang::En) => "An internal error occurred".to_string(),
        }
    }
}

/// Wire shape for error bodies
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Request language is resolved at the handler layer when it matters;
        // the fallback response uses the default locale.
        let lang = MessageLang::default();

        if matches!(self, Self::Internal(_) | Self::Embedding(_)) {
            error!("internal error surfaced to client: {self}");
        }

        match &self {
            Self::ConflictBusy(job) => {
                let body = json!({
                    "status": format!("already_{job}"),
                    "message": self.user_message(lang),
                });
                (StatusCode::OK, Json(body)).into_response()
            }
            _ => {
                let body = ErrorBody {
                    detail: self.user_message(lang),
                };
                (self.status(), Json(body)).into_response()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("record".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_deterministic() {
        assert_eq!(
            ApiError::InvalidInput("q".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::NotFound("note".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::PermissionDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Router("empty".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::ConflictBusy("indexing".into()).status(),
            StatusCode::OK
        );
    }

    #[test]
    fn provider_failure_maps_to_bad_gateway() {
        let err = ApiError::Provider {
            provider: "openai".into(),
            message: "timeout".into(),
            status_code: Some(504),
        };
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_message_never_leaks_detail() {
        let err = ApiError::Internal("connection refused to 10.0.0.3:5432".into());
        let msg = err.user_message(MessageLang::En);
        assert!(!msg.contains("10.0.0.3"));
    }

    #[test]
    fn messages_are_localized() {
        let err = ApiError::Unauthorized;
        assert_ne!(
            err.user_message(MessageLang::Ko),
            err.user_message(MessageLang::En)
        );
    }

    #[test]
    fn lang_from_accept_language_header() {
        assert_eq!(MessageLang::from_header(Some("en-US")), MessageLang::En);
        assert_eq!(MessageLang::from_header(Some("ko")), MessageLang::Ko);
        assert_eq!(MessageLang::from_header(None), MessageLang::Ko);
    }
}
