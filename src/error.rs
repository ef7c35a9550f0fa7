use crate::domain::navigation::{Screen, ACCESS_DENIED};
use crate::domain::permissions::PermissionError;
use crate::domain::submission::ValidationError;
use crate::services::identity::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Everything a handler can fail with. Draft generation failures never
/// show up here: they are folded into the draft payload.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Auth(AuthError),
    #[error("请重新登录")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("请先进入{}页面", .0.title())]
    WrongScreen(Screen),
    #[error("{0}不存在")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("发送频率过快，请稍后再试")]
    RateLimited,
    #[error("数据保存失败，请稍后重试")]
    Persistence(#[source] anyhow::Error),
}

impl SafetyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::WrongScreen(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::WrongScreen(_) => "wrong_screen",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::RateLimited => "rate_limited",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn denied() -> Self {
        Self::Forbidden(ACCESS_DENIED)
    }
}

impl From<anyhow::Error> for SafetyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

impl From<AuthError> for SafetyError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RateLimited => Self::RateLimited,
            AuthError::Store(e) => Self::Persistence(e),
            other => Self::Auth(other),
        }
    }
}

impl From<PermissionError> for SafetyError {
    fn from(err: PermissionError) -> Self {
        match err {
            PermissionError::NotAllowed(_) => Self::denied(),
            PermissionError::Store(e) => Self::Persistence(e),
        }
    }
}

impl IntoResponse for SafetyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Persistence(e) = &self {
            tracing::error!("Persistence failure: {:#}", e);
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type SafetyResult<T> = Result<T, SafetyError>;
