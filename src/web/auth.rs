use crate::domain::models::{UserProfile, UserRole};
use crate::domain::navigation::Screen;
use crate::error::{SafetyError, SafetyResult};
use crate::services::identity::normalize_email;
use crate::state::SharedState;
use crate::web::session::{self, UserSession};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CodeRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct SessionUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub role_label: &'static str,
}

impl From<UserProfile> for SessionUser {
    fn from(profile: UserProfile) -> Self {
        let role_label = profile.role_label();
        Self { profile, role_label }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: SessionUser,
    pub screen: Screen,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/request-code", post(request_code))
        .route("/verify-code", post(verify_code))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state)
}

pub async fn cleanup_limiters(state: &SharedState) -> usize {
    state.verify_limiter.cleanup().await
}

async fn request_code(
    State(state): State<SharedState>,
    Json(payload): Json<CodeRequest>,
) -> SafetyResult<impl IntoResponse> {
    if payload.email.trim().is_empty() {
        return Err(SafetyError::BadRequest("请输入邮箱".to_string()));
    }
    state.identity.request_code(&payload.email).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

async fn verify_code(
    State(state): State<SharedState>,
    Json(payload): Json<VerifyRequest>,
) -> SafetyResult<impl IntoResponse> {
    let email = normalize_email(&payload.email);
    if let Err(wait) = state.verify_limiter.admit(&email).await {
        tracing::warn!("Verification rate limit exceeded for {} (retry in {}s)", email, wait.as_secs());
        return Err(SafetyError::RateLimited);
    }

    let profile = state.identity.verify_code(&email, &payload.code).await?;
    let session_id = state.open_shell(profile.clone()).await;
    let token = session::sign_session(
        session_id,
        profile.id,
        profile.role,
        state.clock.now(),
        &state.session_key,
    )
    .map_err(|e| SafetyError::Persistence(anyhow::anyhow!("signing session: {e}")))?;

    let mut headers = HeaderMap::new();
    let cookie = HeaderValue::from_str(&session::session_cookie(&token, state.secure_cookies))
        .map_err(|e| SafetyError::Persistence(anyhow::anyhow!("session cookie: {e}")))?;
    headers.insert(header::SET_COOKIE, cookie);

    Ok((
        headers,
        Json(LoginResponse {
            token,
            user: profile.into(),
            screen: Screen::Home,
        }),
    ))
}

async fn logout(State(state): State<SharedState>, session: UserSession) -> impl IntoResponse {
    state.close_shell(session.session_id).await;
    tracing::info!("{} signed out", session.user.email);

    let mut headers = HeaderMap::new();
    if let Ok(cookie) = HeaderValue::from_str(&session::clear_cookie(state.secure_cookies)) {
        headers.insert(header::SET_COOKIE, cookie);
    }
    (headers, Json(serde_json::json!({ "screen": Screen::Login })))
}

async fn me(session: UserSession) -> Json<SessionUser> {
    Json(session.user.into())
}

/// Roles as shown in the UI, for clients that render the role picker.
pub fn role_labels() -> Vec<(UserRole, &'static str)> {
    UserRole::ALL.iter().map(|role| (*role, role.label())).collect()
}
