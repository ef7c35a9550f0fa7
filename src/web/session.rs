use crate::domain::models::{UserProfile, UserRole};
use crate::domain::navigation::{NavigationShell, Screen};
use crate::error::{SafetyError, SafetyResult};
use crate::state::{ShellHandle, SharedState};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::MutexGuard;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_TTL_HOURS: i64 = 24;

/// Verified token contents. Expiry is enforced by [`verify_session`].
#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub role: UserRole,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
    #[error("bad role")]
    Role,
}

pub fn sign_session(
    session_id: Uuid,
    user_id: Uuid,
    role: UserRole,
    now: DateTime<Utc>,
    key: &[u8],
) -> Result<String, SessionError> {
    let exp = now + Duration::hours(SESSION_TTL_HOURS);
    let payload = format!("{}|{}|{}|{}", session_id, user_id, role.as_str(), exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    ))
}

pub fn verify_session(token: &str, now: DateTime<Utc>, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes).map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let pieces: Vec<&str> = payload.split('|').collect();
    let [session_id, user_id, role, exp] = pieces.as_slice() else {
        return Err(SessionError::Invalid);
    };
    let session_id = Uuid::parse_str(session_id).map_err(|_| SessionError::Invalid)?;
    let user_id = Uuid::parse_str(user_id).map_err(|_| SessionError::Invalid)?;
    let role = UserRole::parse(role).ok_or(SessionError::Role)?;
    let exp: i64 = exp.parse().map_err(|_| SessionError::Invalid)?;
    if now.timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims {
        session_id,
        user_id,
        role,
    })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(val) = auth.to_str() {
            if let Some(bearer) = val.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(cookie) = headers.get(axum::http::header::COOKIE) {
        if let Ok(val) = cookie.to_str() {
            for pair in val.split(';') {
                if let Some(rest) = pair.trim().strip_prefix("session=") {
                    return Some(rest.to_string());
                }
            }
        }
    }
    None
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "session={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        SESSION_TTL_HOURS * 3600,
        secure_flag
    )
}

pub fn clear_cookie(secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{}", secure_flag)
}

/// An authenticated request bound to its live navigation shell.
pub struct UserSession {
    pub session_id: Uuid,
    pub user: UserProfile,
    pub shell: ShellHandle,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = SafetyError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared_state = SharedState::from_ref(state);

        let token = extract_token(&parts.headers).ok_or(SafetyError::Unauthenticated)?;
        let claims = verify_session(&token, shared_state.clock.now(), &shared_state.session_key).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            SafetyError::Unauthenticated
        })?;

        // Signed out or expired shells make the token useless.
        let shell = shared_state
            .shell(claims.session_id)
            .await
            .ok_or(SafetyError::Unauthenticated)?;
        let user = {
            let mut guard = shell.lock().await;
            guard.touch();
            guard.user().cloned()
        };
        let Some(user) = user.filter(|u| u.id == claims.user_id) else {
            return Err(SafetyError::Unauthenticated);
        };

        // A role change since sign-in ends the session.
        let current = shared_state.identity.current_user(claims.user_id).await?;
        if current.as_ref().map(|p| p.role) != Some(claims.role) {
            tracing::warn!(
                "Ending session for {}: role is now {}",
                user.email,
                current.map_or("removed", |p| p.role.as_str())
            );
            shared_state.close_shell(claims.session_id).await;
            return Err(SafetyError::Unauthenticated);
        }

        Ok(UserSession {
            session_id: claims.session_id,
            user,
            shell,
        })
    }
}

impl UserSession {
    /// Locks the shell for work on `screen`. The session must currently be
    /// on that screen and its role must still hold the screen's key.
    pub async fn on_screen(
        &self,
        state: &SharedState,
        screen: Screen,
    ) -> SafetyResult<MutexGuard<'_, NavigationShell>> {
        let guard = self.shell.lock().await;
        if guard.screen() != screen {
            return Err(SafetyError::WrongScreen(screen));
        }
        if let Some(key) = screen.required_key() {
            let permissions = state.permissions.snapshot().await;
            if !permissions.has_permission(self.user.role, key) {
                tracing::warn!(
                    "{} lost {} while on {:?}",
                    self.user.email,
                    key.as_str(),
                    screen
                );
                return Err(SafetyError::denied());
            }
        }
        Ok(guard)
    }
}
