use crate::db::ProfileStore;
use crate::domain::models::UserProfile;
use crate::middleware::RateLimiter;
use crate::time_utils::Clock;
use argon2::password_hash::rand_core::OsRng;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_ATTEMPTS: u8 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("该邮箱未开通账号")]
    NotAllowed,
    #[error("发送频率过快，请稍后再试")]
    RateLimited,
    #[error("验证码错误或已过期")]
    InvalidCode,
    #[error("验证码尝试次数过多，请重新获取")]
    TooManyAttempts,
    #[error("验证码发送失败: {0}")]
    Delivery(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

/// Development delivery: the code goes to the log.
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send(&self, email: &str, code: &str) -> anyhow::Result<()> {
        tracing::info!("Login code for {}: {}", email, code);
        Ok(())
    }
}

/// Posts `{ "email", "code" }` to a mail relay.
pub struct WebhookCodeSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookCodeSender {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl CodeSender for WebhookCodeSender {
    async fn send(&self, email: &str, code: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "email": email, "code": code }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

struct PendingCode {
    hash: String,
    expires_at: DateTime<Utc>,
    attempts: u8,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Passwordless sign-in: one-time codes for allow-listed emails.
pub struct IdentityProvider {
    profiles: Arc<dyn ProfileStore>,
    sender: Arc<dyn CodeSender>,
    clock: Arc<dyn Clock>,
    pending: RwLock<HashMap<String, PendingCode>>,
    ttl: Duration,
    limiter: RateLimiter,
}

impl IdentityProvider {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        sender: Arc<dyn CodeSender>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            profiles,
            sender,
            clock,
            pending: RwLock::new(HashMap::new()),
            ttl,
            limiter: RateLimiter::new(5, 60),
        }
    }

    pub async fn request_code(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if self.profiles.find_by_email(&email).await?.is_none() {
            tracing::warn!("Login code requested for unknown email {}", email);
            return Err(AuthError::NotAllowed);
        }
        if let Err(wait) = self.limiter.admit(&email).await {
            tracing::warn!("Login code rate limit exceeded for {} (retry in {}s)", email, wait.as_secs());
            return Err(AuthError::RateLimited);
        }

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let salt = SaltString::generate(OsRng);
        let hash = Argon2::default()
            .hash_password(code.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("hashing login code: {e}"))?
            .to_string();

        self.sender
            .send(&email, &code)
            .await
            .map_err(|e| AuthError::Delivery(e.to_string()))?;

        self.pending.write().await.insert(
            email.clone(),
            PendingCode {
                hash,
                expires_at: self.clock.now() + self.ttl,
                attempts: 0,
            },
        );
        tracing::info!("Login code issued for {}", email);
        Ok(())
    }

    pub async fn verify_code(&self, email: &str, code: &str) -> Result<UserProfile, AuthError> {
        let email = normalize_email(email);
        {
            let mut pending = self.pending.write().await;
            let Some(entry) = pending.get_mut(&email) else {
                return Err(AuthError::InvalidCode);
            };
            if entry.expires_at < self.clock.now() {
                pending.remove(&email);
                return Err(AuthError::InvalidCode);
            }

            let matches = PasswordHash::new(&entry.hash)
                .map(|parsed| Argon2::default().verify_password(code.trim().as_bytes(), &parsed).is_ok())
                .unwrap_or(false);
            if !matches {
                entry.attempts += 1;
                if entry.attempts >= MAX_ATTEMPTS {
                    pending.remove(&email);
                    tracing::warn!("Login code for {} discarded after {} attempts", email, MAX_ATTEMPTS);
                    return Err(AuthError::TooManyAttempts);
                }
                return Err(AuthError::InvalidCode);
            }
            pending.remove(&email);
        }

        // The allow-list may have changed since the code went out.
        let profile = self
            .profiles
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotAllowed)?;
        tracing::info!("{} signed in as {}", profile.email, profile.role.as_str());
        Ok(profile)
    }

    pub async fn current_user(&self, id: uuid::Uuid) -> Result<Option<UserProfile>, AuthError> {
        Ok(self.profiles.find_by_id(id).await?)
    }

    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| entry.expires_at >= now);
        self.limiter.cleanup().await;
        before - pending.len()
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct CapturingSender {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl CapturingSender {
        pub fn last_code(&self) -> Option<String> {
            self.sent.lock().ok()?.last().map(|(_, code)| code.clone())
        }
    }

    #[async_trait]
    impl CodeSender for CapturingSender {
        async fn send(&self, email: &str, code: &str) -> anyhow::Result<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((email.to_string(), code.to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::CapturingSender;
    use super::*;
    use crate::db::memory::MemoryProfileStore;
    use crate::domain::models::UserRole;
    use crate::time_utils::ManualClock;
    use chrono::TimeZone;
    use uuid::Uuid;

    async fn setup() -> (IdentityProvider, Arc<CapturingSender>, ManualClock) {
        let profiles = Arc::new(MemoryProfileStore::default());
        profiles
            .upsert(&UserProfile {
                id: Uuid::new_v4(),
                email: "officer@pakrut.com".into(),
                display_name: "安全员".into(),
                unit: "生产技术部".into(),
                role: UserRole::SafetyOfficer,
            })
            .await
            .unwrap();
        let sender = Arc::new(CapturingSender::default());
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap());
        let idp = IdentityProvider::new(profiles, sender.clone(), Arc::new(clock.clone()), Duration::minutes(10));
        (idp, sender, clock)
    }

    #[tokio::test]
    async fn code_round_trip_signs_in() {
        let (idp, sender, _) = setup().await;
        idp.request_code(" Officer@Pakrut.com ").await.unwrap();
        let code = sender.last_code().unwrap();
        assert_eq!(code.len(), 6);

        let profile = idp.verify_code("officer@pakrut.com", &code).await.unwrap();
        assert_eq!(profile.role, UserRole::SafetyOfficer);

        // Single use.
        assert!(matches!(idp.verify_code("officer@pakrut.com", &code).await, Err(AuthError::InvalidCode)));
    }

    #[tokio::test]
    async fn unknown_email_is_rejected() {
        let (idp, sender, _) = setup().await;
        assert!(matches!(idp.request_code("stranger@example.com").await, Err(AuthError::NotAllowed)));
        assert!(sender.last_code().is_none());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let (idp, sender, clock) = setup().await;
        idp.request_code("officer@pakrut.com").await.unwrap();
        let code = sender.last_code().unwrap();
        clock.set(Utc.with_ymd_and_hms(2026, 1, 1, 8, 11, 0).unwrap());
        assert!(matches!(idp.verify_code("officer@pakrut.com", &code).await, Err(AuthError::InvalidCode)));
    }

    #[tokio::test]
    async fn repeated_wrong_codes_burn_the_code() {
        let (idp, sender, _) = setup().await;
        idp.request_code("officer@pakrut.com").await.unwrap();
        let code = sender.last_code().unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        for _ in 0..MAX_ATTEMPTS - 1 {
            assert!(matches!(idp.verify_code("officer@pakrut.com", wrong).await, Err(AuthError::InvalidCode)));
        }
        assert!(matches!(idp.verify_code("officer@pakrut.com", wrong).await, Err(AuthError::TooManyAttempts)));
        assert!(idp.verify_code("officer@pakrut.com", &code).await.is_err());
    }

    #[tokio::test]
    async fn code_requests_are_rate_limited() {
        let (idp, _, _) = setup().await;
        for _ in 0..5 {
            idp.request_code("officer@pakrut.com").await.unwrap();
        }
        assert!(matches!(idp.request_code("officer@pakrut.com").await, Err(AuthError::RateLimited)));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_codes() {
        let (idp, _, clock) = setup().await;
        idp.request_code("officer@pakrut.com").await.unwrap();
        assert_eq!(idp.purge_expired().await, 0);
        clock.set(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
        assert_eq!(idp.purge_expired().await, 1);
    }
}
