use crate::db::memory::{
    MemoryCounterStore, MemoryPermissionStore, MemoryProfileStore, MemoryQuestionStore, MemoryRegulationStore,
    MemoryReportStore, MemoryScoreStore,
};
use crate::db::{
    CounterStore, PermissionStore, PgStore, ProfileStore, QuestionStore, RegulationStore, ReportStore, ScoreStore,
};
use crate::domain::models::UserProfile;
use crate::domain::navigation::NavigationShell;
use crate::domain::permissions::PermissionTable;
use crate::domain::serial::SerialAllocator;
use crate::middleware::RateLimiter;
use crate::services::ai::{DraftGenerator, DraftService};
use crate::services::identity::{CodeSender, IdentityProvider};
use crate::services::reports::ReportWorkflow;
use crate::services::storage::ObjectStorage;
use crate::time_utils::{Clock, SiteTimezone};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type ShellHandle = Arc<Mutex<NavigationShell>>;

/// Every persistence port the service talks to.
#[derive(Clone)]
pub struct Stores {
    pub profiles: Arc<dyn ProfileStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub counter: Arc<dyn CounterStore>,
    pub reports: Arc<dyn ReportStore>,
    pub questions: Arc<dyn QuestionStore>,
    pub scores: Arc<dyn ScoreStore>,
    pub regulations: Arc<dyn RegulationStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let pg = Arc::new(PgStore::new(pool));
        Self {
            profiles: pg.clone(),
            permissions: pg.clone(),
            counter: pg.clone(),
            reports: pg.clone(),
            questions: pg.clone(),
            scores: pg.clone(),
            regulations: pg,
        }
    }

    pub fn memory() -> Self {
        Self {
            profiles: Arc::new(MemoryProfileStore::default()),
            permissions: Arc::new(MemoryPermissionStore::default()),
            counter: Arc::new(MemoryCounterStore::default()),
            reports: Arc::new(MemoryReportStore::default()),
            questions: Arc::new(MemoryQuestionStore::default()),
            scores: Arc::new(MemoryScoreStore::default()),
            regulations: Arc::new(MemoryRegulationStore::default()),
        }
    }
}

/// Collaborators and settings needed to assemble [`AppState`].
pub struct AppParts {
    pub stores: Stores,
    pub storage: Arc<dyn ObjectStorage>,
    pub code_sender: Arc<dyn CodeSender>,
    pub generator: Arc<dyn DraftGenerator>,
    pub clock: Arc<dyn Clock>,
    pub tz: SiteTimezone,
    pub session_key: Vec<u8>,
    pub draft_timeout: Duration,
    pub login_code_ttl: chrono::Duration,
    pub secure_cookies: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub permissions: PermissionTable,
    pub reports: ReportWorkflow,
    pub drafts: DraftService,
    pub identity: Arc<IdentityProvider>,
    pub storage: Arc<dyn ObjectStorage>,
    pub clock: Arc<dyn Clock>,
    pub tz: SiteTimezone,
    pub session_key: Vec<u8>,
    pub secure_cookies: bool,
    /// Per-email verification attempts, across all pending codes.
    pub verify_limiter: RateLimiter,
    pub shells: Arc<RwLock<HashMap<Uuid, ShellHandle>>>, // session_id -> navigation shell
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub async fn assemble(parts: AppParts) -> anyhow::Result<Self> {
        let AppParts {
            stores,
            storage,
            code_sender,
            generator,
            clock,
            tz,
            session_key,
            draft_timeout,
            login_code_ttl,
            secure_cookies,
        } = parts;

        let permissions = PermissionTable::load(stores.permissions.clone()).await?;
        let allocator = SerialAllocator::new(stores.counter.clone(), clock.clone(), tz);
        let reports = ReportWorkflow::new(stores.reports.clone(), allocator, clock.clone());
        let identity = Arc::new(IdentityProvider::new(
            stores.profiles.clone(),
            code_sender,
            clock.clone(),
            login_code_ttl,
        ));

        Ok(Self {
            stores,
            permissions,
            reports,
            drafts: DraftService::new(generator, draft_timeout),
            identity,
            storage,
            clock,
            tz,
            session_key,
            secure_cookies,
            verify_limiter: RateLimiter::new(10, 60),
            shells: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Starts a navigation shell for a freshly signed-in user.
    pub async fn open_shell(&self, user: UserProfile) -> Uuid {
        let session_id = Uuid::new_v4();
        let shell = Arc::new(Mutex::new(NavigationShell::signed_in(user)));
        self.shells.write().await.insert(session_id, shell);
        session_id
    }

    pub async fn shell(&self, session_id: Uuid) -> Option<ShellHandle> {
        self.shells.read().await.get(&session_id).cloned()
    }

    /// Logs the shell out and forgets it.
    pub async fn close_shell(&self, session_id: Uuid) -> bool {
        let removed = self.shells.write().await.remove(&session_id);
        match removed {
            Some(shell) => {
                shell.lock().await.logout();
                true
            }
            None => false,
        }
    }

    /// Drops shells nobody has touched for `max_idle`.
    pub async fn purge_idle_shells(&self, max_idle: Duration) -> usize {
        let mut shells = self.shells.write().await;
        let mut stale = Vec::new();
        for (id, shell) in shells.iter() {
            // Busy shells are in use, so they are not idle.
            if let Ok(guard) = shell.try_lock() {
                if guard.idle_for() > max_idle {
                    stale.push(*id);
                }
            }
        }
        for id in &stale {
            shells.remove(id);
        }
        stale.len()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::db::seed;
    use crate::domain::models::UserRole;
    use crate::services::identity::fakes::CapturingSender;
    use crate::services::storage::MemoryObjectStorage;
    use crate::time_utils::{parse_timezone, ManualClock};
    use chrono::{TimeZone, Utc};

    pub struct TestApp {
        pub state: SharedState,
        pub sender: Arc<CapturingSender>,
        pub clock: ManualClock,
    }

    pub fn profile(email: &str, name: &str, unit: &str, role: UserRole) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: name.to_string(),
            unit: unit.to_string(),
            role,
        }
    }

    /// Memory backend, seeded question bank, one user per role.
    pub async fn test_app(generator: Arc<dyn DraftGenerator>, draft_timeout: Duration) -> TestApp {
        test_app_with_stores(Stores::memory(), generator, draft_timeout).await
    }

    /// Same seeding as [`test_app`] over caller-supplied stores.
    pub async fn test_app_with_stores(
        stores: Stores,
        generator: Arc<dyn DraftGenerator>,
        draft_timeout: Duration,
    ) -> TestApp {
        seed::seed_questions(stores.questions.as_ref()).await.unwrap();
        for user in [
            profile("admin@pakrut.com", "管理员", "生产技术部", UserRole::Admin),
            profile("officer@pakrut.com", "李安全", "质检计量部", UserRole::SafetyOfficer),
            profile("worker@pakrut.com", "王五", "采矿厂", UserRole::Worker),
        ] {
            stores.profiles.upsert(&user).await.unwrap();
        }

        let sender = Arc::new(CapturingSender::default());
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap());
        let state = AppState::assemble(AppParts {
            stores,
            storage: Arc::new(MemoryObjectStorage::default()),
            code_sender: sender.clone(),
            generator,
            clock: Arc::new(clock.clone()),
            tz: parse_timezone("Asia/Dushanbe").unwrap(),
            session_key: vec![7u8; 32],
            draft_timeout,
            login_code_ttl: chrono::Duration::minutes(10),
            secure_cookies: false,
        })
        .await
        .unwrap();

        TestApp {
            state: Arc::new(state),
            sender,
            clock,
        }
    }
}
