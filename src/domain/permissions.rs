use crate::db::PermissionStore;
use crate::domain::models::{PermissionKey, UserRole};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("role {0} may not change permissions")]
    NotAllowed(&'static str),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Role -> allowed feature keys. Every role always has an entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<UserRole, BTreeSet<PermissionKey>>")]
pub struct RolePermissionMap(BTreeMap<UserRole, BTreeSet<PermissionKey>>);

impl From<BTreeMap<UserRole, BTreeSet<PermissionKey>>> for RolePermissionMap {
    fn from(mut raw: BTreeMap<UserRole, BTreeSet<PermissionKey>>) -> Self {
        for role in UserRole::ALL {
            raw.entry(role).or_default();
        }
        RolePermissionMap(raw)
    }
}

impl Default for RolePermissionMap {
    fn default() -> Self {
        use PermissionKey::*;
        let mut raw = BTreeMap::new();
        raw.insert(UserRole::Admin, PermissionKey::ALL.into_iter().collect());
        raw.insert(
            UserRole::SafetyOfficer,
            [Hazard, Violation, HazardFeedback, ReportList, Quiz, Analytics, Regulations]
                .into_iter()
                .collect(),
        );
        raw.insert(UserRole::Worker, [Hazard, Quiz, Regulations, Analytics].into_iter().collect());
        RolePermissionMap(raw)
    }
}

impl RolePermissionMap {
    #[cfg(test)]
    pub fn empty() -> Self {
        RolePermissionMap::from(BTreeMap::new())
    }

    pub fn allowed(&self, role: UserRole) -> &BTreeSet<PermissionKey> {
        // Entries are guaranteed by construction; the fallback covers maps
        // built from a raw BTreeMap that skipped normalisation.
        self.0
            .get(&role)
            .or_else(|| self.0.get(&UserRole::LOWEST))
            .unwrap_or(&EMPTY)
    }

    pub fn has_permission(&self, role: UserRole, key: PermissionKey) -> bool {
        self.allowed(role).contains(&key)
    }

    /// Replaces the set for exactly one role.
    pub fn with_role(&self, role: UserRole, keys: impl IntoIterator<Item = PermissionKey>) -> Self {
        let mut next = self.0.clone();
        next.insert(role, keys.into_iter().collect());
        RolePermissionMap(next)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserRole, &BTreeSet<PermissionKey>)> {
        self.0.iter()
    }
}

static EMPTY: BTreeSet<PermissionKey> = BTreeSet::new();

/// Live permission configuration. Readers take an immutable snapshot;
/// the only mutation path is [`PermissionTable::set_role_permissions`].
#[derive(Clone)]
pub struct PermissionTable {
    current: Arc<RwLock<Arc<RolePermissionMap>>>,
    store: Arc<dyn PermissionStore>,
}

impl PermissionTable {
    pub async fn load(store: Arc<dyn PermissionStore>) -> anyhow::Result<Self> {
        let map = match store.load().await? {
            Some(map) => map,
            None => {
                let seeded = RolePermissionMap::default();
                store.save(&seeded).await?;
                tracing::info!("Seeded default role permission map");
                seeded
            }
        };
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(map))),
            store,
        })
    }

    pub async fn snapshot(&self) -> Arc<RolePermissionMap> {
        self.current.read().await.clone()
    }

    pub async fn set_role_permissions(
        &self,
        actor: UserRole,
        role: UserRole,
        keys: impl IntoIterator<Item = PermissionKey>,
    ) -> Result<Arc<RolePermissionMap>, PermissionError> {
        let mut guard = self.current.write().await;
        if !guard.has_permission(actor, PermissionKey::Permissions) {
            return Err(PermissionError::NotAllowed(actor.as_str()));
        }
        let next = guard.with_role(role, keys);
        // Persist the whole map before publishing it.
        self.store.save(&next).await?;
        let next = Arc::new(next);
        *guard = next.clone();
        tracing::info!(
            "Permissions for {} updated by {}: {:?}",
            role.as_str(),
            actor.as_str(),
            next.allowed(role).iter().map(|k| k.as_str()).collect::<Vec<_>>()
        );
        Ok(next)
    }
}
