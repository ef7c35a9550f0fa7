//! In-process stores for `STORAGE_BACKEND=memory` and for tests.
//! Contents are lost on restart.

use super::{CounterStore, PermissionStore, ProfileStore, QuestionStore, RegulationStore, ReportStore, ScoreStore};
use crate::domain::models::{Question, Regulation, ReportItem, ScoreTotals, UserProfile};
use crate::domain::permissions::RolePermissionMap;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Lets tests simulate a failing backing store.
#[derive(Default)]
struct FailSwitch(AtomicBool);

impl FailSwitch {
    #[cfg(test)]
    fn set(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            bail!("simulated storage failure");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.get(email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().await.values().find(|p| p.id == id).cloned())
    }

    async fn upsert(&self, profile: &UserProfile) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let entry = profiles.entry(profile.email.clone()).or_insert_with(|| profile.clone());
        let id = entry.id;
        *entry = UserProfile { id, ..profile.clone() };
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPermissionStore {
    map: RwLock<Option<RolePermissionMap>>,
    fail: FailSwitch,
}

#[cfg(test)]
impl MemoryPermissionStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.set(fail);
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn load(&self) -> Result<Option<RolePermissionMap>> {
        Ok(self.map.read().await.clone())
    }

    async fn save(&self, map: &RolePermissionMap) -> Result<()> {
        self.fail.check()?;
        *self.map.write().await = Some(map.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCounterStore {
    last: RwLock<i64>,
}

#[cfg(test)]
impl MemoryCounterStore {
    pub fn starting_at(last: i64) -> Self {
        Self { last: RwLock::new(last) }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn load(&self) -> Result<i64> {
        Ok(*self.last.read().await)
    }

    async fn store(&self, value: i64) -> Result<()> {
        *self.last.write().await = value;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryReportStore {
    items: RwLock<Vec<ReportItem>>,
    fail: FailSwitch,
}

#[cfg(test)]
impl MemoryReportStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.set(fail);
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn append(&self, item: &ReportItem) -> Result<()> {
        self.fail.check()?;
        self.items.write().await.push(item.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ReportItem>> {
        let mut items = self.items.read().await.clone();
        // Stable sort keeps later appends first among equal timestamps.
        items.reverse();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn confirm(&self, id: &str) -> Result<u64> {
        self.fail.check()?;
        let mut items = self.items.write().await;
        let changed = items
            .iter_mut()
            .filter(|item| item.id == id)
            .map(|item| item.confirm())
            .filter(|changed| *changed)
            .count();
        Ok(changed as u64)
    }
}

#[derive(Default)]
pub struct MemoryQuestionStore {
    questions: RwLock<Vec<Question>>,
}

#[async_trait]
impl QuestionStore for MemoryQuestionStore {
    async fn list(&self) -> Result<Vec<Question>> {
        let mut questions = self.questions.read().await.clone();
        questions.sort_by_key(|q| q.id);
        Ok(questions)
    }

    async fn insert(&self, question: &Question) -> Result<()> {
        let mut questions = self.questions.write().await;
        if !questions.iter().any(|q| q.id == question.id) {
            questions.push(question.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryScoreStore {
    scores: RwLock<HashMap<Uuid, ScoreTotals>>,
    fail: FailSwitch,
}

#[cfg(test)]
impl MemoryScoreStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.set(fail);
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<ScoreTotals>> {
        Ok(self.scores.read().await.get(&user_id).cloned())
    }

    async fn add_points(&self, user_id: Uuid, delta: i64, score: i32, year: i32, date: NaiveDate) -> Result<ScoreTotals> {
        self.fail.check()?;
        let mut scores = self.scores.write().await;
        let entry = scores.entry(user_id).or_insert_with(|| ScoreTotals {
            year,
            ..ScoreTotals::default()
        });
        if entry.year != year {
            entry.year = year;
            entry.yearly_points = 0;
        }
        entry.total_points += delta;
        entry.yearly_points += delta;
        entry.last_quiz_score = Some(score);
        entry.last_quiz_date = Some(date);
        Ok(entry.clone())
    }
}

#[derive(Default)]
pub struct MemoryRegulationStore {
    regulations: RwLock<Vec<Regulation>>,
}

#[async_trait]
impl RegulationStore for MemoryRegulationStore {
    async fn list(&self) -> Result<Vec<Regulation>> {
        let mut regulations = self.regulations.read().await.clone();
        regulations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(regulations)
    }

    async fn insert(&self, regulation: &Regulation) -> Result<()> {
        self.regulations.write().await.push(regulation.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Regulation>> {
        let mut regulations = self.regulations.write().await;
        let position = regulations.iter().position(|r| r.id == id);
        Ok(position.map(|idx| regulations.remove(idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ImageRefs, ReportDetails, ReportStatus};

    fn feedback(id: &str, created_at: i64) -> ReportItem {
        ReportItem {
            id: id.to_string(),
            status: ReportStatus::Pending,
            created_at,
            reporter: "王五".into(),
            unit: "选矿厂".into(),
            description: "已整改".into(),
            images: ImageRefs::default(),
            draft: None,
            completed: false,
            details: ReportDetails::Feedback { hazard_id: "2026-001".into() },
        }
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = MemoryReportStore::default();
        store.append(&feedback("2026-001", 10)).await.unwrap();
        store.append(&feedback("2026-002", 30)).await.unwrap();
        store.append(&feedback("2026-003", 20)).await.unwrap();

        let ids: Vec<_> = store.list_all().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["2026-002", "2026-003", "2026-001"]);
    }

    #[tokio::test]
    async fn confirm_flips_every_matching_pending_item() {
        let store = MemoryReportStore::default();
        store.append(&feedback("2026-001", 10)).await.unwrap();
        store.append(&feedback("2026-001", 11)).await.unwrap();
        store.append(&feedback("2026-002", 12)).await.unwrap();

        assert_eq!(store.confirm("2026-001").await.unwrap(), 2);
        assert_eq!(store.confirm("2026-001").await.unwrap(), 0);
        let statuses: Vec<_> = store.list_all().await.unwrap().into_iter().map(|i| i.status).collect();
        assert_eq!(statuses, vec![ReportStatus::Pending, ReportStatus::Confirmed, ReportStatus::Confirmed]);
    }

    #[tokio::test]
    async fn yearly_points_reset_on_new_year() {
        let store = MemoryScoreStore::default();
        let user = Uuid::new_v4();
        let d = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        store.add_points(user, 3, 3, 2025, d).await.unwrap();
        store.add_points(user, 2, 2, 2025, d).await.unwrap();
        let next = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let totals = store.add_points(user, 4, 4, 2026, next).await.unwrap();
        assert_eq!(totals.total_points, 9);
        assert_eq!(totals.yearly_points, 4);
        assert_eq!(totals.last_quiz_score, Some(4));
    }
}
