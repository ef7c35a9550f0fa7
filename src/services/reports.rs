use crate::db::ReportStore;
use crate::domain::models::{ReportItem, ReportKind, ReportStatus, UserProfile};
use crate::domain::serial::SerialAllocator;
use crate::domain::submission::ValidatedSubmission;
use crate::time_utils::Clock;
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Confirmed { id: String, updated: u64 },
    AlreadyConfirmed { id: String },
    NotFound { id: String },
}

/// Report lifecycle: append PENDING items, list them, confirm them.
#[derive(Clone)]
pub struct ReportWorkflow {
    reports: Arc<dyn ReportStore>,
    allocator: SerialAllocator,
    clock: Arc<dyn Clock>,
}

impl ReportWorkflow {
    pub fn new(reports: Arc<dyn ReportStore>, allocator: SerialAllocator, clock: Arc<dyn Clock>) -> Self {
        Self {
            reports,
            allocator,
            clock,
        }
    }

    /// The only mutating step of a submission. An allocated serial is
    /// spent even if the append fails.
    pub async fn submit(
        &self,
        submission: ValidatedSubmission,
        reporter: &UserProfile,
        draft: Option<String>,
    ) -> Result<ReportItem> {
        let id = self.allocator.next().await?;
        let created_at = self.clock.now().timestamp_millis();
        let draft = draft.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        let item = submission.into_item(id, created_at, reporter, draft);
        self.reports.append(&item).await.map_err(|e| {
            tracing::error!("Failed to store {} {}: {}", item.kind().as_str(), item.id, e);
            e
        })?;
        tracing::info!("{} {} submitted by {} ({})", item.kind().as_str(), item.id, reporter.email, item.unit);
        Ok(item)
    }

    /// Every item, newest first.
    pub async fn list(&self) -> Result<Vec<ReportItem>> {
        let mut items = self.reports.list_all().await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    pub async fn find_hazard(&self, id: &str) -> Result<Option<ReportItem>> {
        Ok(self
            .reports
            .list_all()
            .await?
            .into_iter()
            .find(|item| item.id == id && item.kind() == ReportKind::Hazard))
    }

    /// Idempotent: already-confirmed and unknown ids are reported, not rejected.
    pub async fn confirm(&self, id: &str) -> Result<ConfirmOutcome> {
        let updated = self.reports.confirm(id).await.map_err(|e| {
            tracing::error!("Failed to confirm {}: {}", id, e);
            e
        })?;
        if updated > 0 {
            tracing::info!("Confirmed {} ({} row(s))", id, updated);
            return Ok(ConfirmOutcome::Confirmed {
                id: id.to_string(),
                updated,
            });
        }

        let exists = self.reports.list_all().await?.iter().any(|item| item.id == id);
        let outcome = if exists {
            ConfirmOutcome::AlreadyConfirmed { id: id.to_string() }
        } else {
            ConfirmOutcome::NotFound { id: id.to_string() }
        };
        tracing::debug!("Confirm of {} was a no-op: {:?}", id, outcome);
        Ok(outcome)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .reports
            .list_all()
            .await?
            .iter()
            .filter(|item| item.status == ReportStatus::Pending)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryCounterStore, MemoryReportStore};
    use crate::domain::models::{HazardLevel, UserRole};
    use crate::domain::submission::{HazardForm, SubmissionForm};
    use crate::services::ai::fakes::FailingDraft;
    use crate::services::ai::{DraftService, GenerationError};
    use crate::time_utils::{parse_timezone, ManualClock};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    struct Fixture {
        workflow: ReportWorkflow,
        store: Arc<MemoryReportStore>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryReportStore::default());
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 5, 4, 3, 0, 0).unwrap());
        let allocator = SerialAllocator::new(
            Arc::new(MemoryCounterStore::default()),
            Arc::new(clock.clone()),
            parse_timezone("Asia/Dushanbe").unwrap(),
        );
        Fixture {
            workflow: ReportWorkflow::new(store.clone(), allocator, Arc::new(clock.clone())),
            store,
            clock,
        }
    }

    fn worker() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            email: "worker@pakrut.com".into(),
            display_name: "王五".into(),
            unit: "采矿厂".into(),
            role: UserRole::Worker,
        }
    }

    fn hazard(description: &str) -> ValidatedSubmission {
        SubmissionForm::Hazard(HazardForm {
            level: HazardLevel::General,
            unit: "选矿厂".into(),
            description: description.into(),
            location: Some("3号皮带".into()),
            deadline: None,
            responsible_person: None,
            images: vec![],
        })
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn two_hazards_get_consecutive_serials() {
        let f = fixture();
        let first = f.workflow.submit(hazard("护栏缺失"), &worker(), None).await.unwrap();
        f.clock.set(Utc.with_ymd_and_hms(2026, 5, 4, 4, 0, 0).unwrap());
        let second = f.workflow.submit(hazard("照明不足"), &worker(), None).await.unwrap();
        assert_eq!(first.id, "2026-001");
        assert_eq!(second.id, "2026-002");
        assert_eq!(first.status, ReportStatus::Pending);

        let listed = f.workflow.list().await.unwrap();
        assert_eq!(listed.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["2026-002", "2026-001"]);
    }

    #[tokio::test]
    async fn failed_draft_does_not_block_submit() {
        let f = fixture();
        let drafts = DraftService::new(
            Arc::new(FailingDraft(GenerationError::Unauthorized)),
            std::time::Duration::from_secs(1),
        );
        let submission = hazard("配电箱未上锁");
        let prompt = submission.prompt(&worker()).unwrap();
        let outcome = drafts.draft(&prompt).await;
        assert!(outcome.draft().is_none());

        let item = f
            .workflow
            .submit(submission, &worker(), outcome.draft().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(item.status, ReportStatus::Pending);
        assert!(item.draft.is_none());
        assert_eq!(f.workflow.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_nothing_is_listed() {
        let f = fixture();
        f.store.fail_writes(true);
        assert!(f.workflow.submit(hazard("漏水"), &worker(), None).await.is_err());
        f.store.fail_writes(false);
        assert!(f.workflow.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let f = fixture();
        let item = f.workflow.submit(hazard("护栏缺失"), &worker(), Some("  ".into())).await.unwrap();
        assert!(item.draft.is_none());

        let first = f.workflow.confirm(&item.id).await.unwrap();
        assert_eq!(first, ConfirmOutcome::Confirmed { id: item.id.clone(), updated: 1 });
        let after_once = f.workflow.list().await.unwrap();

        let second = f.workflow.confirm(&item.id).await.unwrap();
        assert_eq!(second, ConfirmOutcome::AlreadyConfirmed { id: item.id.clone() });
        assert_eq!(f.workflow.list().await.unwrap(), after_once);
        assert_eq!(after_once[0].status, ReportStatus::Confirmed);
    }

    #[tokio::test]
    async fn confirm_of_unknown_id_changes_nothing() {
        let f = fixture();
        f.workflow.submit(hazard("护栏缺失"), &worker(), None).await.unwrap();
        let before = f.workflow.list().await.unwrap();
        assert_eq!(
            f.workflow.confirm("1999-001").await.unwrap(),
            ConfirmOutcome::NotFound { id: "1999-001".into() }
        );
        assert_eq!(f.workflow.list().await.unwrap(), before);
    }

    #[tokio::test]
    async fn failed_confirm_leaves_item_pending() {
        let f = fixture();
        let item = f.workflow.submit(hazard("护栏缺失"), &worker(), None).await.unwrap();
        f.store.fail_writes(true);
        assert!(f.workflow.confirm(&item.id).await.is_err());
        f.store.fail_writes(false);
        assert_eq!(f.workflow.list().await.unwrap()[0].status, ReportStatus::Pending);
    }

    #[tokio::test]
    async fn find_hazard_ignores_other_kinds() {
        let f = fixture();
        let item = f.workflow.submit(hazard("护栏缺失"), &worker(), None).await.unwrap();
        assert!(f.workflow.find_hazard(&item.id).await.unwrap().is_some());
        assert!(f.workflow.find_hazard("2026-999").await.unwrap().is_none());
    }
}
