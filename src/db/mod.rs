pub mod memory;
pub mod seed;

use crate::domain::models::{
    Choice, ImageRefs, PermissionKey, Question, Regulation, ReportDetails, ReportItem, ReportKind, ReportStatus,
    ScoreTotals, UserProfile, UserRole,
};
use crate::domain::permissions::RolePermissionMap;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>>;
    async fn upsert(&self, profile: &UserProfile) -> Result<()>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn load(&self) -> Result<Option<RolePermissionMap>>;
    /// Overwrites the persisted map wholesale.
    async fn save(&self, map: &RolePermissionMap) -> Result<()>;
}

/// Last issued serial index. Plain read then write: there is no
/// compare-and-swap, so two processes sharing one counter can hand out
/// the same index.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn load(&self) -> Result<i64>;
    async fn store(&self, value: i64) -> Result<()>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn append(&self, item: &ReportItem) -> Result<()>;
    async fn list_all(&self) -> Result<Vec<ReportItem>>;
    /// Flips every PENDING row carrying `id`; returns how many changed.
    async fn confirm(&self, id: &str) -> Result<u64>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Question>>;
    async fn insert(&self, question: &Question) -> Result<()>;
}

#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<ScoreTotals>>;
    /// Adds `delta` to the cumulative total and to the total for `year`.
    async fn add_points(&self, user_id: Uuid, delta: i64, score: i32, year: i32, date: NaiveDate) -> Result<ScoreTotals>;
}

#[async_trait]
pub trait RegulationStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Regulation>>;
    async fn insert(&self, regulation: &Regulation) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<Option<Regulation>>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    display_name: String,
    unit: String,
    role: String,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            unit: row.unit,
            role: UserRole::from_provider(&row.role),
        }
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, email, display_name, unit, role
            FROM profiles
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserProfile::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, email, display_name, unit, role
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserProfile::from))
    }

    async fn upsert(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, email, display_name, unit, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                unit = EXCLUDED.unit,
                role = EXCLUDED.role
            "#,
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(&profile.unit)
        .bind(profile.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn load(&self) -> Result<Option<RolePermissionMap>> {
        let rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT role, keys FROM role_permissions")
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut raw: BTreeMap<UserRole, BTreeSet<PermissionKey>> = BTreeMap::new();
        for (role, keys) in rows {
            let Some(role) = UserRole::parse(&role) else {
                tracing::warn!("Skipping permission row for unknown role '{}'", role);
                continue;
            };
            let keys: BTreeSet<PermissionKey> = serde_json::from_value(keys)?;
            raw.insert(role, keys);
        }
        Ok(Some(RolePermissionMap::from(raw)))
    }

    async fn save(&self, map: &RolePermissionMap) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM role_permissions")
            .execute(&mut *tx)
            .await?;
        for (role, keys) in map.iter() {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role, keys, updated_at)
                VALUES ($1, $2, NOW())
                "#,
            )
            .bind(role.as_str())
            .bind(serde_json::to_value(keys)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for PgStore {
    async fn load(&self) -> Result<i64> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_index FROM serial_counter WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.unwrap_or(0))
    }

    async fn store(&self, value: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO serial_counter (id, last_index)
            VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET last_index = EXCLUDED.last_index
            "#,
        )
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ReportRow {
    id: String,
    kind: String,
    status: String,
    created_at: i64,
    reporter: String,
    unit: String,
    description: String,
    images: serde_json::Value,
    draft: Option<String>,
    completed: bool,
    details: serde_json::Value,
}

impl TryFrom<ReportRow> for ReportItem {
    type Error = anyhow::Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        let status = ReportStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("report {} has unknown status '{}'", row.id, row.status))?;
        let images: ImageRefs = serde_json::from_value(row.images)?;
        let details: ReportDetails = serde_json::from_value(row.details)?;
        if ReportKind::parse(&row.kind) != Some(details.kind()) {
            bail!("report {} is stored as '{}' but carries {} details", row.id, row.kind, details.kind().as_str());
        }
        Ok(ReportItem {
            id: row.id,
            status,
            created_at: row.created_at,
            reporter: row.reporter,
            unit: row.unit,
            description: row.description,
            images,
            draft: row.draft,
            completed: row.completed,
            details,
        })
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn append(&self, item: &ReportItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reports
                (id, kind, status, created_at, reporter, unit, description, images, draft, completed, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&item.id)
        .bind(item.kind().as_str())
        .bind(item.status.as_str())
        .bind(item.created_at)
        .bind(&item.reporter)
        .bind(&item.unit)
        .bind(&item.description)
        .bind(serde_json::to_value(&item.images)?)
        .bind(&item.draft)
        .bind(item.completed)
        .bind(serde_json::to_value(&item.details)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ReportItem>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT id, kind, status, created_at, reporter, unit, description, images, draft, completed, details
            FROM reports
            ORDER BY created_at DESC, row_id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match ReportItem::try_from(row) {
                Ok(item) => items.push(item),
                Err(e) => tracing::error!("Skipping malformed report row: {}", e),
            }
        }
        Ok(items)
    }

    async fn confirm(&self, id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET status = 'CONFIRMED', confirmed_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: i64,
    question: String,
    option_a: String,
    option_b: String,
    option_c: Option<String>,
    option_d: Option<String>,
    answer: String,
    analysis: String,
}

#[async_trait]
impl QuestionStore for PgStore {
    async fn list(&self) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, question, option_a, option_b, option_c, option_d, answer, analysis
            FROM quiz_questions
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let answer = Choice::parse(&row.answer)
                    .ok_or_else(|| anyhow!("question {} has invalid answer '{}'", row.id, row.answer))?;
                Ok(Question {
                    id: row.id,
                    question: row.question,
                    option_a: row.option_a,
                    option_b: row.option_b,
                    option_c: row.option_c,
                    option_d: row.option_d,
                    answer,
                    analysis: row.analysis,
                })
            })
            .collect()
    }

    async fn insert(&self, question: &Question) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quiz_questions (id, question, option_a, option_b, option_c, option_d, answer, analysis)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(question.id)
        .bind(&question.question)
        .bind(&question.option_a)
        .bind(&question.option_b)
        .bind(&question.option_c)
        .bind(&question.option_d)
        .bind(question.answer.as_str())
        .bind(&question.analysis)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ScoreRow {
    total_points: i64,
    yearly_points: i64,
    year: i32,
    last_quiz_score: Option<i32>,
    last_quiz_date: Option<NaiveDate>,
}

impl From<ScoreRow> for ScoreTotals {
    fn from(row: ScoreRow) -> Self {
        ScoreTotals {
            total_points: row.total_points,
            yearly_points: row.yearly_points,
            year: row.year,
            last_quiz_score: row.last_quiz_score,
            last_quiz_date: row.last_quiz_date,
        }
    }
}

#[async_trait]
impl ScoreStore for PgStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<ScoreTotals>> {
        let row = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT total_points, yearly_points, year, last_quiz_score, last_quiz_date
            FROM user_scores
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ScoreTotals::from))
    }

    async fn add_points(&self, user_id: Uuid, delta: i64, score: i32, year: i32, date: NaiveDate) -> Result<ScoreTotals> {
        let row = sqlx::query_as::<_, ScoreRow>(
            r#"
            INSERT INTO user_scores (user_id, total_points, yearly_points, year, last_quiz_score, last_quiz_date)
            VALUES ($1, $2, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET total_points = user_scores.total_points + EXCLUDED.total_points,
                yearly_points = CASE
                    WHEN user_scores.year = EXCLUDED.year THEN user_scores.yearly_points + EXCLUDED.yearly_points
                    ELSE EXCLUDED.yearly_points
                END,
                year = EXCLUDED.year,
                last_quiz_score = EXCLUDED.last_quiz_score,
                last_quiz_date = EXCLUDED.last_quiz_date
            RETURNING total_points, yearly_points, year, last_quiz_score, last_quiz_date
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .bind(year)
        .bind(score)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

#[derive(Debug, FromRow)]
struct RegulationRow {
    id: Uuid,
    title: String,
    category: String,
    file_url: String,
    storage_path: String,
    created_at: DateTime<Utc>,
}

impl From<RegulationRow> for Regulation {
    fn from(row: RegulationRow) -> Self {
        Regulation {
            id: row.id,
            title: row.title,
            category: row.category,
            file_url: row.file_url,
            storage_path: row.storage_path,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl RegulationStore for PgStore {
    async fn list(&self) -> Result<Vec<Regulation>> {
        let rows = sqlx::query_as::<_, RegulationRow>(
            r#"
            SELECT id, title, category, file_url, storage_path, created_at
            FROM safety_regulations
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Regulation::from).collect())
    }

    async fn insert(&self, regulation: &Regulation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO safety_regulations (id, title, category, file_url, storage_path, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(regulation.id)
        .bind(&regulation.title)
        .bind(&regulation.category)
        .bind(&regulation.file_url)
        .bind(&regulation.storage_path)
        .bind(regulation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Regulation>> {
        let row = sqlx::query_as::<_, RegulationRow>(
            r#"
            DELETE FROM safety_regulations
            WHERE id = $1
            RETURNING id, title, category, file_url, storage_path, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Regulation::from))
    }
}
