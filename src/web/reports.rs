use crate::domain::models::{ReportDetails, ReportItem, ReportKind, MAX_IMAGES};
use crate::domain::navigation::{NavOutcome, Screen};
use crate::domain::submission::{FeedbackForm, HazardForm, SubmissionForm, ValidationError, ViolationForm};
use crate::error::{SafetyError, SafetyResult};
use crate::services::ai::DraftOutcome;
use crate::services::storage::object_name;
use crate::state::SharedState;
use crate::time_utils::format_local_time;
use crate::web::session::UserSession;
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Deserialize)]
pub struct SubmitRequest<F> {
    #[serde(flatten)]
    pub form: F,
    /// Edited draft text; falls back to the draft stored on the shell.
    #[serde(default)]
    pub draft: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum DraftResponse {
    Live(DraftOutcome),
    Cancelled { status: &'static str },
}

#[derive(Deserialize)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    /// Standard base64 of the image bytes.
    pub content: String,
}

#[derive(Serialize)]
pub struct ImageUploaded {
    pub url: String,
    /// Everything uploaded on this screen so far, ready for the form's `images`.
    pub images: Vec<String>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub item: ReportItem,
    pub screen: Screen,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListTab {
    #[default]
    Hazards,
    Violations,
}

impl ListTab {
    fn kind(self) -> ReportKind {
        match self {
            ListTab::Hazards => ReportKind::Hazard,
            ListTab::Violations => ReportKind::Violation,
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub tab: ListTab,
    pub q: Option<String>,
}

#[derive(Serialize)]
pub struct ListedReport {
    #[serde(flatten)]
    pub item: ReportItem,
    pub created_at_local: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/export", get(export))
        .route("/hazard/draft", post(hazard_draft))
        .route("/violation/draft", post(violation_draft))
        .route("/hazard", post(submit_hazard))
        .route("/violation", post(submit_violation))
        .route("/feedback", post(submit_feedback))
        .route("/hazard/images", post(hazard_image))
        .route("/violation/images", post(violation_image))
        .route("/feedback/images", post(feedback_image))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES * 4 / 3 + 4096))
        .with_state(state)
}

fn screen_for(kind: ReportKind) -> Screen {
    match kind {
        ReportKind::Hazard => Screen::HazardSubmit,
        ReportKind::Violation => Screen::ViolationSubmit,
        ReportKind::Feedback => Screen::FeedbackSubmit,
    }
}

/// Generates an advisory draft. The shell lock is released while the
/// model runs; if the user navigated away meanwhile, the draft is dropped.
async fn draft(state: &SharedState, session: &UserSession, form: SubmissionForm) -> SafetyResult<DraftResponse> {
    let screen = screen_for(form.kind());
    let (ticket, prompt) = {
        let shell = session.on_screen(state, screen).await?;
        let validated = form.validate()?;
        (shell.ticket(), validated.prompt(&session.user))
    };
    let Some(prompt) = prompt else {
        return Err(SafetyError::BadRequest("该类型不支持生成草稿".to_string()));
    };

    let outcome = state.drafts.draft(&prompt).await;

    let mut shell = session.shell.lock().await;
    if !shell.is_current(&ticket) {
        tracing::info!("Discarding {} draft for {}: screen left", prompt.kind.as_str(), session.user.email);
        return Ok(DraftResponse::Cancelled { status: "cancelled" });
    }
    if let Some(text) = outcome.draft() {
        shell.store_draft(&ticket, text.to_string());
    }
    Ok(DraftResponse::Live(outcome))
}

async fn hazard_draft(
    State(state): State<SharedState>,
    session: UserSession,
    Json(form): Json<HazardForm>,
) -> SafetyResult<Json<DraftResponse>> {
    Ok(Json(draft(&state, &session, SubmissionForm::Hazard(form)).await?))
}

async fn violation_draft(
    State(state): State<SharedState>,
    session: UserSession,
    Json(form): Json<ViolationForm>,
) -> SafetyResult<Json<DraftResponse>> {
    Ok(Json(draft(&state, &session, SubmissionForm::Violation(form)).await?))
}

/// Validate, allocate, append, then send the shell home. The shell stays
/// locked throughout so a concurrent navigation cannot interleave.
async fn submit(
    state: &SharedState,
    session: &UserSession,
    form: SubmissionForm,
    draft: Option<String>,
) -> SafetyResult<(StatusCode, Json<SubmitResponse>)> {
    let mut shell = session.on_screen(state, screen_for(form.kind())).await?;
    let validated = form.validate()?;

    if let Some(hazard_id) = validated.referenced_hazard() {
        if state.reports.find_hazard(hazard_id).await?.is_none() {
            return Err(SafetyError::NotFound(format!("隐患单{}", hazard_id)));
        }
    }

    let draft = draft.or_else(|| shell.draft().map(str::to_string));
    let item = state.reports.submit(validated, &session.user, draft).await?;

    let permissions = state.permissions.snapshot().await;
    let screen = match shell.navigate(Screen::Home, &permissions) {
        NavOutcome::Entered { screen } => screen,
        _ => shell.screen(),
    };
    Ok((StatusCode::CREATED, Json(SubmitResponse { item, screen })))
}

async fn submit_hazard(
    State(state): State<SharedState>,
    session: UserSession,
    Json(body): Json<SubmitRequest<HazardForm>>,
) -> SafetyResult<impl IntoResponse> {
    submit(&state, &session, SubmissionForm::Hazard(body.form), body.draft).await
}

async fn submit_violation(
    State(state): State<SharedState>,
    session: UserSession,
    Json(body): Json<SubmitRequest<ViolationForm>>,
) -> SafetyResult<impl IntoResponse> {
    submit(&state, &session, SubmissionForm::Violation(body.form), body.draft).await
}

async fn submit_feedback(
    State(state): State<SharedState>,
    session: UserSession,
    Json(body): Json<SubmitRequest<FeedbackForm>>,
) -> SafetyResult<impl IntoResponse> {
    submit(&state, &session, SubmissionForm::Feedback(body.form), body.draft).await
}

fn bucket_for(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Hazard => "hazards",
        ReportKind::Violation => "violations",
        ReportKind::Feedback => "feedback",
    }
}

/// Stores one report photo. The shell stays locked until the object is
/// written, so an upload never lands on a screen the user already left.
async fn upload_image(
    state: &SharedState,
    session: &UserSession,
    kind: ReportKind,
    payload: ImageUpload,
) -> SafetyResult<(StatusCode, Json<ImageUploaded>)> {
    let mut shell = session.on_screen(state, screen_for(kind)).await?;

    if shell.uploads().len() >= MAX_IMAGES {
        return Err(ValidationError::TooManyImages(shell.uploads().len() + 1).into());
    }
    if !payload.content_type.starts_with("image/") {
        return Err(SafetyError::BadRequest("只能上传图片".to_string()));
    }
    let bytes = general_purpose::STANDARD
        .decode(payload.content.trim())
        .map_err(|_| SafetyError::BadRequest("图片内容不是有效的base64".to_string()))?;
    if bytes.is_empty() || bytes.len() > MAX_IMAGE_BYTES {
        return Err(SafetyError::BadRequest("图片为空或超过10MB".to_string()));
    }

    let ticket = shell.ticket();
    let path = format!(
        "{}/{}",
        bucket_for(kind),
        object_name(state.clock.now().timestamp_millis(), &payload.file_name)
    );
    let url = state.storage.upload(&path, bytes, &payload.content_type).await?;
    shell.record_upload(&ticket, url.clone());
    tracing::info!("{} uploaded {} image {}", session.user.email, kind.as_str(), path);

    Ok((
        StatusCode::CREATED,
        Json(ImageUploaded {
            url,
            images: shell.uploads().to_vec(),
        }),
    ))
}

async fn hazard_image(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<ImageUpload>,
) -> SafetyResult<impl IntoResponse> {
    upload_image(&state, &session, ReportKind::Hazard, payload).await
}

async fn violation_image(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<ImageUpload>,
) -> SafetyResult<impl IntoResponse> {
    upload_image(&state, &session, ReportKind::Violation, payload).await
}

async fn feedback_image(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<ImageUpload>,
) -> SafetyResult<impl IntoResponse> {
    upload_image(&state, &session, ReportKind::Feedback, payload).await
}

fn matches_search(item: &ReportItem, needle: &str) -> bool {
    needle.is_empty()
        || item.id.to_lowercase().contains(needle)
        || item.description.to_lowercase().contains(needle)
}

async fn filtered(state: &SharedState, session: &UserSession, query: &ListQuery) -> SafetyResult<Vec<ReportItem>> {
    let _shell = session.on_screen(state, Screen::ReportList).await?;
    let needle = query.q.as_deref().unwrap_or("").trim().to_lowercase();
    let kind = query.tab.kind();
    Ok(state
        .reports
        .list()
        .await?
        .into_iter()
        .filter(|item| item.kind() == kind && matches_search(item, &needle))
        .collect())
}

async fn list(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<ListQuery>,
) -> SafetyResult<Json<Vec<ListedReport>>> {
    let items = filtered(&state, &session, &query).await?;
    tracing::debug!("{} listed {} {:?} items", session.user.email, items.len(), query.tab);
    Ok(Json(
        items
            .into_iter()
            .map(|item| ListedReport {
                created_at_local: format_local_time(state.tz, item.created_at),
                item,
            })
            .collect(),
    ))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut line = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
    line.push_str("\r\n");
    line
}

pub fn render_csv(tab: ListTab, items: &[ReportItem], tz: crate::time_utils::SiteTimezone) -> String {
    // BOM so spreadsheet tools pick UTF-8.
    let mut out = String::from("\u{feff}");
    let header: &[&str] = match tab {
        ListTab::Hazards => &["序号", "编号", "责任单位", "描述", "整改完成时限", "完成（是/否）", "责任人", "下单时间"],
        ListTab::Violations => &["序号", "编号", "违章人员", "所属单位", "违章类型", "描述", "地点", "下单时间"],
    };
    out.push_str(&csv_row(&header.iter().map(|h| h.to_string()).collect::<Vec<_>>()));

    for (n, item) in items.iter().enumerate() {
        let created = format_local_time(tz, item.created_at);
        let row = match &item.details {
            ReportDetails::Hazard {
                deadline,
                responsible_person,
                ..
            } => vec![
                (n + 1).to_string(),
                item.id.clone(),
                item.unit.clone(),
                item.description.clone(),
                deadline.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default(),
                if item.completed { "是" } else { "否" }.to_string(),
                responsible_person.clone().unwrap_or_default(),
                created,
            ],
            ReportDetails::Violation {
                violator,
                severity,
                location,
            } => vec![
                (n + 1).to_string(),
                item.id.clone(),
                violator.clone(),
                item.unit.clone(),
                severity.label().to_string(),
                item.description.clone(),
                location.clone(),
                created,
            ],
            ReportDetails::Feedback { .. } => continue,
        };
        out.push_str(&csv_row(&row));
    }
    out
}

async fn export(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<ListQuery>,
) -> SafetyResult<impl IntoResponse> {
    let items = filtered(&state, &session, &query).await?;
    let body = render_csv(query.tab, &items, state.tz);
    let file_name = match query.tab {
        ListTab::Hazards => "hazards.csv",
        ListTab::Violations => "violations.csv",
    };
    tracing::info!("{} exported {} {:?} items", session.user.email, items.len(), query.tab);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        body,
    ))
}
