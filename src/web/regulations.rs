use crate::domain::models::{PermissionKey, Regulation, REGULATION_CATEGORIES};
use crate::domain::navigation::Screen;
use crate::error::{SafetyError, SafetyResult};
use crate::services::storage::object_name;
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct UploadRequest {
    pub title: String,
    pub category: String,
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Standard base64 of the document bytes.
    pub content: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Serialize)]
pub struct RegulationsView {
    pub categories: [&'static str; 4],
    pub can_manage: bool,
    pub items: Vec<Regulation>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list).post(upload))
        .route("/:id", delete(remove))
        .layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES * 4 / 3 + 4096))
        .with_state(state)
}

async fn can_manage(state: &SharedState, session: &UserSession) -> bool {
    state
        .permissions
        .snapshot()
        .await
        .has_permission(session.user.role, PermissionKey::Backoffice)
}

async fn list(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<ListQuery>,
) -> SafetyResult<Json<RegulationsView>> {
    let _shell = session.on_screen(&state, Screen::Regulations).await?;
    let mut items = state.stores.regulations.list().await?;
    if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
        items.retain(|r| r.category == category);
    }
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(RegulationsView {
        categories: REGULATION_CATEGORIES,
        can_manage: can_manage(&state, &session).await,
        items,
    }))
}

async fn upload(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<UploadRequest>,
) -> SafetyResult<(StatusCode, Json<Regulation>)> {
    let _shell = session.on_screen(&state, Screen::Regulations).await?;
    if !can_manage(&state, &session).await {
        return Err(SafetyError::denied());
    }

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(SafetyError::BadRequest("请填写制度名称".to_string()));
    }
    if !REGULATION_CATEGORIES.contains(&payload.category.as_str()) {
        return Err(SafetyError::BadRequest(format!("未知分类{}", payload.category)));
    }
    let bytes = general_purpose::STANDARD
        .decode(payload.content.trim())
        .map_err(|_| SafetyError::BadRequest("文件内容不是有效的base64".to_string()))?;
    if bytes.is_empty() || bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(SafetyError::BadRequest("文件为空或超过20MB".to_string()));
    }

    let now = state.clock.now();
    let path = object_name(now.timestamp_millis(), &payload.file_name);
    let file_url = state.storage.upload(&path, bytes, &payload.content_type).await?;

    let regulation = Regulation {
        id: Uuid::new_v4(),
        title: title.to_string(),
        category: payload.category,
        file_url,
        storage_path: path.clone(),
        created_at: now,
    };
    if let Err(e) = state.stores.regulations.insert(&regulation).await {
        if let Err(cleanup) = state.storage.delete(&path).await {
            tracing::warn!("Orphaned object {} after failed insert: {}", path, cleanup);
        }
        return Err(e.into());
    }
    tracing::info!("{} uploaded regulation '{}' ({})", session.user.email, regulation.title, regulation.category);
    Ok((StatusCode::CREATED, Json(regulation)))
}

async fn remove(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> SafetyResult<StatusCode> {
    let _shell = session.on_screen(&state, Screen::Regulations).await?;
    if !can_manage(&state, &session).await {
        return Err(SafetyError::denied());
    }
    let removed = state
        .stores
        .regulations
        .delete(id)
        .await?
        .ok_or_else(|| SafetyError::NotFound("制度文件".to_string()))?;
    // Best effort.
    if let Err(e) = state.storage.delete(&removed.storage_path).await {
        tracing::warn!("Failed to delete object {}: {}", removed.storage_path, e);
    }
    tracing::info!("{} deleted regulation '{}'", session.user.email, removed.title);
    Ok(StatusCode::NO_CONTENT)
}
