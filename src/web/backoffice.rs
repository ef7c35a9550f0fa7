use crate::domain::models::ReportItem;
use crate::domain::navigation::Screen;
use crate::error::SafetyResult;
use crate::services::reports::ConfirmOutcome;
use crate::state::SharedState;
use crate::time_utils::format_local_time;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct BackOfficeItem {
    #[serde(flatten)]
    pub item: ReportItem,
    pub kind_label: &'static str,
    pub created_at_local: String,
}

#[derive(Serialize)]
pub struct BackOfficeView {
    pub pending: usize,
    pub items: Vec<BackOfficeItem>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/items", get(items))
        .route("/items/:id/confirm", post(confirm))
        .with_state(state)
}

async fn items(State(state): State<SharedState>, session: UserSession) -> SafetyResult<Json<BackOfficeView>> {
    let _shell = session.on_screen(&state, Screen::BackOffice).await?;
    let items = state.reports.list().await?;
    let pending = state.reports.pending_count().await?;
    Ok(Json(BackOfficeView {
        pending,
        items: items
            .into_iter()
            .map(|item| BackOfficeItem {
                kind_label: item.kind().label(),
                created_at_local: format_local_time(state.tz, item.created_at),
                item,
            })
            .collect(),
    }))
}

async fn confirm(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<String>,
) -> SafetyResult<Json<ConfirmOutcome>> {
    let _shell = session.on_screen(&state, Screen::BackOffice).await?;
    let outcome = state.reports.confirm(&id).await?;
    if let ConfirmOutcome::Confirmed { .. } = &outcome {
        tracing::info!("{} confirmed {}", session.user.email, id);
    }
    Ok(Json(outcome))
}
