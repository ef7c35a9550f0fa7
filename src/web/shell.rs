use crate::domain::navigation::{Affordance, NavOutcome, Screen};
use crate::state::SharedState;
use crate::web::auth::SessionUser;
use crate::web::session::UserSession;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct ShellView {
    pub screen: Screen,
    pub user: SessionUser,
    pub affordances: Vec<Affordance>,
    pub draft: Option<String>,
    pub uploads: Vec<String>,
}

#[derive(Deserialize)]
pub struct NavigateRequest {
    pub screen: Screen,
}

#[derive(Serialize)]
pub struct NavigateResponse {
    #[serde(flatten)]
    pub outcome: NavOutcome,
    pub current: Screen,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(current))
        .route("/navigate", post(navigate))
        .with_state(state)
}

async fn current(State(state): State<SharedState>, session: UserSession) -> Json<ShellView> {
    let permissions = state.permissions.snapshot().await;
    let shell = session.shell.lock().await;
    Json(ShellView {
        screen: shell.screen(),
        affordances: shell.affordances(&permissions),
        draft: shell.draft().map(str::to_string),
        uploads: shell.uploads().to_vec(),
        user: session.user.clone().into(),
    })
}

/// Denials are ordinary answers, not HTTP errors.
async fn navigate(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<NavigateRequest>,
) -> Json<NavigateResponse> {
    let permissions = state.permissions.snapshot().await;
    let mut shell = session.shell.lock().await;
    let outcome = shell.navigate(payload.screen, &permissions);
    if let NavOutcome::Entered { screen } = &outcome {
        tracing::debug!("{} entered {:?}", session.user.email, screen);
    }
    Json(NavigateResponse {
        outcome,
        current: shell.screen(),
    })
}
