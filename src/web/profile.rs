use crate::domain::models::ScoreTotals;
use crate::domain::navigation::Screen;
use crate::error::SafetyResult;
use crate::state::SharedState;
use crate::web::auth::SessionUser;
use crate::web::session::UserSession;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
pub struct ProfileView {
    pub user: SessionUser,
    pub scores: ScoreTotals,
}

pub fn router(state: SharedState) -> Router {
    Router::new().route("/", get(profile)).with_state(state)
}

async fn profile(State(state): State<SharedState>, session: UserSession) -> SafetyResult<Json<ProfileView>> {
    let _shell = session.on_screen(&state, Screen::Profile).await?;
    let year = state.tz.year(state.clock.now());
    let mut scores = state.stores.scores.get(session.user.id).await?.unwrap_or_default();
    // Yearly points belong to the year they were earned in.
    if scores.year != year {
        scores.yearly_points = 0;
        scores.year = year;
    }
    Ok(Json(ProfileView {
        user: session.user.clone().into(),
        scores,
    }))
}
