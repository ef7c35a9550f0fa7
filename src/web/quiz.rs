use crate::domain::models::{Choice, ScoreTotals};
use crate::domain::navigation::Screen;
use crate::domain::quiz::{AnswerOutcome, Progress, QuizSession, QuizView};
use crate::error::{SafetyError, SafetyResult};
use crate::state::SharedState;
use crate::time_utils::date_key;
use crate::web::session::UserSession;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct AnswerRequest {
    pub choice: String,
}

#[derive(Serialize)]
pub struct AnswerResponse {
    #[serde(flatten)]
    pub outcome: AnswerOutcome,
    pub view: QuizView,
}

#[derive(Serialize)]
pub struct AdvanceResponse {
    #[serde(flatten)]
    pub progress: Progress,
    pub view: QuizView,
    pub totals: Option<ScoreTotals>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(current))
        .route("/answer", post(answer))
        .route("/advance", post(advance))
        .with_state(state)
}

/// Returns the running session, starting today's set on first visit.
async fn current(State(state): State<SharedState>, session: UserSession) -> SafetyResult<Json<QuizView>> {
    let mut shell = session.on_screen(&state, Screen::Quiz).await?;
    if let Some(quiz) = shell.quiz() {
        return Ok(Json(quiz.view()));
    }

    let pool = state.stores.questions.list().await?;
    let today = state.tz.local_date(state.clock.now());
    let quiz = QuizSession::start(&pool, &date_key(today));
    let view = quiz.view();
    shell.start_quiz(quiz);
    tracing::debug!("{} started quiz {} ({} questions)", session.user.email, view.date_key, view.total);
    Ok(Json(view))
}

fn not_started() -> SafetyError {
    SafetyError::BadRequest("请先开始答题".to_string())
}

async fn answer(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<AnswerRequest>,
) -> SafetyResult<Json<AnswerResponse>> {
    let choice = Choice::parse(&payload.choice)
        .ok_or_else(|| SafetyError::BadRequest(format!("无效选项{}", payload.choice)))?;
    let mut shell = session.on_screen(&state, Screen::Quiz).await?;
    let quiz = shell.quiz_mut().ok_or_else(not_started)?;
    let outcome = quiz.answer(choice);
    Ok(Json(AnswerResponse {
        outcome,
        view: quiz.view(),
    }))
}

/// Finishing persists the score as an additive delta while the shell is
/// still locked, so leaving the screen cannot race the write. A failed
/// write leaves the session unsaved and the next advance retries it.
async fn advance(State(state): State<SharedState>, session: UserSession) -> SafetyResult<Json<AdvanceResponse>> {
    let mut shell = session.on_screen(&state, Screen::Quiz).await?;
    let quiz = shell.quiz_mut().ok_or_else(not_started)?;
    let progress = quiz.advance();
    let view = quiz.view();

    let totals = match progress {
        Progress::Finished { score } => {
            let now = state.clock.now();
            let totals = state
                .stores
                .scores
                .add_points(
                    session.user.id,
                    i64::from(score),
                    score as i32,
                    state.tz.year(now),
                    state.tz.local_date(now),
                )
                .await
                .map_err(|e| {
                    tracing::error!("Saving quiz score for {} failed: {}", session.user.email, e);
                    e
                })?;
            quiz.mark_saved();
            tracing::info!(
                "{} finished quiz {} with {}/{} (total {})",
                session.user.email,
                view.date_key,
                score,
                view.total,
                totals.total_points
            );
            Some(totals)
        }
        _ => None,
    };

    Ok(Json(AdvanceResponse { progress, view, totals }))
}
