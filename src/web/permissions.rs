use crate::domain::models::{PermissionKey, UserRole};
use crate::domain::navigation::Screen;
use crate::domain::permissions::RolePermissionMap;
use crate::error::{SafetyError, SafetyResult};
use crate::state::SharedState;
use crate::web::auth::role_labels;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct RoleEntry {
    pub role: UserRole,
    pub label: &'static str,
    pub keys: Vec<PermissionKey>,
}

#[derive(Serialize)]
pub struct KeyEntry {
    pub key: PermissionKey,
    pub label: &'static str,
    pub group: &'static str,
}

#[derive(Serialize)]
pub struct PermissionsView {
    pub roles: Vec<RoleEntry>,
    pub keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub keys: Vec<PermissionKey>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(view))
        .route("/:role", put(update))
        .with_state(state)
}

fn render(map: &RolePermissionMap) -> PermissionsView {
    PermissionsView {
        roles: role_labels()
            .into_iter()
            .map(|(role, label)| RoleEntry {
                role,
                label,
                keys: map.allowed(role).iter().copied().collect(),
            })
            .collect(),
        keys: PermissionKey::ALL
            .iter()
            .map(|key| KeyEntry {
                key: *key,
                label: key.label(),
                group: key.group(),
            })
            .collect(),
    }
}

async fn view(State(state): State<SharedState>, session: UserSession) -> SafetyResult<Json<PermissionsView>> {
    let _shell = session.on_screen(&state, Screen::PermissionSettings).await?;
    let map = state.permissions.snapshot().await;
    Ok(Json(render(&map)))
}

async fn update(
    State(state): State<SharedState>,
    session: UserSession,
    Path(role): Path<String>,
    Json(payload): Json<UpdateRequest>,
) -> SafetyResult<Json<PermissionsView>> {
    let _shell = session.on_screen(&state, Screen::PermissionSettings).await?;
    let role = UserRole::parse(&role).ok_or_else(|| SafetyError::NotFound(format!("角色{}", role)))?;
    // Nobody can lock themselves out of this screen.
    if role == session.user.role && !payload.keys.contains(&PermissionKey::Permissions) {
        return Err(SafetyError::BadRequest("不能移除本角色的权限配置权限".to_string()));
    }
    let map = state
        .permissions
        .set_role_permissions(session.user.role, role, payload.keys)
        .await?;
    Ok(Json(render(&map)))
}
