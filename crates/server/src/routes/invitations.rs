use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::{
    db::models::TeamMember,
    error::Result,
    policy::Actor,
    routes::AppJson,
    services::teams::{self, InvitationTokenRequest},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accept", post(accept))
        .route("/decline", post(decline))
}

async fn accept(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<InvitationTokenRequest>,
) -> Result<Json<TeamMember>> {
    let member = teams::accept_invitation(&state, &actor, body).await?;
    Ok(Json(member))
}

async fn decline(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<InvitationTokenRequest>,
) -> Result<StatusCode> {
    teams::decline_invitation(&state, &actor, body).await?;
    Ok(StatusCode::NO_CONTENT)
}
