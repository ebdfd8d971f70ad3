use axum::{extract::State, routing::get, Json, Router};

use crate::{
    error::Result,
    policy::Actor,
    routes::AppJson,
    services::actors::{self, ProfileResponse, UpdateProfileRequest},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(me).patch(update_me))
}

async fn me(actor: Actor) -> Json<ProfileResponse> {
    Json(ProfileResponse::from(&actor.user))
}

async fn update_me(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>> {
    let profile = actors::update_profile(&state, &actor, body).await?;
    Ok(Json(profile))
}
