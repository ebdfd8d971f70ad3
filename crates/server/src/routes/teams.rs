use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};

use crate::{
    db::models::{Team, TeamMember},
    error::Result,
    policy::Actor,
    routes::AppJson,
    services::teams::{
        self, CreateTeamRequest, InvitationResponse, InviteMemberRequest, TeamDetail,
        UpdateMemberRequest, UpdateTeamRequest,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_teams).post(create_team))
        .route("/:id", get(get_team).patch(update_team).delete(delete_team))
        .route("/:id/members", post(invite_member))
        .route(
            "/:id/members/:member_id",
            patch(update_member).delete(remove_member),
        )
}

async fn list_teams(State(state): State<AppState>, actor: Actor) -> Result<Json<Vec<Team>>> {
    let teams = teams::list_user_teams(&state, &actor).await?;
    Ok(Json(teams))
}

async fn create_team(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<CreateTeamRequest>,
) -> Result<(StatusCode, Json<Team>)> {
    let team = teams::create_team(&state, &actor, body).await?;
    Ok((StatusCode::CREATED, Json(team)))
}

async fn get_team(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<TeamDetail>> {
    let detail = teams::get_team(&state, &actor, &id).await?;
    Ok(Json(detail))
}

async fn update_team(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateTeamRequest>,
) -> Result<Json<Team>> {
    let team = teams::update_team(&state, &actor, &id, body).await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    teams::delete_team(&state, &actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn invite_member(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    AppJson(body): AppJson<InviteMemberRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>)> {
    let invitation = teams::invite_member(&state, &actor, &id, body).await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

async fn update_member(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, member_id)): Path<(String, String)>,
    AppJson(body): AppJson<UpdateMemberRequest>,
) -> Result<Json<TeamMember>> {
    let member = teams::update_member(&state, &actor, &id, &member_id, body).await?;
    Ok(Json(member))
}

async fn remove_member(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, member_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    teams::remove_member(&state, &actor, &id, &member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
