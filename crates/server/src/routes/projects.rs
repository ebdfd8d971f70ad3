use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};

use crate::{
    db::models::Project,
    error::Result,
    middleware::auth::MaybeActor,
    policy::Actor,
    routes::{AppJson, AppQuery},
    services::{
        projects::{
            self, AddCollaboratorRequest, CollaboratorView, CreateProjectRequest, ProjectQuery,
            UpdateProjectRequest,
        },
        scaffold::{self, GenerateScaffoldRequest, GenerateScaffoldResponse},
        Page,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/generate", post(generate_scaffold))
        .route(
            "/:id",
            get(get_project)
                .patch(update_project)
                .delete(delete_project),
        )
        .route(
            "/:id/collaborators",
            get(list_collaborators).post(add_collaborator),
        )
        .route("/:id/collaborators/:user_id", delete(remove_collaborator))
}

async fn list_projects(
    State(state): State<AppState>,
    actor: Actor,
    AppQuery(query): AppQuery<ProjectQuery>,
) -> Result<Json<Page<Project>>> {
    let page = projects::list_projects(&state, &actor, query).await?;
    Ok(Json(page))
}

async fn create_project(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>)> {
    let project = projects::create_project(&state, &actor, body).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn generate_scaffold(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<GenerateScaffoldRequest>,
) -> Result<(StatusCode, Json<GenerateScaffoldResponse>)> {
    let generated = scaffold::generate(&state, &actor, body).await?;
    Ok((StatusCode::CREATED, Json(generated)))
}

async fn get_project(
    State(state): State<AppState>,
    actor: MaybeActor,
    Path(id): Path<String>,
) -> Result<Json<Project>> {
    let project = projects::get_project(&state, actor.actor(), &id).await?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateProjectRequest>,
) -> Result<Json<Project>> {
    let project = projects::update_project(&state, &actor, &id, body).await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    projects::delete_project(&state, &actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_collaborators(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Vec<CollaboratorView>>> {
    let collaborators = projects::list_collaborators(&state, &actor, &id).await?;
    Ok(Json(collaborators))
}

async fn add_collaborator(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    AppJson(body): AppJson<AddCollaboratorRequest>,
) -> Result<(StatusCode, Json<CollaboratorView>)> {
    let collaborator = projects::add_collaborator(&state, &actor, &id, body).await?;
    Ok((StatusCode::CREATED, Json(collaborator)))
}

async fn remove_collaborator(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    projects::remove_collaborator(&state, &actor, &id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
