use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::{
    db::models::Template,
    error::Result,
    middleware::auth::MaybeActor,
    policy::Actor,
    routes::{AppJson, AppQuery},
    services::templates::{
        self, CreateTemplateRequest, ReviewTemplateRequest, SearchResponse, TemplateSearch,
        UpdateTemplateRequest,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(search_templates).post(create_template))
        .route(
            "/:id",
            get(get_template)
                .patch(update_template)
                .delete(delete_template),
        )
        .route("/:id/review", post(review_template))
}

async fn search_templates(
    State(state): State<AppState>,
    actor: MaybeActor,
    AppQuery(query): AppQuery<TemplateSearch>,
) -> Result<Json<SearchResponse>> {
    let results = templates::search_templates(&state, actor.actor(), query).await?;
    Ok(Json(results))
}

async fn get_template(
    State(state): State<AppState>,
    actor: MaybeActor,
    Path(id): Path<String>,
) -> Result<Json<Template>> {
    let template = templates::get_template(&state, actor.actor(), &id).await?;
    Ok(Json(template))
}

async fn create_template(
    State(state): State<AppState>,
    actor: Actor,
    AppJson(body): AppJson<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<Template>)> {
    let template = templates::create_template(&state, &actor, body).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn update_template(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateTemplateRequest>,
) -> Result<Json<Template>> {
    let template = templates::update_template(&state, &actor, &id, body).await?;
    Ok(Json(template))
}

async fn delete_template(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    templates::delete_template(&state, &actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn review_template(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    AppJson(body): AppJson<ReviewTemplateRequest>,
) -> Result<Json<Template>> {
    let template = templates::review_template(&state, &actor, &id, body).await?;
    Ok(Json(template))
}
