use axum::{extract::State, routing::get, Json, Router};

use crate::{
    db::models::ActivityLog,
    error::Result,
    policy::Actor,
    routes::AppQuery,
    services::{
        activity::{self, ActivityQuery},
        Page,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_activity))
}

async fn list_activity(
    State(state): State<AppState>,
    actor: Actor,
    AppQuery(query): AppQuery<ActivityQuery>,
) -> Result<Json<Page<ActivityLog>>> {
    let page = activity::list(&state, &actor, query).await?;
    Ok(Json(page))
}
