use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod routes;
pub mod services;

use services::generator::{HttpGenerator, ScaffoldGenerator};

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub generator: Arc<dyn ScaffoldGenerator>,
}

impl AppState {
    /// State wired to the HTTP generator described by `config`.
    pub fn new(db: db::Database, config: config::Config) -> anyhow::Result<Self> {
        let generator = HttpGenerator::new(config.generator.clone())?;
        Ok(Self::with_generator(db, config, Arc::new(generator)))
    }

    pub fn with_generator(
        db: db::Database,
        config: config::Config,
        generator: Arc<dyn ScaffoldGenerator>,
    ) -> Self {
        Self {
            db,
            config,
            generator,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Everything except /auth resolves the caller; handlers decide whether
    // an anonymous caller is acceptable.
    let resolved_routes = Router::new()
        .nest("/me", routes::users::router())
        .nest("/teams", routes::teams::router())
        .nest("/invitations", routes::invitations::router())
        .nest("/projects", routes::projects::router())
        .nest("/templates", routes::templates::router())
        .nest("/activity", routes::activity::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .merge(resolved_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> error::AppError {
    error::AppError::NotFound("route".to_string())
}
