pub mod activity;
pub mod auth;
pub mod invitations;
pub mod projects;
pub mod teams;
pub mod templates;
pub mod users;

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// `Json` whose rejections (bad syntax, unknown enum values, wrong content
/// type) come back as field-level validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `Query` with the same treatment: an unknown filter value is a validation
/// error, not a plain-text 400.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);
