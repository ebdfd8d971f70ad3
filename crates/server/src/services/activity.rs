use chrono::Utc;
use serde::Deserialize;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::models::ActivityLog,
    error::Result,
    policy::{self, Actor},
    services::{Page, Pagination},
    AppState,
};

/// One audit row. Written on the same connection (transaction) as the
/// mutation it describes.
#[derive(Debug)]
pub struct NewActivity<'a> {
    pub actor_user_id: Option<&'a str>,
    pub team_id: Option<&'a str>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub detail: serde_json::Value,
}

impl<'a> NewActivity<'a> {
    pub fn new(actor: &'a Actor, action: &'a str, resource_type: &'a str) -> Self {
        Self::by_user(actor.id(), action, resource_type)
    }

    /// For mutations that happen before the user has an [`Actor`], such as
    /// registration.
    pub fn by_user(user_id: &'a str, action: &'a str, resource_type: &'a str) -> Self {
        Self {
            actor_user_id: Some(user_id),
            team_id: None,
            action,
            resource_type,
            resource_id: None,
            detail: serde_json::json!({}),
        }
    }

    pub fn team(mut self, team_id: Option<&'a str>) -> Self {
        self.team_id = team_id;
        self
    }

    pub fn resource(mut self, resource_id: &'a str) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

pub async fn record(conn: &mut SqliteConnection, entry: NewActivity<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO activity_logs
            (id, actor_user_id, team_id, action, resource_type, resource_id, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(entry.actor_user_id)
    .bind(entry.team_id)
    .bind(entry.action)
    .bind(entry.resource_type)
    .bind(entry.resource_id)
    .bind(sqlx::types::Json(&entry.detail))
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub team_id: Option<String>,
    pub actor_user_id: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list(
    state: &AppState,
    actor: &Actor,
    query: ActivityQuery,
) -> Result<Page<ActivityLog>> {
    // Only rows the caller could read: their own, their active teams', or
    // everything for admins. The policy still has the final word.
    let rows = sqlx::query_as::<_, ActivityLog>(
        r#"
        SELECT * FROM activity_logs
        WHERE (? IS NULL OR team_id = ?)
          AND (? IS NULL OR actor_user_id = ?)
          AND (
                ?
             OR actor_user_id = ?
             OR team_id IN (
                    SELECT team_id FROM team_members WHERE user_id = ? AND status = 'active'
                )
          )
        ORDER BY created_at DESC
        "#,
    )
    .bind(&query.team_id)
    .bind(&query.team_id)
    .bind(&query.actor_user_id)
    .bind(&query.actor_user_id)
    .bind(actor.user.role.is_admin())
    .bind(actor.id())
    .bind(actor.id())
    .fetch_all(&state.db.pool)
    .await?;

    let visible: Vec<ActivityLog> = rows
        .into_iter()
        .filter(|log| policy::can_read_activity_log(Some(actor), log))
        .collect();

    Ok(Page::from_visible(
        visible,
        Pagination {
            offset: query.offset,
            limit: query.limit,
        },
    ))
}
