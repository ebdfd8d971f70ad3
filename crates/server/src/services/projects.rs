use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::models::{
        AuthType, BackendStack, CollaboratorRole, FrontendStack, MemberStatus, Project,
        ProjectCollaborator, ProjectStatus, ProjectVisibility, Template, User,
    },
    error::{AppError, Result},
    policy::{self, Actor},
    services::{
        activity::{self, NewActivity},
        slug::{self, SlugTable, Suffix},
        Page, Pagination,
    },
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub team_id: Option<String>,
    pub template_id: Option<String>,
    pub visibility: Option<ProjectVisibility>,
    #[serde(default)]
    pub is_public: bool,
    #[validate(length(max = 4000))]
    pub app_idea: Option<String>,
    pub frontend_stack: Option<FrontendStack>,
    pub backend_stack: Option<BackendStack>,
    pub auth_type: Option<AuthType>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub visibility: Option<ProjectVisibility>,
    pub is_public: Option<bool>,
    pub status: Option<ProjectStatus>,
    pub scaffold: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub team_id: Option<String>,
    pub status: Option<ProjectStatus>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Row to insert. The owner is always the acting user.
pub(crate) struct NewProject<'a> {
    pub owner_id: &'a str,
    pub team_id: Option<&'a str>,
    pub template_id: Option<&'a str>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub app_idea: Option<&'a str>,
    pub frontend_stack: Option<FrontendStack>,
    pub backend_stack: Option<BackendStack>,
    pub auth_type: Option<AuthType>,
    pub visibility: ProjectVisibility,
    pub is_public: bool,
    pub status: ProjectStatus,
    pub scaffold: Option<&'a serde_json::Value>,
}

pub(crate) async fn load_project(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM live_projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(project)
}

pub(crate) async fn load_grant(
    pool: &sqlx::SqlitePool,
    project_id: &str,
    user_id: &str,
) -> Result<Option<ProjectCollaborator>> {
    let grant = sqlx::query_as::<_, ProjectCollaborator>(
        "SELECT * FROM project_collaborators WHERE project_id = ? AND user_id = ?",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(grant)
}

/// Load a project the caller may see. Anything else is indistinguishable from
/// a missing project.
async fn load_visible(
    state: &AppState,
    actor: Option<&Actor>,
    id: &str,
) -> Result<(Project, Option<ProjectCollaborator>)> {
    let not_found = || AppError::NotFound("Project not found".to_string());

    let project = load_project(&state.db.pool, id).await?.ok_or_else(not_found)?;
    let grant = match actor {
        Some(actor) => load_grant(&state.db.pool, &project.id, actor.id()).await?,
        None => None,
    };

    if !policy::can_view_project(actor, &project, grant.as_ref()) {
        return Err(not_found());
    }
    Ok((project, grant))
}

/// A template referenced by a new project must be visible to its creator.
pub(crate) async fn resolve_template(
    state: &AppState,
    actor: &Actor,
    template_id: Option<&str>,
) -> Result<Option<Template>> {
    let Some(template_id) = template_id else {
        return Ok(None);
    };
    let template = sqlx::query_as::<_, Template>("SELECT * FROM live_templates WHERE id = ?")
        .bind(template_id)
        .fetch_optional(&state.db.pool)
        .await?
        .filter(|t| policy::can_view_template(Some(actor), t))
        .ok_or_else(|| AppError::validation("template_id", "unknown template"))?;
    Ok(Some(template))
}

pub(crate) async fn mark_template_used(
    conn: &mut SqliteConnection,
    template_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE templates SET use_count = use_count + 1 WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(template_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert under a fresh slug. Team projects are capped by the team's project
/// limit in the same statement.
pub(crate) async fn insert_project(
    conn: &mut SqliteConnection,
    new: &NewProject<'_>,
) -> Result<Project> {
    let base = slug::slugify(new.name, "project");
    let now = Utc::now();

    for attempt in 0..slug::MAX_ATTEMPTS {
        let candidate = slug::candidate(&base, attempt, Suffix::Random);
        if slug::is_taken(&mut *conn, SlugTable::Projects, &candidate).await? {
            continue;
        }

        let inserted = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (
                id, owner_id, team_id, template_id, name, slug, description, app_idea,
                frontend_stack, backend_stack, auth_type, visibility, is_public, status,
                scaffold, created_at, updated_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE ? IS NULL
               OR (SELECT COUNT(*) FROM live_projects WHERE team_id = ?)
                  < (SELECT project_limit FROM live_teams WHERE id = ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.owner_id)
        .bind(new.team_id)
        .bind(new.template_id)
        .bind(new.name.trim())
        .bind(&candidate)
        .bind(new.description)
        .bind(new.app_idea)
        .bind(new.frontend_stack)
        .bind(new.backend_stack)
        .bind(new.auth_type)
        .bind(new.visibility)
        .bind(new.is_public)
        .bind(new.status)
        .bind(new.scaffold.map(sqlx::types::Json))
        .bind(now)
        .bind(now)
        .bind(new.team_id)
        .bind(new.team_id)
        .bind(new.team_id)
        .fetch_optional(&mut *conn)
        .await;

        match inserted {
            Ok(Some(project)) => return Ok(project),
            Ok(None) => return Err(team_project_limit(conn, new.team_id).await),
            Err(err) if slug::is_unique_violation(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::Conflict("Could not allocate a unique project slug".to_string()))
}

async fn team_project_limit(conn: &mut SqliteConnection, team_id: Option<&str>) -> AppError {
    let counts = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT t.project_limit, (SELECT COUNT(*) FROM live_projects WHERE team_id = t.id)
        FROM live_teams t WHERE t.id = ?
        "#,
    )
    .bind(team_id)
    .fetch_optional(conn)
    .await;

    match counts {
        Ok(Some((limit, current))) => AppError::QuotaExceeded { limit, current },
        Ok(None) => AppError::NotFound("Team not found".to_string()),
        Err(err) => err.into(),
    }
}

pub async fn create_project(
    state: &AppState,
    actor: &Actor,
    body: CreateProjectRequest,
) -> Result<Project> {
    body.validate()?;
    if body.name.trim().is_empty() {
        return Err(AppError::validation("name", "Project name is required"));
    }

    let team_id = body.team_id.as_deref();
    let visibility = body.visibility.unwrap_or(ProjectVisibility::Private);
    if visibility == ProjectVisibility::Team && team_id.is_none() {
        return Err(AppError::validation("visibility", "team visibility requires a team_id"));
    }
    if !policy::can_insert_project(Some(actor), actor.id(), team_id) {
        return Err(AppError::Forbidden(
            "Projects can only be created in teams you belong to".to_string(),
        ));
    }

    let template = resolve_template(state, actor, body.template_id.as_deref()).await?;

    let new = NewProject {
        owner_id: actor.id(),
        team_id,
        template_id: template.as_ref().map(|t| t.id.as_str()),
        name: &body.name,
        description: body.description.as_deref(),
        app_idea: body.app_idea.as_deref(),
        frontend_stack: body
            .frontend_stack
            .or(template.as_ref().map(|t| t.frontend_stack)),
        backend_stack: body
            .backend_stack
            .or(template.as_ref().and_then(|t| t.backend_stack)),
        auth_type: body.auth_type,
        visibility,
        is_public: body.is_public,
        status: ProjectStatus::Draft,
        scaffold: template.as_ref().map(|t| &t.scaffold.0),
    };

    let mut tx = state.db.begin_write().await?;
    let project = insert_project(&mut tx, &new).await?;
    if let Some(template) = &template {
        mark_template_used(&mut tx, &template.id).await?;
    }
    activity::record(
        &mut tx,
        NewActivity::new(actor, "project.created", "project")
            .team(project.team_id.as_deref())
            .resource(&project.id)
            .detail(serde_json::json!({ "name": project.name, "slug": project.slug })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(project_id = %project.id, owner_id = %actor.id(), "project created");
    Ok(project)
}

/// Projects the caller can see, most recently updated first.
pub async fn list_projects(
    state: &AppState,
    actor: &Actor,
    query: ProjectQuery,
) -> Result<Page<Project>> {
    // Candidate set: anything the caller owns, any project of a team they are
    // in, anything they collaborate on. The policy has the final word.
    let candidates = sqlx::query_as::<_, Project>(
        r#"
        SELECT * FROM live_projects
        WHERE owner_id = ?
           OR team_id IN (SELECT team_id FROM team_members WHERE user_id = ?)
           OR id IN (SELECT project_id FROM project_collaborators WHERE user_id = ?)
        ORDER BY updated_at DESC
        "#,
    )
    .bind(actor.id())
    .bind(actor.id())
    .bind(actor.id())
    .fetch_all(&state.db.pool)
    .await?;

    let grants: HashMap<String, ProjectCollaborator> = sqlx::query_as::<_, ProjectCollaborator>(
        "SELECT * FROM project_collaborators WHERE user_id = ?",
    )
    .bind(actor.id())
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .map(|g| (g.project_id.clone(), g))
    .collect();

    let visible: Vec<Project> = candidates
        .into_iter()
        .filter(|p| policy::can_view_project(Some(actor), p, grants.get(&p.id)))
        .filter(|p| query.team_id.is_none() || p.team_id == query.team_id)
        .filter(|p| query.status.map_or(true, |s| p.status == s))
        .collect();

    Ok(Page::from_visible(
        visible,
        Pagination {
            offset: query.offset,
            limit: query.limit,
        },
    ))
}

/// Live projects of a team that the caller may see.
pub(crate) async fn list_team_projects(
    state: &AppState,
    actor: &Actor,
    team_id: &str,
) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        "SELECT * FROM live_projects WHERE team_id = ? ORDER BY updated_at DESC",
    )
    .bind(team_id)
    .fetch_all(&state.db.pool)
    .await?;

    let grants: HashMap<String, ProjectCollaborator> = sqlx::query_as::<_, ProjectCollaborator>(
        r#"
        SELECT c.* FROM project_collaborators c
        JOIN live_projects p ON p.id = c.project_id
        WHERE p.team_id = ? AND c.user_id = ?
        "#,
    )
    .bind(team_id)
    .bind(actor.id())
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .map(|g| (g.project_id.clone(), g))
    .collect();

    Ok(projects
        .into_iter()
        .filter(|p| policy::can_view_project(Some(actor), p, grants.get(&p.id)))
        .collect())
}

pub async fn get_project(state: &AppState, actor: Option<&Actor>, id: &str) -> Result<Project> {
    let (project, _) = load_visible(state, actor, id).await?;
    Ok(project)
}

pub async fn update_project(
    state: &AppState,
    actor: &Actor,
    id: &str,
    body: UpdateProjectRequest,
) -> Result<Project> {
    body.validate()?;

    let (project, grant) = load_visible(state, Some(actor), id).await?;
    if !policy::can_modify_project(Some(actor), &project, grant.as_ref()) {
        return Err(AppError::Forbidden("You cannot modify this project".to_string()));
    }

    if let Some(name) = &body.name {
        if name.trim().is_empty() {
            return Err(AppError::validation("name", "Project name is required"));
        }
    }
    if body.visibility == Some(ProjectVisibility::Team) && project.team_id.is_none() {
        return Err(AppError::validation(
            "visibility",
            "team visibility requires the project to belong to a team",
        ));
    }
    if let Some(next) = body.status {
        if next != project.status && !project.status.can_transition_to(next) {
            return Err(AppError::validation(
                "status",
                format!("cannot move from {:?} to {:?}", project.status, next).to_lowercase(),
            ));
        }
    }

    let mut tx = state.db.begin_write().await?;
    let updated = sqlx::query_as::<_, Project>(
        r#"
        UPDATE projects
        SET name = COALESCE(?, name),
            description = COALESCE(?, description),
            visibility = COALESCE(?, visibility),
            is_public = COALESCE(?, is_public),
            status = COALESCE(?, status),
            scaffold = COALESCE(?, scaffold),
            updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(body.name.as_deref().map(str::trim))
    .bind(&body.description)
    .bind(body.visibility)
    .bind(body.is_public)
    .bind(body.status)
    .bind(body.scaffold.as_ref().map(sqlx::types::Json))
    .bind(Utc::now())
    .bind(&project.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "project.updated", "project")
            .team(updated.team_id.as_deref())
            .resource(&updated.id)
            .detail(serde_json::json!({
                "status": updated.status,
                "visibility": updated.visibility,
            })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(project_id = %updated.id, "project updated");
    Ok(updated)
}

pub async fn delete_project(state: &AppState, actor: &Actor, id: &str) -> Result<()> {
    let (project, grant) = load_visible(state, Some(actor), id).await?;
    if !policy::can_modify_project(Some(actor), &project, grant.as_ref()) {
        return Err(AppError::Forbidden("You cannot delete this project".to_string()));
    }

    let now = Utc::now();
    let mut tx = state.db.begin_write().await?;
    let result = sqlx::query(
        "UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(&project.id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Project not found".to_string()));
    }

    activity::record(
        &mut tx,
        NewActivity::new(actor, "project.deleted", "project")
            .team(project.team_id.as_deref())
            .resource(&project.id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(project_id = %project.id, "project deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct AddCollaboratorRequest {
    #[validate(email)]
    pub email: String,
    pub role: CollaboratorRole,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CollaboratorView {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub role: CollaboratorRole,
    pub status: MemberStatus,
}

pub async fn list_collaborators(
    state: &AppState,
    actor: &Actor,
    project_id: &str,
) -> Result<Vec<CollaboratorView>> {
    let (project, _) = load_visible(state, Some(actor), project_id).await?;

    let collaborators = sqlx::query_as::<_, CollaboratorView>(
        r#"
        SELECT u.id AS user_id, u.name AS user_name, u.email AS user_email, pc.role, pc.status
        FROM project_collaborators pc
        JOIN live_users u ON pc.user_id = u.id
        WHERE pc.project_id = ? AND pc.status != 'removed'
        ORDER BY u.name ASC
        "#,
    )
    .bind(&project.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(collaborators)
}

pub async fn add_collaborator(
    state: &AppState,
    actor: &Actor,
    project_id: &str,
    body: AddCollaboratorRequest,
) -> Result<CollaboratorView> {
    body.validate()?;

    let (project, grant) = load_visible(state, Some(actor), project_id).await?;
    if !policy::can_manage_collaborators(Some(actor), &project, grant.as_ref()) {
        return Err(AppError::Forbidden(
            "You cannot manage collaborators on this project".to_string(),
        ));
    }

    let target = sqlx::query_as::<_, User>("SELECT * FROM live_users WHERE lower(email) = lower(?)")
        .bind(body.email.trim())
        .fetch_optional(&state.db.pool)
        .await?
        .filter(User::is_live)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if target.id == project.owner_id {
        return Err(AppError::validation(
            "email",
            "The project owner cannot be added as a collaborator",
        ));
    }

    let mut tx = state.db.begin_write().await?;
    sqlx::query(
        r#"
        INSERT INTO project_collaborators (project_id, user_id, role, status, invited_by, created_at)
        VALUES (?, ?, ?, 'active', ?, ?)
        ON CONFLICT (project_id, user_id)
        DO UPDATE SET role = excluded.role, status = 'active'
        "#,
    )
    .bind(&project.id)
    .bind(&target.id)
    .bind(body.role)
    .bind(actor.id())
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "project.collaborator_added", "project")
            .team(project.team_id.as_deref())
            .resource(&project.id)
            .detail(serde_json::json!({ "user_id": target.id, "role": body.role })),
    )
    .await?;
    tx.commit().await?;

    Ok(CollaboratorView {
        user_id: target.id,
        user_name: target.name,
        user_email: target.email,
        role: body.role,
        status: MemberStatus::Active,
    })
}

pub async fn remove_collaborator(
    state: &AppState,
    actor: &Actor,
    project_id: &str,
    user_id: &str,
) -> Result<()> {
    let (project, grant) = load_visible(state, Some(actor), project_id).await?;
    if !policy::can_remove_collaborator(Some(actor), &project, grant.as_ref(), user_id) {
        return Err(AppError::Forbidden("Cannot remove this collaborator".to_string()));
    }

    let mut tx = state.db.begin_write().await?;
    let result = sqlx::query(
        r#"
        UPDATE project_collaborators SET status = 'removed'
        WHERE project_id = ? AND user_id = ? AND status != 'removed'
        "#,
    )
    .bind(&project.id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Collaborator not found".to_string()));
    }

    activity::record(
        &mut tx,
        NewActivity::new(actor, "project.collaborator_removed", "project")
            .team(project.team_id.as_deref())
            .resource(&project.id)
            .detail(serde_json::json!({ "user_id": user_id })),
    )
    .await?;
    tx.commit().await?;

    Ok(())
}
