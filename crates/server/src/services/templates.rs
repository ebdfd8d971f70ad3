use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::models::{BackendStack, FrontendStack, Template, TemplateVisibility},
    error::{AppError, Result},
    policy::{self, Actor},
    services::{
        activity::{self, NewActivity},
        slug::{self, SlugTable, Suffix},
        Page, Pagination,
    },
    AppState,
};

const MAX_TAG_LEN: usize = 30;

#[derive(Debug, Default, Deserialize)]
pub struct TemplateSearch {
    pub q: Option<String>,
    pub category: Option<String>,
    pub frontend_stack: Option<FrontendStack>,
    pub team_id: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Counts over every visible template matching the text query, before the
/// category and stack filters narrow the page.
#[derive(Debug, Default, Serialize)]
pub struct Facets {
    pub category: BTreeMap<String, i64>,
    pub frontend_stack: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    #[serde(flatten)]
    pub page: Page<Template>,
    pub facets: Facets,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub category: String,
    pub frontend_stack: FrontendStack,
    pub backend_stack: Option<BackendStack>,
    pub visibility: Option<TemplateVisibility>,
    pub team_id: Option<String>,
    pub scaffold: Option<serde_json::Value>,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub category: Option<String>,
    pub frontend_stack: Option<FrontendStack>,
    pub backend_stack: Option<BackendStack>,
    pub visibility: Option<TemplateVisibility>,
    pub scaffold: Option<serde_json::Value>,
    #[validate(length(max = 20))]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewTemplateRequest {
    pub approved: bool,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || tag.len() > MAX_TAG_LEN {
            return Err(AppError::validation(
                "tags",
                format!("tags must be 1-{MAX_TAG_LEN} characters"),
            ));
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    Ok(out)
}

fn check_scaffold(scaffold: &serde_json::Value) -> Result<()> {
    if scaffold.is_object() {
        Ok(())
    } else {
        Err(AppError::validation("scaffold", "must be a JSON object"))
    }
}

fn matches_text(template: &Template, needle: &str) -> bool {
    template.name.to_lowercase().contains(needle)
        || template
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
        || template.tags.0.iter().any(|t| t.contains(needle))
}

async fn load_template(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Template>> {
    let template = sqlx::query_as::<_, Template>("SELECT * FROM live_templates WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(template)
}

/// Load a template the caller may change. Callers who cannot even see it get
/// `NotFound`.
async fn modifiable_template(state: &AppState, actor: &Actor, id: &str) -> Result<Template> {
    let template = load_template(&state.db.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Template not found".into()))?;

    if policy::can_modify_template(Some(actor), &template) {
        Ok(template)
    } else if policy::can_view_template(Some(actor), &template) {
        Err(AppError::Forbidden("You cannot modify this template".into()))
    } else {
        Err(AppError::NotFound("Template not found".into()))
    }
}

pub async fn search_templates(
    state: &AppState,
    actor: Option<&Actor>,
    query: TemplateSearch,
) -> Result<SearchResponse> {
    // Listed templates the caller could see: their own drafts, plus approved
    // public, premium (paid plans) and team (active members) templates.
    let (actor_id, paid) = match actor.filter(|a| a.is_live()) {
        Some(a) => (Some(a.id()), a.user.has_active_paid_subscription(a.as_of)),
        None => (None, false),
    };
    let candidates = sqlx::query_as::<_, Template>(
        r#"
        SELECT * FROM live_templates
        WHERE visibility NOT IN ('unlisted', 'deprecated')
          AND (? IS NULL OR team_id = ?)
          AND (
                created_by = ?
             OR (
                    is_approved = 1
                AND (
                        visibility = 'public'
                     OR (visibility = 'premium' AND ?)
                     OR (
                            visibility = 'team'
                        AND team_id IN (
                                SELECT team_id FROM team_members
                                WHERE user_id = ? AND status = 'active'
                            )
                        )
                    )
                )
          )
        ORDER BY use_count DESC, created_at DESC
        "#,
    )
    .bind(&query.team_id)
    .bind(&query.team_id)
    .bind(actor_id)
    .bind(paid)
    .bind(actor_id)
    .fetch_all(&state.db.pool)
    .await?;

    let needle = query
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    let matched: Vec<Template> = candidates
        .into_iter()
        .filter(|t| t.visibility.is_listed() && policy::can_view_template(actor, t))
        .filter(|t| needle.as_deref().map_or(true, |n| matches_text(t, n)))
        .collect();

    let mut facets = Facets::default();
    for template in &matched {
        *facets.category.entry(template.category.clone()).or_default() += 1;
        *facets
            .frontend_stack
            .entry(template.frontend_stack.as_str().to_string())
            .or_default() += 1;
    }

    let visible: Vec<Template> = matched
        .into_iter()
        .filter(|t| query.category.as_deref().map_or(true, |c| t.category == c))
        .filter(|t| query.frontend_stack.map_or(true, |s| t.frontend_stack == s))
        .collect();

    Ok(SearchResponse {
        page: Page::from_visible(
            visible,
            Pagination {
                offset: query.offset,
                limit: query.limit,
            },
        ),
        facets,
    })
}

/// Fetch one template and count the view.
pub async fn get_template(state: &AppState, actor: Option<&Actor>, id: &str) -> Result<Template> {
    let not_found = || AppError::NotFound("Template not found".to_string());

    let template = load_template(&state.db.pool, id)
        .await?
        .filter(|t| policy::can_view_template(actor, t))
        .ok_or_else(not_found)?;

    let viewed = sqlx::query_as::<_, Template>(
        r#"
        UPDATE templates SET view_count = view_count + 1
        WHERE id = ? AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(&template.id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(not_found)?;

    Ok(viewed)
}

pub async fn create_template(
    state: &AppState,
    actor: &Actor,
    body: CreateTemplateRequest,
) -> Result<Template> {
    body.validate()?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name", "Template name is required"));
    }

    let visibility = body.visibility.unwrap_or(TemplateVisibility::Private);
    if visibility == TemplateVisibility::Deprecated {
        return Err(AppError::validation("visibility", "new templates cannot be deprecated"));
    }
    if visibility == TemplateVisibility::Team && body.team_id.is_none() {
        return Err(AppError::validation("visibility", "team visibility requires a team_id"));
    }
    if let Some(team_id) = body.team_id.as_deref() {
        if !actor.is_active_member(team_id) {
            return Err(AppError::Forbidden(
                "Templates can only be shared with teams you belong to".into(),
            ));
        }
    }

    let tags = normalize_tags(&body.tags)?;
    let scaffold = body.scaffold.unwrap_or_else(|| serde_json::json!({}));
    check_scaffold(&scaffold)?;

    // Anything offered to the whole catalogue waits for a moderator.
    let is_approved = !visibility.requires_review();
    let base = slug::slugify(name, "template");
    let now = Utc::now();

    let mut tx = state.db.begin_write().await?;
    let mut template = None;
    for attempt in 0..slug::MAX_ATTEMPTS {
        let candidate = slug::candidate(&base, attempt, Suffix::Numeric);
        if slug::is_taken(&mut tx, SlugTable::Templates, &candidate).await? {
            continue;
        }

        let inserted = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (
                id, created_by, team_id, name, slug, description, category, frontend_stack,
                backend_stack, visibility, is_approved, scaffold, tags, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(actor.id())
        .bind(&body.team_id)
        .bind(name)
        .bind(&candidate)
        .bind(&body.description)
        .bind(body.category.trim())
        .bind(body.frontend_stack)
        .bind(body.backend_stack)
        .bind(visibility)
        .bind(is_approved)
        .bind(sqlx::types::Json(&scaffold))
        .bind(sqlx::types::Json(&tags))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(row) => {
                template = Some(row);
                break;
            }
            Err(err) if slug::is_unique_violation(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let template = template
        .ok_or_else(|| AppError::Conflict("Could not allocate a unique template slug".into()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "template.created", "template")
            .team(template.team_id.as_deref())
            .resource(&template.id)
            .detail(serde_json::json!({
                "name": template.name,
                "visibility": template.visibility,
                "is_approved": template.is_approved,
            })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(template_id = %template.id, "template created");
    Ok(template)
}

pub async fn update_template(
    state: &AppState,
    actor: &Actor,
    id: &str,
    body: UpdateTemplateRequest,
) -> Result<Template> {
    body.validate()?;
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::validation("name", "Template name is required"));
    }

    let template = modifiable_template(state, actor, id).await?;

    if body.visibility == Some(TemplateVisibility::Team) && template.team_id.is_none() {
        return Err(AppError::validation(
            "visibility",
            "team visibility requires the template to belong to a team",
        ));
    }
    let tags = body.tags.as_deref().map(normalize_tags).transpose()?;
    if let Some(scaffold) = &body.scaffold {
        check_scaffold(scaffold)?;
    }

    // Moving into the catalogue goes back through moderation unless staff
    // make the change themselves.
    let is_approved = match body.visibility {
        Some(next) if next != template.visibility => {
            if next.requires_review() {
                actor.user.role.is_staff()
            } else if next == TemplateVisibility::Deprecated {
                template.is_approved
            } else {
                true
            }
        }
        _ => template.is_approved,
    };

    let mut tx = state.db.begin_write().await?;
    let updated = sqlx::query_as::<_, Template>(
        r#"
        UPDATE templates
        SET name = COALESCE(?, name),
            description = COALESCE(?, description),
            category = COALESCE(?, category),
            frontend_stack = COALESCE(?, frontend_stack),
            backend_stack = COALESCE(?, backend_stack),
            visibility = COALESCE(?, visibility),
            scaffold = COALESCE(?, scaffold),
            tags = COALESCE(?, tags),
            is_approved = ?,
            updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(body.name.as_deref().map(str::trim))
    .bind(&body.description)
    .bind(body.category.as_deref().map(str::trim))
    .bind(body.frontend_stack)
    .bind(body.backend_stack)
    .bind(body.visibility)
    .bind(body.scaffold.as_ref().map(sqlx::types::Json))
    .bind(tags.as_ref().map(sqlx::types::Json))
    .bind(is_approved)
    .bind(Utc::now())
    .bind(&template.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Template not found".into()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "template.updated", "template")
            .team(updated.team_id.as_deref())
            .resource(&updated.id)
            .detail(serde_json::json!({
                "visibility": updated.visibility,
                "is_approved": updated.is_approved,
            })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(template_id = %updated.id, "template updated");
    Ok(updated)
}

pub async fn delete_template(state: &AppState, actor: &Actor, id: &str) -> Result<()> {
    let template = modifiable_template(state, actor, id).await?;

    let now = Utc::now();
    let mut tx = state.db.begin_write().await?;
    let result = sqlx::query(
        "UPDATE templates SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(&template.id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Template not found".into()));
    }

    activity::record(
        &mut tx,
        NewActivity::new(actor, "template.deleted", "template")
            .team(template.team_id.as_deref())
            .resource(&template.id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(template_id = %template.id, "template deleted");
    Ok(())
}

/// Moderation decision. Approving a template parked as `under_review`
/// publishes it.
pub async fn review_template(
    state: &AppState,
    actor: &Actor,
    id: &str,
    body: ReviewTemplateRequest,
) -> Result<Template> {
    body.validate()?;

    let template = load_template(&state.db.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Template not found".into()))?;
    if !policy::can_review_template(Some(actor)) {
        return Err(if policy::can_view_template(Some(actor), &template) {
            AppError::Forbidden("Only moderators can review templates".into())
        } else {
            AppError::NotFound("Template not found".into())
        });
    }

    let visibility = if body.approved && template.visibility == TemplateVisibility::UnderReview {
        TemplateVisibility::Public
    } else {
        template.visibility
    };

    let mut tx = state.db.begin_write().await?;
    let reviewed = sqlx::query_as::<_, Template>(
        r#"
        UPDATE templates SET is_approved = ?, visibility = ?, updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(body.approved)
    .bind(visibility)
    .bind(Utc::now())
    .bind(&template.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Template not found".into()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "template.reviewed", "template")
            .team(reviewed.team_id.as_deref())
            .resource(&reviewed.id)
            .detail(serde_json::json!({ "approved": body.approved, "reason": body.reason })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(template_id = %reviewed.id, approved = body.approved, "template reviewed");
    Ok(reviewed)
}
