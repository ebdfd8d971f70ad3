//! Teams, membership and the invitation lifecycle.
//!
//! Membership rows move `pending -> active`, `active <-> suspended` and
//! `* -> removed`. Each team has exactly one active owner; the owner role only
//! moves through [`update_member`] as a transfer.

use chrono::{Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::models::{MemberStatus, Project, Team, TeamMember, TeamRole, TeamTier, User},
    error::{AppError, Result},
    policy::{self, Actor},
    services::{
        activity::{self, NewActivity},
        projects,
        slug::{self, SlugTable, Suffix},
    },
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub slug: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub tier: Option<TeamTier>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTeamRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InviteMemberRequest {
    #[validate(email, length(max = 254))]
    pub email: String,
    pub role: TeamRole,
    #[validate(length(max = 500))]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvitationResponse {
    pub member: TeamMember,
    pub invite_link: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: Option<TeamRole>,
    pub status: Option<MemberStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InvitationTokenRequest {
    #[validate(length(min = 1, max = 256))]
    pub token: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MemberView {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub member: TeamMember,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub your_role: Option<TeamRole>,
    pub members: Vec<MemberView>,
    pub projects: Vec<Project>,
}

/// A fresh invitation token and the hash that is stored in its place.
pub(crate) fn new_invitation_token() -> (String, String) {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    let token = hex::encode(bytes);
    let hash = hash_token(&token);
    (token, hash)
}

pub(crate) fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

async fn load_team(pool: &sqlx::SqlitePool, id: &str) -> Result<Option<Team>> {
    let team = sqlx::query_as::<_, Team>("SELECT * FROM live_teams WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(team)
}

async fn visible_team(state: &AppState, actor: &Actor, id: &str) -> Result<Team> {
    load_team(&state.db.pool, id)
        .await?
        .filter(|team| policy::can_view_team(Some(actor), team))
        .ok_or_else(|| AppError::NotFound("Team not found".to_string()))
}

async fn load_member(
    pool: &sqlx::SqlitePool,
    team_id: &str,
    member_id: &str,
) -> Result<TeamMember> {
    sqlx::query_as::<_, TeamMember>(
        "SELECT * FROM team_members WHERE id = ? AND team_id = ? AND status != 'removed'",
    )
    .bind(member_id)
    .bind(team_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Member not found".to_string()))
}

async fn active_member_count(pool: &sqlx::SqlitePool, team_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM team_members WHERE team_id = ? AND status = 'active'",
    )
    .bind(team_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn create_team(state: &AppState, actor: &Actor, body: CreateTeamRequest) -> Result<Team> {
    body.validate()?;
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name", "Team name is required"));
    }

    let tier = body.tier.unwrap_or(TeamTier::Free);
    if tier != TeamTier::Free && !actor.user.has_active_paid_subscription(actor.as_of) {
        return Err(AppError::Forbidden(
            "A paid subscription is required for this team tier".to_string(),
        ));
    }

    let requested = match body.slug.as_deref().map(str::trim) {
        Some(s) if !slug::is_valid(s) => {
            return Err(AppError::validation(
                "slug",
                "use 3-63 lowercase letters, digits and single hyphens",
            ));
        }
        other => other,
    };
    let base = slug::slugify(name, "team");
    let attempts = if requested.is_some() { 1 } else { slug::MAX_ATTEMPTS };

    let now = Utc::now();
    let mut tx = state.db.begin_write().await?;

    let mut team = None;
    for attempt in 0..attempts {
        let candidate = match requested {
            Some(s) => s.to_string(),
            None => slug::candidate(&base, attempt, Suffix::Numeric),
        };
        if slug::is_taken(&mut tx, SlugTable::Teams, &candidate).await? {
            continue;
        }

        let inserted = sqlx::query_as::<_, Team>(
            r#"
            INSERT INTO teams (
                id, name, slug, description, tier, member_limit, project_limit,
                is_active, created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(&candidate)
        .bind(&body.description)
        .bind(tier)
        .bind(tier.member_limit())
        .bind(tier.project_limit())
        .bind(actor.id())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(row) => {
                team = Some(row);
                break;
            }
            Err(err) if slug::is_unique_violation(&err) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    let Some(team) = team else {
        let reason = if requested.is_some() {
            "Team slug is already taken"
        } else {
            "Could not allocate a unique team slug"
        };
        return Err(AppError::Conflict(reason.to_string()));
    };

    sqlx::query(
        r#"
        INSERT INTO team_members (id, team_id, user_id, role, status, joined_at, created_at, updated_at)
        VALUES (?, ?, ?, 'owner', 'active', ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&team.id)
    .bind(actor.id())
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET current_team_id = ? WHERE id = ? AND current_team_id IS NULL")
        .bind(&team.id)
        .bind(actor.id())
        .execute(&mut *tx)
        .await?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.created", "team")
            .team(Some(&team.id))
            .resource(&team.id)
            .detail(serde_json::json!({ "name": team.name, "slug": team.slug, "tier": team.tier })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, slug = %team.slug, "team created");
    Ok(team)
}

pub async fn list_user_teams(state: &AppState, actor: &Actor) -> Result<Vec<Team>> {
    let teams = sqlx::query_as::<_, Team>(
        r#"
        SELECT t.* FROM live_teams t
        JOIN team_members tm ON tm.team_id = t.id
        WHERE tm.user_id = ? AND tm.status = 'active'
        ORDER BY t.name ASC
        "#,
    )
    .bind(actor.id())
    .fetch_all(&state.db.pool)
    .await?;

    Ok(teams
        .into_iter()
        .filter(|team| policy::can_view_team(Some(actor), team))
        .collect())
}

pub async fn get_team(state: &AppState, actor: &Actor, id: &str) -> Result<TeamDetail> {
    let team = visible_team(state, actor, id).await?;

    let members = sqlx::query_as::<_, MemberView>(
        r#"
        SELECT tm.*, u.name AS user_name, u.email AS user_email
        FROM team_members tm
        LEFT JOIN live_users u ON u.id = tm.user_id
        WHERE tm.team_id = ? AND tm.status != 'removed'
        ORDER BY tm.created_at ASC
        "#,
    )
    .bind(&team.id)
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .filter(|m| policy::can_view_member(Some(actor), &team, &m.member))
    .collect();

    let projects = projects::list_team_projects(state, actor, &team.id).await?;

    Ok(TeamDetail {
        your_role: actor.active_role_in(&team.id),
        team,
        members,
        projects,
    })
}

pub async fn update_team(
    state: &AppState,
    actor: &Actor,
    id: &str,
    body: UpdateTeamRequest,
) -> Result<Team> {
    body.validate()?;
    if body.name.is_none() && body.description.is_none() {
        return Err(AppError::validation("body", "nothing to update"));
    }
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::validation("name", "Team name is required"));
    }

    let team = visible_team(state, actor, id).await?;
    if !policy::can_update_team(Some(actor), &team) {
        return Err(AppError::Forbidden("Only team owners and admins can update the team".into()));
    }

    let mut tx = state.db.begin_write().await?;
    let updated = sqlx::query_as::<_, Team>(
        r#"
        UPDATE teams
        SET name = COALESCE(?, name), description = COALESCE(?, description), updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(body.name.as_deref().map(str::trim))
    .bind(&body.description)
    .bind(Utc::now())
    .bind(&team.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Team not found".to_string()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.updated", "team")
            .team(Some(&updated.id))
            .resource(&updated.id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %updated.id, "team updated");
    Ok(updated)
}

pub async fn delete_team(state: &AppState, actor: &Actor, id: &str) -> Result<()> {
    let team = visible_team(state, actor, id).await?;
    if !policy::can_delete_team(Some(actor), &team) {
        return Err(AppError::Forbidden("Only the team owner can delete the team".into()));
    }

    let now = Utc::now();
    let mut tx = state.db.begin_write().await?;
    let result = sqlx::query(
        "UPDATE teams SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(&team.id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Team not found".to_string()));
    }

    sqlx::query("UPDATE users SET current_team_id = NULL WHERE current_team_id = ?")
        .bind(&team.id)
        .execute(&mut *tx)
        .await?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.deleted", "team")
            .team(Some(&team.id))
            .resource(&team.id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, "team deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

pub async fn invite_member(
    state: &AppState,
    actor: &Actor,
    team_id: &str,
    body: InviteMemberRequest,
) -> Result<InvitationResponse> {
    body.validate()?;
    if body.role == TeamRole::Owner {
        return Err(AppError::validation(
            "role",
            "ownership is transferred, not granted by invitation",
        ));
    }

    let team = visible_team(state, actor, team_id).await?;
    if !policy::can_insert_team_member(Some(actor), &team, body.role) {
        return Err(AppError::Forbidden("Only team owners and admins can invite members".into()));
    }

    let email = body.email.trim().to_lowercase();
    let target = sqlx::query_as::<_, User>("SELECT * FROM live_users WHERE lower(email) = ?")
        .bind(&email)
        .fetch_optional(&state.db.pool)
        .await?;

    let existing = sqlx::query_as::<_, TeamMember>(
        r#"
        SELECT * FROM team_members
        WHERE team_id = ? AND (user_id = ? OR lower(invited_email) = ?)
        "#,
    )
    .bind(&team.id)
    .bind(target.as_ref().map(|u| u.id.as_str()))
    .bind(&email)
    .fetch_all(&state.db.pool)
    .await?;

    if existing
        .iter()
        .any(|m| matches!(m.status, MemberStatus::Active | MemberStatus::Suspended))
    {
        return Err(AppError::Conflict("User is already a member of this team".into()));
    }
    if existing.iter().any(|m| m.status == MemberStatus::Pending) {
        return Err(AppError::Conflict("An invitation is already pending for this email".into()));
    }

    let active = active_member_count(&state.db.pool, &team.id).await?;
    if active >= team.member_limit {
        return Err(AppError::Conflict("Team member limit reached".into()));
    }

    let (token, token_hash) = new_invitation_token();
    let now = Utc::now();
    let expires_at = state
        .config
        .invitation_ttl_hours
        .map(|hours| now + Duration::hours(hours));
    let reopened = existing
        .iter()
        .find(|m| m.status == MemberStatus::Removed && m.user_id.is_some());

    let mut tx = state.db.begin_write().await?;
    let member = match reopened {
        Some(row) => {
            sqlx::query_as::<_, TeamMember>(
                r#"
                UPDATE team_members
                SET role = ?, status = 'pending', invited_email = ?, invitation_token_hash = ?,
                    invitation_expires_at = ?, invited_by = ?, invite_message = ?,
                    joined_at = NULL, updated_at = ?
                WHERE id = ? AND status = 'removed'
                RETURNING *
                "#,
            )
            .bind(body.role)
            .bind(&email)
            .bind(&token_hash)
            .bind(expires_at)
            .bind(actor.id())
            .bind(&body.message)
            .bind(now)
            .bind(&row.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::Conflict("Membership changed concurrently".into()))?
        }
        None => {
            sqlx::query_as::<_, TeamMember>(
                r#"
                INSERT INTO team_members (
                    id, team_id, user_id, invited_email, role, status, invitation_token_hash,
                    invitation_expires_at, invited_by, invite_message, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&team.id)
            .bind(target.as_ref().map(|u| u.id.as_str()))
            .bind(&email)
            .bind(body.role)
            .bind(&token_hash)
            .bind(expires_at)
            .bind(actor.id())
            .bind(&body.message)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.member_invited", "team_member")
            .team(Some(&team.id))
            .resource(&member.id)
            .detail(serde_json::json!({ "email": email, "role": member.role })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, member_id = %member.id, "member invited");
    Ok(InvitationResponse {
        invite_link: format!("{}/invite?token={}", state.config.app_base_url, token),
        member,
    })
}

/// The pending invitation behind a token. Unknown, used and expired tokens
/// all look the same to the caller.
async fn pending_invitation(state: &AppState, token: &str) -> Result<(TeamMember, Team)> {
    let not_found = || AppError::NotFound("Invitation not found".to_string());

    let invitation = sqlx::query_as::<_, TeamMember>(
        "SELECT * FROM team_members WHERE invitation_token_hash = ? AND status = 'pending'",
    )
    .bind(hash_token(token))
    .fetch_optional(&state.db.pool)
    .await?;

    let Some(invitation) = invitation else {
        tracing::warn!("invitation token rejected");
        return Err(not_found());
    };
    if invitation
        .invitation_expires_at
        .is_some_and(|expires| expires <= Utc::now())
    {
        tracing::warn!(member_id = %invitation.id, "expired invitation token presented");
        return Err(not_found());
    }

    let team = load_team(&state.db.pool, &invitation.team_id)
        .await?
        .filter(|t| t.is_active)
        .ok_or_else(not_found)?;

    Ok((invitation, team))
}

pub async fn accept_invitation(
    state: &AppState,
    actor: &Actor,
    body: InvitationTokenRequest,
) -> Result<TeamMember> {
    body.validate()?;
    let (invitation, team) = pending_invitation(state, &body.token).await?;
    if !policy::can_respond_to_invitation(Some(actor), &invitation) {
        return Err(AppError::Forbidden("This invitation is for another user".into()));
    }
    if actor.is_active_member(&team.id) {
        return Err(AppError::Conflict("You are already a member of this team".into()));
    }

    let now = Utc::now();
    let mut tx = state.db.begin_write().await?;

    // The member limit is re-checked by the statement that flips the row, so
    // two concurrent acceptances cannot both squeeze past it.
    let accepted = sqlx::query_as::<_, TeamMember>(
        r#"
        UPDATE team_members
        SET status = 'active', user_id = ?, invitation_token_hash = NULL,
            joined_at = ?, updated_at = ?
        WHERE id = ? AND status = 'pending' AND invitation_token_hash = ?
          AND (SELECT COUNT(*) FROM team_members WHERE team_id = ? AND status = 'active')
              < (SELECT member_limit FROM live_teams WHERE id = ?)
        RETURNING *
        "#,
    )
    .bind(actor.id())
    .bind(now)
    .bind(now)
    .bind(&invitation.id)
    .bind(hash_token(&body.token))
    .bind(&team.id)
    .bind(&team.id)
    .fetch_optional(&mut *tx)
    .await;

    let accepted = match accepted {
        Ok(Some(member)) => member,
        Ok(None) => {
            let still_pending = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM team_members WHERE id = ? AND status = 'pending')",
            )
            .bind(&invitation.id)
            .fetch_one(&mut *tx)
            .await?;
            return Err(if still_pending {
                AppError::Conflict("Team member limit reached".into())
            } else {
                AppError::NotFound("Invitation not found".into())
            });
        }
        Err(err) if slug::is_unique_violation(&err) => {
            return Err(AppError::Conflict("You are already a member of this team".into()));
        }
        Err(err) => return Err(err.into()),
    };

    sqlx::query("UPDATE users SET current_team_id = ? WHERE id = ? AND current_team_id IS NULL")
        .bind(&team.id)
        .bind(actor.id())
        .execute(&mut *tx)
        .await?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.member_joined", "team_member")
            .team(Some(&team.id))
            .resource(&accepted.id)
            .detail(serde_json::json!({ "role": accepted.role })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, user_id = %actor.id(), "invitation accepted");
    Ok(accepted)
}

pub async fn decline_invitation(
    state: &AppState,
    actor: &Actor,
    body: InvitationTokenRequest,
) -> Result<()> {
    body.validate()?;
    let (invitation, team) = pending_invitation(state, &body.token).await?;
    if !policy::can_respond_to_invitation(Some(actor), &invitation) {
        return Err(AppError::Forbidden("This invitation is for another user".into()));
    }

    let mut tx = state.db.begin_write().await?;
    let result = sqlx::query("DELETE FROM team_members WHERE id = ? AND status = 'pending'")
        .bind(&invitation.id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Invitation not found".into()));
    }

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.invitation_declined", "team_member")
            .team(Some(&team.id))
            .resource(&invitation.id),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, user_id = %actor.id(), "invitation declined");
    Ok(())
}

// ---------------------------------------------------------------------------
// Member management
// ---------------------------------------------------------------------------

pub async fn update_member(
    state: &AppState,
    actor: &Actor,
    team_id: &str,
    member_id: &str,
    body: UpdateMemberRequest,
) -> Result<TeamMember> {
    if body.role.is_none() && body.status.is_none() {
        return Err(AppError::validation("body", "nothing to update"));
    }
    if matches!(body.status, Some(MemberStatus::Pending | MemberStatus::Removed)) {
        return Err(AppError::validation(
            "status",
            "status can only be set to active or suspended",
        ));
    }

    let team = visible_team(state, actor, team_id).await?;
    let member = load_member(&state.db.pool, &team.id, member_id).await?;
    if !policy::can_update_team_member(Some(actor), &team, &member, body.role) {
        return Err(AppError::Forbidden("You cannot change this member".into()));
    }

    if member.status == MemberStatus::Pending && body.status.is_some() {
        return Err(AppError::validation("status", "the invitation has not been accepted"));
    }

    let is_transfer = body.role == Some(TeamRole::Owner) && member.role != TeamRole::Owner;
    if is_transfer {
        if !member.is_active() || body.status == Some(MemberStatus::Suspended) {
            return Err(AppError::validation(
                "role",
                "ownership can only be transferred to an active member",
            ));
        }
        return transfer_ownership(state, actor, &team, &member).await;
    }

    let demotes_owner = member.role == TeamRole::Owner
        && (body.role.is_some_and(|r| r != TeamRole::Owner)
            || body.status == Some(MemberStatus::Suspended));
    if demotes_owner {
        return Err(AppError::Conflict(
            "The team owner cannot be demoted; transfer ownership first".into(),
        ));
    }

    let mut tx = state.db.begin_write().await?;
    // Reactivating a suspended member counts against the member limit.
    let updated = sqlx::query_as::<_, TeamMember>(
        r#"
        UPDATE team_members
        SET role = COALESCE(?, role), status = COALESCE(?, status), updated_at = ?
        WHERE id = ? AND team_id = ? AND status != 'removed'
          AND (? IS NOT 'active' OR status = 'active'
               OR (SELECT COUNT(*) FROM team_members WHERE team_id = ? AND status = 'active')
                  < (SELECT member_limit FROM live_teams WHERE id = ?))
        RETURNING *
        "#,
    )
    .bind(body.role)
    .bind(body.status)
    .bind(Utc::now())
    .bind(&member.id)
    .bind(&team.id)
    .bind(body.status)
    .bind(&team.id)
    .bind(&team.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("Team member limit reached".into()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.member_updated", "team_member")
            .team(Some(&team.id))
            .resource(&updated.id)
            .detail(serde_json::json!({ "role": updated.role, "status": updated.status })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, member_id = %updated.id, "member updated");
    Ok(updated)
}

/// Hand the owner role to `target`; the current owner becomes an admin.
async fn transfer_ownership(
    state: &AppState,
    actor: &Actor,
    team: &Team,
    target: &TeamMember,
) -> Result<TeamMember> {
    let now = Utc::now();
    let mut tx = state.db.begin_write().await?;

    let demoted = sqlx::query(
        r#"
        UPDATE team_members SET role = 'admin', updated_at = ?
        WHERE team_id = ? AND role = 'owner' AND status = 'active' AND user_id = ?
        "#,
    )
    .bind(now)
    .bind(&team.id)
    .bind(actor.id())
    .execute(&mut *tx)
    .await?;
    if demoted.rows_affected() != 1 {
        return Err(AppError::Forbidden("Only the team owner can transfer ownership".into()));
    }

    let promoted = sqlx::query_as::<_, TeamMember>(
        r#"
        UPDATE team_members SET role = 'owner', updated_at = ?
        WHERE id = ? AND team_id = ? AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(&target.id)
    .bind(&team.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::Conflict("Membership changed concurrently".into()))?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.ownership_transferred", "team_member")
            .team(Some(&team.id))
            .resource(&promoted.id)
            .detail(serde_json::json!({ "from": actor.id(), "to": promoted.user_id })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, member_id = %promoted.id, "ownership transferred");
    Ok(promoted)
}

pub async fn remove_member(
    state: &AppState,
    actor: &Actor,
    team_id: &str,
    member_id: &str,
) -> Result<()> {
    let team = visible_team(state, actor, team_id).await?;
    let member = load_member(&state.db.pool, &team.id, member_id).await?;
    if !policy::can_remove_team_member(Some(actor), &team, &member) {
        return Err(AppError::Forbidden("You cannot remove this member".into()));
    }
    if member.role == TeamRole::Owner {
        return Err(AppError::Conflict(
            "The team owner cannot be removed; transfer ownership first".into(),
        ));
    }

    let mut tx = state.db.begin_write().await?;
    // Pending rows have nothing downstream and are dropped outright.
    let result = if member.status == MemberStatus::Pending {
        sqlx::query("DELETE FROM team_members WHERE id = ? AND status = 'pending'")
            .bind(&member.id)
            .execute(&mut *tx)
            .await?
    } else {
        sqlx::query(
            r#"
            UPDATE team_members
            SET status = 'removed', invitation_token_hash = NULL, updated_at = ?
            WHERE id = ? AND status != 'removed'
            "#,
        )
        .bind(Utc::now())
        .bind(&member.id)
        .execute(&mut *tx)
        .await?
    };
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Member not found".into()));
    }

    if let Some(user_id) = &member.user_id {
        sqlx::query("UPDATE users SET current_team_id = NULL WHERE id = ? AND current_team_id = ?")
            .bind(user_id)
            .bind(&team.id)
            .execute(&mut *tx)
            .await?;
    }

    activity::record(
        &mut tx,
        NewActivity::new(actor, "team.member_removed", "team_member")
            .team(Some(&team.id))
            .resource(&member.id)
            .detail(serde_json::json!({ "user_id": member.user_id, "was": member.status })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(team_id = %team.id, member_id = %member.id, "member removed");
    Ok(())
}
