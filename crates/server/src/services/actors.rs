use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    db::models::{SubscriptionTier, TeamMember, User, UserRole},
    error::{AppError, Result},
    policy::Actor,
    services::activity::{self, NewActivity},
    AppState,
};

/// Snapshot the caller: the live user row plus memberships in live, active
/// teams. `None` when the user is unknown, deactivated or soft-deleted.
pub async fn load_actor(pool: &sqlx::SqlitePool, user_id: &str) -> Result<Option<Actor>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM live_users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    let Some(user) = user.filter(User::is_live) else {
        return Ok(None);
    };

    let memberships = sqlx::query_as::<_, TeamMember>(
        r#"
        SELECT tm.* FROM team_members tm
        JOIN live_teams t ON t.id = tm.team_id
        WHERE tm.user_id = ? AND t.is_active = 1
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(Actor::new(user, memberships)))
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub subscription_tier: SubscriptionTier,
    pub effective_tier: SubscriptionTier,
    pub current_team_id: Option<String>,
    pub usage: UsageResponse,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub monthly_generations: i64,
    /// `None` means unlimited.
    pub monthly_limit: Option<i64>,
    pub total_generations: i64,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        let now = Utc::now();
        let effective_tier = user.effective_tier(now);
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
            role: user.role,
            subscription_tier: user.subscription_tier,
            effective_tier,
            current_team_id: user.current_team_id.clone(),
            usage: UsageResponse {
                monthly_generations: user.generations_this_period(now),
                monthly_limit: effective_tier.monthly_generation_limit(),
                total_generations: user.total_generations,
            },
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(url, length(max = 2048))]
    pub avatar_url: Option<String>,
}

pub async fn update_profile(
    state: &AppState,
    actor: &Actor,
    body: UpdateProfileRequest,
) -> Result<ProfileResponse> {
    body.validate()?;
    if body.name.is_none() && body.avatar_url.is_none() {
        return Err(AppError::validation("body", "nothing to update"));
    }

    let mut tx = state.db.begin_write().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET name = COALESCE(?, name),
            avatar_url = COALESCE(?, avatar_url),
            updated_at = ?
        WHERE id = ? AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(body.name.as_deref().map(str::trim))
    .bind(&body.avatar_url)
    .bind(Utc::now())
    .bind(actor.id())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::Unauthorized)?;

    activity::record(
        &mut tx,
        NewActivity::new(actor, "user.profile_updated", "user").resource(actor.id()),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "profile updated");
    Ok(ProfileResponse::from(&user))
}
