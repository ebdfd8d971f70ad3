//! Monthly scaffold-generation quota.
//!
//! [`check`] turns callers away before the generator is called. The charge
//! itself is [`consume`]: one conditional `UPDATE` that runs inside the
//! transaction storing the generated project, so a generation is counted
//! exactly when its project commits. Concurrent requests at the limit race
//! on that single statement and at most `limit` of them get through.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    db::models::{usage_period, GenerationLimit, User},
    error::{AppError, Result},
};

/// Usage after a successful charge.
#[derive(Debug, Clone)]
pub struct Usage {
    pub period: String,
    pub used: i64,
}

fn ceiling(limit: GenerationLimit) -> i64 {
    limit.unwrap_or(i64::MAX)
}

async fn exceeded(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: GenerationLimit,
    now: DateTime<Utc>,
) -> AppError {
    let user = sqlx::query_as::<_, User>("SELECT * FROM live_users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(conn)
        .await;

    match user {
        Ok(Some(user)) => AppError::QuotaExceeded {
            limit: ceiling(limit),
            current: user.generations_this_period(now),
        },
        Ok(None) => AppError::Unauthorized,
        Err(err) => err.into(),
    }
}

/// Refuse early when the period's allowance is already used up.
pub async fn check(
    pool: &SqlitePool,
    user_id: &str,
    limit: GenerationLimit,
    now: DateTime<Utc>,
) -> Result<()> {
    let used = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT CASE WHEN usage_period = ? THEN monthly_generations ELSE 0 END
        FROM live_users WHERE id = ?
        "#,
    )
    .bind(usage_period(now))
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    if used >= ceiling(limit) {
        return Err(AppError::QuotaExceeded {
            limit: ceiling(limit),
            current: used,
        });
    }
    Ok(())
}

/// Charge one generation against the caller's monthly and lifetime
/// counters. Resets the monthly counter when the stored period is stale.
pub async fn consume(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: GenerationLimit,
    now: DateTime<Utc>,
) -> Result<Usage> {
    let period = usage_period(now);

    let used = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE users
        SET monthly_generations =
                CASE WHEN usage_period = ? THEN monthly_generations + 1 ELSE 1 END,
            total_generations = total_generations + 1,
            usage_period = ?,
            updated_at = ?
        WHERE id = ?
          AND deleted_at IS NULL
          AND (CASE WHEN usage_period = ? THEN monthly_generations ELSE 0 END) < ?
        RETURNING monthly_generations
        "#,
    )
    .bind(&period)
    .bind(&period)
    .bind(now)
    .bind(user_id)
    .bind(&period)
    .bind(ceiling(limit))
    .fetch_optional(&mut *conn)
    .await?;

    match used {
        Some(used) => Ok(Usage { period, used }),
        None => Err(exceeded(conn, user_id, limit, now).await),
    }
}
