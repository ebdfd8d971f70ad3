//! URL-safe slugs for teams, templates and projects.
//!
//! The partial unique indexes on `slug` (live rows only) are the final word on
//! uniqueness; [`is_taken`] only lets the insert loops skip candidates that are
//! known to collide.

use rand::{distributions::Alphanumeric, Rng};
use sqlx::SqliteConnection;

pub const MAX_ATTEMPTS: u32 = 20;
const MAX_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    /// `name`, `name-2`, `name-3`, ...
    Numeric,
    /// `name`, `name-x7k2q9`, ...
    Random,
}

#[derive(Debug, Clone, Copy)]
pub enum SlugTable {
    Teams,
    Templates,
    Projects,
}

impl SlugTable {
    fn live_view(self) -> &'static str {
        match self {
            Self::Teams => "live_teams",
            Self::Templates => "live_templates",
            Self::Projects => "live_projects",
        }
    }
}

/// Lower-case, collapse every run of non-alphanumerics into one hyphen, trim
/// hyphens from both ends. Falls back to `fallback` when nothing is left.
pub fn slugify(name: &str, fallback: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.len() > MAX_LEN {
        slug.truncate(MAX_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

/// The `attempt`-th candidate for `base`; attempt 0 is the base itself.
pub fn candidate(base: &str, attempt: u32, suffix: Suffix) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    match suffix {
        Suffix::Numeric => format!("{base}-{}", attempt + 1),
        Suffix::Random => {
            let tag: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(|c| (c as char).to_ascii_lowercase())
                .collect();
            format!("{base}-{tag}")
        }
    }
}

/// Shape check for caller-supplied slugs.
pub fn is_valid(slug: &str) -> bool {
    (3..=63).contains(&slug.len())
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub async fn is_taken(
    conn: &mut SqliteConnection,
    table: SlugTable,
    slug: &str,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE slug = ?)",
        table.live_view()
    );
    sqlx::query_scalar::<_, bool>(&sql)
        .bind(slug)
        .fetch_one(conn)
        .await
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
