use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    ProMonthly,
    ProYearly,
    TeamMonthly,
    TeamYearly,
    Enterprise,
    Suspended,
    Churned,
}

/// Monthly scaffold generations for a tier. `None` means unlimited.
pub type GenerationLimit = Option<i64>;

impl SubscriptionTier {
    pub fn is_paid(self) -> bool {
        matches!(
            self,
            Self::ProMonthly | Self::ProYearly | Self::TeamMonthly | Self::TeamYearly | Self::Enterprise
        )
    }

    pub fn monthly_generation_limit(self) -> GenerationLimit {
        match self {
            Self::Free => Some(3),
            Self::ProMonthly | Self::ProYearly => Some(50),
            Self::TeamMonthly | Self::TeamYearly => Some(200),
            Self::Enterprise => None,
            Self::Suspended | Self::Churned => Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Moderator,
    Admin,
    SuperAdmin,
}

impl UserRole {
    /// Moderator and above.
    pub fn is_staff(self) -> bool {
        !matches!(self, Self::User)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_url: Option<String>,
    pub subscription_tier: SubscriptionTier,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub role: UserRole,
    pub is_active: bool,
    pub current_team_id: Option<String>,
    pub monthly_generations: i64,
    pub usage_period: String,
    pub total_generations: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_live(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    /// The tier that actually applies right now: an expired paid tier falls back to free.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> SubscriptionTier {
        match self.subscription_expires_at {
            Some(expires) if self.subscription_tier.is_paid() && expires <= now => {
                SubscriptionTier::Free
            }
            _ => self.subscription_tier,
        }
    }

    pub fn has_active_paid_subscription(&self, now: DateTime<Utc>) -> bool {
        self.effective_tier(now).is_paid()
    }

    /// Generations used in the current period; a stale period counts as zero.
    pub fn generations_this_period(&self, now: DateTime<Utc>) -> i64 {
        if self.usage_period == usage_period(now) {
            self.monthly_generations
        } else {
            0
        }
    }
}

/// Calendar month key used to reset monthly counters, e.g. `2026-10`.
pub fn usage_period(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TeamTier {
    Free,
    Pro,
    Enterprise,
}

impl TeamTier {
    pub fn member_limit(self) -> i64 {
        match self {
            Self::Free => 5,
            Self::Pro => 25,
            Self::Enterprise => 500,
        }
    }

    pub fn project_limit(self) -> i64 {
        match self {
            Self::Free => 10,
            Self::Pro => 100,
            Self::Enterprise => 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub tier: TeamTier,
    pub member_limit: i64,
    pub project_limit: i64,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TeamRole {
    Owner,
    Admin,
    Member,
    Guest,
}

impl TeamRole {
    pub fn is_manager(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MemberStatus {
    Pending,
    Active,
    Suspended,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamMember {
    pub id: String,
    pub team_id: String,
    pub user_id: Option<String>,
    pub invited_email: Option<String>,
    pub role: TeamRole,
    pub status: MemberStatus,
    #[serde(skip_serializing)]
    pub invitation_token_hash: Option<String>,
    pub invitation_expires_at: Option<DateTime<Utc>>,
    pub invited_by: Option<String>,
    pub invite_message: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProjectVisibility {
    Private,
    Team,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Generating,
    Generated,
    Failed,
    Exported,
    Deployed,
}

impl ProjectStatus {
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, next),
            (Draft, Generating)
                | (Generating, Generated)
                | (Generating, Failed)
                | (Failed, Generating)
                | (Generated, Exported)
                | (Generated, Deployed)
                | (Exported, Deployed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FrontendStack {
    React,
    Vue,
    Svelte,
    Nextjs,
    Angular,
}

impl FrontendStack {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Vue => "vue",
            Self::Svelte => "svelte",
            Self::Nextjs => "nextjs",
            Self::Angular => "angular",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BackendStack {
    Supabase,
    NodeExpress,
    PythonFastapi,
    Firebase,
}

impl BackendStack {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supabase => "supabase",
            Self::NodeExpress => "node_express",
            Self::PythonFastapi => "python_fastapi",
            Self::Firebase => "firebase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AuthType {
    EmailPassword,
    Oauth,
    MagicLink,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub team_id: Option<String>,
    pub template_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub app_idea: Option<String>,
    pub frontend_stack: Option<FrontendStack>,
    pub backend_stack: Option<BackendStack>,
    pub auth_type: Option<AuthType>,
    pub visibility: ProjectVisibility,
    pub is_public: bool,
    pub status: ProjectStatus,
    pub scaffold: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CollaboratorRole {
    Owner,
    Editor,
    Viewer,
    Commenter,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectCollaborator {
    pub project_id: String,
    pub user_id: String,
    pub role: CollaboratorRole,
    pub status: MemberStatus,
    pub invited_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TemplateVisibility {
    Public,
    Premium,
    Team,
    Private,
    Unlisted,
    Deprecated,
    UnderReview,
}

impl TemplateVisibility {
    /// Visibilities that go through moderation before anyone but the creator sees them.
    pub fn requires_review(self) -> bool {
        matches!(self, Self::Public | Self::Premium | Self::UnderReview)
    }

    /// Reachable by id but never returned from search.
    pub fn is_listed(self) -> bool {
        !matches!(self, Self::Unlisted | Self::Deprecated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: String,
    pub created_by: String,
    pub team_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub category: String,
    pub frontend_stack: FrontendStack,
    pub backend_stack: Option<BackendStack>,
    pub visibility: TemplateVisibility,
    pub is_approved: bool,
    pub scaffold: sqlx::types::Json<serde_json::Value>,
    pub tags: sqlx::types::Json<Vec<String>>,
    pub view_count: i64,
    pub use_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: String,
    pub actor_user_id: Option<String>,
    pub team_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub detail: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
