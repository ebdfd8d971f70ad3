//! Access-policy evaluator.
//!
//! Every authorization decision in the service is made here. Each predicate is
//! a pure function of an actor snapshot, the target row and (where relevant)
//! the grant row linking the two. Handlers load those snapshots, call exactly
//! one predicate per operation and translate a denial into `NotFound` or
//! `Forbidden`.
//!
//! Anonymous callers are `None`. An actor whose account is inactive or
//! soft-deleted is treated exactly like an anonymous caller.

use chrono::{DateTime, Utc};

use crate::db::models::{
    ActivityLog, CollaboratorRole, MemberStatus, Project, ProjectCollaborator, ProjectVisibility,
    Team, TeamMember, TeamRole, Template, TemplateVisibility, User,
};

/// A resolved caller: the user row plus every membership row for live teams,
/// captured at `as_of`.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub memberships: Vec<TeamMember>,
    pub as_of: DateTime<Utc>,
}

impl Actor {
    pub fn new(user: User, memberships: Vec<TeamMember>) -> Self {
        Self {
            user,
            memberships,
            as_of: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn is_live(&self) -> bool {
        self.user.is_live()
    }

    /// The actor's role in a team, if their membership there is active.
    pub fn active_role_in(&self, team_id: &str) -> Option<TeamRole> {
        self.memberships
            .iter()
            .find(|m| {
                m.team_id == team_id
                    && m.user_id.as_deref() == Some(self.user.id.as_str())
                    && m.status == MemberStatus::Active
            })
            .map(|m| m.role)
    }

    pub fn is_active_member(&self, team_id: &str) -> bool {
        self.active_role_in(team_id).is_some()
    }

    pub fn manages_team(&self, team_id: &str) -> bool {
        self.active_role_in(team_id).is_some_and(TeamRole::is_manager)
    }

    pub fn owns_team(&self, team_id: &str) -> bool {
        self.active_role_in(team_id) == Some(TeamRole::Owner)
    }
}

fn live(actor: Option<&Actor>) -> Option<&Actor> {
    actor.filter(|a| a.is_live())
}

/// The grant only counts if it is this actor's, on this project, and active.
fn active_grant<'a>(
    actor: &Actor,
    project: &Project,
    grant: Option<&'a ProjectCollaborator>,
) -> Option<&'a ProjectCollaborator> {
    grant.filter(|g| {
        g.user_id == actor.id() && g.project_id == project.id && g.status == MemberStatus::Active
    })
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

pub fn can_view_project(
    actor: Option<&Actor>,
    project: &Project,
    grant: Option<&ProjectCollaborator>,
) -> bool {
    if project.deleted_at.is_some() {
        return false;
    }
    if project.visibility == ProjectVisibility::Public && project.is_public {
        return true;
    }
    let Some(actor) = live(actor) else {
        return false;
    };

    actor.id() == project.owner_id
        || project
            .team_id
            .as_deref()
            .is_some_and(|team_id| actor.is_active_member(team_id))
        || active_grant(actor, project, grant).is_some()
}

/// Update and delete. Team members, guests, viewers and commenters never qualify.
pub fn can_modify_project(
    actor: Option<&Actor>,
    project: &Project,
    grant: Option<&ProjectCollaborator>,
) -> bool {
    if project.deleted_at.is_some() {
        return false;
    }
    let Some(actor) = live(actor) else {
        return false;
    };

    actor.id() == project.owner_id
        || project
            .team_id
            .as_deref()
            .is_some_and(|team_id| actor.manages_team(team_id))
        || active_grant(actor, project, grant)
            .is_some_and(|g| matches!(g.role, CollaboratorRole::Owner | CollaboratorRole::Editor))
}

/// A new project must be owned by its creator and may only be attached to a
/// team the creator actively belongs to.
pub fn can_insert_project(actor: Option<&Actor>, owner_id: &str, team_id: Option<&str>) -> bool {
    let Some(actor) = live(actor) else {
        return false;
    };

    actor.id() == owner_id && team_id.map_or(true, |team_id| actor.is_active_member(team_id))
}

pub fn can_manage_collaborators(
    actor: Option<&Actor>,
    project: &Project,
    grant: Option<&ProjectCollaborator>,
) -> bool {
    if project.deleted_at.is_some() {
        return false;
    }
    let Some(actor) = live(actor) else {
        return false;
    };

    actor.id() == project.owner_id
        || project
            .team_id
            .as_deref()
            .is_some_and(|team_id| actor.manages_team(team_id))
        || active_grant(actor, project, grant).is_some_and(|g| g.role == CollaboratorRole::Owner)
}

/// Collaborators may always drop themselves from a project.
pub fn can_remove_collaborator(
    actor: Option<&Actor>,
    project: &Project,
    grant: Option<&ProjectCollaborator>,
    target_user_id: &str,
) -> bool {
    if project.deleted_at.is_some() {
        return false;
    }
    live(actor).is_some_and(|a| a.id() == target_user_id)
        || can_manage_collaborators(actor, project, grant)
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

pub fn can_view_template(actor: Option<&Actor>, template: &Template) -> bool {
    if template.deleted_at.is_some() {
        return false;
    }
    let actor = live(actor);

    // Creators may always preview their own work, approved or not.
    if actor.is_some_and(|a| a.id() == template.created_by) {
        return true;
    }
    if !template.is_approved {
        return false;
    }

    match template.visibility {
        TemplateVisibility::Public
        | TemplateVisibility::Unlisted
        | TemplateVisibility::Deprecated => true,
        TemplateVisibility::Premium => {
            actor.is_some_and(|a| a.user.has_active_paid_subscription(a.as_of))
        }
        TemplateVisibility::Team => match (actor, template.team_id.as_deref()) {
            (Some(actor), Some(team_id)) => actor.is_active_member(team_id),
            _ => false,
        },
        TemplateVisibility::Private | TemplateVisibility::UnderReview => false,
    }
}

pub fn can_modify_template(actor: Option<&Actor>, template: &Template) -> bool {
    if template.deleted_at.is_some() {
        return false;
    }
    let Some(actor) = live(actor) else {
        return false;
    };

    actor.id() == template.created_by
        || template
            .team_id
            .as_deref()
            .is_some_and(|team_id| actor.manages_team(team_id))
        || actor.user.role.is_staff()
}

/// Moderation queue access: approve or reject any template.
pub fn can_review_template(actor: Option<&Actor>) -> bool {
    live(actor).is_some_and(|a| a.user.role.is_staff())
}

// ---------------------------------------------------------------------------
// Teams and membership
// ---------------------------------------------------------------------------

pub fn can_view_team(actor: Option<&Actor>, team: &Team) -> bool {
    if team.deleted_at.is_some() {
        return false;
    }
    live(actor).is_some_and(|a| a.is_active_member(&team.id))
}

pub fn can_update_team(actor: Option<&Actor>, team: &Team) -> bool {
    team.deleted_at.is_none() && live(actor).is_some_and(|a| a.manages_team(&team.id))
}

pub fn can_delete_team(actor: Option<&Actor>, team: &Team) -> bool {
    team.deleted_at.is_none() && live(actor).is_some_and(|a| a.owns_team(&team.id))
}

/// Managers see pending invitations and suspended members; everyone else
/// sees only active members.
pub fn can_view_member(actor: Option<&Actor>, team: &Team, member: &TeamMember) -> bool {
    if member.team_id != team.id || !can_view_team(actor, team) {
        return false;
    }
    member.status == MemberStatus::Active
        || live(actor).is_some_and(|a| a.manages_team(&team.id))
}

/// Issuing an invitation. The owner role is never handed out by invite;
/// ownership only moves through a transfer.
pub fn can_insert_team_member(actor: Option<&Actor>, team: &Team, target_role: TeamRole) -> bool {
    if team.deleted_at.is_some() || !team.is_active || target_role == TeamRole::Owner {
        return false;
    }
    live(actor).is_some_and(|a| a.manages_team(&team.id))
}

/// Changing a member's role or status. Only an owner may touch an owner row
/// or hand the owner role to someone else.
pub fn can_update_team_member(
    actor: Option<&Actor>,
    team: &Team,
    target: &TeamMember,
    new_role: Option<TeamRole>,
) -> bool {
    if team.deleted_at.is_some() || target.team_id != team.id {
        return false;
    }
    let Some(actor) = live(actor) else {
        return false;
    };
    if !actor.manages_team(&team.id) {
        return false;
    }

    let touches_owner = target.role == TeamRole::Owner || new_role == Some(TeamRole::Owner);
    !touches_owner || actor.owns_team(&team.id)
}

/// Removing a member or cancelling an invitation. Anyone may remove
/// themselves; otherwise the rules of [`can_update_team_member`] apply.
pub fn can_remove_team_member(actor: Option<&Actor>, team: &Team, target: &TeamMember) -> bool {
    if team.deleted_at.is_some() || target.team_id != team.id {
        return false;
    }
    let Some(actor) = live(actor) else {
        return false;
    };
    if target.user_id.as_deref() == Some(actor.id()) {
        return true;
    }

    actor.manages_team(&team.id)
        && (target.role != TeamRole::Owner || actor.owns_team(&team.id))
}

/// Accepting or declining a pending invitation. When the invitation names a
/// user, only that user may answer it.
pub fn can_respond_to_invitation(actor: Option<&Actor>, invitation: &TeamMember) -> bool {
    if invitation.status != MemberStatus::Pending {
        return false;
    }
    let Some(actor) = live(actor) else {
        return false;
    };

    invitation
        .user_id
        .as_deref()
        .map_or(true, |target| target == actor.id())
}

// ---------------------------------------------------------------------------
// Activity log
// ---------------------------------------------------------------------------

pub fn can_read_activity_log(actor: Option<&Actor>, log: &ActivityLog) -> bool {
    let Some(actor) = live(actor) else {
        return false;
    };

    log.actor_user_id.as_deref() == Some(actor.id())
        || log
            .team_id
            .as_deref()
            .is_some_and(|team_id| actor.is_active_member(team_id))
        || actor.user.role.is_admin()
}
