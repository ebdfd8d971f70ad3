mod common;

use common::*;
use vibe_builder_server::{
    db::models::{CollaboratorRole, ProjectStatus, ProjectVisibility, TeamRole, UserRole},
    error::AppError,
    services::{
        activity::{self, ActivityQuery},
        projects::{
            self, AddCollaboratorRequest, CreateProjectRequest, ProjectQuery, UpdateProjectRequest,
        },
        teams::{self, CreateTeamRequest, InvitationTokenRequest, InviteMemberRequest},
    },
    AppState,
};

fn project_named(name: &str) -> CreateProjectRequest {
    CreateProjectRequest {
        name: name.to_string(),
        description: None,
        team_id: None,
        template_id: None,
        visibility: None,
        is_public: false,
        app_idea: None,
        frontend_stack: None,
        backend_stack: None,
        auth_type: None,
    }
}

async fn team_with_member(
    state: &AppState,
    owner_id: &str,
    member_id: &str,
    role: TeamRole,
) -> String {
    let owner = actor(state, owner_id).await;
    let team = teams::create_team(
        state,
        &owner,
        CreateTeamRequest {
            name: "Acme".into(),
            slug: None,
            description: None,
            tier: None,
        },
    )
    .await
    .unwrap();

    let owner = actor(state, owner_id).await;
    let member = fetch_user(state, member_id).await;
    let invitation = teams::invite_member(
        state,
        &owner,
        &team.id,
        InviteMemberRequest {
            email: member.email.clone(),
            role,
            message: None,
        },
    )
    .await
    .unwrap();
    let joiner = actor(state, member_id).await;
    teams::accept_invitation(
        state,
        &joiner,
        InvitationTokenRequest {
            token: token_from_link(&invitation.invite_link),
        },
    )
    .await
    .unwrap();

    team.id
}

#[tokio::test]
async fn deleted_projects_disappear_for_everyone() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let bob = create_user(state, "Bob").await;

    let alice_actor = actor(state, &alice.id).await;
    let project = projects::create_project(state, &alice_actor, project_named("Habit Tracker"))
        .await
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Draft);

    projects::add_collaborator(
        state,
        &alice_actor,
        &project.id,
        AddCollaboratorRequest {
            email: bob.email.clone(),
            role: CollaboratorRole::Editor,
        },
    )
    .await
    .unwrap();

    let bob_actor = actor(state, &bob.id).await;
    assert!(projects::get_project(state, Some(&bob_actor), &project.id).await.is_ok());

    projects::delete_project(state, &alice_actor, &project.id).await.unwrap();

    let listed = projects::list_projects(state, &alice_actor, ProjectQuery::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 0);
    assert!(listed.items.is_empty());

    for viewer in [Some(&alice_actor), Some(&bob_actor), None] {
        let result = projects::get_project(state, viewer, &project.id).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    // Still in the table for audit.
    assert_eq!(count(state, "SELECT COUNT(*) FROM projects").await, 1);
    assert!(activity_actions(state).await.contains(&"project.deleted".to_string()));
}

#[tokio::test]
async fn projects_only_attach_to_the_creators_teams() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let bob = create_user(state, "Bob").await;
    let mallory = create_user(state, "Mallory").await;

    let team_id = team_with_member(state, &alice.id, &bob.id, TeamRole::Member).await;

    let mallory_actor = actor(state, &mallory.id).await;
    let mut request = project_named("Sneaky");
    request.team_id = Some(team_id.clone());
    let result = projects::create_project(state, &mallory_actor, request).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let bob_actor = actor(state, &bob.id).await;
    let mut request = project_named("Team App");
    request.team_id = Some(team_id.clone());
    request.visibility = Some(ProjectVisibility::Team);
    let project = projects::create_project(state, &bob_actor, request).await.unwrap();
    assert_eq!(project.owner_id, bob.id);
    assert_eq!(project.team_id.as_deref(), Some(team_id.as_str()));

    let mut orphan = project_named("Orphan");
    orphan.visibility = Some(ProjectVisibility::Team);
    let result = projects::create_project(state, &bob_actor, orphan).await;
    assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "visibility"));
}

#[tokio::test]
async fn team_members_see_but_only_managers_modify() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let bob = create_user(state, "Bob").await;
    let carol = create_user(state, "Carol").await;

    let team_id = team_with_member(state, &alice.id, &bob.id, TeamRole::Member).await;

    let carol_actor = actor(state, &carol.id).await;
    let bob_actor = actor(state, &bob.id).await;
    let alice_actor = actor(state, &alice.id).await;

    let mut request = project_named("Shared");
    request.team_id = Some(team_id.clone());
    request.visibility = Some(ProjectVisibility::Team);
    let project = projects::create_project(state, &alice_actor, request).await.unwrap();

    assert!(projects::get_project(state, Some(&bob_actor), &project.id).await.is_ok());
    let hidden = projects::get_project(state, Some(&carol_actor), &project.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound(_))));

    let rename = || UpdateProjectRequest {
        name: Some("Renamed".into()),
        ..Default::default()
    };
    let by_member = projects::update_project(state, &bob_actor, &project.id, rename()).await;
    assert!(matches!(by_member, Err(AppError::Forbidden(_))));
    let by_stranger = projects::update_project(state, &carol_actor, &project.id, rename()).await;
    assert!(matches!(by_stranger, Err(AppError::NotFound(_))));

    let updated = projects::update_project(state, &alice_actor, &project.id, rename())
        .await
        .unwrap();
    assert_eq!(updated.name, "Renamed");

    let by_member = projects::delete_project(state, &bob_actor, &project.id).await;
    assert!(matches!(by_member, Err(AppError::Forbidden(_))));

    let detail = teams::get_team(state, &bob_actor, &team_id).await.unwrap();
    assert_eq!(detail.projects.len(), 1);
}

#[tokio::test]
async fn public_projects_need_both_flags() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let mut showcase = project_named("Showcase");
    showcase.visibility = Some(ProjectVisibility::Public);
    showcase.is_public = true;
    let showcase = projects::create_project(state, &alice_actor, showcase).await.unwrap();

    let mut half_public = project_named("Half");
    half_public.visibility = Some(ProjectVisibility::Public);
    let half_public = projects::create_project(state, &alice_actor, half_public).await.unwrap();

    assert!(projects::get_project(state, None, &showcase.id).await.is_ok());
    let result = projects::get_project(state, None, &half_public.id).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn collaborator_roles_gate_changes() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let viewer = create_user(state, "Viewer").await;
    let editor = create_user(state, "Editor").await;

    let alice_actor = actor(state, &alice.id).await;
    let project = projects::create_project(state, &alice_actor, project_named("Notes"))
        .await
        .unwrap();

    for (user, role) in [(&viewer, CollaboratorRole::Viewer), (&editor, CollaboratorRole::Editor)] {
        projects::add_collaborator(
            state,
            &alice_actor,
            &project.id,
            AddCollaboratorRequest {
                email: user.email.clone(),
                role,
            },
        )
        .await
        .unwrap();
    }

    let viewer_actor = actor(state, &viewer.id).await;
    let editor_actor = actor(state, &editor.id).await;

    let listed = projects::list_collaborators(state, &viewer_actor, &project.id).await.unwrap();
    assert_eq!(listed.len(), 2);

    let start = || UpdateProjectRequest {
        status: Some(ProjectStatus::Generating),
        ..Default::default()
    };
    let by_viewer = projects::update_project(state, &viewer_actor, &project.id, start()).await;
    assert!(matches!(by_viewer, Err(AppError::Forbidden(_))));
    let updated = projects::update_project(state, &editor_actor, &project.id, start())
        .await
        .unwrap();
    assert_eq!(updated.status, ProjectStatus::Generating);

    let add_by_editor = projects::add_collaborator(
        state,
        &editor_actor,
        &project.id,
        AddCollaboratorRequest {
            email: "someone@example.com".into(),
            role: CollaboratorRole::Viewer,
        },
    )
    .await;
    assert!(matches!(add_by_editor, Err(AppError::Forbidden(_))));

    let remove_other =
        projects::remove_collaborator(state, &viewer_actor, &project.id, &editor.id).await;
    assert!(matches!(remove_other, Err(AppError::Forbidden(_))));

    projects::remove_collaborator(state, &viewer_actor, &project.id, &viewer.id)
        .await
        .unwrap();
    let gone = projects::get_project(state, Some(&viewer_actor), &project.id).await;
    assert!(matches!(gone, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn status_moves_forward_only() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let project = projects::create_project(state, &alice_actor, project_named("Flow"))
        .await
        .unwrap();

    let skip = UpdateProjectRequest {
        status: Some(ProjectStatus::Deployed),
        ..Default::default()
    };
    let result = projects::update_project(state, &alice_actor, &project.id, skip).await;
    assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "status"));
}

#[tokio::test]
async fn team_project_limit_is_enforced() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let bob = create_user(state, "Bob").await;
    let team_id = team_with_member(state, &alice.id, &bob.id, TeamRole::Member).await;

    sqlx::query("UPDATE teams SET project_limit = 1 WHERE id = ?")
        .bind(&team_id)
        .execute(&state.db.pool)
        .await
        .unwrap();

    let alice_actor = actor(state, &alice.id).await;
    let mut first = project_named("One");
    first.team_id = Some(team_id.clone());
    projects::create_project(state, &alice_actor, first).await.unwrap();

    let mut second = project_named("Two");
    second.team_id = Some(team_id.clone());
    let result = projects::create_project(state, &alice_actor, second).await;
    assert!(matches!(result, Err(AppError::QuotaExceeded { limit: 1, current: 1 })));

    // Personal projects are not counted against the team.
    assert!(projects::create_project(state, &alice_actor, project_named("Mine")).await.is_ok());
}

#[tokio::test]
async fn same_name_projects_get_distinct_slugs() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let first = projects::create_project(state, &alice_actor, project_named("Todo App"))
        .await
        .unwrap();
    let second = projects::create_project(state, &alice_actor, project_named("Todo App"))
        .await
        .unwrap();

    assert_eq!(first.slug, "todo-app");
    assert_ne!(first.slug, second.slug);
    assert!(second.slug.starts_with("todo-app-"));
}

#[tokio::test]
async fn listing_filters_and_pages() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    for i in 0..5 {
        projects::create_project(state, &alice_actor, project_named(&format!("App {i}")))
            .await
            .unwrap();
    }

    let page = projects::list_projects(
        state,
        &alice_actor,
        ProjectQuery {
            limit: Some(2),
            offset: Some(4),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 1);

    let generated = projects::list_projects(
        state,
        &alice_actor,
        ProjectQuery {
            status: Some(ProjectStatus::Generated),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(generated.total, 0);
}

async fn visible_activity(state: &AppState, user_id: &str) -> i64 {
    let viewer = actor(state, user_id).await;
    activity::list(state, &viewer, ActivityQuery::default())
        .await
        .unwrap()
        .total
}

#[tokio::test]
async fn activity_is_shared_with_team_members_only() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let bob = create_user(state, "Bob").await;
    let carol = create_user(state, "Carol").await;
    team_with_member(state, &alice.id, &bob.id, TeamRole::Member).await;

    let alice_actor = actor(state, &alice.id).await;
    projects::create_project(state, &alice_actor, project_named("Personal"))
        .await
        .unwrap();

    assert_eq!(visible_activity(state, &alice.id).await, 4);
    assert_eq!(visible_activity(state, &bob.id).await, 3);
    assert_eq!(visible_activity(state, &carol.id).await, 0);

    set_role(state, &carol.id, UserRole::Admin).await;
    assert_eq!(visible_activity(state, &carol.id).await, 4);

    let bob_actor = actor(state, &bob.id).await;
    let by_alice = activity::list(
        state,
        &bob_actor,
        ActivityQuery {
            actor_user_id: Some(alice.id.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_alice.total, 2);
    assert!(by_alice.items.iter().all(|log| log.action.starts_with("team.")));
}
