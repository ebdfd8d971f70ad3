mod common;

use chrono::{Duration, Utc};
use common::*;
use futures::future::join_all;
use vibe_builder_server::{
    db::models::{
        BackendStack, FrontendStack, ProjectStatus, SubscriptionTier, TemplateVisibility,
    },
    error::AppError,
    services::{
        scaffold::{self, GenerateScaffoldRequest, SECTIONS},
        teams::{self, CreateTeamRequest},
        templates::{self, CreateTemplateRequest},
    },
};

fn idea(text: &str) -> GenerateScaffoldRequest {
    GenerateScaffoldRequest {
        app_idea: text.to_string(),
        project_name: None,
        frontend_stack: FrontendStack::React,
        backend_stack: None,
        auth_type: None,
        template_id: None,
        team_id: None,
        visibility: None,
    }
}

#[tokio::test]
async fn generation_persists_a_project_and_charges_once() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let response = scaffold::generate(state, &alice_actor, idea("A habit tracker for runners"))
        .await
        .unwrap();

    assert_eq!(response.project.status, ProjectStatus::Generated);
    assert_eq!(response.project.owner_id, alice.id);
    assert_eq!(response.project.backend_stack, Some(BackendStack::Supabase));
    assert!(response.defaulted.is_empty());
    assert_eq!(response.usage.monthly_generations, 1);
    assert_eq!(response.usage.monthly_limit, Some(3));
    assert_eq!(response.scaffold["apiEndpoints"][0]["path"], "/api/habits");

    let user = fetch_user(state, &alice.id).await;
    assert_eq!(user.monthly_generations, 1);
    assert_eq!(user.total_generations, 1);
    assert_eq!(app.generator.calls(), 1);

    let actions = activity_actions(state).await;
    assert_eq!(actions, vec!["project.generated".to_string()]);
}

#[tokio::test]
async fn free_tier_at_its_limit_is_refused_before_generating() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    set_generations_this_month(state, &alice.id, 3).await;
    let alice_actor = actor(state, &alice.id).await;

    let result = scaffold::generate(state, &alice_actor, idea("Yet another todo app")).await;
    assert!(matches!(result, Err(AppError::QuotaExceeded { limit: 3, current: 3 })));

    assert_eq!(app.generator.calls(), 0);
    assert_eq!(count(state, "SELECT COUNT(*) FROM projects").await, 0);
    let user = fetch_user(state, &alice.id).await;
    assert_eq!(user.monthly_generations, 3);
    assert_eq!(user.total_generations, 0);
}

#[tokio::test]
async fn concurrent_requests_never_exceed_the_quota() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    set_generations_this_month(state, &alice.id, 1).await;
    let alice_actor = actor(state, &alice.id).await;

    let attempts = (0..5).map(|i| {
        let alice_actor = &alice_actor;
        async move {
            scaffold::generate(state, alice_actor, idea(&format!("App number {i}"))).await
        }
    });
    let results = join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::QuotaExceeded { limit: 3, .. })))
        .count();
    assert_eq!(succeeded, 2);
    assert_eq!(refused, 3);

    let user = fetch_user(state, &alice.id).await;
    assert_eq!(user.monthly_generations, 3);
    assert_eq!(user.total_generations, 2);
    assert_eq!(count(state, "SELECT COUNT(*) FROM projects").await, 2);
}

#[tokio::test]
async fn parallel_generations_on_a_shared_database_respect_the_quota() {
    let app = setup_on_disk().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    set_generations_this_month(state, &alice.id, 1).await;
    let alice_actor = actor(state, &alice.id).await;

    let attempts = (0..5).map(|i| {
        let alice_actor = &alice_actor;
        async move {
            scaffold::generate(state, alice_actor, idea(&format!("Shared app {i}"))).await
        }
    });
    let results = join_all(attempts).await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::QuotaExceeded { limit: 3, current: 3 })))
        .count();
    assert_eq!(succeeded, 2);
    assert_eq!(refused, 3);

    let user = fetch_user(state, &alice.id).await;
    assert_eq!(user.monthly_generations, 3);
    assert_eq!(user.total_generations, 2);
    assert_eq!(count(state, "SELECT COUNT(*) FROM projects").await, 2);
}

#[tokio::test]
async fn usage_is_only_charged_when_the_project_is_stored() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let team = teams::create_team(
        state,
        &alice_actor,
        CreateTeamRequest {
            name: "Full House".into(),
            slug: None,
            description: None,
            tier: None,
        },
    )
    .await
    .unwrap();
    sqlx::query("UPDATE teams SET project_limit = 0 WHERE id = ?")
        .bind(&team.id)
        .execute(&state.db.pool)
        .await
        .unwrap();

    // Reload so the new membership is part of the actor.
    let alice_actor = actor(state, &alice.id).await;
    let mut request = idea("Team dashboard");
    request.team_id = Some(team.id.clone());
    let result = scaffold::generate(state, &alice_actor, request).await;
    assert!(matches!(result, Err(AppError::QuotaExceeded { limit: 0, current: 0 })));

    // The generator ran, but the charge rolled back with the project insert.
    assert_eq!(app.generator.calls(), 1);
    let user = fetch_user(state, &alice.id).await;
    assert_eq!(user.monthly_generations, 0);
    assert_eq!(user.total_generations, 0);
    assert_eq!(count(state, "SELECT COUNT(*) FROM projects").await, 0);
    assert_eq!(activity_actions(state).await, vec!["team.created".to_string()]);
}

#[tokio::test]
async fn malformed_output_falls_back_to_defaults() {
    let app = setup_with(Behaviour::Reply("Sorry, I cannot help with that.".into())).await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let response = scaffold::generate(state, &alice_actor, idea("Recipe sharing site"))
        .await
        .unwrap();

    assert_eq!(response.defaulted.len(), SECTIONS.len());
    for (key, _) in SECTIONS {
        assert!(response.scaffold.get(key).is_some(), "missing {key}");
    }

    let stored = count(
        state,
        "SELECT COUNT(*) FROM projects WHERE status = 'generated' AND scaffold IS NOT NULL",
    )
    .await;
    assert_eq!(stored, 1);
    assert_eq!(fetch_user(state, &alice.id).await.monthly_generations, 1);
}

#[tokio::test]
async fn partial_output_only_defaults_missing_sections() {
    let app = setup_with(Behaviour::Reply(
        r#"Here you go: {"project_structure": {"src": {}}, "apiEndpoints": []} Enjoy!"#.into(),
    ))
    .await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let response = scaffold::generate(state, &alice_actor, idea("Event planner"))
        .await
        .unwrap();

    assert_eq!(response.defaulted.len(), SECTIONS.len() - 2);
    assert!(!response.defaulted.contains(&"projectStructure"));
    assert!(!response.defaulted.contains(&"apiEndpoints"));
}

#[tokio::test]
async fn timeouts_are_transient_and_free() {
    let app = setup_with(Behaviour::Hang).await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let result = scaffold::generate(state, &alice_actor, idea("Slow app")).await;
    assert!(matches!(result, Err(AppError::Transient(_))));

    assert_eq!(fetch_user(state, &alice.id).await.monthly_generations, 0);
    assert_eq!(count(state, "SELECT COUNT(*) FROM projects").await, 0);
}

#[tokio::test]
async fn unavailable_generator_is_transient_and_free() {
    let app = setup_with(Behaviour::Unavailable).await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    set_generations_this_month(state, &alice.id, 2).await;
    let alice_actor = actor(state, &alice.id).await;

    let result = scaffold::generate(state, &alice_actor, idea("Flaky app")).await;
    assert!(matches!(result, Err(AppError::Transient(_))));
    assert_eq!(fetch_user(state, &alice.id).await.monthly_generations, 2);
}

#[tokio::test]
async fn missing_credentials_are_a_configuration_error() {
    let app = setup_with(Behaviour::NotConfigured).await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let result = scaffold::generate(state, &alice_actor, idea("Any app")).await;
    assert!(matches!(result, Err(AppError::Configuration(_))));
    assert_eq!(fetch_user(state, &alice.id).await.monthly_generations, 0);
}

#[tokio::test]
async fn enterprise_is_unlimited() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    set_tier(state, &alice.id, SubscriptionTier::Enterprise).await;
    set_generations_this_month(state, &alice.id, 10_000).await;
    let alice_actor = actor(state, &alice.id).await;

    let response = scaffold::generate(state, &alice_actor, idea("Big corp portal"))
        .await
        .unwrap();
    assert_eq!(response.usage.monthly_limit, None);
    assert_eq!(response.usage.monthly_generations, 10_001);
}

#[tokio::test]
async fn lapsed_subscriptions_fall_back_to_the_free_limit() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    set_tier(state, &alice.id, SubscriptionTier::ProMonthly).await;
    set_generations_this_month(state, &alice.id, 3).await;
    sqlx::query("UPDATE users SET subscription_expires_at = ? WHERE id = ?")
        .bind(Utc::now() - Duration::days(2))
        .bind(&alice.id)
        .execute(&state.db.pool)
        .await
        .unwrap();
    let alice_actor = actor(state, &alice.id).await;

    let result = scaffold::generate(state, &alice_actor, idea("Lapsed app")).await;
    assert!(matches!(result, Err(AppError::QuotaExceeded { limit: 3, current: 3 })));
}

#[tokio::test]
async fn template_stack_and_usage_carry_over() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let template = templates::create_template(
        state,
        &alice_actor,
        CreateTemplateRequest {
            name: "Firebase Starter".into(),
            description: None,
            category: "starter".into(),
            frontend_stack: FrontendStack::Vue,
            backend_stack: Some(BackendStack::Firebase),
            visibility: Some(TemplateVisibility::Private),
            team_id: None,
            scaffold: None,
            tags: vec![],
        },
    )
    .await
    .unwrap();

    let mut request = idea("Chat app");
    request.template_id = Some(template.id.clone());
    request.project_name = Some("  Chatter  ".into());
    let response = scaffold::generate(state, &alice_actor, request).await.unwrap();

    assert_eq!(response.project.name, "Chatter");
    assert_eq!(response.project.backend_stack, Some(BackendStack::Firebase));
    assert_eq!(response.project.template_id.as_deref(), Some(template.id.as_str()));

    let use_count = count(state, "SELECT use_count FROM templates").await;
    assert_eq!(use_count, 1);
}

#[tokio::test]
async fn invisible_templates_are_rejected_without_charging() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let bob = create_user(state, "Bob").await;
    let alice_actor = actor(state, &alice.id).await;

    let template = templates::create_template(
        state,
        &alice_actor,
        CreateTemplateRequest {
            name: "Private Kit".into(),
            description: None,
            category: "starter".into(),
            frontend_stack: FrontendStack::React,
            backend_stack: None,
            visibility: Some(TemplateVisibility::Private),
            team_id: None,
            scaffold: None,
            tags: vec![],
        },
    )
    .await
    .unwrap();

    let bob_actor = actor(state, &bob.id).await;
    let mut request = idea("Copycat");
    request.template_id = Some(template.id);
    let result = scaffold::generate(state, &bob_actor, request).await;
    assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "template_id"));
    assert_eq!(fetch_user(state, &bob.id).await.monthly_generations, 0);
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn blank_ideas_are_rejected() {
    let app = setup().await;
    let state = &app.state;
    let alice = create_user(state, "Alice").await;
    let alice_actor = actor(state, &alice.id).await;

    let result = scaffold::generate(state, &alice_actor, idea("    ")).await;
    assert!(matches!(result, Err(AppError::Validation { .. })));
    assert_eq!(app.generator.calls(), 0);
}
