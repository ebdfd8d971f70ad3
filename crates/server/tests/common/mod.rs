#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vibe_builder_server::{
    config::Config,
    db::{
        models::{usage_period, SubscriptionTier, User, UserRole},
        Database,
    },
    policy::Actor,
    services::{
        actors::load_actor,
        generator::{GenerationPrompt, GeneratorError, ScaffoldGenerator},
    },
    AppState,
};

pub const VALID_SCAFFOLD: &str = r#"{
    "projectStructure": { "src": { "main.tsx": "file" } },
    "databaseSchema": { "tables": [{ "name": "habits" }] },
    "apiEndpoints": [{ "method": "GET", "path": "/api/habits" }],
    "environmentVariables": { "SUPABASE_URL": "project url" },
    "dependencies": { "frontend": ["react"], "backend": ["@supabase/supabase-js"] },
    "deploymentConfig": { "frontend": { "platform": "netlify" } },
    "securityRecommendations": ["enable row level security"]
}"#;

#[derive(Debug, Clone)]
pub enum Behaviour {
    Reply(String),
    Unavailable,
    NotConfigured,
    Hang,
}

/// Generator double that answers from a script and counts calls.
pub struct FakeGenerator {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScaffoldGenerator for FakeGenerator {
    async fn complete(&self, _prompt: &GenerationPrompt) -> Result<String, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Reply(text) => Ok(text.clone()),
            Behaviour::Unavailable => Err(GeneratorError::Unavailable("connection reset".into())),
            Behaviour::NotConfigured => {
                Err(GeneratorError::NotConfigured("GENERATOR_API_KEY is not set".into()))
            }
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    pub generator: Arc<FakeGenerator>,
    db_file: Option<PathBuf>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(path) = &self.db_file {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
            }
        }
    }
}

pub async fn setup() -> TestApp {
    setup_with(Behaviour::Reply(VALID_SCAFFOLD.to_string())).await
}

pub async fn setup_with(behaviour: Behaviour) -> TestApp {
    let db = Database::connect_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();

    let generator = FakeGenerator::new(behaviour);
    let state = AppState::with_generator(db, Config::for_tests(), generator.clone());
    TestApp {
        state,
        generator,
        db_file: None,
    }
}

/// A database file behind the regular connection pool, so concurrent
/// requests really contend for SQLite's write lock.
pub async fn setup_on_disk() -> TestApp {
    let path = std::env::temp_dir().join(format!("vibe-builder-{}.db", Uuid::new_v4()));
    let db = Database::connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await
        .unwrap();
    db.run_migrations().await.unwrap();

    let generator = FakeGenerator::new(Behaviour::Reply(VALID_SCAFFOLD.to_string()));
    let state = AppState::with_generator(db, Config::for_tests(), generator.clone());
    TestApp {
        state,
        generator,
        db_file: Some(path),
    }
}

pub async fn create_user(state: &AppState, name: &str) -> User {
    let now = Utc::now();
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
        VALUES (?, ?, ?, 'not-a-real-hash', ?, ?)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(format!("{}@example.com", name.to_lowercase()))
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(&state.db.pool)
    .await
    .unwrap()
}

pub async fn set_tier(state: &AppState, user_id: &str, tier: SubscriptionTier) {
    sqlx::query("UPDATE users SET subscription_tier = ? WHERE id = ?")
        .bind(tier)
        .bind(user_id)
        .execute(&state.db.pool)
        .await
        .unwrap();
}

pub async fn set_role(state: &AppState, user_id: &str, role: UserRole) {
    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role)
        .bind(user_id)
        .execute(&state.db.pool)
        .await
        .unwrap();
}

pub async fn set_generations_this_month(state: &AppState, user_id: &str, used: i64) {
    sqlx::query("UPDATE users SET monthly_generations = ?, usage_period = ? WHERE id = ?")
        .bind(used)
        .bind(usage_period(Utc::now()))
        .bind(user_id)
        .execute(&state.db.pool)
        .await
        .unwrap();
}

/// A fresh snapshot of the caller. Take a new one after membership changes.
pub async fn actor(state: &AppState, user_id: &str) -> Actor {
    load_actor(&state.db.pool, user_id)
        .await
        .unwrap()
        .expect("user should resolve to a live actor")
}

pub async fn fetch_user(state: &AppState, user_id: &str) -> User {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&state.db.pool)
        .await
        .unwrap()
}

pub async fn count(state: &AppState, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(&state.db.pool)
        .await
        .unwrap()
}

pub async fn activity_actions(state: &AppState) -> Vec<String> {
    sqlx::query_scalar::<_, String>("SELECT action FROM activity_logs ORDER BY created_at ASC")
        .fetch_all(&state.db.pool)
        .await
        .unwrap()
}

pub fn token_from_link(link: &str) -> String {
    link.split("token=").nth(1).unwrap().to_string()
}
