//! Scaffold generation: prompt the external generator, parse what comes back
//! and fill every missing section with a deterministic default for the
//! chosen stack.
//!
//! The quota is checked before the generator is called and charged in the
//! transaction that stores the project, so only persisted generations are
//! ever counted.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use validator::Validate;

use crate::{
    db::models::{
        AuthType, BackendStack, FrontendStack, GenerationLimit, Project, ProjectStatus,
        ProjectVisibility, Template,
    },
    error::{AppError, Result},
    policy::{self, Actor},
    services::{
        activity::{self, NewActivity},
        generator::{GenerationPrompt, GeneratorError},
        projects::{self, NewProject},
        quota,
    },
    AppState,
};

/// Sections every scaffold carries, with the snake_case spelling also
/// accepted from the generator.
pub const SECTIONS: [(&str, &str); 7] = [
    ("projectStructure", "project_structure"),
    ("databaseSchema", "database_schema"),
    ("apiEndpoints", "api_endpoints"),
    ("environmentVariables", "environment_variables"),
    ("dependencies", "dependencies"),
    ("deploymentConfig", "deployment_config"),
    ("securityRecommendations", "security_recommendations"),
];

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateScaffoldRequest {
    #[validate(length(min = 1, max = 4000))]
    pub app_idea: String,
    #[validate(length(min = 1, max = 100))]
    pub project_name: Option<String>,
    pub frontend_stack: FrontendStack,
    pub backend_stack: Option<BackendStack>,
    pub auth_type: Option<AuthType>,
    pub template_id: Option<String>,
    pub team_id: Option<String>,
    pub visibility: Option<ProjectVisibility>,
}

#[derive(Debug, Serialize)]
pub struct GenerateScaffoldResponse {
    pub project: Project,
    pub scaffold: Value,
    /// Sections that fell back to defaults.
    pub defaulted: Vec<&'static str>,
    pub usage: GenerationUsage,
}

#[derive(Debug, Serialize)]
pub struct GenerationUsage {
    pub monthly_generations: i64,
    pub monthly_limit: Option<i64>,
}

/// The stack a scaffold is generated for, with optional choices resolved.
#[derive(Debug, Clone, Copy)]
pub struct Stack {
    pub frontend: FrontendStack,
    pub backend: BackendStack,
    pub auth: AuthType,
}

#[derive(Debug)]
pub struct ParsedScaffold {
    pub scaffold: Value,
    pub defaulted: Vec<&'static str>,
}

pub fn build_prompt(idea: &str, stack: Stack, template: Option<&Template>) -> GenerationPrompt {
    let keys: Vec<&str> = SECTIONS.iter().map(|(key, _)| *key).collect();
    let system = format!(
        "You are a senior full-stack architect. Reply with a single JSON object and nothing \
         else. The object must have exactly these keys: {}. projectStructure is a nested \
         object of directories and files, databaseSchema lists tables with columns, \
         apiEndpoints lists objects with method, path and description, environmentVariables \
         maps variable names to descriptions, dependencies groups packages by frontend and \
         backend, deploymentConfig describes hosting, securityRecommendations is a list of \
         strings.",
        keys.join(", ")
    );

    let mut user = format!(
        "App idea:\n{}\n\nFrontend: {}\nBackend: {}\nAuthentication: {}\n",
        idea.trim(),
        stack.frontend.as_str(),
        stack.backend.as_str(),
        auth_label(stack.auth),
    );
    if let Some(template) = template {
        user.push_str(&format!(
            "\nStart from the \"{}\" template and adapt it:\n{}\n",
            template.name, template.scaffold.0
        ));
    }

    GenerationPrompt { system, user }
}

/// Parse generator output. Anything outside the outermost braces is ignored;
/// sections that are missing or null are replaced by the stack defaults.
pub fn parse_scaffold(raw: &str, stack: Stack) -> ParsedScaffold {
    let parsed = extract_object(raw);

    let mut scaffold = Map::new();
    let mut defaulted = Vec::new();
    for (key, alias) in SECTIONS {
        let found = parsed
            .as_ref()
            .and_then(|obj| obj.get(key).or_else(|| obj.get(alias)))
            .filter(|v| !v.is_null())
            .cloned();

        match found {
            Some(value) => {
                scaffold.insert(key.to_string(), value);
            }
            None => {
                scaffold.insert(key.to_string(), default_section(key, stack));
                defaulted.push(key);
            }
        }
    }

    ParsedScaffold {
        scaffold: Value::Object(scaffold),
        defaulted,
    }
}

fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn auth_label(auth: AuthType) -> &'static str {
    match auth {
        AuthType::EmailPassword => "email and password",
        AuthType::Oauth => "OAuth (Google, GitHub)",
        AuthType::MagicLink => "passwordless magic link",
    }
}

/// A name for generated projects when the caller did not give one: the first
/// few words of the idea.
fn project_name_from_idea(idea: &str) -> String {
    let name = idea
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join(" ");
    let mut name: String = name.chars().take(60).collect();
    if name.trim().is_empty() {
        name = "Generated app".to_string();
    }
    name
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub fn default_scaffold(stack: Stack) -> Value {
    let mut map = Map::new();
    for (key, _) in SECTIONS {
        map.insert(key.to_string(), default_section(key, stack));
    }
    Value::Object(map)
}

fn default_section(key: &str, stack: Stack) -> Value {
    match key {
        "projectStructure" => default_structure(stack),
        "databaseSchema" => default_schema(stack),
        "apiEndpoints" => default_endpoints(stack),
        "environmentVariables" => default_env(stack),
        "dependencies" => default_dependencies(stack),
        "deploymentConfig" => default_deployment(stack),
        "securityRecommendations" => default_security(stack),
        _ => Value::Null,
    }
}

fn default_structure(stack: Stack) -> Value {
    let frontend = match stack.frontend {
        FrontendStack::React => json!({
            "src": {
                "components": {}, "pages": {}, "hooks": {}, "lib": {},
                "App.tsx": "file", "main.tsx": "file"
            },
            "index.html": "file", "vite.config.ts": "file", "package.json": "file"
        }),
        FrontendStack::Vue => json!({
            "src": {
                "components": {}, "views": {}, "composables": {}, "router": {},
                "App.vue": "file", "main.ts": "file"
            },
            "index.html": "file", "vite.config.ts": "file", "package.json": "file"
        }),
        FrontendStack::Svelte => json!({
            "src": {
                "lib": {}, "routes": { "+page.svelte": "file", "+layout.svelte": "file" },
                "app.html": "file"
            },
            "svelte.config.js": "file", "vite.config.ts": "file", "package.json": "file"
        }),
        FrontendStack::Nextjs => json!({
            "app": { "layout.tsx": "file", "page.tsx": "file", "api": {} },
            "components": {}, "lib": {},
            "next.config.js": "file", "package.json": "file"
        }),
        FrontendStack::Angular => json!({
            "src": {
                "app": { "components": {}, "services": {}, "app.component.ts": "file",
                         "app.routes.ts": "file" },
                "main.ts": "file", "index.html": "file"
            },
            "angular.json": "file", "package.json": "file"
        }),
    };

    let backend = match stack.backend {
        BackendStack::Supabase => json!({
            "supabase": { "migrations": {}, "functions": {}, "config.toml": "file" }
        }),
        BackendStack::NodeExpress => json!({
            "server": { "routes": {}, "middleware": {}, "models": {}, "index.ts": "file",
                        "package.json": "file" }
        }),
        BackendStack::PythonFastapi => json!({
            "backend": { "app": { "routers": {}, "models": {}, "main.py": "file" },
                         "requirements.txt": "file" }
        }),
        BackendStack::Firebase => json!({
            "firebase": { "functions": { "src": {}, "package.json": "file" },
                          "firestore.rules": "file", "firebase.json": "file" }
        }),
    };

    let mut root = Map::new();
    root.insert("frontend".to_string(), frontend);
    if let Value::Object(backend) = backend {
        root.extend(backend);
    }
    root.insert("README.md".to_string(), json!("file"));
    root.insert(".env.example".to_string(), json!("file"));
    Value::Object(root)
}

fn default_schema(stack: Stack) -> Value {
    let mut tables = vec![json!({
        "name": "users",
        "columns": [
            { "name": "id", "type": "uuid", "primaryKey": true },
            { "name": "email", "type": "text", "unique": true },
            { "name": "name", "type": "text" },
            { "name": "created_at", "type": "timestamp" }
        ]
    })];

    match stack.auth {
        AuthType::EmailPassword => tables.push(json!({
            "name": "sessions",
            "columns": [
                { "name": "id", "type": "uuid", "primaryKey": true },
                { "name": "user_id", "type": "uuid", "references": "users.id" },
                { "name": "expires_at", "type": "timestamp" }
            ]
        })),
        AuthType::Oauth => tables.push(json!({
            "name": "oauth_accounts",
            "columns": [
                { "name": "provider", "type": "text" },
                { "name": "provider_account_id", "type": "text" },
                { "name": "user_id", "type": "uuid", "references": "users.id" }
            ]
        })),
        AuthType::MagicLink => tables.push(json!({
            "name": "login_tokens",
            "columns": [
                { "name": "token_hash", "type": "text", "primaryKey": true },
                { "name": "user_id", "type": "uuid", "references": "users.id" },
                { "name": "expires_at", "type": "timestamp" }
            ]
        })),
    }

    tables.push(json!({
        "name": "items",
        "columns": [
            { "name": "id", "type": "uuid", "primaryKey": true },
            { "name": "owner_id", "type": "uuid", "references": "users.id" },
            { "name": "title", "type": "text" },
            { "name": "data", "type": "json" },
            { "name": "created_at", "type": "timestamp" }
        ]
    }));

    json!({ "tables": tables })
}

fn default_endpoints(stack: Stack) -> Value {
    let mut endpoints = match stack.auth {
        AuthType::EmailPassword => vec![
            json!({ "method": "POST", "path": "/api/auth/register", "description": "Create an account" }),
            json!({ "method": "POST", "path": "/api/auth/login", "description": "Sign in with email and password" }),
        ],
        AuthType::Oauth => vec![
            json!({ "method": "GET", "path": "/api/auth/:provider", "description": "Start the OAuth flow" }),
            json!({ "method": "GET", "path": "/api/auth/:provider/callback", "description": "Finish the OAuth flow" }),
        ],
        AuthType::MagicLink => vec![
            json!({ "method": "POST", "path": "/api/auth/magic-link", "description": "Email a sign-in link" }),
            json!({ "method": "GET", "path": "/api/auth/verify", "description": "Exchange a link token for a session" }),
        ],
    };

    endpoints.extend([
        json!({ "method": "POST", "path": "/api/auth/logout", "description": "End the session" }),
        json!({ "method": "GET", "path": "/api/me", "description": "Current user" }),
        json!({ "method": "GET", "path": "/api/items", "description": "List the user's items" }),
        json!({ "method": "POST", "path": "/api/items", "description": "Create an item" }),
        json!({ "method": "PATCH", "path": "/api/items/:id", "description": "Update an item" }),
        json!({ "method": "DELETE", "path": "/api/items/:id", "description": "Delete an item" }),
    ]);

    Value::Array(endpoints)
}

fn default_env(stack: Stack) -> Value {
    let mut env = Map::new();
    let mut set = |key: &str, description: &str| {
        env.insert(key.to_string(), Value::String(description.to_string()));
    };

    match stack.frontend {
        FrontendStack::Nextjs => set("NEXT_PUBLIC_API_URL", "Public base URL of the API"),
        FrontendStack::Angular => set("API_URL", "Base URL of the API"),
        FrontendStack::React | FrontendStack::Vue | FrontendStack::Svelte => {
            set("VITE_API_URL", "Base URL of the API")
        }
    }

    match stack.backend {
        BackendStack::Supabase => {
            set("SUPABASE_URL", "Supabase project URL");
            set("SUPABASE_ANON_KEY", "Supabase anonymous key");
            set("SUPABASE_SERVICE_ROLE_KEY", "Service role key, server side only");
        }
        BackendStack::NodeExpress | BackendStack::PythonFastapi => {
            set("DATABASE_URL", "Database connection string");
            set("PORT", "Port the API listens on");
        }
        BackendStack::Firebase => {
            set("FIREBASE_API_KEY", "Firebase web API key");
            set("FIREBASE_PROJECT_ID", "Firebase project id");
        }
    }

    match stack.auth {
        AuthType::EmailPassword => set("JWT_SECRET", "Secret for signing session tokens"),
        AuthType::Oauth => {
            set("OAUTH_CLIENT_ID", "OAuth client id");
            set("OAUTH_CLIENT_SECRET", "OAuth client secret");
            set("OAUTH_REDIRECT_URL", "Callback URL registered with the provider");
        }
        AuthType::MagicLink => {
            set("SMTP_URL", "Mail server used to send sign-in links");
            set("MAGIC_LINK_TTL_MINUTES", "Lifetime of a sign-in link");
        }
    }

    Value::Object(env)
}

fn default_dependencies(stack: Stack) -> Value {
    let frontend: &[&str] = match stack.frontend {
        FrontendStack::React => &["react", "react-dom", "react-router-dom", "vite", "typescript"],
        FrontendStack::Vue => &["vue", "vue-router", "pinia", "vite", "typescript"],
        FrontendStack::Svelte => &["svelte", "@sveltejs/kit", "vite", "typescript"],
        FrontendStack::Nextjs => &["next", "react", "react-dom", "typescript"],
        FrontendStack::Angular => &["@angular/core", "@angular/router", "rxjs", "typescript"],
    };
    let backend: &[&str] = match stack.backend {
        BackendStack::Supabase => &["@supabase/supabase-js"],
        BackendStack::NodeExpress => &["express", "cors", "zod", "pg"],
        BackendStack::PythonFastapi => &["fastapi", "uvicorn", "sqlalchemy", "pydantic"],
        BackendStack::Firebase => &["firebase", "firebase-admin", "firebase-functions"],
    };

    json!({ "frontend": frontend, "backend": backend })
}

fn default_deployment(stack: Stack) -> Value {
    let frontend = match stack.frontend {
        FrontendStack::Nextjs => json!({ "platform": "vercel", "build": "next build" }),
        FrontendStack::Angular => {
            json!({ "platform": "netlify", "build": "ng build", "output": "dist" })
        }
        FrontendStack::React | FrontendStack::Vue | FrontendStack::Svelte => {
            json!({ "platform": "netlify", "build": "vite build", "output": "dist" })
        }
    };
    let backend = match stack.backend {
        BackendStack::Supabase => {
            json!({ "platform": "supabase", "migrations": "supabase db push" })
        }
        BackendStack::NodeExpress => json!({ "platform": "render", "start": "node dist/index.js" }),
        BackendStack::PythonFastapi => {
            json!({ "platform": "render", "start": "uvicorn app.main:app --host 0.0.0.0" })
        }
        BackendStack::Firebase => json!({ "platform": "firebase", "deploy": "firebase deploy" }),
    };

    json!({ "frontend": frontend, "backend": backend })
}

fn default_security(stack: Stack) -> Value {
    let mut advice = vec![
        "Keep secrets in environment variables and out of version control",
        "Validate every request body on the server",
        "Serve the app over HTTPS only",
    ];
    advice.push(match stack.auth {
        AuthType::EmailPassword => {
            "Hash passwords with argon2 or bcrypt and rate-limit login attempts"
        }
        AuthType::Oauth => "Verify the OAuth state parameter to prevent CSRF on the callback",
        AuthType::MagicLink => "Make sign-in links single-use and expire them within minutes",
    });
    advice.push(match stack.backend {
        BackendStack::Supabase => "Enable row level security on every table",
        BackendStack::Firebase => "Lock down Firestore security rules before launch",
        BackendStack::NodeExpress | BackendStack::PythonFastapi => {
            "Use parameterized queries and restrict CORS to the frontend origin"
        }
    });

    json!(advice)
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

pub async fn generate(
    state: &AppState,
    actor: &Actor,
    body: GenerateScaffoldRequest,
) -> Result<GenerateScaffoldResponse> {
    body.validate()?;
    let idea = body.app_idea.trim();
    if idea.is_empty() {
        return Err(AppError::validation("app_idea", "Describe the app you want to build"));
    }

    let team_id = body.team_id.as_deref();
    let visibility = body.visibility.unwrap_or(ProjectVisibility::Private);
    if visibility == ProjectVisibility::Team && team_id.is_none() {
        return Err(AppError::validation("visibility", "team visibility requires a team_id"));
    }
    if !policy::can_insert_project(Some(actor), actor.id(), team_id) {
        return Err(AppError::Forbidden(
            "Projects can only be created in teams you belong to".into(),
        ));
    }

    let template = projects::resolve_template(state, actor, body.template_id.as_deref()).await?;
    let stack = Stack {
        frontend: body.frontend_stack,
        backend: body
            .backend_stack
            .or(template.as_ref().and_then(|t| t.backend_stack))
            .unwrap_or(BackendStack::Supabase),
        auth: body.auth_type.unwrap_or(AuthType::EmailPassword),
    };

    let now = Utc::now();
    let tier = actor.user.effective_tier(now);
    let limit = tier.monthly_generation_limit();
    quota::check(&state.db.pool, actor.id(), limit, now).await?;

    let prompt = build_prompt(idea, stack, template.as_ref());
    let timeout = Duration::from_secs(state.config.generator.timeout_secs);
    let raw = match tokio::time::timeout(timeout, state.generator.complete(&prompt)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(err)) => {
            tracing::warn!(user_id = %actor.id(), error = %err, "scaffold generation failed");
            return Err(err.into());
        }
        Err(_) => {
            tracing::warn!(user_id = %actor.id(), "scaffold generation timed out");
            return Err(GeneratorError::Timeout.into());
        }
    };

    let parsed = parse_scaffold(&raw, stack);
    if !parsed.defaulted.is_empty() {
        tracing::warn!(
            user_id = %actor.id(),
            sections = ?parsed.defaulted,
            "generator output incomplete, using defaults"
        );
    }

    let name = body
        .project_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| project_name_from_idea(idea));

    let new = NewProject {
        owner_id: actor.id(),
        team_id,
        template_id: template.as_ref().map(|t| t.id.as_str()),
        name: &name,
        description: None,
        app_idea: Some(idea),
        frontend_stack: Some(stack.frontend),
        backend_stack: Some(stack.backend),
        auth_type: Some(stack.auth),
        visibility,
        is_public: false,
        status: ProjectStatus::Generated,
        scaffold: Some(&parsed.scaffold),
    };

    let (project, usage) = persist(state, actor, &new, limit, &parsed.defaulted).await?;

    tracing::info!(
        project_id = %project.id,
        user_id = %actor.id(),
        used = usage.used,
        "scaffold generated"
    );

    Ok(GenerateScaffoldResponse {
        project,
        scaffold: parsed.scaffold,
        defaulted: parsed.defaulted,
        usage: GenerationUsage {
            monthly_generations: usage.used,
            monthly_limit: limit,
        },
    })
}

/// Charge the quota, store the project, bump template usage and write the
/// audit row in one transaction. Nothing is charged unless all of it commits.
async fn persist(
    state: &AppState,
    actor: &Actor,
    new: &NewProject<'_>,
    limit: GenerationLimit,
    defaulted: &[&'static str],
) -> Result<(Project, quota::Usage)> {
    let mut tx = state.db.begin_write().await?;
    let usage = quota::consume(&mut tx, actor.id(), limit, Utc::now()).await?;
    let project = projects::insert_project(&mut tx, new).await?;

    if let Some(template_id) = new.template_id {
        projects::mark_template_used(&mut tx, template_id).await?;
    }

    activity::record(
        &mut tx,
        NewActivity::new(actor, "project.generated", "project")
            .team(project.team_id.as_deref())
            .resource(&project.id)
            .detail(json!({
                "period": usage.period,
                "monthly_generations": usage.used,
                "defaulted": defaulted,
            })),
    )
    .await?;
    tx.commit().await?;

    Ok((project, usage))
}
