use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    /// Prefix for invite links handed back to the frontend.
    pub app_base_url: String,
    pub generator: GeneratorConfig,
    /// Unset means pending invitations never expire.
    pub invitation_ttl_hours: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/vibe-builder.db?mode=rwc".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            token_ttl_days: env::var("TOKEN_TTL_DAYS")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(7),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .trim_end_matches('/')
                .to_string(),
            generator: GeneratorConfig {
                api_url: env::var("GENERATOR_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
                api_key: env::var("GENERATOR_API_KEY").ok().filter(|k| !k.is_empty()),
                model: env::var("GENERATOR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                timeout_secs: env::var("GENERATOR_TIMEOUT_SECS")
                    .ok()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(30),
            },
            invitation_ttl_hours: env::var("INVITATION_TTL_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .filter(|h: &i64| *h > 0),
        }
    }

    /// Settings for tests and local tooling: in-memory friendly, no generator key.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test-secret".to_string(),
            token_ttl_days: 1,
            app_base_url: "http://localhost:5173".to_string(),
            generator: GeneratorConfig {
                api_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
                api_key: None,
                model: "test-model".to_string(),
                timeout_secs: 1,
            },
            invitation_ttl_hours: None,
        }
    }
}
