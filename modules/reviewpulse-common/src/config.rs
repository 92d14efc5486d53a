use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // AI provider
    pub anthropic_api_key: String,

    // Web search collector
    pub serper_api_key: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Pipeline tuning
    /// Per-adapter-call timeout within a stage, in seconds.
    pub stage_timeout_secs: u64,
    /// Similarity threshold for semantic dedup clustering.
    pub dedup_threshold: f64,
    /// Monthly price assumed when no ARPU is supplied.
    pub default_monthly_price: f64,
}

impl Config {
    /// Load full worker configuration.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            serper_api_key: env::var("SERPER_API_KEY").unwrap_or_default(),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            stage_timeout_secs: env::var("STAGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse()
                .expect("STAGE_TIMEOUT_SECS must be a number"),
            dedup_threshold: env::var("DEDUP_THRESHOLD")
                .unwrap_or_else(|_| "0.85".to_string())
                .parse()
                .expect("DEDUP_THRESHOLD must be a number"),
            default_monthly_price: env::var("DEFAULT_MONTHLY_PRICE")
                .unwrap_or_else(|_| "50.0".to_string())
                .parse()
                .expect("DEFAULT_MONTHLY_PRICE must be a number"),
        }
    }

    /// Load a minimal config for the API server (no AI or search keys needed).
    pub fn api_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: String::new(),
            serper_api_key: String::new(),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            stage_timeout_secs: 180,
            dedup_threshold: 0.85,
            default_monthly_price: 50.0,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
