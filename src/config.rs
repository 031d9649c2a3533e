use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,

    // Vote ledger
    pub vote_max_attempts: u32,
    pub vote_rate_limit: u32,

    // Feed
    pub feed_max_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            jwt_secret: env::var("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 4000),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            vote_max_attempts: parse_or::<u32>("VOTE_MAX_ATTEMPTS", 3).max(1),
            vote_rate_limit: parse_or("VOTE_RATE_LIMIT", 100),

            feed_max_limit: parse_or::<u32>("FEED_MAX_LIMIT", 50).max(1),
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
