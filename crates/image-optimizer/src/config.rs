use image_cache::CacheConfig;
use std::env;

const DEFAULT_PORT: u16 = 3002;
const DEFAULT_CORS_ORIGIN: &str = "https://case.oki.gg";

/// Service configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub cache: CacheConfig,
}

impl ServiceConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()]);

        let cache = CacheConfig::from_lookup(&lookup);

        Self {
            port,
            cors_origins,
            cache,
        }
    }
}
