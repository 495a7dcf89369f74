use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

const DEFAULT_N8N_BASE_URL: &str = "http://localhost:5678";
const DEFAULT_WEBHOOK_PATH_PRIMARY: &str = "/webhook/tattoo-chat";
const DEFAULT_WEBHOOK_PATH_FALLBACK: &str = "/webhook-test/tattoo-chat";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:8000,http://127.0.0.1:8000";

/// Process-wide configuration, read once from the environment at startup and
/// passed into every component. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Ordered candidate webhook URLs: primary first, then fallback.
    /// Order is a priority, not a pool.
    pub webhook_urls: Vec<String>,
    /// Per-file ceiling in bytes.
    pub max_file_size: u64,
    pub max_files_per_request: u64,
    pub max_concurrent_connections: usize,
    /// Per-attempt downstream timeout, also the body-read budget.
    pub request_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub housekeeping_interval: Duration,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("N8N_WEBHOOK_BASE_URL").unwrap_or_else(|_| DEFAULT_N8N_BASE_URL.to_string());
        let base_url = base_url.trim_end_matches('/').to_string();
        let path_primary = env::var("WEBHOOK_PATH_PRIMARY")
            .unwrap_or_else(|_| DEFAULT_WEBHOOK_PATH_PRIMARY.to_string());
        let path_fallback = env::var("WEBHOOK_PATH_FALLBACK")
            .unwrap_or_else(|_| DEFAULT_WEBHOOK_PATH_FALLBACK.to_string());
        let webhook_urls = vec![
            format!("{}{}", base_url, path_primary),
            format!("{}{}", base_url, path_fallback),
        ];

        let max_file_size_mb = parse_optional_u64("MAX_FILE_SIZE_MB")?.unwrap_or(10);
        let max_files_per_request = parse_optional_u64("MAX_FILES_PER_REQUEST")?.unwrap_or(5);
        let max_concurrent_connections =
            parse_optional_u64("MAX_CONCURRENT_CONNECTIONS")?.unwrap_or(50) as usize;
        let request_timeout_secs = parse_optional_u64("REQUEST_TIMEOUT_SECONDS")?.unwrap_or(30);
        let housekeeping_secs = parse_optional_u64("HOUSEKEEPING_INTERVAL_SECONDS")?.unwrap_or(300);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let port = match env::var("PORT") {
            Ok(value) if !value.trim().is_empty() => value
                .trim()
                .parse::<u16>()
                .map_err(|_| anyhow!("PORT must be a valid port number"))?,
            _ => 8000,
        };
        let host = match env::var("HOST") {
            Ok(value) if !value.trim().is_empty() => value,
            _ => "0.0.0.0".to_string(),
        };

        Ok(Self {
            webhook_urls,
            max_file_size: max_file_size_mb * 1024 * 1024,
            max_files_per_request,
            max_concurrent_connections,
            request_timeout: Duration::from_secs(request_timeout_secs),
            allowed_origins,
            housekeeping_interval: Duration::from_secs(housekeeping_secs),
            port,
            host,
        })
    }

    /// Ceiling for an entire request body (all files plus fields).
    pub fn max_request_bytes(&self) -> u64 {
        self.max_file_size * self.max_files_per_request
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
