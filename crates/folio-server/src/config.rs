//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

use folio_core::{RemoteConfig, RetryPolicy};
use tracing::warn;

use crate::storage_layout::resolve_db_path;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_VIEW_DEDUP_SECS: u64 = 24 * 60 * 60;
const DEFAULT_VIEW_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_VIEW_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Listen address. Command-line values win over `FOLIO_HOST`/`FOLIO_PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConfig {
    pub host: String,
    pub port: u16,
}

impl BindConfig {
    pub fn resolve(host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host
                .or_else(|| env_string("FOLIO_HOST"))
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.unwrap_or_else(|| env_parsed("FOLIO_PORT", DEFAULT_PORT)),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub github: GitHubConfig,
    /// `None` uses the profile bundled with the binary.
    pub profile_path: Option<PathBuf>,
    /// `None` uses the persona template bundled with the binary.
    pub persona_path: Option<PathBuf>,
    pub view_dedup_window: Duration,
    pub view_retry: RetryPolicy,
    pub remote: RemoteConfig,
    /// Whether the host exposes a GPU to the local inference runtime.
    pub gpu_compute: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let token = env_string("GITHUB_TOKEN");
        if token.is_none() {
            warn!("Missing GITHUB_TOKEN; GitHub API rate limits will be lower");
        }

        Self {
            db_path: resolve_db_path(),
            github: GitHubConfig {
                api_url: env_string("GITHUB_API_URL")
                    .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
                token,
                owner: env_string("GITHUB_REPO_OWNER"),
            },
            profile_path: env_string("FOLIO_PROFILE_PATH").map(PathBuf::from),
            persona_path: env_string("FOLIO_PERSONA_PATH").map(PathBuf::from),
            view_dedup_window: Duration::from_secs(env_parsed(
                "FOLIO_VIEW_DEDUP_SECS",
                DEFAULT_VIEW_DEDUP_SECS,
            )),
            view_retry: RetryPolicy::new(
                env_parsed("FOLIO_VIEW_RETRY_ATTEMPTS", DEFAULT_VIEW_RETRY_ATTEMPTS),
                Duration::from_millis(env_parsed(
                    "FOLIO_VIEW_RETRY_DELAY_MS",
                    DEFAULT_VIEW_RETRY_DELAY_MS,
                )),
            ),
            remote: RemoteConfig::from_env(),
            gpu_compute: env_parsed("FOLIO_GPU_COMPUTE", false),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn env_parsed<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => match raw.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {}='{}', falling back to {}", name, raw, default);
                default
            }
        },
        None => default,
    }
}
