//! Public repository listing from the GitHub REST API.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GitHubConfig;

const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    pub html_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
}

#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn public_repositories(&self) -> anyhow::Result<Vec<Repository>>;
}

pub struct GitHubClient {
    config: GitHubConfig,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = config.token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("GITHUB_TOKEN is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("folio-server/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| anyhow!("Failed to initialize HTTP client: {e}"))?;

        Ok(Self { config, http })
    }

    fn repositories_url(&self) -> anyhow::Result<String> {
        let Some(owner) = self.config.owner.as_deref() else {
            bail!("Missing GITHUB_REPO_OWNER environment variable");
        };
        Ok(format!(
            "{}/users/{}/repos?type=public&sort=updated&per_page=100",
            self.config.api_url.trim_end_matches('/'),
            owner
        ))
    }
}

#[async_trait]
impl RepositorySource for GitHubClient {
    async fn public_repositories(&self) -> anyhow::Result<Vec<Repository>> {
        let url = self.repositories_url()?;
        debug!(%url, "Fetching public repositories");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("GitHub request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("Failed to fetch repository list: {status}");
        }

        let repos: Vec<Repository> = response
            .json()
            .await
            .context("Unexpected GitHub repository payload")?;
        info!(count = repos.len(), "Fetched public repositories");
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(owner: Option<&str>) -> GitHubConfig {
        GitHubConfig {
            api_url: "https://github.example/api/".to_string(),
            token: Some("secret".to_string()),
            owner: owner.map(str::to_string),
        }
    }

    #[test]
    fn url_lists_public_repos_of_owner() {
        let client = GitHubClient::new(config(Some("octocat"))).unwrap();
        assert_eq!(
            client.repositories_url().unwrap(),
            "https://github.example/api/users/octocat/repos?type=public&sort=updated&per_page=100"
        );
    }

    #[tokio::test]
    async fn missing_owner_is_a_configuration_error() {
        let client = GitHubClient::new(config(None)).unwrap();
        let err = client.public_repositories().await.unwrap_err();
        assert!(err.to_string().contains("GITHUB_REPO_OWNER"));
    }

    #[test]
    fn repository_payload_tolerates_missing_optional_fields() {
        let raw = r#"[{"id": 7, "name": "folio", "html_url": "https://github.com/o/folio",
                      "description": null, "language": "Rust"}]"#;
        let repos: Vec<Repository> = serde_json::from_str(raw).unwrap();
        assert_eq!(repos[0].stargazers_count, 0);
        assert_eq!(repos[0].language.as_deref(), Some("Rust"));
    }
}
