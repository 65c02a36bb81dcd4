//! System instruction for the chat assistant, assembled from the persona
//! template, the owner profile and the public repository list.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::github::{Repository, RepositorySource};

const EMBEDDED_PERSONA: &str = include_str!("../assets/expert_persona.xml");
const EMBEDDED_PROFILE: &str = include_str!("../assets/profile.json");

const PROFILE_PLACEHOLDER: &str = "{{PROFILE_CONTEXT}}";
const GITHUB_PLACEHOLDER: &str = "{{GITHUB_CONTEXT}}";

#[derive(Debug, Clone)]
pub enum TextSource {
    Embedded(&'static str),
    File(PathBuf),
}

impl TextSource {
    fn from_path(path: Option<PathBuf>, embedded: &'static str) -> Self {
        path.map(Self::File).unwrap_or(Self::Embedded(embedded))
    }

    async fn read(&self) -> anyhow::Result<String> {
        match self {
            Self::Embedded(text) => Ok((*text).to_string()),
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextData {
    pub github: Vec<Repository>,
    pub profile: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub system_instruction: String,
    pub context: ContextData,
}

pub struct AgentContextService {
    persona: TextSource,
    profile: TextSource,
    repositories: Arc<dyn RepositorySource>,
}

impl AgentContextService {
    pub fn new(
        persona_path: Option<PathBuf>,
        profile_path: Option<PathBuf>,
        repositories: Arc<dyn RepositorySource>,
    ) -> Self {
        Self {
            persona: TextSource::from_path(persona_path, EMBEDDED_PERSONA),
            profile: TextSource::from_path(profile_path, EMBEDDED_PROFILE),
            repositories,
        }
    }

    /// Build the context. Repository failures degrade to an empty list;
    /// an unreadable profile or template is an error.
    pub async fn build(&self) -> anyhow::Result<AgentContext> {
        let github = match self.repositories.public_repositories().await {
            Ok(repos) => repos,
            Err(err) => {
                warn!("Repository listing unavailable, continuing without it: {err:#}");
                Vec::new()
            }
        };

        let profile_raw = self.profile.read().await?;
        let profile: Value =
            serde_json::from_str(&profile_raw).context("Profile is not valid JSON")?;
        let template = self.persona.read().await?;

        let system_instruction = template
            .replacen(
                PROFILE_PLACEHOLDER,
                &serde_json::to_string_pretty(&profile)?,
                1,
            )
            .replacen(
                GITHUB_PLACEHOLDER,
                &serde_json::to_string_pretty(&github)?,
                1,
            );

        Ok(AgentContext {
            system_instruction,
            context: ContextData { github, profile },
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;

    pub struct StaticRepositories(pub anyhow::Result<Vec<Repository>>);

    #[async_trait]
    impl RepositorySource for StaticRepositories {
        async fn public_repositories(&self) -> anyhow::Result<Vec<Repository>> {
            match &self.0 {
                Ok(repos) => Ok(repos.clone()),
                Err(err) => Err(anyhow!("{err}")),
            }
        }
    }

    pub fn sample_repository() -> Repository {
        Repository {
            id: 1,
            name: "folio".to_string(),
            full_name: "octocat/folio".to_string(),
            html_url: "https://github.com/octocat/folio".to_string(),
            description: Some("Portfolio site".to_string()),
            language: Some("Rust".to_string()),
            stargazers_count: 3,
        }
    }
}
