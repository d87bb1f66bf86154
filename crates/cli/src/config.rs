//! `hookline.toml`: service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use gitlab::GitLabConfig;
use orchestration::{
    BackoffSchedule, ExternalProjectId, ExternalUserId, OrchestratorConfig, ProjectId, UserId,
};
use queue::WorkerCounts;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// SQLite database file.
    pub database: PathBuf,
    pub orchestrator: OrchestratorSection,
    pub gitlab: GitLabSection,
    pub workers: WorkersSection,
    pub sweeps: SweepsSection,
    pub projects: Vec<ProjectMapping>,
    pub users: Vec<UserMapping>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("hookline.db"),
            orchestrator: OrchestratorSection::default(),
            gitlab: GitLabSection::default(),
            workers: WorkersSection::default(),
            sweeps: SweepsSection::default(),
            projects: Vec::new(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    pub bot_account_id: Option<u64>,
    pub mention: String,
    pub develop_label: String,
    pub backoff_secs: Vec<u64>,
    pub queue_ttl_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            bot_account_id: None,
            mention: defaults.mention,
            develop_label: defaults.develop_label,
            backoff_secs: vec![30, 120, 480],
            queue_ttl_secs: defaults.queue_ttl.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitLabSection {
    pub base_url: String,
    /// Environment variable holding the bot access token.
    pub token_env: String,
    /// Environment variable holding the pipeline trigger token.
    pub trigger_token_env: String,
    pub timeout_secs: u64,
}

impl Default for GitLabSection {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com".to_string(),
            token_env: "GITLAB_TOKEN".to_string(),
            trigger_token_env: "GITLAB_TRIGGER_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersSection {
    pub runner: usize,
    pub server: usize,
}

impl Default for WorkersSection {
    fn default() -> Self {
        let counts = WorkerCounts::default();
        Self {
            runner: counts.runner,
            server: counts.server,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepsSection {
    pub recovery_interval_secs: u64,
    pub expiry_interval_secs: u64,
}

impl Default for SweepsSection {
    fn default() -> Self {
        Self {
            recovery_interval_secs: 300,
            expiry_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMapping {
    pub id: u64,
    pub gitlab_project_id: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserMapping {
    pub gitlab_user_id: u64,
    pub user_id: u64,
}

impl CliConfig {
    /// Reads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.orchestrator.mention.trim().is_empty() {
            bail!("orchestrator.mention must not be empty");
        }
        if self.orchestrator.backoff_secs.is_empty() {
            bail!("orchestrator.backoff_secs needs at least one delay");
        }
        if self.gitlab.timeout_secs == 0 {
            bail!("gitlab.timeout_secs must be positive");
        }
        if self.workers.runner == 0 || self.workers.server == 0 {
            bail!("at least one runner and one server worker are required");
        }
        if self.sweeps.recovery_interval_secs == 0 || self.sweeps.expiry_interval_secs == 0 {
            bail!("sweep intervals must be positive");
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        let section = &self.orchestrator;
        OrchestratorConfig {
            bot_account_id: section.bot_account_id.map(ExternalUserId::new),
            mention: section.mention.clone(),
            develop_label: section.develop_label.clone(),
            backoff: BackoffSchedule::from_secs(&section.backoff_secs),
            queue_ttl: Duration::from_secs(section.queue_ttl_secs),
            launch_timeout: Duration::from_secs(self.gitlab.timeout_secs),
        }
    }

    /// GitLab client settings, with tokens read from the environment.
    pub fn gitlab(&self) -> Result<GitLabConfig> {
        let section = &self.gitlab;
        let token = std::env::var(&section.token_env)
            .with_context(|| format!("environment variable {} is not set", section.token_env))?;
        let trigger_token = std::env::var(&section.trigger_token_env).with_context(|| {
            format!("environment variable {} is not set", section.trigger_token_env)
        })?;
        Ok(GitLabConfig {
            base_url: section.base_url.clone(),
            token,
            trigger_token,
            timeout: Duration::from_secs(section.timeout_secs),
        })
    }

    pub fn worker_counts(&self) -> WorkerCounts {
        WorkerCounts {
            runner: self.workers.runner,
            server: self.workers.server,
        }
    }

    pub fn projects(&self) -> impl Iterator<Item = (ProjectId, ExternalProjectId)> + '_ {
        self.projects
            .iter()
            .map(|p| (ProjectId::new(p.id), ExternalProjectId::new(p.gitlab_project_id)))
    }

    pub fn users(&self) -> impl Iterator<Item = (ExternalUserId, UserId)> + '_ {
        self.users
            .iter()
            .map(|u| (ExternalUserId::new(u.gitlab_user_id), UserId::new(u.user_id)))
    }
}
