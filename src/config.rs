//! `remedy.toml` at the repository root.
//!
//! Every key is optional. A missing file means defaults; a malformed one is
//! reported and then ignored.

use crate::collect::ProducerConfig;
use crate::command::{CommandSpec, DEFAULT_COMMAND_TIMEOUT_SECS};
use crate::fix::{ConsensusPolicy, FixStrategy, DEFAULT_CONTEXT_RADIUS};
use crate::prioritize::DEFAULT_BATCH_SIZE;
use crate::reasoning::openrouter::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const CONFIG_FILE: &str = "remedy.toml";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Failed attempts before a defect is blocked.
    pub max_attempts: u32,
    /// Defects attempted per `fix` run.
    pub batch_size: usize,
    /// Lines shown either side of an anchored defect.
    pub context_radius: usize,
    pub strategies: Vec<FixStrategy>,
    pub consensus: ConsensusPolicy,
    pub reasoning: ReasoningConfig,
    pub producers: Vec<ProducerConfig>,
    pub verification: Vec<VerificationCommand>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_size: DEFAULT_BATCH_SIZE,
            context_radius: DEFAULT_CONTEXT_RADIUS,
            strategies: FixStrategy::defaults(),
            consensus: ConsensusPolicy::default(),
            reasoning: ReasoningConfig::default(),
            producers: Vec::new(),
            verification: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Per-call limit for one strategy's request.
    pub timeout_secs: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 4096,
            timeout_secs: 120,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
        }
    }
}

impl ReasoningConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCommand {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default = "default_verification_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_verification_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl VerificationCommand {
    pub fn to_spec(&self, repo_root: &Path) -> Option<CommandSpec> {
        let (program, args) = self.command.split_first()?;
        Some(
            CommandSpec::new(&self.name, repo_root, program)
                .args(args)
                .timeout_secs(self.timeout_secs)
                .with_env(&self.env),
        )
    }
}

impl Config {
    pub fn path(repo_root: &Path) -> std::path::PathBuf {
        repo_root.join(CONFIG_FILE)
    }

    /// Load config from the repository, or return defaults.
    pub fn load(repo_root: &Path) -> Self {
        let path = Self::path(repo_root);
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        match Self::parse(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "config file is malformed, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Config>(content).map(Config::validated)
    }

    /// Clamp values that would make the pipeline meaningless.
    pub fn validated(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.batch_size = self.batch_size.max(1);
        self.reasoning.max_tokens = self.reasoning.max_tokens.max(1);
        self.reasoning.timeout_secs = self.reasoning.timeout_secs.max(1);
        if self.strategies.is_empty() {
            self.strategies = FixStrategy::defaults();
        }
        let mut seen = Vec::new();
        self.strategies.retain(|s| {
            let fresh = !seen.contains(s);
            seen.push(*s);
            fresh
        });
        self.producers.retain(|p| !p.command.is_empty());
        self.verification.retain(|v| !v.command.is_empty());
        self
    }
}
