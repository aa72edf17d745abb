use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deliberation::RunConfig;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible inference endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Base URL, e.g. `http://localhost:8000/v1`.
    pub url: String,
    /// Model for analysts, debaters and the trader.
    pub quick_model: String,
    /// Model for the judges and the final arbiter.
    pub deep_model: String,
    /// Bearer token; read from `DESK_LLM_API_KEY` or `OPENAI_API_KEY`,
    /// never written back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Sampling temperature sent with every request.
    pub temperature: f32,
    /// Completion length cap per request.
    pub max_tokens: u32,
    /// Ask the quick model to score debate rounds for the consensus heuristic.
    pub score_debates: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/v1".into(),
            quick_model: "gpt-4o-mini".into(),
            deep_model: "o4-mini".into(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 2048,
            score_debates: false,
        }
    }
}

/// Top-level desk configuration: TOML file, then environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Chat endpoint and model names.
    pub llm: LlmSettings,
    /// Cached market data, `<data_dir>/<SUBJECT>/<YYYY-MM-DD>/<kind>.txt`.
    pub data_dir: PathBuf,
    /// Where run logs are written.
    pub results_dir: PathBuf,
    /// Checkpoint directory; `None` disables checkpointing.
    pub checkpoint_dir: Option<PathBuf>,
    /// Pipeline settings under `[run]`: analysts, debate caps, timeouts
    /// and the step budget.
    pub run: RunConfig,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            checkpoint_dir: Some(PathBuf::from("results/checkpoints")),
            run: RunConfig::default(),
        }
    }
}

impl DeskConfig {
    /// Load from a TOML file, or defaults when no path is given, then
    /// apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config
            .run
            .validate()
            .context("Invalid run configuration")?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `DESK_*` overrides. `lookup` is the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("DESK_LLM_URL") {
            self.llm.url = url;
        }
        if let Some(model) = lookup("DESK_LLM_MODEL") {
            self.llm.quick_model = model;
        }
        if let Some(model) = lookup("DESK_DEEP_MODEL") {
            self.llm.deep_model = model;
        }
        if let Some(key) = lookup("DESK_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(dir) = lookup("DESK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DESK_RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DESK_CHECKPOINT_DIR") {
            self.checkpoint_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(budget) = lookup("DESK_STEP_BUDGET") {
            self.run.step_budget = budget
                .parse()
                .with_context(|| format!("DESK_STEP_BUDGET is not a number: {:?}", budget))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DeskConfig::default();
        assert_eq!(config.run.step_budget, 100);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = DeskConfig::from_toml(
            r#"
            data_dir = "/srv/market"

            [llm]
            url = "http://gpu-01:8000/v1"
            deep_model = "qwen-72b"

            [run]
            step_budget = 40

            [run.research_debate]
            max_rounds = 3

            [run.research_debate.consensus]
            phrases = ["we agree"]
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/market"));
        assert_eq!(config.llm.url, "http://gpu-01:8000/v1");
        assert_eq!(config.llm.deep_model, "qwen-72b");
        assert_eq!(config.llm.quick_model, "gpt-4o-mini");
        assert_eq!(config.run.step_budget, 40);
        assert_eq!(config.run.research_debate.max_rounds, 3);
        assert_eq!(config.run.research_debate.consensus.phrases, vec!["we agree"]);
        assert_eq!(config.run.risk_debate.max_rounds, 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DeskConfig::default();
        config
            .apply_env(env(&[
                ("DESK_LLM_URL", "http://other/v1"),
                ("OPENAI_API_KEY", "sk-test"),
                ("DESK_STEP_BUDGET", "12"),
                ("DESK_CHECKPOINT_DIR", ""),
            ]))
            .unwrap();
        assert_eq!(config.llm.url, "http://other/v1");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.run.step_budget, 12);
        assert!(config.checkpoint_dir.is_none());
    }

    #[test]
    fn test_desk_key_wins_over_openai_key() {
        let mut config = DeskConfig::default();
        config
            .apply_env(env(&[("DESK_LLM_API_KEY", "desk"), ("OPENAI_API_KEY", "openai")]))
            .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("desk"));
    }

    #[test]
    fn test_bad_step_budget_rejected() {
        let mut config = DeskConfig::default();
        let err = config
            .apply_env(env(&[("DESK_STEP_BUDGET", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("DESK_STEP_BUDGET"));
        assert!(err.to_string().contains("\"lots\""));
    }

    #[test]
    fn test_api_key_never_serialized() {
        let mut config = DeskConfig::default();
        config.llm.api_key = Some("secret".into());
        let text = serde_json::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
    }
}
