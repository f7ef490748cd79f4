use std::path::PathBuf;
use std::time::Duration;

use crate::chat::pipeline::PipelineSettings;

const DEFAULT_AGENT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AGENT_MODEL: &str = "gpt-4o";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub agent_base_url: String,
    pub agent_api_key: Option<String>,
    pub agent_model: String,
    pub prompts_path: Option<PathBuf>,
    pub followup_delay_ms: u64,
    pub commit_retries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a Config from a key lookup (as env vars would supply it).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        Config {
            port: value("PORT").and_then(|v| v.parse().ok()).unwrap_or(8081),
            sentry_dsn: value("SENTRY_DSN"),
            environment: value("ENVIRONMENT").unwrap_or_else(|| "local".to_string()),
            agent_base_url: value("TERRA_AGENT_BASE_URL")
                .unwrap_or_else(|| DEFAULT_AGENT_BASE_URL.to_string()),
            agent_api_key: value("TERRA_AGENT_API_KEY"),
            agent_model: value("TERRA_AGENT_MODEL")
                .unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string()),
            prompts_path: value("TERRA_PROMPTS_PATH").map(PathBuf::from),
            followup_delay_ms: value("TERRA_FOLLOWUP_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            commit_retries: value("TERRA_COMMIT_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            followup_delay: Duration::from_millis(self.followup_delay_ms),
            commit_retries: self.commit_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config(&[]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.environment, "local");
        assert!(config.sentry_dsn.is_none());
        assert_eq!(config.agent_base_url, "https://api.openai.com/v1");
        assert_eq!(config.agent_model, "gpt-4o");
        assert!(config.agent_api_key.is_none());
        assert!(config.prompts_path.is_none());
        assert_eq!(config.followup_delay_ms, 500);
        assert_eq!(config.commit_retries, 3);
    }

    #[test]
    fn test_config_invalid_port_uses_default() {
        assert_eq!(config(&[("PORT", "not-a-number")]).port, 8081);
    }

    #[test]
    fn test_config_valid_port() {
        assert_eq!(config(&[("PORT", "3000")]).port, 3000);
    }

    #[test]
    fn test_config_empty_values_are_none() {
        let config = config(&[("SENTRY_DSN", ""), ("TERRA_AGENT_API_KEY", "  ")]);
        assert!(config.sentry_dsn.is_none());
        assert!(config.agent_api_key.is_none());
    }

    #[test]
    fn test_config_agent_settings() {
        let config = config(&[
            ("TERRA_AGENT_BASE_URL", "http://localhost:11434/v1"),
            ("TERRA_AGENT_API_KEY", "sk-test"),
            ("TERRA_AGENT_MODEL", "llava"),
            ("TERRA_PROMPTS_PATH", "/etc/terra/prompts.yaml"),
        ]);
        assert_eq!(config.agent_base_url, "http://localhost:11434/v1");
        assert_eq!(config.agent_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.agent_model, "llava");
        assert_eq!(
            config.prompts_path,
            Some(PathBuf::from("/etc/terra/prompts.yaml"))
        );
    }

    #[test]
    fn test_pipeline_settings_from_config() {
        let settings = config(&[
            ("TERRA_FOLLOWUP_DELAY_MS", "0"),
            ("TERRA_COMMIT_RETRIES", "-1"),
        ])
        .pipeline_settings();
        assert!(settings.followup_delay.is_zero());
        assert_eq!(settings.commit_retries, 3);
    }
}
