use crate::classifier::{Check, DEFAULT_RUNTIME_TOLERANCE_SECS, DEFAULT_STDERR_SIMILARITY_THRESHOLD};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CampaignSettings {
    /// Number of mutated cases to run before the campaign stops.
    #[serde(default = "default_iterations")]
    pub max_iterations: u64,
    /// Byte-replacement rounds applied to each picked seed.
    #[serde(default = "default_mutations_per_case")]
    pub mutations_per_case: usize,
}

pub fn default_iterations() -> u64 {
    10_000
}

fn default_mutations_per_case() -> usize {
    10
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_iterations(),
            mutations_per_case: default_mutations_per_case(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Per-run deadline; a target still alive at the deadline is killed.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ClassifierSettings {
    /// Runs whose stderr matching ratio falls below this are flagged.
    #[serde(default = "default_stderr_similarity_threshold")]
    pub stderr_similarity_threshold: f64,
    /// Half-width, in seconds, of the accepted runtime window.
    #[serde(default = "default_runtime_tolerance_secs")]
    pub runtime_tolerance_secs: f64,
    /// Checks skipped while classifying mutated cases. The defaults keep
    /// the mutation loop focused on hard signals (patterns and exit codes);
    /// seed sanity checks use their own, stricter set.
    #[serde(default = "default_loop_ignore")]
    pub loop_ignore: Vec<Check>,
}

fn default_stderr_similarity_threshold() -> f64 {
    DEFAULT_STDERR_SIMILARITY_THRESHOLD
}

fn default_runtime_tolerance_secs() -> f64 {
    DEFAULT_RUNTIME_TOLERANCE_SECS
}

fn default_loop_ignore() -> Vec<Check> {
    vec![Check::Stderr, Check::Timeout, Check::Runtime]
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            stderr_similarity_threshold: default_stderr_similarity_threshold(),
            runtime_tolerance_secs: default_runtime_tolerance_secs(),
            loop_ignore: default_loop_ignore(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OddityConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
}

impl OddityConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: OddityConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_cover_every_knob() {
        let config = OddityConfig::default();
        assert_eq!(config.campaign.max_iterations, 10_000);
        assert_eq!(config.campaign.mutations_per_case, 10);
        assert_eq!(config.executor.timeout_ms, 3000);
        assert_eq!(config.classifier.stderr_similarity_threshold, 0.6);
        assert_eq!(config.classifier.runtime_tolerance_secs, 1.0);
        assert_eq!(
            config.classifier.loop_ignore,
            vec![Check::Stderr, Check::Timeout, Check::Runtime],
        );
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: OddityConfig = toml::from_str(
            r#"
            [campaign]
            max-iterations = 50

            [executor]
            timeout-ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.campaign.max_iterations, 50);
        assert_eq!(config.campaign.mutations_per_case, 10);
        assert_eq!(config.executor.timeout_ms, 500);
        assert_eq!(config.classifier.runtime_tolerance_secs, 1.0);
    }

    #[test]
    fn check_names_deserialize_in_kebab_case() {
        let config: OddityConfig = toml::from_str(
            r#"
            [classifier]
            loop-ignore = ["stdout", "stderr", "return", "timeout", "runtime"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.classifier.loop_ignore,
            vec![
                Check::Stdout,
                Check::Stderr,
                Check::ReturnCode,
                Check::Timeout,
                Check::Runtime,
            ],
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<OddityConfig, _> = toml::from_str(
            r#"
            [campaign]
            max-iterations = 50
            unknown-knob = true
            "#,
        );
        assert!(result.is_err());
    }
}
