//! Engine configuration, loadable from TOML.
//!
//! Every section falls back to its defaults, so a file only needs the keys it changes.
//! Environment variables `IMPLICIT_SEARCH_<KEY>` override a handful of run-wide settings.

use crate::error::ConfigError;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub run: RunConfig,
    pub best_first: BestFirstConfig,
    pub random_completion: RandomCompletionConfig,
    pub mcts: MctsConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub timeout_ms: Option<u64>,
    pub grace_period_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            timeout_ms: None,
            grace_period_ms: 1000,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Which generated children best-first search drops before they reach OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discarding {
    /// Keep every child.
    None,
    /// Drop a child whose state already sits on OPEN with an equal or better score, and
    /// replace a worse OPEN copy.
    OpenOnly,
    /// Like `OpenOnly`, and also drop every child whose state was expanded before. States
    /// reachable at different costs can lose their cheaper path this way.
    All,
}

impl Default for Discarding {
    fn default() -> Self {
        Discarding::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BestFirstConfig {
    /// Threads used to evaluate the children of one expansion.
    pub threads: usize,
    pub discarding: Discarding,
    /// Children whose evaluation takes longer are pruned.
    pub evaluation_timeout_ms: Option<u64>,
    /// Prune children whose evaluation fails instead of failing the run.
    pub tolerate_evaluation_failures: bool,
}

impl Default for BestFirstConfig {
    fn default() -> Self {
        BestFirstConfig {
            threads: 1,
            discarding: Discarding::None,
            evaluation_timeout_ms: None,
            tolerate_evaluation_failures: false,
        }
    }
}

impl BestFirstConfig {
    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    Best,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Mean
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomCompletionConfig {
    /// Successful completions wanted per evaluation.
    pub samples: usize,
    /// Completions drawn at most per evaluation, successful or not.
    pub max_samples: usize,
    pub sample_timeout_ms: Option<u64>,
    /// Completions longer than this many actions count as failed.
    pub max_depth: usize,
    pub aggregation: Aggregation,
    pub seed: u64,
}

impl Default for RandomCompletionConfig {
    fn default() -> Self {
        RandomCompletionConfig {
            samples: 3,
            max_samples: 10,
            sample_timeout_ms: None,
            max_depth: 1000,
            aggregation: Aggregation::Mean,
            seed: 0,
        }
    }
}

impl RandomCompletionConfig {
    pub fn sample_timeout(&self) -> Option<Duration> {
        self.sample_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Minimize,
    Maximize,
}

impl Default for Objective {
    fn default() -> Self {
        Objective::Minimize
    }
}

impl Objective {
    /// Maps a score onto a reward that policies maximize.
    pub fn reward(self, score: f64) -> f64 {
        match self {
            Objective::Minimize => -score,
            Objective::Maximize => score,
        }
    }

    pub fn is_better(self, a: f64, b: f64) -> bool {
        self.reward(a) > self.reward(b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MctsConfig {
    pub max_iterations: Option<u64>,
    /// Rollouts stop as dead ends after this many actions.
    pub max_depth: usize,
    pub objective: Objective,
    /// Exclude fully explored subtrees from selection; the search completes when the root
    /// is fully explored.
    pub taboo_exhausted: bool,
    pub seed: u64,
}

impl Default for MctsConfig {
    fn default() -> Self {
        MctsConfig {
            max_iterations: None,
            max_depth: 10_000,
            objective: Objective::Minimize,
            taboo_exhausted: true,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Nodes per job.
    pub batch_size: usize,
    pub discovery_interval_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            batch_size: 4,
            discovery_interval_ms: 500,
            poll_interval_ms: 20,
        }
    }
}

impl CoordinatorConfig {
    /// Short intervals for tests.
    pub fn for_testing() -> Self {
        CoordinatorConfig {
            batch_size: 2,
            discovery_interval_ms: 10,
            poll_interval_ms: 2,
        }
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

macro_rules! env_override {
    ($vars:expr, $config:expr, $($field:ident).+, $key:expr) => {
        if let Some(v) = $vars($key) {
            $config.$($field).+ = v
                .parse()
                .map_err(|_| ConfigError::InvalidOverride { key: $key.to_string(), value: v.clone() })?;
        }
    };
    ($vars:expr, $config:expr, $($field:ident).+, $key:expr, optional) => {
        if let Some(v) = $vars($key) {
            $config.$($field).+ = Some(v
                .parse()
                .map_err(|_| ConfigError::InvalidOverride { key: $key.to_string(), value: v.clone() })?);
        }
    };
}

impl SearchConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SearchConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engines cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rc = &self.random_completion;
        let co = &self.coordinator;
        let checks = [
            (self.best_first.threads == 0, "best_first.threads", "must be at least 1"),
            (rc.samples == 0, "random_completion.samples", "must be at least 1"),
            (rc.max_samples < rc.samples, "random_completion.max_samples", "must not be below samples"),
            (co.batch_size == 0, "coordinator.batch_size", "must be at least 1"),
            (co.discovery_interval_ms == 0, "coordinator.discovery_interval_ms", "must be positive"),
            (co.poll_interval_ms == 0, "coordinator.poll_interval_ms", "must be positive"),
        ];
        match checks.iter().find(|(failed, _, _)| *failed) {
            Some(&(_, key, reason)) => Err(ConfigError::Invalid { key, reason }),
            None => Ok(()),
        }
    }

    /// Reads a TOML file and applies the environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("loading search config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let mut config = SearchConfig::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, vars: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        env_override!(vars, self, best_first.threads, "IMPLICIT_SEARCH_THREADS");
        env_override!(vars, self, run.timeout_ms, "IMPLICIT_SEARCH_TIMEOUT_MS", optional);
        env_override!(vars, self, run.grace_period_ms, "IMPLICIT_SEARCH_GRACE_MS");
        if let Some(v) = vars("IMPLICIT_SEARCH_SEED") {
            let seed: u64 = v.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "IMPLICIT_SEARCH_SEED".to_string(),
                value: v.clone(),
            })?;
            self.mcts.seed = seed;
            self.random_completion.seed = seed;
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_files_keep_defaults() {
        let config = SearchConfig::from_toml_str(
            r#"
            [best_first]
            threads = 4
            discarding = "open_only"

            [random_completion]
            aggregation = "best"

            [mcts]
            objective = "maximize"
            max_iterations = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.best_first.threads, 4);
        assert_eq!(config.best_first.discarding, Discarding::OpenOnly);
        assert!(!config.best_first.tolerate_evaluation_failures);
        assert_eq!(config.random_completion.aggregation, Aggregation::Best);
        assert_eq!(config.random_completion.samples, 3);
        assert_eq!(config.mcts.objective, Objective::Maximize);
        assert_eq!(config.mcts.max_iterations, Some(500));
        assert_eq!(config.run, RunConfig::default());
        assert_eq!(config.coordinator, CoordinatorConfig::default());
    }

    #[test]
    fn unknown_discarding_is_rejected() {
        let e = SearchConfig::from_toml_str("[best_first]\ndiscarding = \"sometimes\"");
        assert!(matches!(e, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn overrides() {
        let vars: HashMap<&str, &str> = vec![
            ("IMPLICIT_SEARCH_THREADS", "8"),
            ("IMPLICIT_SEARCH_TIMEOUT_MS", "2500"),
            ("IMPLICIT_SEARCH_SEED", "42"),
        ]
        .into_iter()
        .collect();
        let mut config = SearchConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.best_first.threads, 8);
        assert_eq!(config.run.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.run.grace_period(), Duration::from_millis(1000));
        assert_eq!((config.mcts.seed, config.random_completion.seed), (42, 42));

        let e = config.apply_overrides(|k| {
            if k == "IMPLICIT_SEARCH_GRACE_MS" {
                Some("soon".to_string())
            } else {
                None
            }
        });
        assert!(matches!(e, Err(ConfigError::InvalidOverride { .. })));
    }

    #[test]
    fn unusable_values_are_rejected() {
        let mut config = SearchConfig::default();
        let e = config.apply_overrides(|k| {
            if k == "IMPLICIT_SEARCH_THREADS" {
                Some("0".to_string())
            } else {
                None
            }
        });
        assert!(matches!(e, Err(ConfigError::Invalid { key: "best_first.threads", .. })));

        let e = SearchConfig::from_toml_str("[random_completion]\nsamples = 0");
        assert!(matches!(e, Err(ConfigError::Invalid { key: "random_completion.samples", .. })));
        let e = SearchConfig::from_toml_str("[random_completion]\nsamples = 5\nmax_samples = 4");
        assert!(matches!(e, Err(ConfigError::Invalid { key: "random_completion.max_samples", .. })));
        let e = SearchConfig::from_toml_str("[coordinator]\nbatch_size = 0");
        assert!(matches!(e, Err(ConfigError::Invalid { key: "coordinator.batch_size", .. })));
        assert!(SearchConfig::default().validate().is_ok());
        assert!(SearchConfig {
            coordinator: CoordinatorConfig::for_testing(),
            ..SearchConfig::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn objective_orientation() {
        assert!(Objective::Minimize.is_better(1.0, 2.0));
        assert!(Objective::Maximize.is_better(2.0, 1.0));
        assert_eq!(Objective::Minimize.reward(3.0), -3.0);
    }
}
