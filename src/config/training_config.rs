//! Training configuration, loaded from environment variables or a TOML file.

use crate::application::ml::mlp::Activation;
use crate::application::ml::window_builder::min_samples_for_split;
use crate::domain::errors::{MlError, MlResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Decision tree parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionTreeConfig {
    pub max_depth: Option<u16>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self {
            max_depth: Some(4),
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

/// Multilayer perceptron parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    /// Empty means one hidden layer sized by the geometric pyramid rule.
    pub hidden_layer_sizes: Vec<usize>,
    pub activation: Activation,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    pub tolerance: f64,
    pub n_iter_no_change: usize,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: Vec::new(),
            activation: Activation::Relu,
            learning_rate: 1e-3,
            l2_penalty: 1e-4,
            batch_size: 128,
            max_epochs: 200,
            tolerance: 1e-4,
            n_iter_no_change: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub window_size: usize,
    /// Share of the most recent windowed samples held out for the test score.
    pub test_fraction: f64,
    pub seed: u64,
    pub decision_tree: DecisionTreeConfig,
    pub mlp: MlpConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            window_size: 60,
            test_fraction: 0.2,
            seed: 42,
            decision_tree: DecisionTreeConfig::default(),
            mlp: MlpConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}='{}': {}", key, raw, e)),
        _ => Ok(None),
    }
}

impl TrainingConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("ML_WINDOW_SIZE")? {
            config.window_size = v;
        }
        if let Some(v) = env_parse("ML_TEST_FRACTION")? {
            config.test_fraction = v;
        }
        if let Some(v) = env_parse("ML_SEED")? {
            config.seed = v;
        }

        // 0 disables the depth limit
        if let Some(v) = env_parse::<u16>("ML_DT_MAX_DEPTH")? {
            config.decision_tree.max_depth = (v > 0).then_some(v);
        }

        if let Ok(raw) = env::var("ML_MLP_HIDDEN_LAYERS") {
            config.mlp.hidden_layer_sizes = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to parse ML_MLP_HIDDEN_LAYERS")?;
        }
        if let Some(v) = env_parse("ML_MLP_ACTIVATION")? {
            config.mlp.activation = v;
        }
        if let Some(v) = env_parse("ML_MLP_LEARNING_RATE")? {
            config.mlp.learning_rate = v;
        }
        if let Some(v) = env_parse("ML_MLP_MAX_EPOCHS")? {
            config.mlp.max_epochs = v;
        }

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse training config TOML")
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read training config {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> MlResult<()> {
        let invalid = |reason: &str| {
            Err(MlError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.window_size == 0 {
            return invalid("window_size must be at least 1");
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return invalid("test_fraction must be within (0, 1)");
        }
        if min_samples_for_split(self.test_fraction).is_none() {
            return invalid("test_fraction is too close to 1 to keep a training sample");
        }
        if self.decision_tree.min_samples_split < 2 {
            return invalid("decision_tree.min_samples_split must be at least 2");
        }
        if self.decision_tree.min_samples_leaf == 0 {
            return invalid("decision_tree.min_samples_leaf must be at least 1");
        }
        if self.mlp.hidden_layer_sizes.contains(&0) {
            return invalid("mlp.hidden_layer_sizes entries must be positive");
        }
        if !(self.mlp.learning_rate > 0.0 && self.mlp.learning_rate.is_finite()) {
            return invalid("mlp.learning_rate must be positive");
        }
        if self.mlp.l2_penalty < 0.0 {
            return invalid("mlp.l2_penalty must not be negative");
        }
        if self.mlp.batch_size == 0 || self.mlp.max_epochs == 0 {
            return invalid("mlp.batch_size and mlp.max_epochs must be at least 1");
        }
        Ok(())
    }
}
