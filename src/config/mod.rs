//! Configuration module for Rustrade ML.
//!
//! Training parameters come from environment variables (`ML_*`) or a TOML file.

mod training_config;

pub use training_config::{DecisionTreeConfig, MlpConfig, TrainingConfig};
