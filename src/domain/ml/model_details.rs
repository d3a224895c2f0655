use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Classifier variant behind a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "DT")]
    DecisionTree,
    #[serde(rename = "MLP")]
    MultilayerPerceptron,
}

impl ModelKind {
    pub fn tag(self) -> &'static str {
        match self {
            ModelKind::DecisionTree => "DT",
            ModelKind::MultilayerPerceptron => "MLP",
        }
    }

    /// Variants fed with standardized features.
    pub fn requires_scaling(self) -> bool {
        matches!(self, ModelKind::MultilayerPerceptron)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dt" | "decision_tree" | "decision-tree" => Ok(ModelKind::DecisionTree),
            "mlp" | "multilayer_perceptron" | "multilayer-perceptron" => {
                Ok(ModelKind::MultilayerPerceptron)
            }
            _ => anyhow::bail!("Invalid model type: {}. Must be 'dt' or 'mlp'", s),
        }
    }
}

/// Reported metadata of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub model_type: ModelKind,
    pub training_score: f64,
    pub test_score: f64,
    /// (windowed samples, features per sample)
    pub number_of_training_instances: (usize, usize),
    pub classes: BTreeMap<String, u32>,
    pub scaler_used: bool,
    pub dump_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("DT".parse::<ModelKind>().unwrap(), ModelKind::DecisionTree);
        assert_eq!(
            "mlp".parse::<ModelKind>().unwrap(),
            ModelKind::MultilayerPerceptron
        );
        assert!("svm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_details_serialize_with_exact_keys() {
        let details = ModelDetails {
            model_type: ModelKind::MultilayerPerceptron,
            training_score: 0.73,
            test_score: 0.68,
            number_of_training_instances: (100, 30),
            classes: crate::domain::ml::direction::classes(),
            scaler_used: true,
            dump_file: None,
        };

        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["model_type"], "MLP");
        assert_eq!(value["number_of_training_instances"][1], 30);
        assert_eq!(value["classes"]["UP"], 1);
        assert_eq!(value["scaler_used"], true);
        assert!(value["dump_file"].is_null());
    }
}
