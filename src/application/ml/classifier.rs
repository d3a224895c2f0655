use super::decision_tree::DecisionTreeBackend;
use super::mlp::MlpClassifier;
use crate::config::TrainingConfig;
use crate::domain::errors::{MlError, MlResult};
use crate::domain::ml::{Direction, ModelKind};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Capability shared by every fitted classifier variant.
pub trait Classifier {
    /// One direction per row of `x`.
    fn predict(&self, x: &Array2<f64>) -> MlResult<Vec<Direction>>;

    /// Width of the feature rows the classifier was fitted on.
    fn n_features(&self) -> usize;

    /// Mean accuracy on `(x, y)`, in `[0, 1]`.
    fn score(&self, x: &Array2<f64>, y: &[Direction]) -> MlResult<f64> {
        if y.is_empty() {
            return Err(MlError::InsufficientData {
                rows: 0,
                required: 1,
            });
        }
        let predictions = self.predict(x)?;
        if predictions.len() != y.len() {
            return Err(MlError::shape(format!(
                "{} predictions for {} labels",
                predictions.len(),
                y.len()
            )));
        }
        let correct = predictions.iter().zip(y).filter(|(p, t)| p == t).count();
        Ok(correct as f64 / y.len() as f64)
    }
}

/// Fitted classifier, tagged by variant.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model")]
pub enum ModelBackend {
    #[serde(rename = "DT")]
    DecisionTree(DecisionTreeBackend),
    #[serde(rename = "MLP")]
    MultilayerPerceptron(MlpClassifier),
}

impl ModelBackend {
    pub fn fit(
        kind: ModelKind,
        x: &Array2<f64>,
        y: &[Direction],
        config: &TrainingConfig,
        pool_size: Option<usize>,
    ) -> MlResult<Self> {
        match kind {
            ModelKind::DecisionTree => Ok(ModelBackend::DecisionTree(DecisionTreeBackend::fit(
                x,
                y,
                &config.decision_tree,
                config.seed,
            )?)),
            ModelKind::MultilayerPerceptron => Ok(ModelBackend::MultilayerPerceptron(
                MlpClassifier::fit(x, y, &config.mlp, config.seed, pool_size)?,
            )),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelBackend::DecisionTree(_) => ModelKind::DecisionTree,
            ModelBackend::MultilayerPerceptron(_) => ModelKind::MultilayerPerceptron,
        }
    }

    /// Structural check of restored parameters.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            ModelBackend::DecisionTree(_) => Ok(()),
            ModelBackend::MultilayerPerceptron(mlp) => mlp.validate(),
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            ModelBackend::DecisionTree(tree) => tree,
            ModelBackend::MultilayerPerceptron(mlp) => mlp,
        }
    }
}

impl Classifier for ModelBackend {
    fn predict(&self, x: &Array2<f64>) -> MlResult<Vec<Direction>> {
        self.inner().predict(x)
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn score(&self, x: &Array2<f64>, y: &[Direction]) -> MlResult<f64> {
        self.inner().score(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct AlwaysUp;

    impl Classifier for AlwaysUp {
        fn predict(&self, x: &Array2<f64>) -> MlResult<Vec<Direction>> {
            Ok(vec![Direction::Up; x.nrows()])
        }

        fn n_features(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_score_is_accuracy() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [Direction::Up, Direction::Down, Direction::Up, Direction::Up];
        assert_eq!(AlwaysUp.score(&x, &y).unwrap(), 0.75);
    }

    #[test]
    fn test_score_rejects_empty_labels() {
        let x = Array2::<f64>::zeros((0, 1));
        assert!(AlwaysUp.score(&x, &[]).is_err());
    }

    #[test]
    fn test_backend_dispatch_by_kind() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.1, 0.9], [0.9, 0.2]];
        let y = [Direction::Down, Direction::Up, Direction::Down, Direction::Up];
        let mut config = TrainingConfig::default();
        config.mlp.hidden_layer_sizes = vec![2];
        config.mlp.max_epochs = 5;

        let tree = ModelBackend::fit(ModelKind::DecisionTree, &x, &y, &config, None).unwrap();
        assert_eq!(tree.kind(), ModelKind::DecisionTree);
        assert_eq!(tree.n_features(), 2);

        let mlp =
            ModelBackend::fit(ModelKind::MultilayerPerceptron, &x, &y, &config, Some(1)).unwrap();
        assert_eq!(mlp.kind(), ModelKind::MultilayerPerceptron);
        assert_eq!(mlp.predict(&x).unwrap().len(), 4);
    }
}
