use super::classifier::Classifier;
use crate::config::DecisionTreeConfig;
use crate::domain::errors::{MlError, MlResult};
use crate::domain::ml::Direction;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};
use std::fmt;
use tracing::debug;

type Tree = DecisionTreeClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

/// Fitted tree, or the single label seen when the training split holds one class.
#[derive(Serialize, Deserialize)]
enum TreeModel {
    Fitted(Tree),
    SingleClass(Direction),
}

/// SmartCore decision tree over direction codes.
#[derive(Serialize, Deserialize)]
pub struct DecisionTreeBackend {
    model: TreeModel,
    n_features: usize,
}

impl DecisionTreeBackend {
    pub fn fit(
        x: &Array2<f64>,
        y: &[Direction],
        config: &DecisionTreeConfig,
        seed: u64,
    ) -> MlResult<Self> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(MlError::shape(format!(
                "{} feature rows for {} labels",
                x.nrows(),
                y.len()
            )));
        }

        // smartcore needs two classes; a one-class split is a single leaf
        if let Some(&only) = y.first().filter(|first| y.iter().all(|d| d == *first)) {
            debug!("Decision tree training split holds only {}; fitting a single leaf", only);
            return Ok(Self {
                model: TreeModel::SingleClass(only),
                n_features: x.ncols(),
            });
        }

        let matrix = to_dense(x)?;
        let codes: Vec<u32> = y.iter().map(|d| d.code()).collect();

        let mut params = DecisionTreeClassifierParameters::default()
            .with_min_samples_split(config.min_samples_split)
            .with_min_samples_leaf(config.min_samples_leaf);
        if let Some(depth) = config.max_depth {
            params = params.with_max_depth(depth);
        }
        params.seed = Some(seed);

        let tree = DecisionTreeClassifier::fit(&matrix, &codes, params)
            .map_err(|e| MlError::backend(format!("Training error: {}", e)))?;

        Ok(Self {
            model: TreeModel::Fitted(tree),
            n_features: x.ncols(),
        })
    }
}

fn to_dense(x: &Array2<f64>) -> MlResult<DenseMatrix<f64>> {
    let rows: Vec<Vec<f64>> = x.outer_iter().map(|row| row.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows)
        .map_err(|e| MlError::backend(format!("Matrix creation failed: {}", e)))
}

impl Classifier for DecisionTreeBackend {
    fn predict(&self, x: &Array2<f64>) -> MlResult<Vec<Direction>> {
        if x.ncols() != self.n_features {
            return Err(MlError::shape(format!(
                "decision tree expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }

        let tree = match &self.model {
            TreeModel::Fitted(tree) => tree,
            TreeModel::SingleClass(only) => return Ok(vec![*only; x.nrows()]),
        };
        let codes = tree
            .predict(&to_dense(x)?)
            .map_err(|e| MlError::backend(format!("Prediction failed: {}", e)))?;

        codes
            .into_iter()
            .map(|code| {
                Direction::from_code(code)
                    .ok_or_else(|| MlError::backend(format!("unknown class code {}", code)))
            })
            .collect()
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

impl fmt::Debug for DecisionTreeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionTreeBackend")
            .field("n_features", &self.n_features)
            .field(
                "single_class",
                &match &self.model {
                    TreeModel::Fitted(_) => None,
                    TreeModel::SingleClass(only) => Some(*only),
                },
            )
            .finish_non_exhaustive()
    }
}
