//! Train / predict / persist lifecycle shared by every classifier variant.
//!
//! A `MachineLearningModel` starts EMPTY and becomes TRAINED exactly once, through
//! either `train_model` or `load_model`. There is no way back to EMPTY: retraining
//! means constructing a new instance. Prediction, details and saving are only
//! available in the TRAINED state.

use super::classifier::{Classifier, ModelBackend};
use super::scaler::StandardScaler;
use super::window_builder::{FeatureWindowBuilder, WindowedDataset, min_samples_for_split};
use crate::config::TrainingConfig;
use crate::domain::errors::{MlError, MlResult};
use crate::domain::ml::direction::classes;
use crate::domain::ml::{Direction, FeatureTable, ModelDetails, ModelKind};
use crate::infrastructure::persistence::model_artifact;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Everything a trained model needs to predict, and everything that gets persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainedModel {
    pub(crate) backend: ModelBackend,
    pub(crate) scaler: Option<StandardScaler>,
    pub(crate) window_size: usize,
    pub(crate) columns: Vec<String>,
    pub(crate) details: ModelDetails,
}

impl TrainedModel {
    /// Structural checks applied to restored state.
    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        let n_features = self.window_size * self.columns.len();

        if self.window_size == 0 || self.columns.is_empty() {
            return Err("empty window shape".to_string());
        }
        if self.details.model_type != self.backend.kind() {
            return Err(format!(
                "model_type {} does not match classifier {}",
                self.details.model_type,
                self.backend.kind()
            ));
        }
        if self.details.classes != classes() {
            return Err(format!("unexpected classes {:?}", self.details.classes));
        }
        self.backend.validate()?;
        if self.backend.n_features() != n_features
            || self.details.number_of_training_instances.1 != n_features
        {
            return Err(format!(
                "classifier width {} does not match window {} x {} columns",
                self.backend.n_features(),
                self.window_size,
                self.columns.len()
            ));
        }
        match &self.scaler {
            Some(scaler) if self.details.scaler_used => {
                scaler.validate()?;
                if scaler.n_features() != Some(n_features) {
                    return Err("scaler parameters missing or of wrong width".to_string());
                }
            }
            None if !self.details.scaler_used => {}
            _ => return Err("scaler_used flag disagrees with stored scaler".to_string()),
        }
        for score in [self.details.training_score, self.details.test_score] {
            if !(0.0..=1.0).contains(&score) {
                return Err(format!("score {} outside [0, 1]", score));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum ModelState {
    Empty,
    Trained(Box<TrainedModel>),
}

/// Price direction model orchestrating windowing, scaling, fitting and persistence.
#[derive(Debug)]
pub struct MachineLearningModel {
    /// `None` for loader-only instances.
    kind: Option<ModelKind>,
    config: TrainingConfig,
    state: ModelState,
}

fn report(verbose: bool, message: std::fmt::Arguments<'_>) {
    if verbose {
        info!("{}", message);
    } else {
        debug!("{}", message);
    }
}

impl MachineLearningModel {
    pub fn new(kind: ModelKind) -> Self {
        Self::with_config(kind, TrainingConfig::default())
    }

    pub fn with_config(kind: ModelKind, config: TrainingConfig) -> Self {
        Self {
            kind: Some(kind),
            config,
            state: ModelState::Empty,
        }
    }

    pub fn decision_tree() -> Self {
        Self::new(ModelKind::DecisionTree)
    }

    pub fn multilayer_perceptron() -> Self {
        Self::new(ModelKind::MultilayerPerceptron)
    }

    /// Instance that can only be initialized from a saved artifact.
    pub fn loaded() -> Self {
        Self {
            kind: None,
            config: TrainingConfig::default(),
            state: ModelState::Empty,
        }
    }

    /// Restores a model saved with `save_model`.
    pub fn from_file(file_name: impl AsRef<Path>) -> MlResult<Self> {
        let mut model = Self::loaded();
        model.load_model(file_name)?;
        Ok(model)
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ModelState::Trained(_))
    }

    /// Variant of the trained model, or the one this instance would train.
    pub fn model_kind(&self) -> Option<ModelKind> {
        match &self.state {
            ModelState::Trained(trained) => Some(trained.details.model_type),
            ModelState::Empty => self.kind,
        }
    }

    /// Rows expected by `predict`.
    pub fn window_size(&self) -> usize {
        match &self.state {
            ModelState::Trained(trained) => trained.window_size,
            ModelState::Empty => self.config.window_size,
        }
    }

    /// Column layout recorded at training time.
    pub fn feature_columns(&self) -> MlResult<&[String]> {
        Ok(&self.trained()?.columns)
    }

    fn trained(&self) -> MlResult<&TrainedModel> {
        match &self.state {
            ModelState::Trained(trained) => Ok(trained),
            ModelState::Empty => Err(MlError::NotTrained),
        }
    }

    /// Builds windows from `input_data`, holds out the most recent samples for the
    /// test score, fits the scaler (when the variant needs one) and the classifier
    /// on the training split, then records the scores.
    ///
    /// On any error the model stays EMPTY.
    pub fn train_model(
        &mut self,
        input_data: &FeatureTable,
        pool_size: Option<usize>,
        verbose: bool,
    ) -> MlResult<()> {
        if self.is_trained() {
            return Err(MlError::AlreadyTrained);
        }
        let kind = self.kind.ok_or(MlError::TrainingNotSupported)?;
        self.config.validate()?;

        let window_size = self.config.window_size;
        let min_split = min_samples_for_split(self.config.test_fraction).ok_or_else(|| {
            MlError::InvalidConfig {
                reason: format!(
                    "test_fraction {} leaves no training sample",
                    self.config.test_fraction
                ),
            }
        })?;
        let required = window_size.saturating_add(min_split);
        if input_data.len() < required {
            return Err(MlError::InsufficientData {
                rows: input_data.len(),
                required,
            });
        }

        report(
            verbose,
            format_args!(
                "Train {} model on {} rows x {} columns (window {})",
                kind,
                input_data.len(),
                input_data.column_count(),
                window_size
            ),
        );

        let start = Instant::now();
        let (shape, train, test) = {
            let dataset = FeatureWindowBuilder::new(window_size)?.build_dataset(input_data)?;
            let shape = dataset.shape();
            let (train, test) = dataset.split_chronological(self.config.test_fraction)?;
            (shape, train, test)
        };
        report(
            verbose,
            format_args!(
                "- ml data creation time: {:?}, {} training / {} test samples",
                start.elapsed(),
                train.len(),
                test.len()
            ),
        );

        let WindowedDataset {
            features: train_x,
            labels: train_y,
        } = train;
        let WindowedDataset {
            features: test_x,
            labels: test_y,
        } = test;

        let (train_x, test_x, scaler) = if kind.requires_scaling() {
            let mut scaler = StandardScaler::new();
            let train_x = scaler.fit_transform(&train_x)?;
            let test_x = scaler.transform(&test_x)?;
            report(verbose, format_args!("- scaler fitted on training split"));
            (train_x, test_x, Some(scaler))
        } else {
            (train_x, test_x, None)
        };

        if kind == ModelKind::DecisionTree && pool_size.is_some() {
            debug!("pool_size has no effect on the decision tree backend");
        }

        let fit_start = Instant::now();
        let backend = ModelBackend::fit(kind, &train_x, &train_y, &self.config, pool_size)?;
        let training_score = backend.score(&train_x, &train_y)?;
        let test_score = backend.score(&test_x, &test_y)?;
        report(
            verbose,
            format_args!(
                "- model fitted in {:?}: training score {:.4}, test score {:.4}",
                fit_start.elapsed(),
                training_score,
                test_score
            ),
        );

        let details = ModelDetails {
            model_type: kind,
            training_score,
            test_score,
            number_of_training_instances: shape,
            classes: classes(),
            scaler_used: scaler.is_some(),
            dump_file: None,
        };
        report(verbose, format_args!("- model details: {:?}", details));

        self.state = ModelState::Trained(Box::new(TrainedModel {
            backend,
            scaler,
            window_size,
            columns: input_data.columns().to_vec(),
            details,
        }));
        Ok(())
    }

    pub fn model_details(&self) -> MlResult<ModelDetails> {
        Ok(self.trained()?.details.clone())
    }

    /// Direction of the period following `input_data`, which must hold exactly
    /// `window_size` rows with the training column layout.
    pub fn predict(&self, input_data: &FeatureTable) -> MlResult<Direction> {
        let trained = self.trained()?;

        if input_data.column_count() != trained.columns.len() {
            return Err(MlError::shape(format!(
                "prediction input has {} columns, model trained on {}",
                input_data.column_count(),
                trained.columns.len()
            )));
        }
        if input_data.columns() != trained.columns.as_slice() {
            return Err(MlError::shape(
                "prediction input columns differ from the training layout",
            ));
        }

        let row = FeatureWindowBuilder::new(trained.window_size)?.prediction_row(input_data)?;
        let row = match &trained.scaler {
            Some(scaler) => scaler.transform(&row)?,
            None => row,
        };

        trained
            .backend
            .predict(&row)?
            .into_iter()
            .next()
            .ok_or_else(|| MlError::backend("No prediction returned"))
    }

    /// Writes the full model state to `file_name`, replacing any existing file,
    /// and records the path as `dump_file`.
    pub fn save_model(&mut self, file_name: impl AsRef<Path>) -> MlResult<()> {
        let path = file_name.as_ref();
        let trained = match &mut self.state {
            ModelState::Trained(trained) => trained,
            ModelState::Empty => return Err(MlError::NotTrained),
        };

        let previous = trained.details.dump_file.replace(path.to_path_buf());
        if let Err(e) = model_artifact::write_artifact(trained, path) {
            trained.details.dump_file = previous;
            return Err(e);
        }

        info!("Saved {} model to {:?}", trained.details.model_type, path);
        Ok(())
    }

    /// Initializes this EMPTY instance from an artifact written by `save_model`.
    pub fn load_model(&mut self, file_name: impl AsRef<Path>) -> MlResult<()> {
        if self.is_trained() {
            return Err(MlError::AlreadyTrained);
        }
        let path = file_name.as_ref();

        let mut trained = model_artifact::read_artifact(path)?;
        trained.details.dump_file = Some(path.to_path_buf());

        info!(
            "Loaded {} model from {:?}",
            trained.details.model_type, path
        );
        self.state = ModelState::Trained(Box::new(trained));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn table(rows: usize) -> FeatureTable {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let index = (0..rows).map(|i| start + Duration::days(i as i64)).collect();
        let data = (0..rows)
            .map(|i| {
                let close = 100.0 + ((i * 7) % 11) as f64;
                vec![close, (i % 5) as f64]
            })
            .collect();
        FeatureTable::new(vec!["close".to_string(), "phase".to_string()], index, data).unwrap()
    }

    fn config() -> TrainingConfig {
        let mut config = TrainingConfig {
            window_size: 4,
            ..TrainingConfig::default()
        };
        config.mlp.hidden_layer_sizes = vec![4];
        config.mlp.max_epochs = 10;
        config
    }

    #[test]
    fn test_empty_model_rejects_queries() {
        let model = MachineLearningModel::with_config(ModelKind::DecisionTree, config());
        assert!(matches!(model.model_details(), Err(MlError::NotTrained)));
        assert!(matches!(
            model.predict(&table(4)),
            Err(MlError::NotTrained)
        ));
        assert!(matches!(model.feature_columns(), Err(MlError::NotTrained)));
    }

    #[test]
    fn test_save_requires_training() {
        let mut model = MachineLearningModel::decision_tree();
        assert!(matches!(
            model.save_model(std::env::temp_dir().join("never-written.bin")),
            Err(MlError::NotTrained)
        ));
    }

    #[test]
    fn test_train_then_retrain_fails_without_change() {
        let mut model = MachineLearningModel::with_config(ModelKind::DecisionTree, config());
        model.train_model(&table(40), None, false).unwrap();
        let before = model.model_details().unwrap();

        let result = model.train_model(&table(60), None, true);
        assert!(matches!(result, Err(MlError::AlreadyTrained)));
        assert_eq!(model.model_details().unwrap(), before);
    }

    #[test]
    fn test_insufficient_rows_leave_model_empty() {
        let mut model = MachineLearningModel::with_config(ModelKind::MultilayerPerceptron, config());
        // window 4 needs at least two samples
        let result = model.train_model(&table(5), Some(1), false);
        assert!(matches!(
            result,
            Err(MlError::InsufficientData {
                rows: 5,
                required: 6
            })
        ));
        assert!(!model.is_trained());

        model.train_model(&table(6), Some(1), false).unwrap();
        assert!(model.is_trained());
    }

    #[test]
    fn test_invalid_config_leaves_model_empty() {
        let mut bad = config();
        bad.test_fraction = 1.5;
        let mut model = MachineLearningModel::with_config(ModelKind::DecisionTree, bad);
        assert!(matches!(
            model.train_model(&table(40), None, false),
            Err(MlError::InvalidConfig { .. })
        ));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_fraction_near_one_fails_fast() {
        let mut config = config();
        config.test_fraction = 0.9999999999999999;
        let mut model = MachineLearningModel::with_config(ModelKind::DecisionTree, config);
        assert!(matches!(
            model.train_model(&table(40), None, false),
            Err(MlError::InvalidConfig { .. })
        ));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_loader_only_model_cannot_train() {
        let mut model = MachineLearningModel::loaded();
        assert!(matches!(
            model.train_model(&table(40), None, false),
            Err(MlError::TrainingNotSupported)
        ));
        assert_eq!(model.model_kind(), None);
    }

    #[test]
    fn test_details_report_shape_and_scaler() {
        let mut dt = MachineLearningModel::with_config(ModelKind::DecisionTree, config());
        dt.train_model(&table(40), None, false).unwrap();
        let details = dt.model_details().unwrap();
        assert_eq!(details.model_type, ModelKind::DecisionTree);
        assert_eq!(details.number_of_training_instances, (36, 8));
        assert!(!details.scaler_used);
        assert_eq!(details.dump_file, None);
        assert_eq!(details.classes, classes());

        let mut mlp = MachineLearningModel::with_config(ModelKind::MultilayerPerceptron, config());
        mlp.train_model(&table(40), Some(2), false).unwrap();
        let details = mlp.model_details().unwrap();
        assert!(details.scaler_used);
        assert!((0.0..=1.0).contains(&details.training_score));
        assert!((0.0..=1.0).contains(&details.test_score));
    }

    #[test]
    fn test_predict_checks_shape() {
        let mut model = MachineLearningModel::with_config(ModelKind::DecisionTree, config());
        let data = table(40);
        model.train_model(&data, None, false).unwrap();

        assert!(model.predict(&data.tail(4)).is_ok());
        assert!(matches!(
            model.predict(&data.tail(5)),
            Err(MlError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            model.predict(&data.tail(3)),
            Err(MlError::ShapeMismatch { .. })
        ));

        let renamed = FeatureTable::new(
            vec!["close".to_string(), "other".to_string()],
            data.tail(4).index().to_vec(),
            (36..40).map(|i| data.row(i).unwrap().to_vec()).collect(),
        )
        .unwrap();
        assert!(matches!(
            model.predict(&renamed),
            Err(MlError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_consistency_check_flags_tampered_state() {
        let mut model = MachineLearningModel::with_config(ModelKind::MultilayerPerceptron, config());
        model.train_model(&table(40), Some(1), false).unwrap();

        let ModelState::Trained(trained) = &mut model.state else {
            panic!("model should be trained");
        };
        assert!(trained.check_consistency().is_ok());

        trained.details.scaler_used = false;
        assert!(trained.check_consistency().is_err());
        trained.details.scaler_used = true;

        trained.window_size = 5;
        assert!(trained.check_consistency().is_err());
        trained.window_size = 4;
        assert!(trained.check_consistency().is_ok());

        if let Some(scaler) = trained.scaler.as_mut() {
            let mut broken = StandardScaler::new();
            broken.fit(&ndarray::Array2::zeros((2, 3))).unwrap();
            *scaler = broken;
        }
        assert!(trained.check_consistency().is_err());
    }
}
