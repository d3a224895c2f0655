pub mod classifier;
pub mod decision_tree;
pub mod mlp;
pub mod model;
pub mod scaler;
pub mod window_builder;

pub use classifier::{Classifier, ModelBackend};
pub use model::MachineLearningModel;
pub use scaler::StandardScaler;
pub use window_builder::{FeatureWindowBuilder, WindowedDataset};
