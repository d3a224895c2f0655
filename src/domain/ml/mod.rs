pub mod direction;
pub mod feature_table;
pub mod model_details;

pub use direction::Direction;
pub use feature_table::FeatureTable;
pub use model_details::{ModelDetails, ModelKind};
