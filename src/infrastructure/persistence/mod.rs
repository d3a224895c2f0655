pub mod model_artifact;

pub use model_artifact::{ARTIFACT_FORMAT, ARTIFACT_VERSION, read_artifact, write_artifact};
