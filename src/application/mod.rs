// Windowing, scaling, classifiers and the model lifecycle
pub mod ml;
