// Domain-specific error types
pub mod errors;

// Feature tables, directions and model details
pub mod ml;
