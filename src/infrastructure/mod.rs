pub mod feature_table_csv;
pub mod persistence;

pub use feature_table_csv::read_feature_table;
