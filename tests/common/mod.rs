#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustrade_ml::config::TrainingConfig;
use rustrade_ml::domain::ml::FeatureTable;
use std::path::PathBuf;

pub const COLUMNS: [&str; 4] = ["close", "momentum", "sma_ratio", "volume"];

/// Daily random-walk prices with a few derived indicator columns.
pub fn synthetic_table(rows: usize, seed: u64) -> FeatureTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2015, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    let mut closes: Vec<f64> = Vec::with_capacity(rows);
    let mut data = Vec::with_capacity(rows);
    let mut close: f64 = 100.0;
    for i in 0..rows {
        let prev = close;
        close = (close + rng.random_range(-2.0..2.0)).max(1.0);
        closes.push(close);

        let lookback = &closes[i.saturating_sub(9)..];
        let sma = lookback.iter().sum::<f64>() / lookback.len() as f64;
        data.push(vec![
            close,
            close - prev,
            close / sma,
            rng.random_range(1_000.0..5_000.0),
        ]);
    }

    let index = (0..rows).map(|i| start + Duration::days(i as i64)).collect();
    FeatureTable::new(COLUMNS.iter().map(|c| c.to_string()).collect(), index, data).unwrap()
}

/// Small window and network so lifecycle tests stay fast.
pub fn quick_config() -> TrainingConfig {
    let mut config = TrainingConfig {
        window_size: 5,
        ..TrainingConfig::default()
    };
    config.mlp.hidden_layer_sizes = vec![8];
    config.mlp.max_epochs = 40;
    config.mlp.batch_size = 32;
    config
}

pub fn temp_model_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("rustrade-ml-test-{}", uuid::Uuid::new_v4()))
        .join(name)
}

/// Strictly rising closes, so every window is labelled UP.
pub fn rising_table(rows: usize) -> FeatureTable {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let index = (0..rows).map(|i| start + Duration::days(i as i64)).collect();
    let data = (0..rows)
        .map(|i| {
            let close = 50.0 + i as f64;
            vec![close, 1.0, 1.0 + (i % 7) as f64 / 100.0, 1_000.0 + (i % 13) as f64]
        })
        .collect();
    FeatureTable::new(COLUMNS.iter().map(|c| c.to_string()).collect(), index, data).unwrap()
}
