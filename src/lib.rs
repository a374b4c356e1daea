pub mod backtest;
pub mod calibration;
pub mod features;
pub mod gbdt;
pub mod markets;
pub mod match_store;
pub mod meta_model;
pub mod model_store;
pub mod thresholds;
pub mod training;
