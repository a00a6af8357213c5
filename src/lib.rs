pub mod backfill;
pub mod config;
pub mod cycle;
pub mod error;
pub mod forecaster;
pub mod history;
pub mod model;
pub mod poller;
pub mod predictor;
pub mod scaler;
pub mod trainer;
pub mod window;
pub mod yahoo;
