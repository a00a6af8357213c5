use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("data fetch error: {0}")]
    Fetch(String),

    #[error("out-of-order sample: window tail is {last_ms} ms, got {got_ms} ms")]
    OutOfOrder { last_ms: u64, got_ms: u64 },

    #[error("insufficient data: need {needed} samples, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("model inference error: {0}")]
    Inference(String),

    #[error("model persist error: {0}")]
    Persist(String),
}
