pub mod linear;

use std::path::Path;

use crate::error::ForecastError;
use crate::model::candle::FeatureRow;

/// Sequence-to-scalar regressor over a fixed-length window of feature rows.
///
/// The cycle treats the model as a capability: predict a batch, absorb one
/// training pair, persist. Exactly one writer mutates it (the cycle task), so
/// `fit_one` takes `&mut self` without further synchronization.
pub trait SequenceModel {
    /// Lookback length L the model expects for every sequence.
    fn lookback(&self) -> usize;

    /// Normalized next-close estimates for a batch of L-length sequences.
    /// A batch of one must be cheap; a batch of many must be one call.
    fn predict_batch(&self, batch: &[Vec<FeatureRow>]) -> Result<Vec<f64>, ForecastError>;

    /// One incremental parameter update for a single `(sequence, target)` pair.
    fn fit_one(&mut self, sequence: &[FeatureRow], target: f64) -> Result<(), ForecastError>;

    fn save(&self, path: &Path) -> Result<(), ForecastError>;
}

/// Convenience wrapper for the single-sequence case.
pub fn predict_one<M: SequenceModel + ?Sized>(
    model: &M,
    sequence: &[FeatureRow],
) -> Result<f64, ForecastError> {
    let batch = vec![sequence.to_vec()];
    let out = model.predict_batch(&batch)?;
    out.into_iter()
        .next()
        .ok_or_else(|| ForecastError::Inference("model returned an empty batch".to_string()))
}
