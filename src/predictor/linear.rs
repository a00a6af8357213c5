use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::model::candle::{FeatureRow, FEATURE_COUNT};
use crate::predictor::SequenceModel;

/// Online linear regressor over a flattened L x 5 input window, trained with
/// single-step SGD. Deliberately small: the cycle only needs the capability
/// contract (predict a batch, fit one pair, persist), not a deep architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineLinearModel {
    lookback: usize,
    learning_rate: f64,
    weights: Vec<f64>,
    bias: f64,
    updates: u64,
}

impl OnlineLinearModel {
    pub fn new(lookback: usize, learning_rate: f64, seed: u64) -> Self {
        assert!(lookback > 0, "lookback must be > 0");
        assert!(learning_rate > 0.0, "learning rate must be > 0");
        let dim = lookback * FEATURE_COUNT;
        let mut rng = StdRng::seed_from_u64(seed);
        // Xavier-style init keeps the first predictions inside the normalized
        // domain instead of saturating far outside [0, 1].
        let scale = (1.0 / dim as f64).sqrt();
        let weights = (0..dim).map(|_| rng.gen_range(-scale..scale)).collect();
        Self {
            lookback,
            learning_rate,
            weights,
            bias: 0.5,
            updates: 0,
        }
    }

    /// Total number of `fit_one` updates applied so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?;
        serde_json::from_str(&json).context("failed to parse model JSON")
    }

    fn flatten(&self, sequence: &[FeatureRow]) -> Result<Vec<f64>, ForecastError> {
        if sequence.len() != self.lookback {
            return Err(ForecastError::Inference(format!(
                "sequence length {} does not match model lookback {}",
                sequence.len(),
                self.lookback
            )));
        }
        let mut flat = Vec::with_capacity(self.weights.len());
        for row in sequence {
            flat.extend_from_slice(row);
        }
        Ok(flat)
    }

    fn forward(&self, flat: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(flat.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

impl SequenceModel for OnlineLinearModel {
    fn lookback(&self) -> usize {
        self.lookback
    }

    fn predict_batch(&self, batch: &[Vec<FeatureRow>]) -> Result<Vec<f64>, ForecastError> {
        let mut out = Vec::with_capacity(batch.len());
        for sequence in batch {
            let flat = self.flatten(sequence)?;
            out.push(self.forward(&flat));
        }
        Ok(out)
    }

    fn fit_one(&mut self, sequence: &[FeatureRow], target: f64) -> Result<(), ForecastError> {
        if !target.is_finite() {
            return Err(ForecastError::Inference(format!(
                "non-finite training target {target}"
            )));
        }
        let flat = self.flatten(sequence)?;
        let error = self.forward(&flat) - target;
        for (w, x) in self.weights.iter_mut().zip(flat.iter()) {
            *w -= self.learning_rate * error * x;
        }
        self.bias -= self.learning_rate * error;
        self.updates += 1;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), ForecastError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ForecastError::Persist(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| ForecastError::Persist(format!("serialize model: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| ForecastError::Persist(format!("{}: {e}", path.display())))
    }
}
