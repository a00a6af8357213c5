use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::candle::{Candle, FeatureRow, CLOSE_IDX, FEATURE_COUNT};

/// Fit-once per-feature min-max scaler mapping raw OHLCV rows into the model's
/// [0, 1] domain.
///
/// Every feature is transformed independently, which is what makes
/// `inverse_close` sound: a single tracked feature can be inverted without
/// knowing the others. A covariance-aware normalizer could not offer that
/// operation and would need a different capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: [f64; FEATURE_COUNT],
    span: [f64; FEATURE_COUNT],
}

impl MinMaxScaler {
    /// Fit over a calibration set. Constant features get a span of 1.0 so the
    /// transform stays defined (they map to 0.0).
    pub fn fit(candles: &[Candle]) -> Result<Self> {
        if candles.is_empty() {
            bail!("cannot fit scaler on an empty calibration set");
        }
        let mut min = [f64::INFINITY; FEATURE_COUNT];
        let mut max = [f64::NEG_INFINITY; FEATURE_COUNT];
        for candle in candles {
            let row = candle.features();
            for i in 0..FEATURE_COUNT {
                min[i] = min[i].min(row[i]);
                max[i] = max[i].max(row[i]);
            }
        }
        let mut span = [1.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            if max[i] > min[i] {
                span[i] = max[i] - min[i];
            }
        }
        Ok(Self { min, span })
    }

    pub fn transform(&self, row: FeatureRow) -> FeatureRow {
        let mut out = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            out[i] = (row[i] - self.min[i]) / self.span[i];
        }
        out
    }

    pub fn inverse_transform(&self, row: FeatureRow) -> FeatureRow {
        let mut out = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            out[i] = row[i] * self.span[i] + self.min[i];
        }
        out
    }

    /// Normalized close for a raw close price.
    pub fn scale_close(&self, raw: f64) -> f64 {
        (raw - self.min[CLOSE_IDX]) / self.span[CLOSE_IDX]
    }

    /// Raw close price for a normalized model output.
    pub fn inverse_close(&self, normalized: f64) -> f64 {
        normalized * self.span[CLOSE_IDX] + self.min[CLOSE_IDX]
    }

    /// Scale a slice of candles into model input rows, oldest first.
    pub fn scale_candles(&self, candles: &[Candle]) -> Vec<FeatureRow> {
        candles.iter().map(|c| self.transform(c.features())).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write scaler to {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scaler from {}", path.display()))?;
        serde_json::from_str(&json).context("failed to parse scaler JSON")
    }
}
