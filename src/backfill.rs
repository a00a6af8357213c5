use std::collections::VecDeque;

use serde::Serialize;

use crate::error::ForecastError;
use crate::model::candle::Candle;
use crate::predictor::SequenceModel;
use crate::scaler::MinMaxScaler;
use crate::window::RollingWindow;

/// What the model would have predicted for one past instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub open_time: u64,
    pub predicted_close: f64,
}

/// Append-only historical prediction series kept reconciled with the window:
/// exactly one record per window entry that has at least `lookback`
/// predecessors, capped at the window capacity with FIFO eviction.
#[derive(Debug, Clone)]
pub struct BackfillSeries {
    cap: usize,
    lookback: usize,
    records: VecDeque<PredictionRecord>,
}

impl BackfillSeries {
    pub fn new(cap: usize, lookback: usize) -> Self {
        Self {
            cap,
            lookback,
            records: VecDeque::new(),
        }
    }

    /// Bring the series up to date with the window. Idempotent: a second call
    /// with no intervening window growth appends nothing.
    ///
    /// All missing entries are inferred in ONE batched model call and
    /// denormalized in one pass; per-entry inference would be an order of
    /// magnitude slower on catch-up.
    pub fn reconcile<M: SequenceModel>(
        &mut self,
        model: &M,
        scaler: &MinMaxScaler,
        window: &RollingWindow,
    ) -> Result<usize, ForecastError> {
        let candles = window.snapshot();
        if candles.len() <= self.lookback {
            return Ok(0);
        }
        let first_eligible = candles[self.lookback].open_time;

        // Records whose entries no longer have enough predecessors (their
        // history was evicted with the window's oldest candles) fall off the
        // front, mirroring window eviction.
        while self
            .records
            .front()
            .is_some_and(|r| r.open_time < first_eligible)
        {
            self.records.pop_front();
        }

        // Everything after the last reconciled timestamp is missing. If that
        // timestamp is gone from the window entirely, the whole eligible
        // range is missing.
        let last_reconciled = self.records.back().map(|r| r.open_time);
        let missing: Vec<usize> = (self.lookback..candles.len())
            .filter(|&i| last_reconciled.map_or(true, |t| candles[i].open_time > t))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let batch: Vec<Vec<_>> = missing
            .iter()
            .map(|&i| scaler.scale_candles(&candles[i - self.lookback..i]))
            .collect();
        let outputs = model.predict_batch(&batch)?;

        for (&i, normalized) in missing.iter().zip(outputs.iter()) {
            self.records.push_back(PredictionRecord {
                open_time: candles[i].open_time,
                predicted_close: scaler.inverse_close(*normalized),
            });
        }
        while self.records.len() > self.cap {
            self.records.pop_front();
        }

        tracing::debug!(
            appended = missing.len(),
            total = self.records.len(),
            "backfill series reconciled"
        );
        Ok(missing.len())
    }

    pub fn snapshot(&self) -> Vec<PredictionRecord> {
        self.records.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_open_time(&self) -> Option<u64> {
        self.records.back().map(|r| r.open_time)
    }
}

/// Convenience for tests and reporting: pair each record with the real close
/// it tried to predict.
pub fn paired_with_actuals(
    records: &[PredictionRecord],
    candles: &[Candle],
) -> Vec<(PredictionRecord, f64)> {
    records
        .iter()
        .filter_map(|r| {
            candles
                .iter()
                .find(|c| c.open_time == r.open_time)
                .map(|c| (*r, c.close))
        })
        .collect()
}
