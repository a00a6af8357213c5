use std::path::PathBuf;

use anyhow::Result;

use crate::error::ForecastError;
use crate::model::candle::{Candle, CLOSE_IDX};
use crate::predictor::SequenceModel;
use crate::scaler::MinMaxScaler;
use crate::window::RollingWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    Trained,
    /// Flat or zero-volume candle; training skipped, sample still belongs in
    /// the window.
    SkippedDegenerate,
    /// Window shorter than the lookback; retried once more data accumulates.
    SkippedInsufficient,
}

/// Performs one incremental model update per newly accepted sample and
/// persists the model after every successful update.
#[derive(Debug, Clone)]
pub struct OnlineTrainer {
    lookback: usize,
    model_path: PathBuf,
}

impl OnlineTrainer {
    pub fn new(lookback: usize, model_path: PathBuf) -> Self {
        Self {
            lookback,
            model_path,
        }
    }

    /// Train on `sample` using the L candles currently at the window tail as
    /// input. Must be called BEFORE the sample is appended: the sample is the
    /// target, never part of its own input sequence.
    ///
    /// A persist failure is surfaced as an error; the in-memory model keeps
    /// the update and stays authoritative.
    pub fn train_on<M: SequenceModel>(
        &self,
        model: &mut M,
        scaler: &MinMaxScaler,
        window: &RollingWindow,
        sample: &Candle,
    ) -> Result<TrainOutcome, ForecastError> {
        let tail = match window.tail(self.lookback) {
            Ok(tail) => tail,
            Err(ForecastError::InsufficientData { needed, have }) => {
                tracing::debug!(needed, have, "not enough history to train yet");
                return Ok(TrainOutcome::SkippedInsufficient);
            }
            Err(err) => return Err(err),
        };

        if sample.is_degenerate() {
            tracing::debug!(
                open_time = sample.open_time,
                "skipping degenerate candle as training target"
            );
            return Ok(TrainOutcome::SkippedDegenerate);
        }

        let sequence = scaler.scale_candles(&tail);
        let target = scaler.transform(sample.features())[CLOSE_IDX];
        model.fit_one(&sequence, target)?;
        model.save(&self.model_path)?;

        tracing::debug!(
            open_time = sample.open_time,
            close = sample.close,
            "trained on one sample"
        );
        Ok(TrainOutcome::Trained)
    }
}
