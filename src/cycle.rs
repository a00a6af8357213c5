use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use tokio::sync::watch;

use crate::backfill::{BackfillSeries, PredictionRecord};
use crate::forecaster::RecursiveForecaster;
use crate::history::CandleHistory;
use crate::model::candle::Candle;
use crate::poller::{MarketDataSource, Poller};
use crate::predictor::SequenceModel;
use crate::scaler::MinMaxScaler;
use crate::trainer::{OnlineTrainer, TrainOutcome};
use crate::window::RollingWindow;

/// Read-only view of the cycle for external consumers (HTTP layer, UI, logs).
/// Published wholesale after every iteration; holds copies, never live state.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub window_tail: Vec<Candle>,
    pub forecast_horizon: Vec<f64>,
    pub backfill: Vec<PredictionRecord>,
    pub last_trained_open_time: Option<u64>,
    pub is_training: bool,
    pub status_text: String,
}

/// Knobs the scheduler itself needs; everything domain-specific lives in the
/// components.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub tick: Duration,
    pub lookback: usize,
    pub status_tail_len: usize,
}

/// The outer control loop: poll, train per sample, reconcile, forecast,
/// publish, sleep. Owns every piece of mutable state (window, model,
/// backfill series, forecast horizon) so there is exactly one writer.
pub struct ForecastCycle<M, S> {
    window: RollingWindow,
    backfill: BackfillSeries,
    horizon: Vec<f64>,
    model: M,
    scaler: MinMaxScaler,
    source: S,
    poller: Poller,
    trainer: OnlineTrainer,
    forecaster: RecursiveForecaster,
    history: Option<CandleHistory>,
    rng: StdRng,
    settings: CycleSettings,
    last_trained: Option<u64>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl<M, S> ForecastCycle<M, S>
where
    M: SequenceModel,
    S: MarketDataSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        window: RollingWindow,
        model: M,
        scaler: MinMaxScaler,
        source: S,
        poller: Poller,
        trainer: OnlineTrainer,
        forecaster: RecursiveForecaster,
        history: Option<CandleHistory>,
        rng: StdRng,
        settings: CycleSettings,
    ) -> (Self, watch::Receiver<StatusSnapshot>) {
        let backfill = BackfillSeries::new(window.capacity(), settings.lookback);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let cycle = Self {
            window,
            backfill,
            horizon: Vec::new(),
            model,
            scaler,
            source,
            poller,
            trainer,
            forecaster,
            history,
            rng,
            settings,
            last_trained: None,
            status_tx,
        };
        (cycle, status_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run until the shutdown flag flips. No iteration error is fatal; each
    /// failure is logged and retried on the next tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("forecast cycle started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_once().await {
                tracing::warn!(error = %err, "cycle iteration failed; retrying next tick");
                self.publish(false, "error; retrying next tick");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("forecast cycle stopped");
    }

    /// One full iteration: poll, train on each new sample in arrival order,
    /// reconcile the backfill series, recompute the forecast, publish.
    pub async fn run_once(&mut self) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.run_at(now_ms).await
    }

    /// Iteration body with an injectable clock.
    pub async fn run_at(&mut self, now_ms: u64) -> Result<()> {
        self.publish(false, "checking for new data");

        // A provider failure only costs this tick's ingestion; forecasting
        // and reconciliation continue from the existing window.
        let accepted = match self.poller.poll(&self.source, &self.window, now_ms).await {
            Ok(candles) => candles,
            Err(err) => {
                tracing::warn!(error = %err, "data fetch failed; continuing with existing state");
                Vec::new()
            }
        };
        if !accepted.is_empty() {
            tracing::info!(count = accepted.len(), "accepted new candles");
        }

        for candle in accepted {
            self.publish(true, "training on new sample");
            let trained = self
                .trainer
                .train_on(&mut self.model, &self.scaler, &self.window, &candle);

            // The sample enters the window and the on-disk history whether or
            // not it was trainable.
            match self.window.append(candle) {
                Ok(evicted) => {
                    if let Some(c) = evicted {
                        tracing::debug!(open_time = c.open_time, "evicted oldest candle");
                    }
                    if let Some(history) = &self.history {
                        if let Err(err) = history.append(&candle) {
                            tracing::warn!(error = %err, "history append failed");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping out-of-order candle");
                    continue;
                }
            }

            match trained {
                Ok(TrainOutcome::Trained) => self.last_trained = Some(candle.open_time),
                Ok(_) => {}
                // Aborts this iteration; candles not yet appended are
                // re-fetched on the next poll since the window tail is
                // unchanged past this point.
                Err(err) => return Err(err.into()),
            }
        }

        self.backfill
            .reconcile(&self.model, &self.scaler, &self.window)?;

        if self.window.len() < self.settings.lookback {
            tracing::debug!(
                have = self.window.len(),
                need = self.settings.lookback,
                "window still warming up; skipping forecast"
            );
            self.publish(false, "warming up");
            return Ok(());
        }
        self.horizon =
            self.forecaster
                .forecast(&self.model, &self.scaler, &self.window, &mut self.rng)?;

        self.publish(false, "up to date");
        Ok(())
    }

    fn publish(&self, is_training: bool, status_text: &str) {
        let tail_len = self.settings.status_tail_len.min(self.window.len());
        let snapshot = StatusSnapshot {
            window_tail: self.window.tail(tail_len).unwrap_or_default(),
            forecast_horizon: self.horizon.clone(),
            backfill: self.backfill.snapshot(),
            last_trained_open_time: self.last_trained,
            is_training,
            status_text: status_text.to_string(),
        };
        self.status_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::linear::OnlineLinearModel;
    use anyhow::anyhow;
    use rand::SeedableRng;

    const L: usize = 60;

    fn candle(i: u64) -> Candle {
        let close = 100.0 + (i as f64 * 0.3).sin() * 4.0;
        Candle {
            open_time: (i + 1) * 60_000,
            open: close - 0.3,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0 + i as f64,
        }
    }

    struct StaticSource {
        candles: Vec<Candle>,
        fail: bool,
    }

    impl MarketDataSource for StaticSource {
        async fn fetch_since(&self, start_ms: u64) -> Result<Vec<Candle>> {
            if self.fail {
                return Err(anyhow!("provider unreachable"));
            }
            Ok(self
                .candles
                .iter()
                .filter(|c| c.open_time >= start_ms)
                .copied()
                .collect())
        }
    }

    fn build_cycle(
        source: StaticSource,
        horizon: usize,
    ) -> (
        ForecastCycle<OnlineLinearModel, StaticSource>,
        watch::Receiver<StatusSnapshot>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let calibration: Vec<Candle> = (0..100).map(candle).collect();
        let scaler = MinMaxScaler::fit(&calibration).unwrap();
        let model = OnlineLinearModel::new(L, 0.01, 7);
        let poller = Poller::new(60_000, 60_000, 90 * 60_000);
        let trainer = OnlineTrainer::new(L, dir.path().join("model.json"));
        let forecaster = RecursiveForecaster::new(L, horizon, 20, 1e-4, 0.5);
        let settings = CycleSettings {
            tick: Duration::from_millis(10),
            lookback: L,
            status_tail_len: 500,
        };
        // Leak the tempdir so the model path stays writable for the test.
        std::mem::forget(dir);
        ForecastCycle::new(
            RollingWindow::new(100),
            model,
            scaler,
            source,
            poller,
            trainer,
            forecaster,
            None,
            StdRng::seed_from_u64(9),
            settings,
        )
    }

    #[tokio::test]
    async fn cold_start_scenario() {
        // Empty window, provider returns 65 candles, L = 60.
        let source = StaticSource {
            candles: (0..65).map(candle).collect(),
            fail: false,
        };
        let (mut cycle, status_rx) = build_cycle(source, 8);

        let now_ms = candle(64).open_time + 120_000;
        cycle.run_at(now_ms).await.unwrap();

        let snapshot = status_rx.borrow();
        assert_eq!(snapshot.window_tail.len(), 65);
        assert_eq!(snapshot.backfill.len(), 5);
        assert_eq!(cycle.model().updates(), 5);
        assert_eq!(snapshot.forecast_horizon.len(), 8);
        assert!((snapshot.forecast_horizon[0] - candle(64).close).abs() < f64::EPSILON);
        assert_eq!(snapshot.last_trained_open_time, Some(candle(64).open_time));
        assert!(!snapshot.is_training);
        assert_eq!(snapshot.status_text, "up to date");
    }

    #[tokio::test]
    async fn second_iteration_with_no_new_data_is_stable() {
        let source = StaticSource {
            candles: (0..65).map(candle).collect(),
            fail: false,
        };
        let (mut cycle, status_rx) = build_cycle(source, 8);

        let now_ms = candle(64).open_time + 120_000;
        cycle.run_at(now_ms).await.unwrap();
        let backfill_before = status_rx.borrow().backfill.clone();
        let updates_before = cycle.model().updates();

        cycle.run_at(now_ms).await.unwrap();
        let snapshot = status_rx.borrow();
        assert_eq!(snapshot.backfill, backfill_before);
        assert_eq!(cycle.model().updates(), updates_before);
        assert_eq!(snapshot.window_tail.len(), 65);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_forecasting_from_existing_state() {
        let source = StaticSource {
            candles: (0..65).map(candle).collect(),
            fail: false,
        };
        let (mut cycle, status_rx) = build_cycle(source, 8);
        let now_ms = candle(64).open_time + 120_000;
        cycle.run_at(now_ms).await.unwrap();

        cycle.source.fail = true;
        cycle.run_at(now_ms + 600_000).await.unwrap();

        let snapshot = status_rx.borrow();
        assert_eq!(snapshot.window_tail.len(), 65);
        assert_eq!(snapshot.forecast_horizon.len(), 8);
        assert_eq!(snapshot.status_text, "up to date");
    }

    #[tokio::test]
    async fn warmup_skips_forecast_without_error() {
        let source = StaticSource {
            candles: (0..10).map(candle).collect(),
            fail: false,
        };
        let (mut cycle, status_rx) = build_cycle(source, 8);

        cycle.run_at(candle(9).open_time + 120_000).await.unwrap();
        let snapshot = status_rx.borrow();
        assert_eq!(snapshot.window_tail.len(), 10);
        assert!(snapshot.forecast_horizon.is_empty());
        assert_eq!(snapshot.status_text, "warming up");
    }

    #[tokio::test]
    async fn shutdown_flag_stops_the_loop() {
        let source = StaticSource {
            candles: vec![],
            fail: false,
        };
        let (cycle, _status_rx) = build_cycle(source, 8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(cycle.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cycle did not stop after shutdown signal")
            .unwrap();
    }
}
