use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tokio::sync::watch;

use candlecast::cycle::{CycleSettings, ForecastCycle, StatusSnapshot};
use candlecast::forecaster::RecursiveForecaster;
use candlecast::history::CandleHistory;
use candlecast::model::candle::Candle;
use candlecast::poller::{MarketDataSource, Poller};
use candlecast::predictor::linear::OnlineLinearModel;
use candlecast::scaler::MinMaxScaler;
use candlecast::trainer::OnlineTrainer;
use candlecast::window::RollingWindow;

const L: usize = 60;

fn candle(i: u64) -> Candle {
    let close = 100.0 + (i as f64 * 0.3).sin() * 4.0;
    Candle {
        open_time: (i + 1) * 60_000,
        open: close - 0.3,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10.0 + (i % 13) as f64,
    }
}

struct Feed {
    candles: Mutex<Vec<Candle>>,
}

impl MarketDataSource for &Feed {
    async fn fetch_since(&self, start_ms: u64) -> Result<Vec<Candle>> {
        Ok(self
            .candles
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.open_time >= start_ms)
            .copied()
            .collect())
    }
}

fn build_cycle<'a>(
    dir: &TempDir,
    feed: &'a Feed,
    model: OnlineLinearModel,
    seed_candles: &[Candle],
) -> (
    ForecastCycle<OnlineLinearModel, &'a Feed>,
    watch::Receiver<StatusSnapshot>,
) {
    let calibration: Vec<Candle> = (0..200).map(candle).collect();
    let scaler = MinMaxScaler::fit(&calibration).unwrap();
    let mut window = RollingWindow::new(200);
    for c in seed_candles {
        window.append(*c).unwrap();
    }
    let poller = Poller::new(60_000, 60_000, 200 * 60_000);
    let trainer = OnlineTrainer::new(L, dir.path().join("model.json"));
    let forecaster = RecursiveForecaster::new(L, 8, 20, 1e-4, 0.5);
    let settings = CycleSettings {
        tick: Duration::from_millis(10),
        lookback: L,
        status_tail_len: 500,
    };
    let history = CandleHistory::new(dir.path().join("data.csv"));
    ForecastCycle::new(
        window,
        model,
        scaler,
        feed,
        poller,
        trainer,
        forecaster,
        Some(history),
        StdRng::seed_from_u64(11),
        settings,
    )
}

#[tokio::test]
async fn restart_resumes_from_history_and_persisted_model() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Feed {
        candles: Mutex::new((0..70).map(candle).collect()),
    };

    // First run: cold start from an empty window.
    {
        let model = OnlineLinearModel::new(L, 0.01, 7);
        let (mut cycle, _rx) = build_cycle(&dir, &feed, model, &[]);
        cycle.run_at(candle(69).open_time + 120_000).await.unwrap();
        assert_eq!(cycle.model().updates(), 10);
    }

    // Simulated restart: seed the window from the CSV written during the
    // first run and reload the persisted model.
    let history = CandleHistory::new(dir.path().join("data.csv"));
    let seed_candles = history.load().unwrap();
    assert_eq!(seed_candles.len(), 70);
    let model = OnlineLinearModel::load(&dir.path().join("model.json")).unwrap();
    assert_eq!(model.updates(), 10);
    assert_eq!(candlecast::predictor::SequenceModel::lookback(&model), L);

    feed.candles.lock().unwrap().push(candle(70));
    let (mut cycle, status_rx) = build_cycle(&dir, &feed, model, &seed_candles);
    cycle.run_at(candle(70).open_time + 120_000).await.unwrap();

    // Only the one candle that closed during the restart gets trained on.
    assert_eq!(cycle.model().updates(), 11);
    let snapshot = status_rx.borrow();
    assert_eq!(snapshot.window_tail.len(), 71);
    assert_eq!(snapshot.status_text, "up to date");
    assert_eq!(history.load().unwrap().len(), 71);
}

#[tokio::test]
async fn every_accepted_candle_lands_in_the_history_file() {
    let dir = tempfile::tempdir().unwrap();
    let feed = Feed {
        candles: Mutex::new((0..65).map(candle).collect()),
    };
    let model = OnlineLinearModel::new(L, 0.01, 7);
    let (mut cycle, _rx) = build_cycle(&dir, &feed, model, &[]);
    cycle.run_at(candle(64).open_time + 120_000).await.unwrap();

    let history = CandleHistory::new(dir.path().join("data.csv"));
    let rows = history.load().unwrap();
    assert_eq!(rows.len(), 65);
    assert_eq!(rows[0], candle(0));
    assert_eq!(rows[64], candle(64));
}

#[test]
fn scaler_round_trip_preserves_transforms() {
    let dir = tempfile::tempdir().unwrap();
    let calibration: Vec<Candle> = (0..50).map(candle).collect();
    let scaler = MinMaxScaler::fit(&calibration).unwrap();
    let path = dir.path().join("scaler.json");
    scaler.save(&path).unwrap();

    let loaded = MinMaxScaler::load(&path).unwrap();
    let features = candle(25).features();
    assert_eq!(scaler.transform(features), loaded.transform(features));
    assert!(
        (scaler.inverse_close(0.37) - loaded.inverse_close(0.37)).abs() < f64::EPSILON
    );
}
