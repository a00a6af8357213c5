use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use candlecast::config::Config;
use candlecast::cycle::{CycleSettings, ForecastCycle};
use candlecast::forecaster::RecursiveForecaster;
use candlecast::history::CandleHistory;
use candlecast::poller::Poller;
use candlecast::predictor::linear::OnlineLinearModel;
use candlecast::predictor::SequenceModel;
use candlecast::scaler::MinMaxScaler;
use candlecast::trainer::OnlineTrainer;
use candlecast::window::RollingWindow;
use candlecast::yahoo::rest::YahooChartClient;

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid logging.level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn load_or_fit_scaler(config: &Config, seed_candles: &[candlecast::model::candle::Candle]) -> Result<MinMaxScaler> {
    if config.paths.scaler.exists() {
        let scaler = MinMaxScaler::load(&config.paths.scaler)?;
        tracing::info!(path = %config.paths.scaler.display(), "loaded scaler");
        return Ok(scaler);
    }
    if seed_candles.is_empty() {
        bail!(
            "no scaler at {} and no history to calibrate one from; \
             provide a scaler or seed {} first",
            config.paths.scaler.display(),
            config.paths.history_csv.display()
        );
    }
    let scaler = MinMaxScaler::fit(seed_candles)?;
    scaler.save(&config.paths.scaler)?;
    tracing::info!(
        path = %config.paths.scaler.display(),
        samples = seed_candles.len(),
        "calibrated and saved a fresh scaler"
    );
    Ok(scaler)
}

fn load_or_init_model(config: &Config) -> Result<OnlineLinearModel> {
    if config.paths.model.exists() {
        let model = OnlineLinearModel::load(&config.paths.model)?;
        if model.lookback() != config.window.lookback {
            bail!(
                "model at {} has lookback {} but config says {}",
                config.paths.model.display(),
                model.lookback(),
                config.window.lookback
            );
        }
        tracing::info!(
            path = %config.paths.model.display(),
            updates = model.updates(),
            "loaded model"
        );
        return Ok(model);
    }
    tracing::info!("no persisted model found; initializing fresh weights");
    Ok(OnlineLinearModel::new(
        config.window.lookback,
        config.trainer.learning_rate,
        config.trainer.init_seed,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.logging.level)?;
    tracing::info!(
        symbol = %config.provider.symbol,
        interval = %config.provider.interval,
        "starting candlecast"
    );

    let history = CandleHistory::new(config.paths.history_csv.clone());
    let seed_candles = history.load().context("failed to load candle history")?;

    let scaler = load_or_fit_scaler(&config, &seed_candles)?;
    let model = load_or_init_model(&config)?;

    let mut window = RollingWindow::new(config.window.capacity);
    for candle in &seed_candles {
        if let Err(err) = window.append(*candle) {
            tracing::warn!(error = %err, "skipping unordered history row");
        }
    }
    tracing::info!(seeded = window.len(), "window seeded from history");

    let source = YahooChartClient::new(
        &config.provider.base_url,
        &config.provider.symbol,
        &config.provider.interval,
    )?;
    let poller = Poller::new(
        config.provider.staleness_ms(),
        config.provider.interval_ms()?,
        config.provider.seed_span_ms()?,
    );
    let trainer = OnlineTrainer::new(config.window.lookback, config.paths.model.clone());
    let forecaster = RecursiveForecaster::new(
        config.window.lookback,
        config.forecast.horizon,
        config.forecast.volatility_window,
        config.forecast.volatility_floor,
        config.forecast.noise_scale,
    );
    let rng = match config.forecast.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let settings = CycleSettings {
        tick: Duration::from_secs(config.cycle.tick_secs),
        lookback: config.window.lookback,
        status_tail_len: config.cycle.status_tail_len,
    };

    let (cycle, mut status_rx) = ForecastCycle::new(
        window,
        model,
        scaler,
        source,
        poller,
        trainer,
        forecaster,
        Some(history),
        rng,
        settings,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cycle_task = tokio::spawn(cycle.run(shutdown_rx));

    // One status line per settled iteration; intermediate publishes
    // ("checking", "training") stay at debug level inside the cycle.
    let reporter = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let snapshot = status_rx.borrow().clone();
            if snapshot.status_text != "up to date" {
                continue;
            }
            tracing::info!(
                window = snapshot.window_tail.len(),
                backfill = snapshot.backfill.len(),
                next_close = snapshot.forecast_horizon.get(1).copied().unwrap_or(f64::NAN),
                last_trained = ?snapshot.last_trained_open_time,
                "forecast updated"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("ctrl-c received; shutting down");
    shutdown_tx.send(true).ok();
    cycle_task.await.ok();
    reporter.abort();
    Ok(())
}
