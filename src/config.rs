use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    pub window: WindowConfig,
    pub forecast: ForecastConfig,
    pub trainer: TrainerConfig,
    pub cycle: CycleConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub symbol: String,
    /// Candle interval, e.g. "1m".
    pub interval: String,
    /// Window lag beyond which a fetch is attempted.
    pub staleness_secs: u64,
    /// How far back the first fetch reaches when the window starts empty,
    /// e.g. "1d".
    pub seed_span: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub capacity: usize,
    /// Lookback length L: candles per model input sequence.
    pub lookback: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    pub horizon: usize,
    pub volatility_window: usize,
    pub volatility_floor: f64,
    pub noise_scale: f64,
    /// Fixed RNG seed for reproducible forecasts; omit to seed from entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    /// Seed for fresh model weight initialization.
    pub init_seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    pub tick_secs: u64,
    /// How many tail candles each status snapshot carries.
    pub status_tail_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub history_csv: PathBuf,
    pub model: PathBuf,
    pub scaler: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Parse an interval string (e.g. "1s", "1m", "1h", "1d", "1w", "1M") into
/// milliseconds.
pub fn parse_interval_ms(s: &str) -> Result<u64> {
    if s.len() < 2 {
        bail!("invalid interval '{}': expected format like '1m'", s);
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        )
    })?;
    if n == 0 {
        bail!("invalid interval '{}': quantity must be > 0", s);
    }

    let unit_ms = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        "M" => 30 * 86_400_000,
        _ => bail!(
            "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d/w/M",
            s,
            suffix
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid interval '{}': value is too large", s))
}

impl ProviderConfig {
    pub fn interval_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.interval)
    }

    pub fn seed_span_ms(&self) -> Result<u64> {
        parse_interval_ms(&self.seed_span)
    }

    pub fn staleness_ms(&self) -> u64 {
        self.staleness_secs * 1_000
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config/default.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        if let Ok(symbol) = std::env::var("CANDLECAST_SYMBOL") {
            if !symbol.trim().is_empty() {
                config.provider.symbol = symbol.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.provider
            .interval_ms()
            .context("provider.interval is invalid")?;
        self.provider
            .seed_span_ms()
            .context("provider.seed_span is invalid")?;
        if self.window.lookback == 0 {
            bail!("window.lookback must be > 0");
        }
        if self.window.capacity <= self.window.lookback {
            bail!(
                "window.capacity ({}) must exceed window.lookback ({})",
                self.window.capacity,
                self.window.lookback
            );
        }
        if self.forecast.horizon == 0 {
            bail!("forecast.horizon must be > 0");
        }
        if self.forecast.volatility_window == 0 {
            bail!("forecast.volatility_window must be > 0");
        }
        if self.forecast.volatility_floor <= 0.0 {
            bail!("forecast.volatility_floor must be > 0");
        }
        if self.trainer.learning_rate <= 0.0 {
            bail!("trainer.learning_rate must be > 0");
        }
        if self.cycle.tick_secs == 0 {
            bail!("cycle.tick_secs must be > 0");
        }
        Ok(())
    }
}
