use rand::rngs::StdRng;
use rand::Rng;

use crate::error::ForecastError;
use crate::model::candle::{Candle, FeatureRow, CLOSE_IDX};
use crate::predictor::{predict_one, SequenceModel};
use crate::scaler::MinMaxScaler;
use crate::window::RollingWindow;

/// Produces the H-step-ahead forecast: anchored to the last real close, bias
/// corrected, and carrying a volatility-scaled random walk so the recursion
/// does not collapse to a flat line.
#[derive(Debug, Clone)]
pub struct RecursiveForecaster {
    lookback: usize,
    horizon: usize,
    volatility_window: usize,
    volatility_floor: f64,
    noise_scale: f64,
}

impl RecursiveForecaster {
    pub fn new(
        lookback: usize,
        horizon: usize,
        volatility_window: usize,
        volatility_floor: f64,
        noise_scale: f64,
    ) -> Self {
        assert!(horizon > 0, "forecast horizon must be > 0");
        assert!(volatility_floor > 0.0, "volatility floor must be > 0");
        Self {
            lookback,
            horizon,
            volatility_window,
            volatility_floor,
            noise_scale,
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Forecast the next `horizon` close prices from the current window tail.
    /// The first emitted price is exactly the last observed close. The RNG is
    /// injected so the forecast is reproducible under a fixed seed.
    pub fn forecast<M: SequenceModel>(
        &self,
        model: &M,
        scaler: &MinMaxScaler,
        window: &RollingWindow,
        rng: &mut StdRng,
    ) -> Result<Vec<f64>, ForecastError> {
        let tail = window.tail(self.lookback)?;
        let last = tail[tail.len() - 1];
        let last_close = last.close;
        // Volume has no synthetic estimate; each synthetic step carries the
        // previous step's volume forward.
        let carried_volume = last.volume;

        let mut sequence = scaler.scale_candles(&tail);
        let volatility = self.normalized_volatility(&sequence);

        // Step 0: pin the forecast to reality and measure the model's offset.
        let raw0 = scaler.inverse_close(predict_one(model, &sequence)?);
        let bias = last_close - raw0;
        let mut prices = Vec::with_capacity(self.horizon);
        prices.push(last_close);
        self.extend_sequence(&mut sequence, scaler, last_close, volatility, carried_volume);

        let mut accumulated_noise = 0.0;
        for _ in 1..self.horizon {
            let raw = scaler.inverse_close(predict_one(model, &sequence)?);
            accumulated_noise += gaussian(rng) * self.noise_scale * volatility;
            let price = raw + bias + accumulated_noise;
            prices.push(price);
            self.extend_sequence(&mut sequence, scaler, price, volatility, carried_volume);
        }

        tracing::debug!(
            anchor = last_close,
            bias,
            volatility,
            steps = prices.len(),
            "forecast horizon recomputed"
        );
        Ok(prices)
    }

    /// Stddev of the newest normalized closes, floored so a quiet market never
    /// yields a degenerate zero-volatility walk.
    fn normalized_volatility(&self, sequence: &[FeatureRow]) -> f64 {
        let start = sequence.len().saturating_sub(self.volatility_window);
        let closes: Vec<f64> = sequence[start..].iter().map(|row| row[CLOSE_IDX]).collect();
        stddev(&closes).max(self.volatility_floor)
    }

    /// Slide the input window one step: drop the oldest row and append a
    /// synthetic candle built around the emitted price.
    fn extend_sequence(
        &self,
        sequence: &mut Vec<FeatureRow>,
        scaler: &MinMaxScaler,
        price: f64,
        volatility: f64,
        volume: f64,
    ) {
        let synthetic = Candle {
            open_time: 0,
            open: price,
            high: price + volatility / 2.0,
            low: price - volatility / 2.0,
            close: price,
            volume,
        };
        sequence.remove(0);
        sequence.push(scaler.transform(synthetic.features()));
    }
}

/// Sample stddev (n - 1 denominator); 0.0 for fewer than two values.
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

// Box-Muller transform; sufficient for volatility-scaled walk increments.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
