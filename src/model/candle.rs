use serde::{Deserialize, Serialize};

/// Number of features the model consumes per timestep.
pub const FEATURE_COUNT: usize = 5;

/// Index of the close price inside a feature row. The close is the value the
/// model predicts and the only feature that is ever inverse-transformed alone.
pub const CLOSE_IDX: usize = 3;

/// One timestep of model input: [open, high, low, close, volume].
pub type FeatureRow = [f64; FEATURE_COUNT];

/// One closed market candle. `open_time` is UTC milliseconds and unique within
/// a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn features(&self) -> FeatureRow {
        [self.open, self.high, self.low, self.close, self.volume]
    }

    /// Flat or zero-volume candles are synthetic provider artifacts. They are
    /// kept in the window but never used as a training target.
    pub fn is_degenerate(&self) -> bool {
        self.high == self.low || self.volume == 0.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, volume: f64) -> Candle {
        Candle {
            open_time: 60_000,
            open: 100.0,
            high,
            low,
            close: 101.0,
            volume,
        }
    }

    #[test]
    fn features_order_matches_close_index() {
        let c = candle(105.0, 95.0, 10.0);
        let row = c.features();
        assert!((row[CLOSE_IDX] - c.close).abs() < f64::EPSILON);
        assert!((row[0] - c.open).abs() < f64::EPSILON);
        assert!((row[4] - c.volume).abs() < f64::EPSILON);
    }

    #[test]
    fn flat_candle_is_degenerate() {
        assert!(candle(100.0, 100.0, 10.0).is_degenerate());
    }

    #[test]
    fn zero_volume_candle_is_degenerate() {
        assert!(candle(105.0, 95.0, 0.0).is_degenerate());
    }

    #[test]
    fn normal_candle_is_not_degenerate() {
        assert!(!candle(105.0, 95.0, 10.0).is_degenerate());
    }

    #[test]
    fn close_above_open_is_bullish() {
        let c = candle(105.0, 95.0, 10.0);
        assert!(c.is_bullish());
        let mut down = c;
        down.close = c.open - 1.0;
        assert!(!down.is_bullish());
    }
}
