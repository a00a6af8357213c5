use serde::Deserialize;

use crate::model::candle::Candle;

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
pub struct ChartError {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
    /// Bucket open times in UTC seconds.
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
    pub quote: Vec<Quote>,
}

/// Parallel arrays, one slot per timestamp. Slots for buckets that have not
/// closed yet (or were never traded) come back as null.
#[derive(Debug, Deserialize, Default)]
pub struct Quote {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

impl ChartResult {
    /// Flatten the parallel arrays into candles, dropping any slot with a
    /// missing field. Output order follows the response order.
    pub fn candles(&self) -> Vec<Candle> {
        let quote = match self.indicators.quote.first() {
            Some(q) => q,
            None => return Vec::new(),
        };
        let mut out = Vec::with_capacity(self.timestamp.len());
        for (i, ts) in self.timestamp.iter().enumerate() {
            if *ts < 0 {
                continue;
            }
            let row = (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
                quote.volume.get(i).copied().flatten(),
            );
            if let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = row {
                out.push(Candle {
                    open_time: *ts as u64 * 1_000,
                    open,
                    high,
                    low,
                    close,
                    volume,
                });
            }
        }
        out
    }
}
