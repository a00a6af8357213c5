use std::collections::VecDeque;

use crate::error::ForecastError;
use crate::model::candle::Candle;

/// Bounded, time-ordered buffer of the most recent candles. The single source
/// of truth for what the cycle currently knows; external readers only ever see
/// copies via `snapshot` or `tail`.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be > 0");
        Self {
            capacity,
            candles: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a candle whose timestamp is strictly greater than the current
    /// tail. Evicts and returns the oldest candle when the window is full.
    pub fn append(&mut self, candle: Candle) -> Result<Option<Candle>, ForecastError> {
        if let Some(last) = self.candles.back() {
            if candle.open_time <= last.open_time {
                return Err(ForecastError::OutOfOrder {
                    last_ms: last.open_time,
                    got_ms: candle.open_time,
                });
            }
        }
        self.candles.push_back(candle);
        if self.candles.len() > self.capacity {
            return Ok(self.candles.pop_front());
        }
        Ok(None)
    }

    /// Last `k` candles, oldest first.
    pub fn tail(&self, k: usize) -> Result<Vec<Candle>, ForecastError> {
        if self.candles.len() < k {
            return Err(ForecastError::InsufficientData {
                needed: k,
                have: self.candles.len(),
            });
        }
        Ok(self
            .candles
            .iter()
            .skip(self.candles.len() - k)
            .copied()
            .collect())
    }

    /// Immutable copy of the whole window for external readers.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn first_open_time(&self) -> Option<u64> {
        self.candles.front().map(|c| c.open_time)
    }

    pub fn last_open_time(&self) -> Option<u64> {
        self.candles.back().map(|c| c.open_time)
    }
}
