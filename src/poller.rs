use anyhow::{Context, Result};

use crate::model::candle::Candle;
use crate::window::RollingWindow;

/// External market data provider. Returns closed candles starting strictly
/// after `start_ms`, oldest first. An empty result is not an error; it means
/// no new candle has closed yet.
#[allow(async_fn_in_trait)]
pub trait MarketDataSource {
    async fn fetch_since(&self, start_ms: u64) -> Result<Vec<Candle>>;
}

/// Detects staleness against wall-clock time and fetches only the missing
/// increment from the provider.
#[derive(Debug, Clone)]
pub struct Poller {
    staleness_ms: u64,
    interval_ms: u64,
    seed_span_ms: u64,
}

impl Poller {
    pub fn new(staleness_ms: u64, interval_ms: u64, seed_span_ms: u64) -> Self {
        Self {
            staleness_ms,
            interval_ms,
            seed_span_ms,
        }
    }

    /// Fetch the candles missing from the window, deduped and in ascending
    /// order, ready to be appended. Returns an empty vec while the window is
    /// still fresh.
    pub async fn poll<S: MarketDataSource>(
        &self,
        source: &S,
        window: &RollingWindow,
        now_ms: u64,
    ) -> Result<Vec<Candle>> {
        let start_ms = match window.last_open_time() {
            Some(last) => {
                let lag_ms = now_ms.saturating_sub(last);
                if lag_ms <= self.staleness_ms {
                    tracing::debug!(lag_ms, "window is fresh; skipping fetch");
                    return Ok(Vec::new());
                }
                tracing::debug!(lag_ms, "window is stale; fetching the missing increment");
                last + self.interval_ms
            }
            None => {
                tracing::info!(
                    seed_span_ms = self.seed_span_ms,
                    "window is empty; fetching seed history"
                );
                now_ms.saturating_sub(self.seed_span_ms)
            }
        };

        let fetched = source
            .fetch_since(start_ms)
            .await
            .context("provider fetch failed")?;
        let accepted = filter_new(fetched, window.last_open_time());
        if accepted.is_empty() {
            tracing::debug!("no new candle closed yet");
        }
        Ok(accepted)
    }
}

/// Keep only candles strictly newer than the window tail, in strictly
/// ascending order. Duplicates and regressions from the provider are dropped
/// silently; they are provider noise, not a fatal condition.
pub fn filter_new(candles: Vec<Candle>, last_ms: Option<u64>) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    let mut tail = last_ms;
    let mut dropped = 0usize;
    for candle in candles {
        if tail.map_or(true, |t| candle.open_time > t) {
            tail = Some(candle.open_time);
            out.push(candle);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "dropped duplicate or out-of-order provider candles");
    }
    out
}
