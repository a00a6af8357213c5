use anyhow::{Context, Result};

use crate::error::ForecastError;
use crate::model::candle::Candle;
use crate::poller::MarketDataSource;

use super::types::ChartResponse;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; candlecast/0.3)";

/// Unauthenticated client for the Yahoo Finance v8 chart API.
pub struct YahooChartClient {
    http: reqwest::Client,
    base_url: String,
    symbol: String,
    interval: String,
}

impl YahooChartClient {
    pub fn new(base_url: &str, symbol: &str, interval: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build Yahoo HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn compact_error_body(body: &str) -> String {
        let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.len() > 180 {
            format!("{}...", &normalized[..180])
        } else {
            normalized
        }
    }

    async fn fetch_range(&self, period1_s: i64, period2_s: i64) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&includePrePost=false",
            self.base_url, self.symbol, period1_s, period2_s, self.interval
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("chart request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ForecastError::Fetch(format!(
                "chart request returned {status}: {}",
                Self::compact_error_body(&body)
            ))
            .into());
        }

        let parsed: ChartResponse = resp.json().await.context("chart response parse failed")?;
        if let Some(err) = parsed.chart.error {
            return Err(ForecastError::Fetch(format!(
                "chart API error ({}): {}",
                err.code, err.description
            ))
            .into());
        }

        let candles = parsed
            .chart
            .result
            .as_ref()
            .and_then(|r| r.first())
            .map(|r| r.candles())
            .unwrap_or_default();

        tracing::debug!(
            symbol = %self.symbol,
            count = candles.len(),
            "fetched chart candles"
        );
        Ok(candles)
    }
}

impl MarketDataSource for YahooChartClient {
    async fn fetch_since(&self, start_ms: u64) -> Result<Vec<Candle>> {
        let period1_s = (start_ms / 1_000) as i64;
        let period2_s = chrono::Utc::now().timestamp();
        if period2_s <= period1_s {
            return Ok(Vec::new());
        }
        self.fetch_range(period1_s, period2_s).await
    }
}
