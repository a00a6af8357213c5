use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::model::candle::Candle;

/// CSV-backed candle history. Seeds the window at startup and receives every
/// accepted candle afterwards, so a restart resumes where the last run ended.
#[derive(Debug, Clone)]
pub struct CandleHistory {
    path: PathBuf,
}

impl CandleHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the full history, sorted by open time with duplicates removed.
    /// A missing file is an empty history, not an error.
    pub fn load(&self) -> Result<Vec<Candle>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut candles = Vec::new();
        for record in reader.deserialize::<Candle>() {
            let candle = record.context("malformed history row")?;
            candles.push(candle);
        }
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        Ok(candles)
    }

    /// Append one accepted candle. Creates the file (with a header row) on
    /// first use.
    pub fn append(&self, candle: &Candle) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let write_header = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {} for append", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer
            .serialize(candle)
            .context("failed to serialize candle")?;
        writer.flush().context("failed to flush history file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: u64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 5.0,
        }
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = CandleHistory::new(dir.path().join("none.csv"));
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let history = CandleHistory::new(dir.path().join("data.csv"));

        history.append(&candle(60_000, 100.0)).unwrap();
        history.append(&candle(120_000, 101.0)).unwrap();

        let loaded = history.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].open_time, 60_000);
        assert!((loaded[1].close - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn load_sorts_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let history = CandleHistory::new(dir.path().join("data.csv"));

        history.append(&candle(120_000, 101.0)).unwrap();
        history.append(&candle(60_000, 100.0)).unwrap();
        history.append(&candle(120_000, 999.0)).unwrap();

        let loaded = history.load().unwrap();
        let times: Vec<u64> = loaded.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![60_000, 120_000]);
    }
}
