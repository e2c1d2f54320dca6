// src/history/mod.rs
//
// Run ledger: one Parquet row per dataset per run.

use anyhow::{anyhow, Result};
use arrow::{
    array::{Array, ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::{path::Path, sync::Arc};
use tracing::info;

pub mod ledger;

use ledger::{column, Ledger, LedgerRow};

/// What happened to one dataset in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub dataset: String,
    /// `fresh`, `cached` or `failed`.
    pub outcome: String,
    /// Rows in the stored table after the run.
    pub rows: u64,
    pub latest_period: Option<String>,
    /// `direct_export` or `page_link`, when something was downloaded.
    pub origin: Option<String>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub message: Option<String>,
}

fn micros_to_utc(v: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(v).ok_or_else(|| anyhow!("timestamp {} out of range", v))
}

fn opt_str(arr: &StringArray, i: usize) -> Option<String> {
    if arr.is_null(i) {
        None
    } else {
        Some(arr.value(i).to_string())
    }
}

impl LedgerRow for RunRecord {
    fn partition_date(&self) -> NaiveDate {
        self.started.date_naive()
    }

    fn schema() -> ArrowSchema {
        let ts = || ArrowDataType::Timestamp(TimeUnit::Microsecond, None);
        ArrowSchema::new(vec![
            Field::new("dataset", ArrowDataType::Utf8, false),
            Field::new("outcome", ArrowDataType::Utf8, false),
            Field::new("rows", ArrowDataType::UInt64, false),
            Field::new("latest_period", ArrowDataType::Utf8, true),
            Field::new("origin", ArrowDataType::Utf8, true),
            Field::new("started", ts(), false),
            Field::new("finished", ts(), false),
            Field::new("message", ArrowDataType::Utf8, true),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.dataset.clone()])),
            Arc::new(StringArray::from(vec![self.outcome.clone()])),
            Arc::new(UInt64Array::from(vec![self.rows])),
            Arc::new(StringArray::from(vec![self.latest_period.clone()])),
            Arc::new(StringArray::from(vec![self.origin.clone()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self.started.timestamp_micros()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self.finished.timestamp_micros()])),
            Arc::new(StringArray::from(vec![self.message.clone()])),
        ]
    }

    fn unique_key(&self) -> String {
        format!("{}--{}", self.dataset, self.started.timestamp_micros())
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let dataset = column::<StringArray>(batch, "dataset")?;
        let outcome = column::<StringArray>(batch, "outcome")?;
        let rows = column::<UInt64Array>(batch, "rows")?;
        let latest = column::<StringArray>(batch, "latest_period")?;
        let origin = column::<StringArray>(batch, "origin")?;
        let started = column::<TimestampMicrosecondArray>(batch, "started")?;
        let finished = column::<TimestampMicrosecondArray>(batch, "finished")?;
        let message = column::<StringArray>(batch, "message")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(RunRecord {
                    dataset: dataset.value(i).to_string(),
                    outcome: outcome.value(i).to_string(),
                    rows: rows.value(i),
                    latest_period: opt_str(latest, i),
                    origin: opt_str(origin, i),
                    started: micros_to_utc(started.value(i))?,
                    finished: micros_to_utc(finished.value(i))?,
                    message: opt_str(message, i),
                })
            })
            .collect()
    }
}

/// The `runs` table under the configured history directory.
pub struct RunHistory {
    ledger: Ledger<RunRecord>,
}

impl RunHistory {
    pub fn open(history_dir: &Path) -> Result<Self> {
        Ok(Self {
            ledger: Ledger::open(history_dir, "runs")?,
        })
    }

    pub fn record(&self, run: &RunRecord) -> Result<()> {
        let path = self.ledger.append(run)?;
        info!(
            dataset = %run.dataset,
            outcome = %run.outcome,
            path = %path.display(),
            "run recorded"
        );
        Ok(())
    }

    /// Most recent runs first, at most `limit` of them.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut runs = self.ledger.load_all()?;
        runs.sort_by(|a, b| b.started.cmp(&a.started).then(a.dataset.cmp(&b.dataset)));
        runs.truncate(limit);
        Ok(runs)
    }

    pub fn compact(&self) -> Result<usize> {
        let removed = self.ledger.vacuum()?;
        info!(dir = %self.ledger.dir().display(), removed, "history compacted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use glob::glob;
    use tempfile::tempdir;

    fn run(dataset: &str, started: DateTime<Utc>, outcome: &str) -> RunRecord {
        RunRecord {
            dataset: dataset.to_string(),
            outcome: outcome.to_string(),
            rows: 42,
            latest_period: Some("2024Q4".to_string()),
            origin: None,
            started,
            finished: started + Duration::seconds(3),
            message: if outcome == "fresh" {
                None
            } else {
                Some("GET timed out".to_string())
            },
        }
    }

    fn now_micros() -> DateTime<Utc> {
        micros_to_utc(Utc::now().timestamp_micros()).unwrap()
    }

    #[test]
    fn records_round_trip_through_parquet() {
        let tmp = tempdir().unwrap();
        let history = RunHistory::open(tmp.path()).unwrap();
        let now = now_micros();
        let a = run("transfer-count", now, "fresh");
        let b = run("default-rate", now + Duration::seconds(5), "cached");
        history.record(&a).unwrap();
        history.record(&b).unwrap();

        let date_str = now.date_naive().format("%Y%m%d").to_string();
        let pattern = format!("{}/runs/date={}/*.parquet", tmp.path().display(), date_str);
        assert_eq!(glob(&pattern).unwrap().filter_map(Result::ok).count(), 2);

        let runs = history.recent(10).unwrap();
        assert_eq!(runs, vec![b, a]);
    }

    #[test]
    fn recent_honours_limit() {
        let tmp = tempdir().unwrap();
        let history = RunHistory::open(tmp.path()).unwrap();
        let now = now_micros();
        for i in 0..4 {
            history
                .record(&run("transfer-count", now + Duration::seconds(i), "fresh"))
                .unwrap();
        }
        let runs = history.recent(2).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].started, now + Duration::seconds(3));
    }

    #[test]
    fn compact_consolidates_partitions() {
        let tmp = tempdir().unwrap();
        let history = RunHistory::open(tmp.path()).unwrap();
        let now = now_micros();
        history.record(&run("a", now, "fresh")).unwrap();
        history.record(&run("b", now, "failed")).unwrap();

        assert_eq!(history.compact().unwrap(), 2);
        let date_str = now.date_naive().format("%Y%m%d").to_string();
        let files: Vec<_> = glob(&format!(
            "{}/runs/date={}/*.parquet",
            tmp.path().display(),
            date_str
        ))
        .unwrap()
        .filter_map(Result::ok)
        .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(
            files[0].file_name().unwrap().to_string_lossy(),
            "consolidated.parquet"
        );
        assert_eq!(history.recent(10).unwrap().len(), 2);
        // nothing left to fold
        assert_eq!(history.compact().unwrap(), 0);
    }
}
