// src/pipeline.rs
//
// One run: for each dataset, fetch → merge → aggregate → render → report.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::aggregate::{nationwide_series, region_series, TimeSeries};
use crate::config::{ChartConfig, Config, DatasetConfig};
use crate::fetch::{build_client, fetch_dataset, Download, Origin};
use crate::history::{RunHistory, RunRecord};
use crate::merge::{merge_tables, MergeMode};
use crate::normalize::detect_roles;
use crate::readme::{patch_readme, stamp_line, ReadmePatch};
use crate::render::{render_chart, render_unavailable, write_svg, ChartData};
use crate::report::{
    monitor_report, summarize_error, taipei_now, unavailable_report, write_report, ReportContext,
};
use crate::table::{read_table, write_csv};

/// Ordered from best to worst, so the worst of several is the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunOutcome {
    /// New data was downloaded and processed.
    Fresh,
    /// Download failed; outputs were rebuilt from the stored table.
    Cached,
    /// Nothing usable; placeholder outputs were written.
    Failed,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Fresh => 0,
            RunOutcome::Cached => 1,
            RunOutcome::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Fresh => "fresh",
            RunOutcome::Cached => "cached",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Result of one dataset's run.
#[derive(Debug, Clone)]
pub struct DatasetRun {
    pub outcome: RunOutcome,
    pub rows: usize,
    pub latest_period: Option<String>,
    pub origin: Option<Origin>,
    pub message: Option<String>,
}

impl DatasetRun {
    fn failed(message: String) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            rows: 0,
            latest_period: None,
            origin: None,
            message: Some(message),
        }
    }
}

fn origin_name(origin: &Origin) -> &'static str {
    match origin {
        Origin::DirectExport => "direct_export",
        Origin::PageLink { .. } => "page_link",
    }
}

/// `path` as the README should link it: relative to the README's directory.
fn readme_link(readme: &Path, path: &Path) -> String {
    let base = readme.parent().unwrap_or_else(|| Path::new(""));
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

pub struct Pipeline<'a> {
    cfg: &'a Config,
    client: Client,
    history: RunHistory,
    offline: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(cfg: &'a Config, offline: bool) -> Result<Self> {
        cfg.ensure_dirs()?;
        Ok(Self {
            cfg,
            client: build_client(&cfg.http)?,
            history: RunHistory::open(&cfg.history_dir)?,
            offline,
        })
    }

    /// Run the given datasets in order; the worst outcome is returned.
    pub async fn run(&self, datasets: &[&DatasetConfig]) -> RunOutcome {
        let mut worst = RunOutcome::Fresh;
        for ds in datasets {
            let run = self.run_dataset(ds).await;
            match run.outcome {
                RunOutcome::Fresh => info!(dataset = %ds.id, rows = run.rows, "dataset updated"),
                RunOutcome::Cached => warn!(
                    dataset = %ds.id,
                    reason = run.message.as_deref().unwrap_or(""),
                    "served from stored data"
                ),
                RunOutcome::Failed => error!(
                    dataset = %ds.id,
                    reason = run.message.as_deref().unwrap_or(""),
                    "dataset failed"
                ),
            }
            worst = worst.max(run.outcome);
        }
        worst
    }

    #[instrument(level = "info", skip(self, ds), fields(dataset = %ds.id))]
    pub async fn run_dataset(&self, ds: &DatasetConfig) -> DatasetRun {
        let started = Utc::now();
        let run = match self.download(ds).await {
            Ok((_workdir, download)) => self.finish(ds, Ok(download)),
            Err(e) => self.finish(ds, Err(e)),
        };
        self.record(ds, started, &run);
        run
    }

    /// Fetch into a scratch directory inside the data dir. The directory is
    /// returned alongside the download so the file outlives this call.
    async fn download(&self, ds: &DatasetConfig) -> Result<(tempfile::TempDir, Download)> {
        if self.offline {
            anyhow::bail!("offline mode; download skipped");
        }
        let workdir = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(&self.cfg.data_dir)
            .with_context(|| format!("creating scratch dir in {}", self.cfg.data_dir.display()))?;
        let download = fetch_dataset(&self.client, self.cfg, ds, workdir.path()).await?;
        Ok((workdir, download))
    }

    /// Merge a successful download into the stored table.
    fn ingest(&self, ds: &DatasetConfig, download: &Path) -> Result<usize> {
        let new = read_table(download)
            .with_context(|| format!("parsing download {}", download.display()))?;
        info!(rows = new.len(), columns = new.headers.len(), "parsed download");

        let csv_path = self.cfg.csv_path(ds);
        let old = if csv_path.exists() {
            match read_table(&csv_path) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!(path = %csv_path.display(), error = %e, "stored table unreadable; replacing");
                    None
                }
            }
        } else {
            None
        };

        let merged =
            merge_tables(old, new, ds.columns.as_ref()).context("merging into stored table")?;
        match merged.mode {
            MergeMode::Created => info!("stored table created"),
            MergeMode::Replaced => info!("stored table replaced"),
            MergeMode::Merged { superseded } => info!(superseded, "merged into stored table"),
        }
        write_csv(&merged.table, &csv_path).context("storing merged table")?;
        Ok(merged.table.len())
    }

    /// Everything after the fetch phase, given its result.
    fn finish(&self, ds: &DatasetConfig, fetched: Result<Download>) -> DatasetRun {
        let csv_path = self.cfg.csv_path(ds);

        let (outcome, origin, reason) = match fetched.and_then(|d| {
            self.ingest(ds, &d.path)?;
            Ok(d)
        }) {
            Ok(d) => (RunOutcome::Fresh, Some(d.origin), None),
            Err(e) => {
                let summary = summarize_error(&format!("{:#}", e));
                warn!(error = %summary, "update failed");
                if !csv_path.exists() {
                    if let Err(e) = self.write_unavailable(ds, &summary) {
                        error!(error = %format!("{:#}", e), "writing placeholder outputs failed");
                    }
                    return DatasetRun::failed(summary);
                }
                (RunOutcome::Cached, None, Some(summary))
            }
        };

        match self.publish(ds, outcome == RunOutcome::Fresh) {
            Ok((rows, latest_period)) => DatasetRun {
                outcome,
                rows,
                latest_period,
                origin,
                message: reason,
            },
            Err(e) => DatasetRun::failed(summarize_error(&format!("{:#}", e))),
        }
    }

    /// Build series from the stored table and write chart, report and README.
    fn publish(&self, ds: &DatasetConfig, fresh: bool) -> Result<(usize, Option<String>)> {
        let csv_path = self.cfg.csv_path(ds);
        let svg_path = self.cfg.svg_path(ds);
        let table = read_table(&csv_path)
            .with_context(|| format!("reading stored table {}", csv_path.display()))?;
        let roles = detect_roles(&table, &ds.value_keywords, ds.columns.as_ref())
            .context("detecting column roles")?;

        let regions: Option<Vec<(String, TimeSeries)>> = match &ds.chart {
            ChartConfig::RegionPanels { regions, .. } => Some(
                region_series(&table, &roles, regions).context("building region series")?,
            ),
            ChartConfig::Trend => None,
        };
        let series = match nationwide_series(&table, &roles, ds.aggregate) {
            Ok(s) => s,
            // Region charts can stand without a nationwide line.
            Err(e) if regions.is_some() => {
                warn!(error = %e, "no nationwide series");
                TimeSeries::default()
            }
            Err(e) => return Err(e.context("building nationwide series")),
        };
        info!(
            points = series.len(),
            latest = ?series.latest().map(|p| &p.label),
            "series ready"
        );

        let chart = match &regions {
            Some(r) => render_chart(ds, ChartData::Regions(r)),
            None => render_chart(ds, ChartData::Trend(&series)),
        };
        write_svg(&svg_path, &chart).context("writing chart")?;

        let ctx = ReportContext {
            dataset: ds,
            csv_path: &csv_path,
            svg_path: &svg_path,
            source_url: &self.cfg.base_url,
            generated_at: taipei_now(),
        };
        let report = monitor_report(&ctx, &series, regions.as_deref());
        write_report(&self.cfg.report_path(ds), &report).context("writing report")?;

        if fresh {
            self.stamp_readme(ds, &svg_path, &ctx);
        }

        let latest = series
            .latest()
            .or_else(|| regions.as_ref()?.first()?.1.latest())
            .map(|p| p.label.clone());
        Ok((table.len(), latest))
    }

    fn stamp_readme(&self, ds: &DatasetConfig, svg_path: &Path, ctx: &ReportContext<'_>) {
        let Some(section) = &ds.readme else {
            return;
        };
        let target = readme_link(&self.cfg.readme, svg_path);
        let patch = ReadmePatch {
            header: &section.header,
            image_alt: &section.image_alt,
            image_target: &target,
            stamp: stamp_line(&ctx.generated_at),
        };
        if let Err(e) = patch_readme(&self.cfg.readme, &patch) {
            warn!(error = %format!("{:#}", e), "README update failed");
        }
    }

    fn write_unavailable(&self, ds: &DatasetConfig, summary: &str) -> Result<()> {
        let report = unavailable_report(ds, &taipei_now(), summary, &self.cfg.base_url);
        write_report(&self.cfg.report_path(ds), &report)?;
        write_svg(&self.cfg.svg_path(ds), &render_unavailable(&ds.title, summary))
    }

    fn record(&self, ds: &DatasetConfig, started: chrono::DateTime<Utc>, run: &DatasetRun) {
        let record = RunRecord {
            dataset: ds.id.clone(),
            outcome: run.outcome.as_str().to_string(),
            rows: run.rows as u64,
            latest_period: run.latest_period.clone(),
            origin: run.origin.as_ref().map(|o| origin_name(o).to_string()),
            started,
            finished: Utc::now(),
            message: run.message.clone(),
        };
        if let Err(e) = self.history.record(&record) {
            warn!(error = %format!("{:#}", e), "could not record run history");
        }
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }
}

/// Paths the `datasets` listing shows for one dataset.
pub fn output_paths(cfg: &Config, ds: &DatasetConfig) -> [PathBuf; 3] {
    [cfg.csv_path(ds), cfg.svg_path(ds), cfg.report_path(ds)]
}
