use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pipscraper::{
    config::Config,
    fetch::browser::probe_launch,
    history::RunHistory,
    pipeline::{output_paths, Pipeline, RunOutcome},
};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, NamedTempFile};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Keep the MOI real-estate open-data monitors current
#[derive(Parser, Debug)]
#[command(name = "pipscraper")]
#[command(version)]
struct Args {
    /// YAML config file; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, merge, chart and report every (or the named) dataset
    Run {
        /// Dataset ids to run; repeatable
        #[arg(long = "dataset")]
        datasets: Vec<String>,

        /// Skip downloads and rebuild outputs from stored tables
        #[arg(long)]
        offline: bool,
    },

    /// List configured datasets and their output files
    Datasets,

    /// Show recent runs from the history ledger
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Consolidate ledger partitions before listing
        #[arg(long)]
        compact: bool,
    },

    /// Check temp-dir writability and headless browser launch
    Doctor,
}

fn selected<'a>(cfg: &'a Config, ids: &[String]) -> Result<Vec<&'a pipscraper::config::DatasetConfig>> {
    if ids.is_empty() {
        return Ok(cfg.datasets.iter().collect());
    }
    ids.iter()
        .map(|id| {
            cfg.dataset(id)
                .with_context(|| format!("unknown dataset `{}`", id))
        })
        .collect()
}

async fn run(cfg: &Config, ids: &[String], offline: bool) -> Result<i32> {
    let datasets = selected(cfg, ids)?;
    let pipeline = Pipeline::new(cfg, offline)?;
    let outcome = pipeline.run(&datasets).await;
    match outcome {
        RunOutcome::Fresh => info!("all datasets updated"),
        RunOutcome::Cached => warn!("finished using stored data"),
        RunOutcome::Failed => error!("finished with failures"),
    }
    Ok(outcome.exit_code())
}

fn list_datasets(cfg: &Config) {
    for ds in &cfg.datasets {
        println!("{}  {}", ds.id, ds.title);
        println!("    target: {}", ds.target_name);
        if let Some(url) = &ds.export_url {
            println!("    export: {}", url);
        }
        for path in output_paths(cfg, ds) {
            println!("    {}", path.display());
        }
    }
}

fn show_history(cfg: &Config, limit: usize, json: bool, compact: bool) -> Result<()> {
    let history = RunHistory::open(&cfg.history_dir)?;
    if compact {
        history.compact()?;
    }
    let runs = history.recent(limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("no runs recorded in {}", cfg.history_dir.display());
        return Ok(());
    }
    for r in runs {
        println!(
            "{}  {:<16} {:<7} rows={:<6} latest={:<8} {}",
            r.started.format("%Y-%m-%d %H:%M:%S"),
            r.dataset,
            r.outcome,
            r.rows,
            r.latest_period.as_deref().unwrap_or("-"),
            r.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn check_writable(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} does not exist", dir.display());
    }
    NamedTempFile::new_in(dir)
        .with_context(|| format!("creating a file in {}", dir.display()))?;
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<i32> {
    let mut healthy = true;
    for dir in [
        PathBuf::from("/tmp"),
        PathBuf::from("/var/tmp"),
        std::env::temp_dir(),
    ] {
        match check_writable(&dir) {
            Ok(()) => println!("ok    writable  {}", dir.display()),
            Err(e) => {
                healthy = false;
                println!("FAIL  writable  {}: {:#}", dir.display(), e);
            }
        }
    }

    let scratch = tempdir().context("creating browser scratch dir")?;
    println!("browser: {}", cfg.browser.binary);
    let probes = probe_launch(&cfg.browser, scratch.path()).await;
    for p in &probes {
        println!(
            "{}  {}: {}",
            if p.ok { "ok   " } else { "FAIL " },
            p.profile,
            p.detail
        );
    }
    if !probes.iter().any(|p| p.ok) {
        healthy = false;
        if !cfg.browser.enabled {
            println!("(browser rendering is disabled; plain HTTP is used for the data page)");
        }
    }
    Ok(if healthy { 0 } else { 2 })
}

async fn dispatch(args: Args) -> Result<i32> {
    let cfg = Config::load(args.config.as_deref())?;
    match args.command {
        Command::Run { datasets, offline } => run(&cfg, &datasets, offline).await,
        Command::Datasets => {
            list_datasets(&cfg);
            Ok(0)
        }
        Command::History {
            limit,
            json,
            compact,
        } => show_history(&cfg, limit, json, compact).map(|_| 0),
        Command::Doctor => doctor(&cfg).await,
    }
}

#[tokio::main]
async fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    let args = Args::parse();
    let code = match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            RunOutcome::Failed.exit_code()
        }
    };
    std::process::exit(code);
}
