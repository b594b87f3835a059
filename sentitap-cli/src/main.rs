//! SentiTap CLI: acquire, audit, join, export and cache commands.
//!
//! Commands:
//! - `download`: acquire a series through the pipeline (cache first) and audit it
//! - `audit`: audit a canonical CSV/Parquet file
//! - `join`: join two or more CSV/Parquet datasets on key columns
//! - `export`: convert a canonical frame between CSV and Parquet
//! - `topics`: show the Augmento topic catalogue
//! - `cache status` / `cache clear`: inspect or empty the frame cache
//!
//! Logging goes to stderr; filter with `SENTITAP_LOG` (or `RUST_LOG`).

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use sentitap_core::data::{CancelToken, FrameCache};
use sentitap_core::domain::{BinSize, FetchRequest};
use sentitap_core::join::parse_datetime;
use sentitap_core::{audit, JoinHow};
use sentitap_runner::export::{export_report_json, load_frame, save_dataframe, save_frame};
use sentitap_runner::sources::augmento_for;
use sentitap_runner::{source_for, Acquisition, DatasetRegistry, Pipeline, PipelineConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sentitap",
    about = "SentiTap CLI: windowed acquisition and audit of crypto sentiment and price series"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a series (served from cache when available) and print its audit.
    Download {
        /// Source id: twitter, reddit, bitcointalk (Augmento), bitmex, or synthetic.
        #[arg(long)]
        source: String,

        /// Coin (Augmento) or symbol (BitMEX), e.g. bitcoin or XBTUSD.
        #[arg(long)]
        series: String,

        /// Bin size: 1m, 5m, 1h, 1d.
        #[arg(long, default_value = "1h")]
        bin: BinSize,

        /// Start (inclusive), e.g. 2024-01-01 or 2024-01-01T06:00:00Z.
        #[arg(long)]
        start: String,

        /// End (exclusive).
        #[arg(long)]
        end: String,

        /// Worker threads (overrides the config file).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write the frame here (.csv or .parquet).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the audit report here as JSON.
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
    /// Audit a canonical frame file.
    Audit {
        /// Input file (.csv or .parquet).
        input: PathBuf,

        /// Expected bin size of the series.
        #[arg(long, default_value = "1h")]
        bin: BinSize,

        /// Expected column names; enables the schema check.
        #[arg(long, value_delimiter = ',')]
        expected_columns: Vec<String>,

        /// Print the report as JSON instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Join two or more datasets, left to right.
    Join {
        /// Input files (.csv or .parquet); dataset names are the file stems.
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,

        /// Key columns.
        #[arg(long, value_delimiter = ',', default_value = "datetime")]
        on: Vec<String>,

        /// Join type: inner, left, right, outer.
        #[arg(long, default_value = "inner")]
        how: JoinHow,

        /// Output file (.csv or .parquet).
        #[arg(long)]
        output: PathBuf,
    },
    /// Convert a canonical frame between CSV and Parquet.
    Export {
        input: PathBuf,
        output: PathBuf,
    },
    /// Show the Augmento topic catalogue (fetched once, then reused).
    Topics {
        /// Re-fetch even if a summary is saved.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached artifacts.
    Status,
    /// Delete every cached artifact.
    Clear {
        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    tracing::debug!(cache_dir = %config.cache_dir.display(), "configuration loaded");

    match cli.command {
        Commands::Download {
            source,
            series,
            bin,
            start,
            end,
            concurrency,
            output,
            report_json,
        } => {
            if let Some(n) = concurrency {
                config.executor.concurrency = n;
            }
            config.validate()?;
            let request = FetchRequest::new(
                source,
                series,
                bin,
                parse_time("start", &start)?,
                parse_time("end", &end)?,
            )?;
            run_download(&config, &request, output.as_deref(), report_json.as_deref())
        }
        Commands::Audit {
            input,
            bin,
            expected_columns,
            json,
        } => run_audit(&config, &input, bin, &expected_columns, json),
        Commands::Join {
            inputs,
            on,
            how,
            output,
        } => run_join(&inputs, &on, how, &output),
        Commands::Export { input, output } => {
            let frame = load_frame(&input)?;
            save_frame(&frame, &output)?;
            println!("Wrote {} rows to {}", frame.height(), output.display());
            Ok(())
        }
        Commands::Topics { refresh } => run_topics(&config, refresh),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config.cache_dir),
            CacheAction::Clear { confirm } => run_cache_clear(&config.cache_dir, confirm),
        },
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SENTITAP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .compact()
        .init();
}

fn parse_time(which: &str, value: &str) -> Result<NaiveDateTime> {
    parse_datetime(value).with_context(|| {
        format!("--{which} '{value}' is not a date (YYYY-MM-DD) or datetime (RFC 3339)")
    })
}

fn run_download(
    config: &PipelineConfig,
    request: &FetchRequest,
    output: Option<&Path>,
    report_json: Option<&Path>,
) -> Result<()> {
    let source = source_for(config, request.source_id())?;
    let pipeline = Pipeline::from_config(config)?;

    let acquisition = pipeline
        .acquire(source.as_ref(), request, &CancelToken::new())
        .with_context(|| format!("acquisition failed for {request}"))?;

    print_acquisition(&acquisition);

    if let Some(path) = output {
        save_frame(&acquisition.frame, path)?;
        println!("Frame saved to: {}", path.display());
    }
    if let Some(path) = report_json {
        let json = export_report_json(&acquisition.report)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Report saved to: {}", path.display());
    }
    Ok(())
}

fn print_acquisition(acquisition: &Acquisition) {
    let stages: Vec<String> = acquisition.stages.iter().map(|s| s.to_string()).collect();
    println!("Request:  {}", acquisition.request);
    println!("Origin:   {:?}", acquisition.origin);
    println!("Stages:   {}", stages.join(" -> "));
    if !acquisition.windows.is_empty() {
        let failed: Vec<_> = acquisition
            .windows
            .iter()
            .filter(|w| !matches!(w.status, sentitap_runner::WindowStatus::Fetched { .. }))
            .collect();
        println!(
            "Windows:  {} fetched, {} incomplete",
            acquisition.windows.len() - failed.len(),
            failed.len()
        );
        for w in failed {
            println!("  {} {:?}", w.window, w.status);
        }
        if acquisition.is_partial() {
            println!("Partial result: not cached");
        }
    }
    println!();
    print!("{}", acquisition.report.render());
}

fn run_audit(
    config: &PipelineConfig,
    input: &Path,
    bin: BinSize,
    expected_columns: &[String],
    json: bool,
) -> Result<()> {
    let frame = load_frame(input)?;
    let expected = (!expected_columns.is_empty()).then_some(expected_columns);
    let report = audit(&frame, bin, expected, &config.audit)?;
    if json {
        println!("{}", export_report_json(&report)?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

fn run_join(inputs: &[PathBuf], keys: &[String], how: JoinHow, output: &Path) -> Result<()> {
    let mut registry = DatasetRegistry::new();
    for path in inputs {
        let meta = registry.load_dataset(path, None)?;
        println!("Loaded {:<20} {:>8} rows  {} columns", meta.name, meta.rows, meta.columns.len());
    }
    let mut joined = registry.join(keys, how)?.clone();
    save_dataframe(&mut joined, output)?;
    println!(
        "Joined {} datasets ({how}) on [{}]: {} rows, {} columns -> {}",
        inputs.len(),
        keys.join(", "),
        joined.height(),
        joined.width(),
        output.display()
    );
    Ok(())
}

fn run_topics(config: &PipelineConfig, refresh: bool) -> Result<()> {
    let provider = augmento_for(config)?;
    if refresh {
        let path = config.summary_path();
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    let summary = provider.load_or_fetch_summary()?;

    println!("Sources:   {}", summary.sources.join(", "));
    println!("Coins:     {}", summary.coins.len());
    println!("Bin sizes: {}", summary.bin_sizes.join(", "));
    println!();
    for (group, topics) in &summary.topics.categorized_topics.sentiment {
        let names: Vec<&str> = topics.values().map(String::as_str).collect();
        println!("{group:<10} {}", names.join(", "));
    }
    println!(
        "{:<10} {} topics",
        "Other",
        summary.topics.categorized_topics.other.len()
    );
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }
    let cache = FrameCache::new(cache_dir);
    let entries = cache.entries()?;
    if entries.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    println!("{:<84} {:>8}  {:<12}  Cached at", "Key", "Rows", "Hash");
    println!("{}", "-".repeat(124));
    let mut total_rows = 0;
    for meta in &entries {
        total_rows += meta.row_count;
        println!(
            "{:<84} {:>8}  {:<12}  {}",
            meta.key,
            meta.row_count,
            meta.data_hash.short(),
            meta.cached_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} artifacts, {} rows total", entries.len(), total_rows);
    Ok(())
}

fn run_cache_clear(cache_dir: &Path, confirm: bool) -> Result<()> {
    let cache = FrameCache::new(cache_dir);
    if !confirm {
        let entries = cache.entries()?;
        for meta in &entries {
            println!("  Would remove: {}", meta.key);
        }
        println!("{} artifacts would be removed. Re-run with --confirm.", entries.len());
        return Ok(());
    }
    let removed = cache.clear()?;
    if removed == 0 && !cache_dir.exists() {
        bail!("cache directory does not exist: {}", cache_dir.display());
    }
    println!("Removed {removed} artifacts from {}", cache_dir.display());
    Ok(())
}
