//! Query Chaos Harness command line.
#![forbid(unsafe_code)]

mod gemini;
mod report;
mod runner;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use qch_common::config::{ConfigSource, ConfigValueSource};
use qch_common::{
    GeneratorKind, HarnessConfig, LogConfig, MetricsLog, OutputFormat, init_logging, summarize,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(
    name = "qch",
    version,
    about = "Run a query workload under injected faults and report how retries cope"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load fixtures, generate queries and execute them under chaos
    Run(RunArgs),

    /// Recompute the run summary from a JSONL metrics file
    Summarize {
        /// Metrics file written by `run --metrics-out`
        path: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: FormatArg,
    },

    /// List the configured fault catalogue
    Faults {
        /// Config file (defaults to ~/.config/qch/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (defaults to ~/.config/qch/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dotenv file read for QCH_* settings and the API key
    #[arg(long, default_value = ".env")]
    dotenv: PathBuf,

    /// Attempts per task, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Probability of injecting a fault before each attempt
    #[arg(long)]
    chaos_probability: Option<f64>,

    /// Disable fault injection
    #[arg(long)]
    no_chaos: bool,

    /// Restrict the catalogue to these faults (comma separated)
    #[arg(long, value_delimiter = ',')]
    faults: Vec<String>,

    /// Seed for fixtures, fault selection and backoff jitter
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    generator: Option<GeneratorArg>,

    /// TOML file mapping task text to SQL for the canned generator
    #[arg(long)]
    canned_file: Option<PathBuf>,

    /// Append per-task metrics to this JSONL file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Fixture users
    #[arg(long)]
    users: Option<u32>,

    /// Fixture movies
    #[arg(long)]
    movies: Option<u32>,
}

#[derive(ValueEnum, Clone, Copy)]
enum GeneratorArg {
    Gemini,
    Canned,
}

impl From<GeneratorArg> for GeneratorKind {
    fn from(arg: GeneratorArg) -> Self {
        match arg {
            GeneratorArg::Gemini => GeneratorKind::Gemini,
            GeneratorArg::Canned => GeneratorKind::Canned,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Summarize { path, format } => summarize_file(&path, format.into()),
        Commands::Faults { config } => {
            let loaded = HarnessConfig::load(config.as_deref(), None)?;
            let catalogue = loaded.config.chaos_config()?.catalogue;
            print!("{}", report::render_faults(&catalogue));
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let loaded = HarnessConfig::load(args.config.as_deref(), Some(args.dotenv.as_path()))
        .context("failed to load configuration")?;
    let mut config = loaded.config;
    let mut overrides = loaded.overrides;
    overrides.extend(apply_cli(&mut config, &args));

    if let Some(file) = &loaded.file {
        info!(path = %file.display(), "Using config file");
    }
    for entry in &overrides {
        debug!(%entry, "Config override");
    }
    for warning in config.check()? {
        warn!(%warning, "Configuration warning");
    }

    let generator = runner::Generator::from_config(&config)?;
    let report = runner::run(&config, &generator).await?;

    match config.run.format {
        OutputFormat::Text => print!("{}", report::render_text(&report)),
        OutputFormat::Json => println!("{}", report::render_json(&report)?),
    }
    Ok(())
}

/// Overlay command-line flags, the highest-precedence layer.
fn apply_cli(config: &mut HarnessConfig, args: &RunArgs) -> Vec<ConfigValueSource> {
    let mut applied = Vec::new();
    let mut note = |key: &'static str| {
        applied.push(ConfigValueSource {
            key,
            source: ConfigSource::CommandLine,
            origin: None,
        });
    };

    if let Some(n) = args.max_attempts {
        config.retry.max_attempts = n;
        note("retry.max_attempts");
    }
    if let Some(p) = args.chaos_probability {
        config.chaos.probability = p;
        note("chaos.probability");
    }
    if args.no_chaos {
        config.chaos.enabled = false;
        note("chaos.enabled");
    }
    if !args.faults.is_empty() {
        config.chaos.faults = Some(args.faults.clone());
        note("chaos.faults");
    }
    if let Some(seed) = args.seed {
        config.run.seed = Some(seed);
        note("run.seed");
    }
    if let Some(kind) = args.generator {
        config.generator.kind = kind.into();
        note("generator.kind");
    }
    if let Some(path) = &args.canned_file {
        config.generator.canned_file = Some(path.clone());
        config.generator.kind = GeneratorKind::Canned;
        note("generator.canned_file");
    }
    if let Some(path) = &args.metrics_out {
        config.run.metrics_out = Some(path.clone());
        note("run.metrics_out");
    }
    if let Some(format) = args.format {
        config.run.format = format.into();
        note("run.format");
    }
    if let Some(users) = args.users {
        config.fixtures.users = users;
        note("fixtures.users");
    }
    if let Some(movies) = args.movies {
        config.fixtures.movies = movies;
        note("fixtures.movies");
    }
    applied
}

fn summarize_file(path: &Path, format: OutputFormat) -> Result<()> {
    let records = MetricsLog::load_jsonl(path)?;
    let summary =
        summarize(&records).with_context(|| format!("{} holds no records", path.display()))?;
    match format {
        OutputFormat::Text => println!("{summary}"),
        OutputFormat::Json => println!("{}", summary.to_json()?),
    }
    Ok(())
}
