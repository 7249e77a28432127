//! CLI entry point for the transit equity dataset builder.
//!
//! `generate` runs the stage pipeline into a data directory; `stages` lists
//! the stage artifacts and whether each is already cached.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_equity::{
    cache::ArtifactCache,
    config::{
        DEFAULT_COUNTY_POPULATION_URL, DEFAULT_INCOME_URL, DEFAULT_RIDERSHIP_URL,
        DEFAULT_ROUTES_URL, DEFAULT_STOPS_URL, DEFAULT_TRACT_POPULATION_URL, DEFAULT_TRACTS_URL,
        PipelineConfig, SourceConfig,
    },
    join::{AssignmentPolicy, RouteJoinConfig, RouteScan},
    output::{log_report, print_pretty, write_report_json},
    pipeline::{DatasetPipeline, Stage},
    sources::PipelineSources,
};

#[derive(Parser)]
#[command(name = "transit_equity")]
#[command(about = "Build the bus stop / census income dataset", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoutePolicy {
    /// Every stop gets its nearest route
    Global,
    /// Only stops within --route-threshold of a route get one
    Threshold,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScanArg {
    Naive,
    Indexed,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources, run the joins and write every stage artifact
    Generate {
        /// Ignore cached artifacts and rebuild every stage
        #[arg(long, default_value_t = false)]
        regenerate: bool,

        /// Directory holding the stage artifacts
        #[arg(short, long, env = "DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        #[arg(long, value_enum, default_value_t = RoutePolicy::Global)]
        route_policy: RoutePolicy,

        /// Maximum stop-to-route distance in metres for the threshold policy
        #[arg(long, default_value_t = 100.0)]
        route_threshold: f64,

        #[arg(long, value_enum, default_value_t = ScanArg::Indexed)]
        route_scan: ScanArg,

        /// Worker threads for the nearest-route scan
        #[arg(short, long, default_value_t = 1)]
        workers: usize,

        /// Fail when any stage produces no rows
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Optional: write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        sources: SourceArgs,
    },
    /// List pipeline stages and their cached artifacts
    Stages {
        #[arg(short, long, env = "DATA_DIR", default_value = "data")]
        data_dir: PathBuf,
    },
}

/// Source locations. Each may be a file path or an http(s) URL.
#[derive(clap::Args)]
struct SourceArgs {
    #[arg(long, env = "STOPS_URL", default_value = DEFAULT_STOPS_URL)]
    stops: String,

    #[arg(long, env = "ROUTES_URL", default_value = DEFAULT_ROUTES_URL)]
    routes: String,

    #[arg(long, env = "TRACTS_URL", default_value = DEFAULT_TRACTS_URL)]
    tracts: String,

    #[arg(long, env = "INCOME_URL", default_value = DEFAULT_INCOME_URL)]
    income: String,

    #[arg(long, env = "TRACT_POPULATION_URL", default_value = DEFAULT_TRACT_POPULATION_URL)]
    tract_population: String,

    #[arg(long, env = "COUNTY_POPULATION_URL", default_value = DEFAULT_COUNTY_POPULATION_URL)]
    county_population: String,

    #[arg(long, env = "RIDERSHIP_URL", default_value = DEFAULT_RIDERSHIP_URL)]
    ridership: String,

    #[arg(long, env = "CENSUS_API_KEY", hide_env_values = true)]
    census_api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 300)]
    http_timeout: u64,
}

impl SourceArgs {
    fn into_config(self) -> SourceConfig {
        SourceConfig {
            stops: self.stops,
            routes: self.routes,
            tracts: self.tracts,
            income: self.income,
            tract_population: self.tract_population,
            county_population: self.county_population,
            ridership: self.ridership,
            census_api_key: self.census_api_key.filter(|k| !k.is_empty()),
            http_timeout: Duration::from_secs(self.http_timeout),
            ..SourceConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_equity.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_equity.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            regenerate,
            data_dir,
            route_policy,
            route_threshold,
            route_scan,
            workers,
            strict,
            report,
            sources,
        } => {
            let policy = match route_policy {
                RoutePolicy::Global => AssignmentPolicy::GlobalNearest,
                RoutePolicy::Threshold => AssignmentPolicy::Threshold {
                    threshold: route_threshold,
                },
            };
            let scan = match route_scan {
                ScanArg::Naive => RouteScan::Naive,
                ScanArg::Indexed => RouteScan::Indexed,
            };
            let config = PipelineConfig {
                route_join: RouteJoinConfig {
                    policy,
                    scan,
                    workers,
                },
                strict,
                ..PipelineConfig::default()
            };

            let cache = ArtifactCache::open(&data_dir)?;
            let sources = PipelineSources::from_config(&sources.into_config())?;
            let pipeline = DatasetPipeline::new(config, cache, sources);

            info!(data_dir = %data_dir.display(), regenerate, "Starting dataset generation");
            let output = match pipeline.generate(regenerate).await {
                Ok(output) => output,
                Err(e) => {
                    error!(stage = %e.stage(), error = %e, "Dataset generation failed");
                    return Err(e.into());
                }
            };

            print_pretty(&output.report);
            log_report(&output.report);
            if let Some(path) = report {
                write_report_json(&path, &output.report)
                    .with_context(|| format!("writing run report to {}", path.display()))?;
                info!(path = %path.display(), "Run report written");
            }
        }
        Commands::Stages { data_dir } => {
            let cache = ArtifactCache::open(&data_dir)?;
            for stage in Stage::ALL {
                info!(
                    stage = %stage,
                    file = stage.file_name(),
                    present = cache.exists(stage),
                    "Stage"
                );
            }
        }
    }

    Ok(())
}
