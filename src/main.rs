// ============================================================================
// RDS METRICS FUNCTION - COMMAND LINE ENTRY POINT
// ============================================================================
// Runs single invocations from request documents and offers a few helpers
// for working with configuration and field paths. Response documents go to
// stdout; logs go to stderr.
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rds_metrics_function::config::FunctionConfig;
use rds_metrics_function::logging::init_logging;
use rds_metrics_function::source::{HttpConnector, SourceConnector, StaticMetricsSource};
use rds_metrics_function::tree::{get_value, Tree};
use rds_metrics_function::{
    FieldPath, MetricsFunction, RunRequest, FUNCTION_FULL_NAME, FUNCTION_NAME, FUNCTION_VERSION,
};

// ----------------------------------------------------------------------------
// CLI Definition
// ----------------------------------------------------------------------------

/// RDS Metrics Function CLI
#[derive(Parser, Debug)]
#[command(
    name = "rds-metrics",
    author = "AIOps Team",
    version,
    about = "Fetch RDS CloudWatch metrics into composite resource status",
    long_about = "Runs the RDS metrics composition function against a request document, \
                  writing the latest datapoint of each requested metric into the desired \
                  composite's status at the requested path."
)]
pub struct Cli {
    /// Configuration file path (TOML or JSON)
    #[arg(short, long, env = "RDS_METRICS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level override
    #[arg(short, long, env = "RDS_METRICS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "RDS_METRICS_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one invocation and print the response
    Run {
        /// Request document, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: String,

        /// Replay samples from a JSON file instead of querying the endpoint
        #[arg(short, long)]
        samples: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how a target path splits into segments
    ParsePath {
        /// Path in dot and/or bracket notation
        path: String,

        /// Status document (JSON) to look the path up in
        #[arg(short, long)]
        status: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

// ----------------------------------------------------------------------------
// Subcommand Handlers
// ----------------------------------------------------------------------------

/// Load the configured file, or defaults plus environment overrides.
fn load_config(path: Option<&Path>) -> AnyhowResult<FunctionConfig> {
    match path {
        Some(path) => FunctionConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => FunctionConfig::from_env().context("Failed to load config from environment"),
    }
}

fn handle_validate(config_path: Option<&Path>, verbose: bool) -> AnyhowResult<()> {
    match config_path {
        Some(path) => println!("Validating configuration file: {}", path.display()),
        None => println!("Validating default configuration with environment overrides"),
    }

    let config = load_config(config_path)?;
    println!("✅ Configuration is valid!");

    if verbose {
        println!("\n📋 Parsed configuration:");
        println!("{}", "=".repeat(60));
        println!("{}", toml::to_string_pretty(&config)?);
    }

    println!("\n📊 Configuration Summary:");
    println!(
        "  • Endpoint: {}",
        config.source.endpoint.as_deref().unwrap_or("(none, replay only)")
    );
    println!("  • Timeout: {}s", config.source.timeout_secs);
    println!("  • Default region: {}", config.query.region);
    println!("  • Default metrics: {}", config.query.metrics.join(", "));
    println!("  • Default period: {}s", config.query.period_secs);
    println!("  • Statistic: {}", config.query.statistic);

    Ok(())
}

fn handle_generate_config(output: Option<&Path>) -> AnyhowResult<()> {
    let config_str = FunctionConfig::generate_default_config();

    match output {
        Some(path) => {
            std::fs::write(path, &config_str)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => println!("{}", config_str),
    }

    Ok(())
}

fn handle_parse_path(input: &str, status: Option<&Path>) -> AnyhowResult<()> {
    let path = FieldPath::parse(input)?;
    for (i, segment) in path.segments().iter().enumerate() {
        println!("{:>3}  {}", i, segment);
    }

    if let Some(file) = status {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let tree: Tree = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON object", file.display()))?;
        match get_value(&tree, &path) {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => println!("(no value at {})", path),
        }
    }

    Ok(())
}

fn handle_version() {
    println!("{} v{}", FUNCTION_FULL_NAME, FUNCTION_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Binary: {}", FUNCTION_NAME);
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
}

async fn read_request(source: &str) -> AnyhowResult<RunRequest> {
    let raw = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read request from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read request from {}", source))?
    };
    serde_json::from_str(&raw).context("Request is not a valid request document")
}

fn build_connector(
    config: &FunctionConfig,
    samples: Option<&Path>,
) -> AnyhowResult<Arc<dyn SourceConnector>> {
    if let Some(path) = samples {
        let source = StaticMetricsSource::from_file(path)?;
        return Ok(Arc::new(source));
    }

    match &config.source.endpoint {
        Some(endpoint) => Ok(Arc::new(HttpConnector::new(
            endpoint.clone(),
            Duration::from_secs(config.source.timeout_secs),
        ))),
        None => bail!("No metrics endpoint configured; set source.endpoint or pass --samples"),
    }
}

async fn handle_run(
    config: FunctionConfig,
    request: &str,
    samples: Option<&Path>,
) -> AnyhowResult<()> {
    let req = read_request(request).await?;
    let connector = build_connector(&config, samples)?;
    let function = MetricsFunction::new(connector, config.query);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "rds_metrics::main", "Interrupt received, cancelling invocation");
            on_signal.cancel();
        }
    });

    let rsp = function.run_function(&req, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&rsp)?);
    Ok(())
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Handle subcommands that don't need logging
    match &cli.command {
        Commands::Version => {
            handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => return handle_generate_config(output.as_deref()),
        Commands::Validate { verbose } => return handle_validate(cli.config.as_deref(), *verbose),
        Commands::ParsePath { path, status } => return handle_parse_path(path, status.as_deref()),
        Commands::Run { .. } => {}
    }

    let config = load_config(cli.config.as_deref())?;

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config)?;

    info!(target: "rds_metrics::main", "{} v{}", FUNCTION_FULL_NAME, FUNCTION_VERSION);

    if let Commands::Run { request, samples } = &cli.command {
        handle_run(config, request, samples.as_deref()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::parse_from([
            "rds-metrics",
            "--debug",
            "run",
            "--request",
            "req.json",
            "--samples",
            "samples.json",
        ]);
        assert!(cli.debug);
        match cli.command {
            Commands::Run { request, samples } => {
                assert_eq!(request, "req.json");
                assert_eq!(samples, Some(PathBuf::from("samples.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_connector_requires_endpoint_or_samples() {
        let config = FunctionConfig::default();
        assert!(build_connector(&config, None).is_err());

        let mut config = FunctionConfig::default();
        config.source.endpoint = Some("http://127.0.0.1:8080/".into());
        assert!(build_connector(&config, None).is_ok());
    }
}
