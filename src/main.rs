use std::sync::Arc;

use clap::{Parser, Subcommand};
use nodefit::{controller, Error};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Run in dry-run mode (calculate changes without applying them)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    /// Default percentage for the percent strategy (1-100)
    #[arg(long, env = "NODEFIT_DEFAULT_PERCENT", default_value_t = 80)]
    default_percent: u32,

    /// Default memory buffer for the fit strategy, as a quantity string
    #[arg(long, env = "NODEFIT_DEFAULT_BUFFER", default_value = "256Mi")]
    default_buffer: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("NodeFit Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!("Starting NodeFit Operator v{}", env!("CARGO_PKG_VERSION"));

    let mut defaults = controller::ConfigDefaults::default();
    if !(1..=100).contains(&args.default_percent) {
        return Err(Error::ConfigError(format!(
            "--default-percent must be 1-100, got {}",
            args.default_percent
        )));
    }
    defaults.percent = args.default_percent;
    defaults.buffer_bytes = controller::parse_memory_bytes(&args.default_buffer)
        .filter(|b| *b >= 0)
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "--default-buffer is not a valid quantity: {}",
                args.default_buffer
            ))
        })?;

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");
    if args.dry_run {
        info!("Dry-run mode: decisions are logged, never applied");
    }

    let state = Arc::new(controller::ControllerState {
        client,
        defaults,
        dry_run: args.dry_run,
    });

    controller::run_controller(state).await
}
