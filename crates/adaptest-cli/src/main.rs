//! adaptest CLI — calibrate item pools and simulate adaptive attempts.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "adaptest", version, about = "IRT calibration and adaptive testing engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the calibration loop over a response snapshot
    Calibrate {
        /// JSON file with observed responses
        #[arg(long)]
        responses: PathBuf,

        /// JSON file with (scale, parent) rows
        #[arg(long)]
        scales: Option<PathBuf>,

        /// Models to calibrate, in tie-breaking order (e.g. "1pl,2pl")
        #[arg(long)]
        models: Option<String>,

        /// Calibration rounds
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Stop early once ability changes fall below this threshold
        #[arg(long)]
        convergence_threshold: Option<f64>,

        /// Information criterion: aic or bic
        #[arg(long)]
        criterion: Option<String>,

        /// Engine mode: development or production
        #[arg(long)]
        mode: Option<String>,

        /// Calibration context id
        #[arg(long, default_value = "1")]
        context: u64,

        /// Directory for JSON result files
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Simulate one adaptive attempt against a calibrated pool
    Simulate {
        /// JSON file with the calibrated item pool
        #[arg(long)]
        pool: PathBuf,

        /// True ability of the simulated examinee
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        true_theta: f64,

        /// Maximum items to serve
        #[arg(long, default_value = "20")]
        max_items: u32,

        /// Target standard error
        #[arg(long, default_value = "0.35")]
        target_se: f64,

        /// Share of serves that inject a pilot item
        #[arg(long, default_value = "0.0")]
        pilot_ratio: f64,

        /// RNG seed for reproducible runs
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Validate an item pool file
    Validate {
        /// JSON file with the item pool
        #[arg(long)]
        pool: PathBuf,
    },

    /// Create a starter config and example pool
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adaptest=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Calibrate {
            responses,
            scales,
            models,
            max_iterations,
            convergence_threshold,
            criterion,
            mode,
            context,
            output,
            config,
        } => {
            commands::calibrate::execute(
                responses,
                scales,
                models,
                max_iterations,
                convergence_threshold,
                criterion,
                mode,
                context,
                output,
                config,
            )
            .await
        }
        Commands::Simulate {
            pool,
            true_theta,
            max_items,
            target_se,
            pilot_ratio,
            seed,
        } => commands::simulate::execute(pool, true_theta, max_items, target_se, pilot_ratio, seed).await,
        Commands::Validate { pool } => commands::validate::execute(pool),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
