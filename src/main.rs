use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use fulfillment_sim::{Pipeline, PipelineConfig, logging, sim};

#[derive(Parser)]
#[command(name = "fulfillment_sim", version, about = "Warehouse fulfillment pipeline simulator")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Clone)]
struct CommonArgs {
    /// TOML config file; unset fields keep their defaults.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Number of orders intake generates.
    #[arg(long, global = true)]
    orders: Option<u64>,

    /// Multiplier for every simulated delay (0 runs as fast as possible).
    #[arg(long, global = true)]
    time_scale: Option<f64>,

    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run one simulation and print a summary (default).
    Run {
        /// Print the full report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Run once and print CSV metrics including CPU time.
    Bench,
    /// Sweep worker and bay counts, one CSV row per combination.
    Stress {
        #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4, 8])]
        pickers: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_values_t = [1usize, 3])]
        loaders: Vec<usize>,
        #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4])]
        bays: Vec<usize>,
    },
}

fn load_config(args: &CommonArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(orders) = args.orders {
        config.orders = orders;
    }
    if let Some(scale) = args.time_scale {
        config.timings.time_scale = scale;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.common.log_level, cli.common.log_json).context("initializing logging")?;
    let config = load_config(&cli.common)?;

    match cli.command.unwrap_or(Command::Run { json: false }) {
        Command::Run { json } => {
            let report = Pipeline::new(config).run().context("pipeline run failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
        }
        Command::Bench => sim::run_benchmark(config).context("benchmark failed")?,
        Command::Stress {
            pickers,
            loaders,
            bays,
        } => {
            if pickers.iter().chain(&loaders).chain(&bays).any(|&n| n == 0) {
                return Err(anyhow!("stress sets must contain only values > 0"));
            }
            sim::run_stress(&config, &pickers, &loaders, &bays).context("stress run failed")?;
        }
    }
    Ok(())
}
