use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use rust_ccnfwd_pit::ResendMethod;
use std::path::PathBuf;

mod commands;
mod config;
mod utils;

/// ccnfwd Pending Interest Table tool
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// PIT configuration file (TOML, JSON or YAML)
    #[clap(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines packet trace through the PIT
    Replay {
        /// Trace file, one event per line
        trace: PathBuf,

        /// Resend policy override
        #[clap(short, long, value_enum)]
        resend: Option<ResendArg>,
    },

    /// Benchmark concurrent Interest aggregation
    Bench {
        /// Number of Interests each worker sends
        #[clap(short, long, default_value = "1000")]
        count: usize,

        /// Name prefix to use for benchmark
        #[clap(short, long, default_value = "/benchmark")]
        prefix: String,

        /// Number of concurrent workers, one face each
        #[clap(short = 'n', long, default_value = "4")]
        concurrent: usize,
    },

    /// Print the effective PIT configuration
    Config,
}

/// Resend policy as spelled on the command line
#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResendArg {
    /// Re-forward only on lifetime growth or a higher hop limit
    Rfc,
    /// Forward for every new face
    #[value(name = "no_suppression")]
    NoSuppression,
}

impl From<ResendArg> for ResendMethod {
    fn from(arg: ResendArg) -> Self {
        match arg {
            ResendArg::Rfc => ResendMethod::Rfc,
            ResendArg::NoSuppression => ResendMethod::NoSuppression,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "debug" } else { "info" },
    ))
    .init();

    let pit_config = config::load(cli.config.as_deref())?;
    debug!("effective PIT configuration: {:?}", pit_config);

    match cli.command {
        Commands::Replay { trace, resend } => {
            commands::replay::run_replay(pit_config, trace, resend.map(ResendMethod::from))
                .await?;
        }
        Commands::Bench {
            count,
            prefix,
            concurrent,
        } => {
            commands::bench::run_benchmark(pit_config, count, prefix, concurrent).await?;
        }
        Commands::Config => {
            commands::show_config::show_config(&pit_config)?;
        }
    }

    Ok(())
}
