use anyhow::Context;
use clap::{Parser, Subcommand};
use codeval::config::Config;
use codeval::output::{self, OutputFormat};
use codeval::runner::Runner;
use codeval::session::SessionStore;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Evaluate LLM-generated pandas code and keep per-session metrics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate every case in a run file
    Run {
        /// Path to the TOML run file
        run_file: PathBuf,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,

        /// Verbose output - log each repair attempt and execution
        #[arg(short, long)]
        verbose: bool,
    },
    /// Rebuild metrics_summary.json for every session under a directory
    Resummarize {
        /// Directory holding one sub-directory per session
        sessions_dir: PathBuf,

        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "codeval=debug" } else { "codeval=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            run_file,
            output: format,
            verbose,
        } => {
            init_tracing(verbose);
            let config = Config::from_file(&run_file)?;
            let runner = Runner::new(config);
            let reports = runner.run().await;
            output::print_results(&reports, format);
        }
        Command::Resummarize {
            sessions_dir,
            output: format,
        } => {
            init_tracing(false);
            let report = SessionStore::new(&sessions_dir)
                .resummarize_all()
                .with_context(|| format!("Failed to resummarize {}", sessions_dir.display()))?;
            output::print_resummarize(&report, format);
        }
    }

    Ok(())
}
