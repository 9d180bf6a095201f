//! Runs a job description with the built-in word-count program.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use gridmr::config::JobConfig;
use gridmr::{ExecMode, MEmitter, MultiRecord, Program, REmitter, Record};

#[derive(Parser)]
#[command(name = "gridmr")]
#[command(about = "Run a mapreduce job described in a TOML file", long_about = None)]
struct Cli {
    /// Job description
    job: PathBuf,

    /// Overrides the mode given in the job description (serial, mock-parallel, parallel)
    #[arg(long)]
    mode: Option<ExecMode>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Callables a job description can refer to.
fn word_count() -> Program {
    Program::new()
        .with_mapper("wc_map", |e: &mut MEmitter, r: Record| {
            for w in r.value.split_whitespace() {
                e.emit(w, "1");
            }
        })
        .with_reducer("wc_reduce", |e: &mut REmitter, counts: MultiRecord<'_>| {
            let n: u64 = counts.filter_map(|c| c.parse::<u64>().ok()).sum();
            e.emit(n.to_string());
        })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(cli.verbose >= 2)
        .with_writer(std::io::stderr)
        .init();
    debug!("gridmr started with verbosity level: {}", cli.verbose);

    let config = JobConfig::from_file(&cli.job)
        .with_context(|| format!("couldn't load job description {}", cli.job.display()))?;
    let mode = cli.mode.unwrap_or(config.mode);
    let job = config.to_job().context("invalid job description")?;

    let output = job
        .run(&word_count(), mode)
        .with_context(|| format!("job {} failed", job.id()))?;

    let urls = output.outurls();
    if urls.is_empty() {
        for r in output.data()? {
            println!("{}", r?);
        }
    } else {
        for (source, split, path) in urls {
            println!("{} {} {}", source, split, path.display());
        }
    }
    Ok(())
}
