mod channel;
mod command;
mod config;
mod error;
mod node;
mod relay;
mod topology;
mod types;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};

use config::Config;
use topology::Topology;
use types::NodeId;

fn main() -> Result<()> {
    let mut raw_args = std::env::args();
    let exe = raw_args.next();
    let rest: Vec<String> = raw_args.collect();

    // The relay worker is a re-exec of this same binary under a hidden
    // subcommand (SPEC_FULL.md §4.2); intercept it before clap ever sees
    // normal controller flags.
    if rest.first().map(String::as_str) == Some(relay::RELAY_SUBCOMMAND) {
        return run_relay_subcommand(&rest[1..]);
    }
    let _ = exe;

    let config = Config::from_args();
    init_tracing(&config.log_filter);

    std::fs::create_dir_all(&config.scratch_dir)
        .with_context(|| format!("creating scratch dir {}", config.scratch_dir.display()))?;

    let mut topology = Topology::new(
        config.scratch_dir.clone(),
        config.sibling_bin_dir.clone(),
        config.max_id,
        config.pipe_atomic,
    );

    if let Some(path) = &config.config_file {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening config file {}", path.display()))?;
        run_commands(&mut topology, std::io::BufReader::new(file).lines());
    }

    let stdin = std::io::stdin();
    run_commands(&mut topology, stdin.lock().lines());

    Ok(())
}

fn run_commands(topology: &mut Topology, lines: impl Iterator<Item = std::io::Result<String>>) {
    for line in lines {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "failed to read command line");
                continue;
            }
        };

        match command::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(cmd)) => match command::dispatch(topology, cmd) {
                Ok(msg) => println!("{msg}"),
                Err(e) => {
                    tracing::warn!(error = %e, command = %line, "command failed");
                    println!("error: {e}");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, command = %line, "command failed to parse");
                println!("error: {e}");
            }
        }
    }
}

fn init_tracing(filter: &str) {
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_env("DFCTL_LOG")
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `dfctl __relay <scratch_dir> <source> <pipe_atomic> <sink...>` — runs the
/// relay loop and never returns.
fn run_relay_subcommand(args: &[String]) -> Result<()> {
    let scratch_dir: PathBuf = args
        .first()
        .context("relay subcommand missing scratch dir")?
        .into();
    let source: NodeId = args
        .get(1)
        .context("relay subcommand missing source")?
        .parse()
        .context("relay subcommand: bad source id")?;
    let pipe_atomic: usize = args
        .get(2)
        .context("relay subcommand missing pipe_atomic")?
        .parse()
        .context("relay subcommand: bad pipe_atomic")?;
    let sinks: Vec<NodeId> = args[3..]
        .iter()
        .map(|s| s.parse())
        .collect::<std::result::Result<_, _>>()
        .context("relay subcommand: bad sink id")?;

    relay::run_worker(scratch_dir, source, sinks, pipe_atomic);
}
