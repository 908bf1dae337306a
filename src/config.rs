use std::path::PathBuf;

use clap::Parser;

use crate::types::{NodeId, DEFAULT_MAX_ID, PIPE_ATOMIC};

/// dfctl — interactive dataflow controller.
///
/// Builds, mutates, and tears down a graph of filter processes connected by
/// named-pipe fanouts. Reads commands from an optional config file, then from
/// standard input until EOF.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a file of commands to run before the interactive loop.
    config_file: Option<PathBuf>,

    /// Scratch directory for per-node FIFO endpoints.
    #[arg(long, env = "DFCTL_SCRATCH_DIR", default_value = "./tmp")]
    scratch_dir: PathBuf,

    /// Directory searched for sibling filter binaries ahead of $PATH.
    #[arg(long, env = "DFCTL_SIBLING_BIN_DIR", default_value = ".")]
    sibling_bin_dir: PathBuf,

    /// Largest node id the controller will accept.
    #[arg(long, env = "DFCTL_MAX_ID", default_value_t = DEFAULT_MAX_ID)]
    max_id: NodeId,

    /// Bytes read per relay record; bounded by the platform's atomic pipe
    /// write size (PIPE_BUF, 4096 on Linux).
    #[arg(long, env = "DFCTL_PIPE_ATOMIC", default_value_t = PIPE_ATOMIC)]
    pipe_atomic: usize,

    /// Raise log verbosity (repeatable: -v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Resolved startup configuration: defaults < environment (via clap's `env`
/// attribute, already folded in by the time `Cli` is parsed) < CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub scratch_dir: PathBuf,
    pub sibling_bin_dir: PathBuf,
    pub max_id: NodeId,
    pub pipe_atomic: usize,
    pub config_file: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_args() -> Self {
        let cli = Cli::parse();
        Self::from_cli(cli)
    }

    fn from_cli(cli: Cli) -> Self {
        let log_filter = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string();

        Config {
            scratch_dir: cli.scratch_dir,
            sibling_bin_dir: cli.sibling_bin_dir,
            max_id: cli.max_id,
            pipe_atomic: cli.pipe_atomic,
            config_file: cli.config_file,
            log_filter,
        }
    }
}
