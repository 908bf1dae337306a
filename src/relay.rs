//! Relay (fanout) worker: the long-lived child that copies records from one
//! node's output channel to N sinks' input channels, and the controller-side
//! code that spawns and cooperatively tears one down.
//!
//! The worker runs as a re-exec of the controller's own binary under a
//! hidden subcommand (`__relay`), rather than a second compiled artifact or a
//! raw `fork()`: it needs none of the child's own address space (unlike node
//! spawning, where the filter binary's argv0 is arbitrary and the channel
//! opens must happen in that exact child before `execvp`), so a plain
//! `Command::new(current_exe)` child is the simplest thing that gives it its
//! own PID for signal delivery.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use signal_hook::iterator::Signals;

use crate::channel;
use crate::error::{ControllerError, Result};
use crate::types::{NodeId, SENTINEL, SIGSTOP_REQ};

pub const RELAY_SUBCOMMAND: &str = "__relay";

/// The persistent record for an active edge bundle rooted at `source`.
#[derive(Debug, Clone)]
pub struct Relay {
    pub source: NodeId,
    pub pid: Pid,
    pub sinks: Vec<NodeId>,
}

/// Spawn a fresh relay rooted at `source` fanning out to `sinks`, in order.
/// `pipe_atomic` is the per-record read size the worker uses (Config's
/// layered `pipe_atomic` setting, SPEC_FULL.md §3). The caller must ensure
/// every sink is already a live node with an open input channel
/// (node-registry invariant) before calling this.
pub fn spawn(
    scratch_dir: &Path,
    source: NodeId,
    sinks: Vec<NodeId>,
    pipe_atomic: usize,
) -> Result<Relay> {
    assert!(!sinks.is_empty(), "a relay always has at least one sink");

    let exe = std::env::current_exe().map_err(ControllerError::Io)?;
    let mut cmd = Command::new(exe);
    cmd.arg(RELAY_SUBCOMMAND)
        .arg(scratch_dir)
        .arg(source.to_string())
        .arg(pipe_atomic.to_string());
    for sink in &sinks {
        cmd.arg(sink.to_string());
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null());

    let child = cmd.spawn().map_err(ControllerError::Io)?;
    let pid = Pid::from_raw(child.id() as i32);
    // Dropping `child` here does not wait for or signal the process (that's
    // only a `Child` destructor behavior tokio opts into); cooperative
    // teardown reaps it explicitly via `waitpid` against the raw pid.
    drop(child);

    tracing::info!(source, pid = pid.as_raw(), sinks = ?sinks, "relay.spawn");
    Ok(Relay { source, pid, sinks })
}

/// The four-step cooperative teardown sequence shared by `connect`,
/// `disconnect`, `remove`, and `change`: signal, unblock, reap. (Clearing the
/// relay table entry is the caller's job, step 4 of SPEC_FULL.md §4.4.)
pub fn teardown(scratch_dir: &Path, relay: &Relay) -> Result<()> {
    tracing::debug!(source = relay.source, pid = relay.pid.as_raw(), "relay.teardown");
    kill(relay.pid, Some(SIGSTOP_REQ)).map_err(ControllerError::SyscallFailure)?;
    channel::unblock(scratch_dir, relay.source)?;
    waitpid(relay.pid, None).map_err(ControllerError::SyscallFailure)?;
    Ok(())
}

/// Entry point for the `__relay` subcommand. Never returns: exits the
/// process directly, matching the spec's "relay worker is a child process"
/// model.
pub fn run_worker(scratch_dir: PathBuf, source: NodeId, sinks: Vec<NodeId>, pipe_atomic: usize) -> ! {
    let should_stop = Arc::new(AtomicBool::new(false));
    // Watch SIGSTOP_REQ on a dedicated thread, same shape as simplevisor's
    // monitor_loop: a blocking Signals::forever() iterator rather than a
    // handler registered in-process.
    let mut signals = Signals::new([SIGSTOP_REQ as i32])
        .unwrap_or_else(|e| fatal(&format!("relay: install SIGSTOP_REQ watcher: {e}")));
    {
        let should_stop = should_stop.clone();
        thread::spawn(move || {
            for _ in signals.forever() {
                should_stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut input = File::open(channel::output_path(&scratch_dir, source))
        .unwrap_or_else(|e| fatal(&format!("relay: open source output channel: {e}")));

    let mut sink_files: Vec<(NodeId, File)> = Vec::with_capacity(sinks.len());
    for sink in &sinks {
        let path = channel::input_path(&scratch_dir, *sink);
        let f = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap_or_else(|e| fatal(&format!("relay: open sink {sink} input channel: {e}")));
        sink_files.push((*sink, f));
    }

    let mut buf = vec![0u8; pipe_atomic];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break, // EOF: exit 0
            Ok(n) => n,
            Err(e) => fatal(&format!("relay: read: {e}")),
        };

        if should_stop.load(Ordering::SeqCst) {
            break;
        }

        let record = &buf[..n];
        if record == [SENTINEL] {
            continue;
        }

        for (sink, f) in sink_files.iter_mut() {
            if let Err(e) = f.write_all(record) {
                tracing::warn!(source, sink, error = %e, "relay: sink write failed");
            }
        }
    }

    std::process::exit(0);
}

fn fatal(msg: &str) -> ! {
    eprintln!("dfctl: {msg}");
    std::process::exit(1);
}
