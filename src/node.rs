//! Node registry: owns the mapping from `NodeId` to live filter-process PID,
//! and the spawn/kill choreography around the named-channel layer.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{open, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::waitpid;
use nix::unistd::{dup2, execvp, fork, ForkResult, Pid};

use crate::channel;
use crate::error::{ControllerError, Result};
use crate::types::NodeId;

/// The persistent record for an active vertex.
#[derive(Debug, Clone, Copy)]
pub struct Node {
    pub id: NodeId,
    pub pid: Pid,
    pub discard_output: bool,
}

pub struct NodeRegistry {
    nodes: HashMap<NodeId, Node>,
    scratch_dir: PathBuf,
    sibling_bin_dir: PathBuf,
}

fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        ControllerError::BadCommand(format!("argument contains an embedded NUL byte: {s:?}"))
    })
}

/// Resolve the executable the child should `execvp`, following the
/// sibling-path-then-PATH rule of SPEC_FULL.md §4.3.
fn resolve_argv0(sibling_bin_dir: &Path, argv0: &str, discard_output: bool) -> Result<CString> {
    let sibling = sibling_bin_dir.join(argv0);
    if sibling.is_file() {
        return to_cstring(&sibling.to_string_lossy());
    }
    if discard_output {
        // fall back to a system-PATH lookup, which execvp performs itself
        // when given a bare (non-slash) name.
        return to_cstring(argv0);
    }
    Err(ControllerError::SyscallFailure(nix::errno::Errno::ENOENT))
}

/// Open `path` for reading in the *child*, after fork but before exec. This
/// blocks until a writer opens the other end, exactly as the spec requires:
/// the parent never touches a node's channels directly.
fn open_blocking(path: &Path, flags: OFlag) -> nix::Result<std::os::fd::OwnedFd> {
    open(path, flags, Mode::empty())
}

impl NodeRegistry {
    pub fn new(scratch_dir: PathBuf, sibling_bin_dir: PathBuf) -> Self {
        NodeRegistry {
            nodes: HashMap::new(),
            scratch_dir,
            sibling_bin_dir,
        }
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Create node `id` running `argv`. Fails with `AlreadyExists` if `id` is
    /// already live.
    pub fn spawn(&mut self, id: NodeId, argv: &[String], discard_output: bool) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(ControllerError::AlreadyExists(id));
        }
        let argv0 = argv.first().ok_or_else(|| {
            ControllerError::BadCommand("node requires a command to run".to_string())
        })?;
        let exe = resolve_argv0(&self.sibling_bin_dir, argv0, discard_output)?;
        let argv_c: Vec<CString> = argv
            .iter()
            .map(|s| to_cstring(s))
            .collect::<Result<Vec<_>>>()?;

        let in_path = channel::create_input(&self.scratch_dir, id)?;
        let out_path = if discard_output {
            None
        } else {
            Some(channel::create_output(&self.scratch_dir, id)?)
        };

        // SAFETY: the child only calls async-signal-safe functions (open,
        // dup2, close, execvp) before exec'ing or exiting; it never returns
        // into the parent's Rust runtime state.
        match unsafe { fork() }.map_err(ControllerError::SyscallFailure)? {
            ForkResult::Parent { child } => {
                tracing::info!(node = id, pid = child.as_raw(), discard_output, "node.spawn");
                self.nodes.insert(
                    id,
                    Node {
                        id,
                        pid: child,
                        discard_output,
                    },
                );
                Ok(())
            }
            ForkResult::Child => {
                child_main(&in_path, out_path.as_deref(), discard_output, &exe, &argv_c)
            }
        }
    }

    /// Deliver SIGKILL, reap, and unlink channel files. Fails with
    /// `NotFound` if `id` is not live.
    pub fn kill(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or(ControllerError::NotFound(id))?;

        kill(node.pid, Some(Signal::SIGKILL)).map_err(ControllerError::SyscallFailure)?;
        waitpid(node.pid, None).map_err(ControllerError::SyscallFailure)?;

        channel::unlink_input(&self.scratch_dir, id)?;
        if !node.discard_output {
            channel::unlink_output(&self.scratch_dir, id)?;
        }
        tracing::info!(node = id, pid = node.pid.as_raw(), "node.kill");
        Ok(())
    }
}

/// Runs in the forked child: open this node's endpoints, bind them to
/// stdin/stdout, and `execvp` into the filter binary. Never returns.
fn child_main(
    in_path: &Path,
    out_path: Option<&Path>,
    discard_output: bool,
    exe: &CString,
    argv: &[CString],
) -> ! {
    let stdin_fd = open_blocking(in_path, OFlag::O_RDONLY).unwrap_or_else(|e| {
        eprintln!("dfctl: child: open stdin {}: {e}", in_path.display());
        std::process::exit(127);
    });
    dup2(stdin_fd.as_raw_fd(), 0).expect("dup2 stdin");
    drop(stdin_fd);

    if discard_output {
        let null = open("/dev/null", OFlag::O_WRONLY, Mode::empty()).unwrap_or_else(|e| {
            eprintln!("dfctl: child: open /dev/null: {e}");
            std::process::exit(127);
        });
        dup2(null.as_raw_fd(), 1).expect("dup2 stdout (null)");
        drop(null);
    } else {
        let out_path = out_path.expect("discard_output=false implies an output path");
        let stdout_fd = open_blocking(out_path, OFlag::O_WRONLY).unwrap_or_else(|e| {
            eprintln!("dfctl: child: open stdout {}: {e}", out_path.display());
            std::process::exit(127);
        });
        dup2(stdout_fd.as_raw_fd(), 1).expect("dup2 stdout");
        drop(stdout_fd);
    }

    let err = execvp(exe, argv);
    eprintln!("dfctl: child: execvp {exe:?}: {err:?}");
    std::process::exit(127);
}
