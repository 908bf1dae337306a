/// A user-chosen vertex identifier. The controller never allocates these itself.
pub type NodeId = u32;

/// Default upper bound on `NodeId`, overridable via `Config::max_id`.
pub const DEFAULT_MAX_ID: NodeId = 4096;

/// Atomic pipe write size assumed by the relay worker. POSIX guarantees writes
/// up to `PIPE_BUF` (4096 on Linux) are atomic, so a relay never has to worry
/// about a write to one sink interleaving with another relay's write to the
/// same sink at a sub-record granularity.
pub const PIPE_ATOMIC: usize = 4096;

/// Reserved one-byte record used to wake a relay blocked on an empty pipe.
/// Any reader (relay or, ultimately, a downstream filter) must treat a record
/// equal to this single byte as a no-op.
pub const SENTINEL: u8 = b'-';

/// Signal used to cooperatively request that a relay stop. Mapped to SIGUSR1
/// since SIGSTOP/SIGCONT are reserved by the kernel for job control.
pub const SIGSTOP_REQ: nix::sys::signal::Signal = nix::sys::signal::Signal::SIGUSR1;

/// Filter names whose stdout is assumed to feed a downstream relay rather than
/// being a terminal sink. Anything else gets `discard_output = true`.
pub const SINK_CLASSIFIER_SET: &[&str] = &["const", "filter", "window", "spawn"];
