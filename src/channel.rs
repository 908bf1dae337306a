//! Named-channel layer: per-node FIFO endpoints and the relay wake primitive.
//!
//! Each live node owns two files in the scratch directory: `<id>in` (its
//! stdin) and `<id>out` (its stdout, unless the node discards output). The
//! controller never reads or writes these directly except via `inject` and
//! `unblock`.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::error::{ControllerError, Result};
use crate::types::{NodeId, SENTINEL};

pub fn input_path(scratch_dir: &Path, id: NodeId) -> PathBuf {
    scratch_dir.join(format!("{id}in"))
}

pub fn output_path(scratch_dir: &Path, id: NodeId) -> PathBuf {
    scratch_dir.join(format!("{id}out"))
}

fn create_fifo(path: &Path) -> Result<()> {
    mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(|errno| ControllerError::Channel {
        path: path.to_path_buf(),
        source: std::io::Error::from(errno),
    })?;
    // mkfifo applies umask; force the documented 0666 regardless of the
    // controller process's umask.
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).map_err(|source| {
        ControllerError::Channel {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(())
}

/// Create node `id`'s input FIFO. A pre-existing file is a `Channel` error,
/// not silently reused.
pub fn create_input(scratch_dir: &Path, id: NodeId) -> Result<PathBuf> {
    let path = input_path(scratch_dir, id);
    tracing::debug!(node = id, path = %path.display(), "create_input");
    create_fifo(&path)?;
    Ok(path)
}

/// Create node `id`'s output FIFO.
pub fn create_output(scratch_dir: &Path, id: NodeId) -> Result<PathBuf> {
    let path = output_path(scratch_dir, id);
    tracing::debug!(node = id, path = %path.display(), "create_output");
    create_fifo(&path)?;
    Ok(path)
}

fn unlink(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ControllerError::Channel {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn unlink_input(scratch_dir: &Path, id: NodeId) -> Result<()> {
    let path = input_path(scratch_dir, id);
    tracing::debug!(node = id, path = %path.display(), "unlink_input");
    unlink(&path)
}

pub fn unlink_output(scratch_dir: &Path, id: NodeId) -> Result<()> {
    let path = output_path(scratch_dir, id);
    tracing::debug!(node = id, path = %path.display(), "unlink_output");
    unlink(&path)
}

/// Open `id`'s output channel for writing and emit a single sentinel byte.
///
/// Used to wake a relay blocked reading `id`'s output so that it observes its
/// `should_stop` flag on the next loop iteration. Blocks until the relay's
/// read side is open, which cooperative teardown guarantees is still the
/// case at the point this is called.
pub fn unblock(scratch_dir: &Path, id: NodeId) -> Result<()> {
    let path = output_path(scratch_dir, id);
    tracing::debug!(node = id, path = %path.display(), "unblock");
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .map_err(|source| ControllerError::Channel {
            path: path.clone(),
            source,
        })?;
    f.write_all(&[SENTINEL])
        .map_err(|source| ControllerError::Channel { path, source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn create_input_then_duplicate_fails() {
        let dir = tempfile::tempdir().unwrap();
        create_input(dir.path(), 1).unwrap();
        assert!(create_input(dir.path(), 1).is_err());
        unlink_input(dir.path(), 1).unwrap();
    }

    #[test]
    fn unlink_missing_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(unlink_input(dir.path(), 42).is_ok());
        assert!(unlink_output(dir.path(), 42).is_ok());
    }

    #[test]
    fn unblock_wakes_a_blocked_reader() {
        let dir = tempfile::tempdir().unwrap();
        create_output(dir.path(), 7).unwrap();
        let read_path = output_path(dir.path(), 7);

        let reader = thread::spawn(move || {
            use std::io::Read;
            let mut f = std::fs::File::open(&read_path).unwrap();
            let mut buf = [0u8; 1];
            let n = f.read(&mut buf).unwrap();
            (n, buf[0])
        });

        // give the reader a moment to block on open+read
        thread::sleep(std::time::Duration::from_millis(50));
        unblock(dir.path(), 7).unwrap();

        let (n, byte) = reader.join().unwrap();
        assert_eq!(n, 1);
        assert_eq!(byte, SENTINEL);
        unlink_output(dir.path(), 7).unwrap();
    }
}
