//! End-to-end scenarios from SPEC_FULL.md §8 (S1-S6), driven against the
//! compiled binary and real `cat`/`echo` child processes.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn dfctl_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dfctl"))
}

/// Every node in these scenarios is spawned as `filter`, a sibling binary
/// resolved ahead of $PATH (SPEC_FULL.md §4.3) that is really just `cat`. The
/// name puts it in the sink-classifier set (SPEC_FULL.md §4.4), so the node
/// gets an output channel whether or not it sits upstream of a relay, which
/// lets the test read a node's delivered bytes directly off its output FIFO
/// instead of needing a live downstream consumer.
fn make_sibling_bin_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink("/bin/cat", dir.path().join("filter")).unwrap();
    dir
}

fn run_commands(scratch_dir: &Path, bin_dir: &Path, commands: &[&str]) {
    let mut child = Command::new(dfctl_bin())
        .arg("--scratch-dir")
        .arg(scratch_dir)
        .arg("--sibling-bin-dir")
        .arg(bin_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dfctl");

    {
        let stdin = child.stdin.as_mut().unwrap();
        for line in commands {
            writeln!(stdin, "{line}").unwrap();
        }
    } // drop stdin handle, closing it so the controller sees EOF

    let output = child.wait_with_output().expect("wait on dfctl");
    assert!(
        output.status.success(),
        "dfctl exited non-zero: {}\nstdout:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout)
    );
}

fn run_commands_capture(scratch_dir: &Path, bin_dir: &Path, commands: &[&str]) -> String {
    let mut child = Command::new(dfctl_bin())
        .arg("--scratch-dir")
        .arg(scratch_dir)
        .arg("--sibling-bin-dir")
        .arg(bin_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dfctl");

    {
        let stdin = child.stdin.as_mut().unwrap();
        for line in commands {
            writeln!(stdin, "{line}").unwrap();
        }
    }

    let output = child.wait_with_output().expect("wait on dfctl");
    String::from_utf8(output.stdout).unwrap()
}

/// Read `len` bytes (or until the read side gives up) off a node's output
/// FIFO, bounded by `timeout`. Delivery happens in background child
/// processes, so the read has to tolerate the relay/fanout chain not having
/// caught up yet.
fn read_output_channel(scratch_dir: &Path, id: u32, timeout: Duration) -> Vec<u8> {
    let path = scratch_dir.join(format!("{id}out"));
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut f = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                let _ = tx.send(format!("open failed: {e}").into_bytes());
                return;
            }
        };
        let mut buf = Vec::new();
        let _ = f.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx.recv_timeout(timeout)
        .unwrap_or_else(|_| panic!("timed out reading node {id}'s output channel"))
}

#[test]
fn s1_linear_pipeline() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();

    run_commands(
        scratch.path(),
        bins.path(),
        &[
            "node 1 filter",
            "node 2 filter",
            "connect 1 2",
            "inject 1 echo hello",
        ],
    );

    let got = read_output_channel(scratch.path(), 2, Duration::from_secs(5));
    assert_eq!(got, b"hello\n");
}

#[test]
fn s2_fan_out() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();

    run_commands(
        scratch.path(),
        bins.path(),
        &[
            "node 1 filter",
            "node 2 filter",
            "node 3 filter",
            "connect 1 2 3",
            "inject 1 echo x",
        ],
    );

    assert_eq!(
        read_output_channel(scratch.path(), 2, Duration::from_secs(5)),
        b"x\n"
    );
    assert_eq!(
        read_output_channel(scratch.path(), 3, Duration::from_secs(5)),
        b"x\n"
    );
}

#[test]
fn s4_removal_rewires() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();

    run_commands(
        scratch.path(),
        bins.path(),
        &[
            "node 1 filter",
            "node 2 filter",
            "node 3 filter",
            "connect 1 2 3",
            "remove 2",
            "inject 1 echo z",
        ],
    );

    assert_eq!(
        read_output_channel(scratch.path(), 3, Duration::from_secs(5)),
        b"z\n"
    );
    assert!(!scratch.path().join("2in").exists());
    assert!(!scratch.path().join("2out").exists());
}

#[test]
fn s5_duplicate_sink() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();

    run_commands(
        scratch.path(),
        bins.path(),
        &[
            "node 1 filter",
            "node 2 filter",
            "connect 1 2 2",
            "inject 1 echo q",
        ],
    );

    let got = read_output_channel(scratch.path(), 2, Duration::from_secs(5));
    assert_eq!(got, b"q\nq\n");
}

#[test]
fn s6_error_surface() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();

    let out = run_commands_capture(
        scratch.path(),
        bins.path(),
        &["node 5 filter", "node 5 filter", "disconnect 5 6"],
    );

    let mut lines = out.lines();
    assert_eq!(lines.next().unwrap(), "ok: node 5 running");
    assert_eq!(lines.next().unwrap(), "error: node 5 exists");
    assert_eq!(lines.next().unwrap(), "error: 5 is not connected to 6");
}

#[test]
fn help_and_blank_lines_are_harmless() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();

    let out = run_commands_capture(scratch.path(), bins.path(), &["", "help", ""]);
    assert!(out.contains("node <id> <cmd> <args...>"));
}

#[test]
fn config_file_runs_before_stdin() {
    let scratch = tempfile::tempdir().unwrap();
    let bins = make_sibling_bin_dir();
    let config_dir = tempfile::tempdir().unwrap();
    let config_path = config_dir.path().join("commands.txt");
    fs::write(&config_path, "node 9 filter\n").unwrap();

    let mut child = Command::new(dfctl_bin())
        .arg("--scratch-dir")
        .arg(scratch.path())
        .arg("--sibling-bin-dir")
        .arg(bins.path())
        .arg(&config_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn dfctl");

    {
        let stdin = child.stdin.as_mut().unwrap();
        writeln!(stdin, "remove 9").unwrap();
    }

    let output = child.wait_with_output().unwrap();
    let out = String::from_utf8(output.stdout).unwrap();
    let mut lines = out.lines();
    assert_eq!(lines.next().unwrap(), "ok: node 9 running");
    assert_eq!(lines.next().unwrap(), "ok: 9 removed");
}
