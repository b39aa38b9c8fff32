use std::ffi::OsString;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use log::{debug, warn};

use super::{ToolRun, ToolStatus};

/// How much stderr to keep per invocation
const STDERR_TAIL_BYTES: usize = 4096;

/// Poll interval while waiting on a child with a timeout
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the stderr reader once a timed-out child was killed
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Run a program to completion, capturing the tail of its stderr.
///
/// stdout is discarded. With a timeout the child runs in its own process
/// group, and the whole group is killed once the timeout expires.
pub fn run_tool(program: &Path, args: &[OsString], timeout: Option<Duration>) -> ToolRun {
    let start = Instant::now();

    debug!(
        "Running: {} {}",
        program.display(),
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    if timeout.is_some() {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ToolRun {
                status: ToolStatus::SpawnFailed(e.to_string()),
                stderr_tail: String::new(),
                elapsed: start.elapsed(),
            }
        }
    };

    // The reader is never joined: a surviving grandchild may hold the pipe open
    let (tail_tx, tail_rx) = bounded::<String>(1);
    if let Some(mut pipe) = child.stderr.take() {
        thread::spawn(move || {
            let _ = tail_tx.send(read_tail(&mut pipe, STDERR_TAIL_BYTES));
        });
    } else {
        drop(tail_tx);
    }

    let waited = match timeout {
        Some(limit) => wait_with_timeout(&mut child, limit),
        None => child.wait().map(Some),
    };

    let stderr_tail = match waited {
        Ok(None) => tail_rx.recv_timeout(STDERR_GRACE).unwrap_or_default(),
        _ => tail_rx.recv().unwrap_or_default(),
    };

    let status = match waited {
        Ok(Some(exit)) => classify(exit),
        Ok(None) => ToolStatus::TimedOut(timeout.unwrap_or_default()),
        Err(e) => ToolStatus::SpawnFailed(format!("wait failed: {}", e)),
    };

    ToolRun {
        status,
        stderr_tail,
        elapsed: start.elapsed(),
    }
}

fn classify(exit: ExitStatus) -> ToolStatus {
    match exit.code() {
        Some(code) => ToolStatus::Exited(code),
        None => ToolStatus::Signaled,
    }
}

/// Returns `Ok(None)` if the child had to be killed
fn wait_with_timeout(child: &mut Child, limit: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(exit) = child.try_wait()? {
            return Ok(Some(exit));
        }
        if start.elapsed() >= limit {
            kill_process_group(child);
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: plain syscall; the group was created for this child in run_tool
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        warn!(
            "Failed to kill process group {}: {}",
            pgid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Drain a reader, keeping only the last `max` bytes
fn read_tail<R: Read>(reader: &mut R, max: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > max * 2 {
                    tail.drain(..tail.len() - max);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    if tail.len() > max {
        tail.drain(..tail.len() - max);
    }
    String::from_utf8_lossy(&tail).trim_end().to_string()
}
