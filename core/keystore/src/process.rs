//! Running helper processes under a hard wall-clock timeout.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use sealbox_common::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished helper process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Kills the child unless it has been reaped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = source {
            let _ = reader.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run `command`, feed it `stdin`, and wait at most `timeout`.
///
/// stdout and stderr are drained on background threads so a chatty child
/// cannot block on a full pipe. The child is killed on timeout and on every
/// early return.
///
/// # Errors
/// - The process could not be spawned
/// - The process did not finish within `timeout`
pub fn run_with_timeout(
    mut command: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<ProcessOutput> {
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut guard = ChildGuard {
        child: command.spawn()?,
        reaped: false,
    };

    let stdout = drain(guard.child.stdout.take());
    let stderr = drain(guard.child.stderr.take());

    if let Some(input) = stdin {
        if let Some(mut pipe) = guard.child.stdin.take() {
            // A child that exits without reading its input is not an error here.
            if let Err(e) = pipe.write_all(input) {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }
    }

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = guard.child.try_wait()? {
            guard.reaped = true;
            break status;
        }
        if Instant::now() >= deadline {
            warn!(timeout_ms = timeout.as_millis() as u64, "helper process timed out, killing it");
            // Dropping the guard kills and reaps the child. The reader
            // threads end once the pipes close.
            drop(guard);
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("helper process exceeded {:?}", timeout),
            )));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    debug!(code = ?status.code(), stdout_len = stdout.len(), "helper process finished");

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}
