use super::cancel::CancelSignal;
use crate::events::{Outcome, ProcessResult};
use crate::types::{JobId, OutputBlob};

use bytes::BytesMut;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Child,
    select,
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

// how long to wait for the pipes to close once the child has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured output per stream is cut down to its last `MAX_CAPTURED_BYTES`.
pub(super) const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

pub(super) async fn supervise(
    job_id: JobId,
    mut child: Child,
    mut cancel: CancelSignal,
    grace: Duration,
) -> Outcome {
    // grab stdout and stderr, if they've been piped
    let stdout = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(capture(job_id, pipe, "stdout", MAX_CAPTURED_BYTES)));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(capture(job_id, pipe, "stderr", MAX_CAPTURED_BYTES)));

    // an exit that is already observable beats a cancel arriving at the same time
    let exit_status = select! {
        biased;
        exit_status = child.wait() => exit_status,
        _ = cancel.requested() => {
            info!(%job_id, pid = ?child.id(), "terminating crawl tool");
            match terminate(&mut child, grace).await {
                Ok(status) => debug!(%job_id, ?status, "crawl tool terminated"),
                Err(err) => warn!(%job_id, error = %err, "failed to reap terminated crawl tool"),
            }
            for reader in stdout.into_iter().chain(stderr) {
                reader.abort();
            }
            return Outcome::Cancelled;
        }
    };

    let stdout = drain(stdout).await;
    let stderr = drain(stderr).await;
    classify(exit_status, stdout, stderr)
}

/// SIGTERM to the tool's whole process group first, SIGKILL once `grace` runs out.
///
/// The tool is spawned as the leader of its own group, so its pid is the group id and
/// anything it forked goes down with it.
async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // already reaped
        return child.wait().await;
    };
    let group = Pid::from_raw(pid as i32);

    match killpg(group, Signal::SIGTERM) {
        Ok(()) => match time::timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => warn!(pid, ?grace, "crawl tool ignored SIGTERM, killing its process group"),
        },
        Err(errno) => debug!(pid, %errno, "SIGTERM to process group failed"),
    }

    if let Err(errno) = killpg(group, Signal::SIGKILL) {
        debug!(pid, %errno, "SIGKILL to process group failed");
        if let Err(err) = child.start_kill() {
            debug!(error = %err, "start_kill failed");
        }
    }
    child.wait().await
}

async fn capture<R>(job_id: JobId, mut pipe: R, stream: &'static str, max_bytes: usize) -> OutputBlob
where
    R: AsyncRead + Unpin,
{
    let mut captured = BytesMut::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut truncated = false;
    loop {
        match pipe.read_buf(&mut buf).await {
            Ok(n) if n > 0 => {
                // move the bytes out of buf and into the capture
                let chunk = buf.split();
                debug!(%job_id, stream, "{}", String::from_utf8_lossy(&chunk).trim_end());
                captured.unsplit(chunk);
                truncated |= keep_tail(&mut captured, max_bytes);
            }
            Ok(_) => break,
            Err(err) => {
                warn!(%job_id, stream, error = %err, "lost crawl tool output");
                break;
            }
        }
    }
    if truncated {
        debug!(%job_id, stream, max_bytes, "crawl tool output truncated to its tail");
    }
    captured.freeze()
}

/// Let the capture grow to twice `max_bytes`, then cut it back to the last `max_bytes`,
/// starting on a UTF-8 character boundary. Returns whether anything was dropped.
fn keep_tail(captured: &mut BytesMut, max_bytes: usize) -> bool {
    if captured.len() <= max_bytes.saturating_mul(2) {
        return false;
    }
    let mut start = captured.len() - max_bytes;
    // skip continuation bytes (0b10xx_xxxx)
    while start < captured.len() && (captured[start] & 0xC0) == 0x80 {
        start += 1;
    }
    let _ = captured.split_to(start);
    true
}

async fn drain(reader: Option<JoinHandle<OutputBlob>>) -> OutputBlob {
    let Some(mut reader) = reader else {
        return OutputBlob::new();
    };
    match time::timeout(DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(blob)) => blob,
        Ok(Err(_)) => OutputBlob::new(),
        Err(_) => {
            // a grandchild is still holding the pipe open
            reader.abort();
            OutputBlob::new()
        }
    }
}

fn classify(
    exit_status: io::Result<ExitStatus>,
    stdout: OutputBlob,
    stderr: OutputBlob,
) -> Outcome {
    match exit_status {
        Ok(status) if status.success() => Outcome::Succeeded(ProcessResult {
            exit_code: 0,
            stdout,
            stderr,
            artifact: None,
        }),
        Ok(status) => Outcome::ProcessFailed {
            code: status.code(),
            signal: status.signal(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        },
        Err(err) => Outcome::ProcessFailed {
            code: None,
            signal: None,
            stderr: err.to_string(),
        },
    }
}
