use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::Duration;

use crate::runner::{EngineError, EngineResult};
use crate::worker::CancelToken;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) enum Exit {
    Exited(ExitStatus),
    Cancelled,
}

/// Start the child as the leader of a new process group.
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// Poll the child until it exits or `cancel` fires.
///
/// On cancellation the whole process group is killed and the child reaped
/// before returning.
pub(crate) fn wait_or_cancel(child: &mut Child, cancel: &CancelToken) -> EngineResult<Exit> {
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| EngineError::io("failed to poll interpreter", err))?
        {
            return Ok(Exit::Exited(status));
        }
        if cancel.is_cancelled() {
            kill_process_group(child);
            if let Err(err) = child.kill() {
                tracing::debug!(error = %err, "interpreter already gone");
            }
            if let Err(err) = child.wait() {
                tracing::warn!(error = %err, "failed to reap interpreter");
            }
            return Ok(Exit::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// SIGKILL every process still in the child's group.
///
/// Descendants that moved to another group or session are out of reach.
pub(crate) fn kill_process_group(child: &Child) {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(child.id()) else {
            return;
        };
        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            // ESRCH means the group is already empty
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => tracing::warn!(error = %err, "failed to signal process group"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}
