//! Forced termination of abandoned ipmitool processes
//!
//! Terminate then kill, both best-effort: the process may already be gone.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// How long to wait for the killed process to be reaped
const REAP_GRACE: Duration = Duration::from_secs(2);

pub async fn terminate(child: &mut Child) {
    request_stop(child);

    if let Err(e) = child.start_kill() {
        debug!("kill after exit ignored: {}", e);
    }

    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => debug!("wait after kill failed: {}", e),
        Err(_) => warn!("process {:?} not reaped within {:?}", child.id(), REAP_GRACE),
    }
}

#[cfg(unix)]
fn request_stop(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) {}

/// Exit code as reported to operators; signal deaths map to 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
