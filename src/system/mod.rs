use std::{
    ffi::CString,
    io,
    os::unix::prelude::OsStrExt,
    path::Path,
};

use crate::cutils::cerr;

pub mod interface;
pub mod poll;
pub mod signal;
pub mod wait;

use interface::ProcessId;
use signal::SignalNumber;

pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
///
/// The shell is single-threaded, so the child may run non-async-signal-safe
/// code (such as opening redirection targets) before it calls `exec`.
pub(crate) fn fork() -> io::Result<ForkResult> {
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Terminate the current process without running any cleanup.
///
/// This is the only way a forked child that failed to `exec` may exit: it
/// must not unwind through the parent's state.
pub(crate) fn _exit(status: libc::c_int) -> ! {
    unsafe { libc::_exit(status) }
}

pub fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

pub(crate) fn chdir<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte found in path"))?;

    cerr(unsafe { libc::chdir(c_path.as_ptr()) }).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::{
        chdir, fork, kill,
        wait::{Wait, WaitOptions},
        ForkResult, _exit,
    };
    use crate::system::signal::consts::*;

    #[test]
    fn fork_exit_status_is_observable() {
        let ForkResult::Parent(child_pid) = fork().unwrap() else {
            // only async-signal-safe code is allowed on this branch
            _exit(42);
        };

        let (pid, status) = child_pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status.exit_status(), Some(42));
    }

    #[test]
    fn kill_is_reported_as_termination_signal() {
        let command = std::process::Command::new("sh")
            .args(["-c", "sleep 5"])
            .spawn()
            .unwrap();
        let command_pid = super::interface::ProcessId::new(command.id() as libc::pid_t);

        kill(command_pid, SIGTERM).unwrap();

        let (pid, status) = command_pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(pid, command_pid);
        assert_eq!(status.term_signal(), Some(SIGTERM));
        assert!(status.exit_status().is_none());
    }

    #[test]
    fn chdir_rejects_missing_directories() {
        assert!(chdir("/definitely/not/a/directory").is_err());
    }

    #[test]
    fn chdir_rejects_nul_bytes() {
        use std::os::unix::ffi::OsStrExt;
        let path = std::ffi::OsStr::from_bytes(b"/tmp\0/x");
        assert!(chdir(path).is_err());
    }
}
