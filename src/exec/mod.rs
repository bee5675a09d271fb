mod jobs;

pub use jobs::JobTable;

use std::{
    fmt,
    fs::{File, OpenOptions},
    io,
    os::unix::{fs::OpenOptionsExt, process::CommandExt},
    path::Path,
    process::{Command, Stdio},
};

use crate::{
    common::ParsedCommand,
    log::{dev_info, dev_warn, user_warn},
    system::{
        _exit, fork,
        interface::ProcessId,
        signal::{consts::*, SignalHandler, SignalHandlerBehavior, SignalNumber},
        wait::{Wait, WaitError, WaitOptions, WaitStatus},
        ForkResult,
    },
};

/// Exit status used by a child whose redirection target could not be opened.
const EXIT_CANNOT_OPEN: i32 = 1;
/// Exit status used by a child whose streams could not be bound or whose
/// program image could not be replaced.
const EXIT_EXEC_FAILED: i32 = 2;

/// How a finished child process came to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal(SignalNumber),
}

impl ExitReason {
    pub(crate) fn from_status(status: &WaitStatus) -> Option<Self> {
        if let Some(code) = status.exit_status() {
            Some(Self::Code(code))
        } else {
            status.term_signal().map(Self::Signal)
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit value {code}"),
            Self::Signal(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// Run the command in the foreground: launch one child and block the
/// interpreter until that exact child has terminated.
///
/// `on_interrupt` is called whenever the wait is interrupted by a signal, so
/// the caller can drain pending signal events before the wait resumes.
///
/// Returns `Ok(None)` if the child was launched but its termination could not
/// be collected; that failure has already been reported.
pub fn run_foreground(
    cmd: &ParsedCommand,
    mut on_interrupt: impl FnMut(),
) -> io::Result<Option<ExitReason>> {
    let child_pid = spawn(cmd, false)?;

    loop {
        match child_pid.wait(WaitOptions::new()) {
            Ok((_, status)) => {
                let Some(reason) = ExitReason::from_status(&status) else {
                    continue;
                };
                if let ExitReason::Signal(_) = reason {
                    println_ignore_io_error!("{reason}");
                }
                return Ok(Some(reason));
            }
            Err(WaitError::NotReady) => continue,
            Err(WaitError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => on_interrupt(),
            Err(WaitError::Io(err)) => {
                user_warn!("cannot wait for foreground pid {child_pid}: {err}");
                return Ok(None);
            }
        }
    }
}

/// Launch the command without waiting, report its pid immediately, and track
/// it for the reaper.
pub fn run_background(cmd: &ParsedCommand, jobs: &mut JobTable) -> io::Result<()> {
    let child_pid = spawn(cmd, true)?;

    println_ignore_io_error!("{}", launch_message(child_pid));

    if !jobs.add(child_pid) {
        user_warn!("background job table is full; pid {child_pid} will not be tracked");
    }

    Ok(())
}

/// The line reported as soon as a background child has been launched.
fn launch_message(pid: ProcessId) -> String {
    format!("background pid is {pid}")
}

/// Duplicate the shell and replace the child's program image with the
/// command, resolved through `PATH`. Returns the child's pid without waiting.
///
/// Any failure past the fork terminates the child alone: status 1 for a
/// redirection target that cannot be opened, status 2 otherwise. Only a
/// failed fork is an error of the shell itself.
fn spawn(cmd: &ParsedCommand, background: bool) -> io::Result<ProcessId> {
    let mut command = Command::new(cmd.program());
    command.args(cmd.arguments());

    let ForkResult::Parent(child_pid) = fork().map_err(|err| {
        dev_warn!("unable to fork command process: {err}");
        err
    })?
    else {
        exec_child(command, cmd, background);
    };

    dev_info!("spawned `{cmd}` with pid {child_pid}");

    Ok(child_pid)
}

/// Child-only branch: bind the standard streams, restore the default signal
/// dispositions, then replace the program image. Never returns.
fn exec_child(mut command: Command, cmd: &ParsedCommand, background: bool) -> ! {
    if bind_streams(&mut command, cmd, background).is_err() {
        _exit(EXIT_CANNOT_OPEN);
    }

    // The shell's streamed handlers must not leak into the child: a
    // foreground `sleep` has to remain interruptible.
    for signal in [SIGINT, SIGTSTP] {
        if let Ok(handler) = SignalHandler::register(signal, SignalHandlerBehavior::Default) {
            handler.forget();
        }
    }

    // `exec` only returns on failure.
    let err = command.exec();
    eprintln_ignore_io_error!("{}: {err}", cmd.program().to_string_lossy());
    _exit(EXIT_EXEC_FAILED);
}

/// Open the redirection targets and bind them to the child's standard input
/// and output. A background command with no explicit redirection gets the
/// null device on the missing side, so an unattended job can neither block on
/// terminal input nor write to the terminal.
fn bind_streams(command: &mut Command, cmd: &ParsedCommand, background: bool) -> Result<(), ()> {
    let input = match &cmd.input_file {
        Some(path) => Some(path.as_path()),
        None if background => Some(Path::new("/dev/null")),
        None => None,
    };
    if let Some(path) = input {
        let file = File::open(path).map_err(|_| {
            println_ignore_io_error!("cannot open {} for input", path.display());
        })?;
        command.stdin(Stdio::from(file));
    }

    let output = match &cmd.output_file {
        Some(path) => Some(path.as_path()),
        None if background => Some(Path::new("/dev/null")),
        None => None,
    };
    if let Some(path) = output {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
            .map_err(|err| {
                eprintln_ignore_io_error!("cannot open {} for output: {err}", path.display());
            })?;
        command.stdout(Stdio::from(file));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{launch_message, run_background, run_foreground, spawn, ExitReason, JobTable};
    use crate::common::ParsedCommand;
    use crate::system::interface::ProcessId;
    use crate::system::wait::{Wait, WaitOptions};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> ParsedCommand {
        ParsedCommand {
            argv: vec!["sh".into(), "-c".into(), script.into()],
            ..Default::default()
        }
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("smallsh-exec-{}-{name}", std::process::id()))
    }

    #[test]
    fn reported_lines_quote_code_signal_and_pid() {
        assert_eq!(ExitReason::Code(7).to_string(), "exit value 7");
        assert_eq!(
            ExitReason::Signal(libc::SIGTERM).to_string(),
            format!("terminated by signal {}", libc::SIGTERM)
        );
        assert_eq!(launch_message(ProcessId::new(4923)), "background pid is 4923");
    }

    #[test]
    fn foreground_reports_the_exit_code() {
        let reason = run_foreground(&sh("exit 7"), || {}).unwrap();
        assert_eq!(reason, Some(ExitReason::Code(7)));
    }

    #[test]
    fn foreground_reports_the_terminating_signal() {
        let reason = run_foreground(&sh("kill -KILL $$"), || {}).unwrap();
        assert_eq!(reason, Some(ExitReason::Signal(libc::SIGKILL)));
    }

    #[test]
    fn missing_program_exits_with_status_two() {
        let cmd = ParsedCommand {
            argv: vec!["smallsh-no-such-program-xyz".into()],
            ..Default::default()
        };
        let reason = run_foreground(&cmd, || {}).unwrap();
        assert_eq!(reason, Some(ExitReason::Code(2)));
    }

    #[test]
    fn missing_input_redirection_exits_with_status_one() {
        let cmd = ParsedCommand {
            argv: vec!["cat".into()],
            input_file: Some("/definitely/not/a/file".into()),
            ..Default::default()
        };
        let reason = run_foreground(&cmd, || {}).unwrap();
        assert_eq!(reason, Some(ExitReason::Code(1)));
    }

    #[test]
    fn output_redirection_captures_exact_stdout() {
        let out = scratch_path("out");
        let cmd = ParsedCommand {
            argv: vec!["echo".into(), "hello".into()],
            output_file: Some(out.clone()),
            ..Default::default()
        };

        let reason = run_foreground(&cmd, || {}).unwrap();
        assert_eq!(reason, Some(ExitReason::Code(0)));
        assert_eq!(std::fs::read(&out).unwrap(), b"hello\n");

        std::fs::remove_file(&out).ok();
    }

    #[test]
    fn input_redirection_feeds_exact_file_bytes() {
        let input = scratch_path("in");
        let out = scratch_path("counted");
        std::fs::write(&input, "one\ntwo\n").unwrap();

        let cmd = ParsedCommand {
            argv: vec!["wc".into(), "-l".into()],
            input_file: Some(input.clone()),
            output_file: Some(out.clone()),
            ..Default::default()
        };

        let reason = run_foreground(&cmd, || {}).unwrap();
        assert_eq!(reason, Some(ExitReason::Code(0)));
        let counted = String::from_utf8(std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(counted.trim(), "2");

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&out).ok();
    }

    #[test]
    fn background_job_is_tracked_then_reaped() {
        let mut jobs = JobTable::new();
        run_background(&sh("sleep 0.2"), &mut jobs).unwrap();
        assert_eq!(jobs.live_count(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while jobs.live_count() > 0 {
            assert!(Instant::now() < deadline, "background job was never reaped");
            jobs.reap();
            std::thread::sleep(Duration::from_millis(20));
        }

        // re-polling cleared slots has no effect
        jobs.reap();
        assert_eq!(jobs.live_count(), 0);
    }

    #[test]
    fn terminate_all_kills_tracked_jobs() {
        let mut jobs = JobTable::new();
        let pid = spawn(&sh("sleep 5"), true).unwrap();
        assert!(jobs.add(pid));

        jobs.terminate_all();
        assert_eq!(jobs.live_count(), 0);

        let (_, status) = pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(status.term_signal(), Some(libc::SIGTERM));
    }
}
