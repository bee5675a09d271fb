mod parse;

use std::{
    env,
    io::{self, Write},
    ops::ControlFlow,
    path::PathBuf,
};

use crate::{
    common::{Error, ParsedCommand},
    cutils::cerr,
    exec::{self, ExitReason, JobTable},
    log::{dev_info, user_error, user_warn, ShellLogger},
    system::{
        chdir,
        poll::PollSet,
        signal::{
            consts::*, signal_name, SignalHandler, SignalHandlerBehavior, SignalNumber,
            SignalStream,
        },
    },
};

pub fn main() {
    ShellLogger::new("smallsh: ").into_global_logger();

    match run() {
        Ok(()) => {}
        Err(err) => {
            user_error!("{err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<(), Error> {
    // The stream must exist before the handlers that write into it.
    let signal_stream = SignalStream::init().map_err(Error::SignalSetup)?;

    // Handlers only forward the raw siginfo; every decision is taken
    // synchronously by the loop below, at its drain points.
    let _sigint_handler = SignalHandler::register(SIGINT, SignalHandlerBehavior::Stream)
        .map_err(Error::SignalSetup)?;
    let _sigtstp_handler = SignalHandler::register(SIGTSTP, SignalHandlerBehavior::Stream)
        .map_err(Error::SignalSetup)?;

    let mut session = ShellSession::new(signal_stream);

    let mut poller = PollSet::new();
    poller.add_fd_read(PollKey::Signal, signal_stream);
    poller.add_fd_read(PollKey::Stdin, &io::stdin());

    let mut input = LineBuffer::new();

    loop {
        session.drain_signals();
        session.jobs.reap();

        prompt()?;

        match next_input(&mut input, &mut poller)? {
            // pending signals are drained at the top of the loop, which also
            // repaints the prompt after a mode banner
            Input::Interrupted => continue,
            Input::Eof => {
                session.jobs.terminate_all();
                return Ok(());
            }
            Input::Line(line) => match parse::parse_line(&line) {
                Ok(Some(cmd)) => {
                    if let ControlFlow::Break(()) = session.dispatch(&cmd)? {
                        session.jobs.terminate_all();
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(err) => user_warn!("{err}"),
            },
        }
    }
}

fn prompt() -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(b": ")?;
    stdout.flush()?;
    Ok(())
}

/// Process-wide interpreter state, threaded through the dispatcher, the
/// execution paths and the reaper instead of living in globals.
struct ShellSession {
    foreground_only: bool,
    last_fg_status: Option<ExitReason>,
    jobs: JobTable,
    signals: Option<&'static SignalStream>,
}

impl ShellSession {
    fn new(signals: &'static SignalStream) -> Self {
        Self {
            foreground_only: false,
            last_fg_status: None,
            jobs: JobTable::new(),
            signals: Some(signals),
        }
    }

    #[cfg(test)]
    fn detached() -> Self {
        Self {
            foreground_only: false,
            last_fg_status: None,
            jobs: JobTable::new(),
            signals: None,
        }
    }

    /// Consume every signal that arrived since the previous drain point.
    fn drain_signals(&mut self) {
        let Some(stream) = self.signals else { return };

        loop {
            match stream.poll_signal() {
                Ok(Some(info)) => self.handle_signal(info.signal()),
                Ok(None) => break,
                Err(err) => {
                    user_warn!("cannot receive pending signals: {err}");
                    break;
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: SignalNumber) {
        match signal {
            SIGTSTP => {
                self.foreground_only = !self.foreground_only;
                println_ignore_io_error!("{}", mode_banner(self.foreground_only));
            }
            // the interpreter shrugs off interrupts; only its foreground
            // children die from them
            SIGINT => {}
            other => dev_info!("discarding unexpected {}", signal_name(other)),
        }
    }

    /// Route one parsed command to a built-in or to the execution engine.
    fn dispatch(&mut self, cmd: &ParsedCommand) -> Result<ControlFlow<()>, Error> {
        match cmd.program().to_str() {
            Some("exit") => return Ok(ControlFlow::Break(())),
            Some("cd") => self.change_directory(cmd),
            Some("status") => self.print_status(),
            _ => self.run_external(cmd)?,
        }

        Ok(ControlFlow::Continue(()))
    }

    fn change_directory(&mut self, cmd: &ParsedCommand) {
        let target = match cmd.arguments().first() {
            Some(path) => PathBuf::from(path),
            None => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => {
                    user_warn!("cd: HOME is not set");
                    return;
                }
            },
        };

        if let Err(err) = chdir(&target) {
            user_warn!("cd: cannot change directory to '{}': {err}", target.display());
        }
    }

    /// The `status` built-in: report how the most recent foreground command
    /// ended. Background jobs never influence this.
    fn print_status(&self) {
        println_ignore_io_error!("{}", self.status_message());
    }

    fn status_message(&self) -> String {
        match &self.last_fg_status {
            Some(reason) => reason.to_string(),
            // no foreground command has finished yet
            None => "exit status 0".to_string(),
        }
    }

    fn run_external(&mut self, cmd: &ParsedCommand) -> Result<(), Error> {
        if cmd.is_bg && !self.foreground_only {
            exec::run_background(cmd, &mut self.jobs).map_err(Error::Fork)
        } else {
            let reason =
                exec::run_foreground(cmd, || self.drain_signals()).map_err(Error::Fork)?;
            if let Some(reason) = reason {
                self.last_fg_status = Some(reason);
            }
            Ok(())
        }
    }
}

/// Banner announcing the new mode after a stop-signal toggle.
fn mode_banner(foreground_only: bool) -> &'static str {
    if foreground_only {
        "\nEntering foreground-only mode (& is now ignored)"
    } else {
        "\nExiting foreground-only mode"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PollKey {
    Signal,
    Stdin,
}

enum Input {
    Line(String),
    /// a signal arrived before a full line did
    Interrupted,
    Eof,
}

fn next_input(buffer: &mut LineBuffer, poller: &mut PollSet<PollKey>) -> Result<Input, Error> {
    if let Some(line) = buffer.take_line() {
        return Ok(Input::Line(line));
    }

    loop {
        let keys = match poller.poll() {
            Ok(keys) => keys,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Input::Interrupted),
            Err(err) => return Err(err.into()),
        };

        if keys.contains(&PollKey::Signal) {
            return Ok(Input::Interrupted);
        }

        if keys.contains(&PollKey::Stdin) {
            match buffer.fill() {
                Ok(true) => {
                    if let Some(line) = buffer.take_line() {
                        return Ok(Input::Line(line));
                    }
                }
                Ok(false) => return Ok(Input::Eof),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Ok(Input::Interrupted)
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Line buffering over the shell's standard input that never reads from the
/// OS before `poll` has reported data, so pending input and pending signals
/// cannot starve one another.
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Pop one complete line off the buffer, if any.
    fn take_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read whatever is currently available on standard input. Returns
    /// `false` once the input is exhausted.
    fn fill(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 512];
        let bytes =
            cerr(unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) })?
                as usize;

        if bytes == 0 {
            if self.pending.is_empty() {
                return Ok(false);
            }
            // final line without a trailing newline
            self.pending.push(b'\n');
            return Ok(true);
        }

        self.pending.extend_from_slice(&buf[..bytes]);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{mode_banner, parse, ExitReason, LineBuffer, ShellSession};
    use crate::common::ParsedCommand;
    use crate::system::signal::consts::*;
    use pretty_assertions::assert_eq;
    use std::ops::ControlFlow;

    fn line(text: &str) -> ParsedCommand {
        parse::parse_line(text).unwrap().unwrap()
    }

    #[test]
    fn two_stops_toggle_foreground_only_mode() {
        let mut session = ShellSession::detached();

        assert!(!session.foreground_only);

        session.handle_signal(SIGTSTP);
        assert!(session.foreground_only);
        assert_eq!(
            mode_banner(session.foreground_only),
            "\nEntering foreground-only mode (& is now ignored)"
        );

        session.handle_signal(SIGTSTP);
        assert!(!session.foreground_only);
        assert_eq!(
            mode_banner(session.foreground_only),
            "\nExiting foreground-only mode"
        );
    }

    #[test]
    fn interrupts_do_not_change_session_state() {
        let mut session = ShellSession::detached();

        session.handle_signal(SIGINT);

        assert!(!session.foreground_only);
        assert_eq!(session.last_fg_status, None);
        assert_eq!(session.jobs.live_count(), 0);
    }

    #[test]
    fn exit_breaks_the_interpreter_loop() {
        let mut session = ShellSession::detached();
        let flow = session.dispatch(&line("exit")).unwrap();
        assert_eq!(flow, ControlFlow::Break(()));
    }

    #[test]
    fn foreground_termination_is_tracked_and_builtins_leave_it_alone() {
        let mut session = ShellSession::detached();

        session.dispatch(&line("false")).unwrap();
        assert_eq!(session.last_fg_status, Some(ExitReason::Code(1)));

        session.dispatch(&line("status")).unwrap();
        session.dispatch(&line("cd /tmp/definitely/not/a/directory")).unwrap();
        assert_eq!(session.last_fg_status, Some(ExitReason::Code(1)));
    }

    #[test]
    fn status_messages_quote_code_and_signal() {
        let mut session = ShellSession::detached();
        assert_eq!(session.status_message(), "exit status 0");

        session.dispatch(&line("false")).unwrap();
        assert_eq!(session.status_message(), "exit value 1");

        let killed = ParsedCommand {
            argv: vec!["sh".into(), "-c".into(), "kill -KILL $$".into()],
            ..Default::default()
        };
        session.dispatch(&killed).unwrap();
        assert_eq!(
            session.status_message(),
            format!("terminated by signal {}", libc::SIGKILL)
        );
    }

    #[test]
    fn foreground_only_mode_forces_background_requests_into_the_foreground() {
        let mut session = ShellSession::detached();
        session.handle_signal(SIGTSTP);

        session.dispatch(&line("true &")).unwrap();

        // the command ran in the foreground: its status was recorded and
        // nothing was left for the reaper to track
        assert_eq!(session.last_fg_status, Some(ExitReason::Code(0)));
        assert_eq!(session.jobs.live_count(), 0);
    }

    #[test]
    fn background_commands_never_touch_the_status_tracker() {
        let mut session = ShellSession::detached();

        session.dispatch(&line("sleep 0.2 &")).unwrap();
        assert_eq!(session.last_fg_status, None);
        assert_eq!(session.jobs.live_count(), 1);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while session.jobs.live_count() > 0 {
            assert!(std::time::Instant::now() < deadline);
            session.jobs.reap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(session.last_fg_status, None);
    }

    #[test]
    fn failed_cd_leaves_the_working_directory_alone() {
        let mut session = ShellSession::detached();
        let before = std::env::current_dir().unwrap();

        session
            .dispatch(&line("cd /definitely/not/a/directory"))
            .unwrap();

        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn line_buffer_hands_out_one_line_at_a_time() {
        let mut buffer = LineBuffer {
            pending: b"status\nexit\npartial".to_vec(),
        };

        assert_eq!(buffer.take_line().unwrap(), "status\n");
        assert_eq!(buffer.take_line().unwrap(), "exit\n");
        assert_eq!(buffer.take_line(), None);
    }
}
