//! Utilities to handle signals.
use std::{
    io,
    mem::MaybeUninit,
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    sync::OnceLock,
};

use crate::cutils::cerr;
use libc::{c_int, c_void, siginfo_t, MSG_DONTWAIT};

const SIGINFO_SIZE: usize = std::mem::size_of::<siginfo_t>();

pub(crate) type SignalNumber = c_int;

/// Information related to the arrival of a signal.
pub(crate) struct SignalInfo {
    info: siginfo_t,
}

impl SignalInfo {
    /// Gets the signal number.
    pub(crate) fn signal(&self) -> SignalNumber {
        self.info.si_signo
    }
}

static STREAM: OnceLock<SignalStream> = OnceLock::new();

fn send_siginfo(_signal: SignalNumber, info: *const siginfo_t, _context: *const c_void) {
    if let Some(tx) = STREAM.get().map(|stream| stream.tx.as_raw_fd()) {
        // `send` is async-signal-safe; the sent `siginfo_t` is consumed by
        // the main loop at its next drain point.
        unsafe { libc::send(tx, info.cast(), SIGINFO_SIZE, MSG_DONTWAIT) };
    }
}

/// A type able to receive signal information from any [`SignalHandler`] with
/// the [`SignalHandlerBehavior::Stream`] behavior.
///
/// This is a singleton type: there is only one value of this type during the
/// execution of a program.
pub(crate) struct SignalStream {
    rx: UnixStream,
    tx: UnixStream,
}

impl SignalStream {
    /// Create a new [`SignalStream`].
    ///
    /// # Panics
    ///
    /// If this function has been called before.
    #[track_caller]
    pub(crate) fn init() -> io::Result<&'static Self> {
        let (rx, tx) = UnixStream::pair()?;

        if STREAM.set(Self { rx, tx }).is_err() {
            panic!("`SignalStream` has already been initialized");
        }

        Ok(STREAM.get().unwrap())
    }

    /// Receive the information related to one previously arrived signal
    /// without blocking, or `None` if no signal is pending.
    pub(crate) fn poll_signal(&self) -> io::Result<Option<SignalInfo>> {
        let mut info = MaybeUninit::<siginfo_t>::uninit();
        let fd = self.rx.as_raw_fd();

        let bytes = match cerr(unsafe {
            libc::recv(fd, info.as_mut_ptr().cast(), SIGINFO_SIZE, MSG_DONTWAIT)
        }) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(err),
        };

        if bytes as usize != SIGINFO_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes when receiving `siginfo_t`",
            ));
        }
        // SAFETY: we can assume `info` is initialized because `recv` wrote enough bytes to fill
        // the value and `siginfo_t` is POD.
        let info = unsafe { info.assume_init() };
        Ok(Some(SignalInfo { info }))
    }
}

impl AsRawFd for SignalStream {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

/// The possible behaviors for a [`SignalHandler`].
pub(crate) enum SignalHandlerBehavior {
    /// Execute the default action for the signal.
    Default,
    /// Stream the signal information into the [`SignalStream`] singleton.
    Stream,
}

pub(crate) struct SignalAction {
    raw: libc::sigaction,
}

impl SignalAction {
    fn new(behavior: SignalHandlerBehavior) -> io::Result<Self> {
        let sa_mask = SignalSet::full()?;
        // Deliberately no `SA_RESTART`: a streamed signal must interrupt a
        // blocking `poll` or `waitpid` so the main loop can drain it promptly.
        let mut sa_flags = 0;

        let sa_sigaction = match behavior {
            SignalHandlerBehavior::Default => libc::SIG_DFL,
            SignalHandlerBehavior::Stream => {
                sa_flags |= libc::SA_SIGINFO;
                send_siginfo as libc::sighandler_t
            }
        };

        Ok(Self {
            raw: libc::sigaction {
                sa_sigaction,
                sa_mask: sa_mask.raw,
                sa_flags,
                sa_restorer: None,
            },
        })
    }

    fn register(&self, signal: SignalNumber) -> io::Result<Self> {
        let mut original_action = MaybeUninit::<libc::sigaction>::zeroed();

        cerr(unsafe { libc::sigaction(signal, &self.raw, original_action.as_mut_ptr()) })?;

        Ok(Self {
            raw: unsafe { original_action.assume_init() },
        })
    }
}

/// A handler for a signal.
///
/// When a value of this type is dropped, it will try to restore the action
/// that was registered for the signal before it.
pub(crate) struct SignalHandler {
    signal: SignalNumber,
    original_action: SignalAction,
}

impl SignalHandler {
    const FORBIDDEN: &'static [SignalNumber] = &[consts::SIGKILL, consts::SIGSTOP];

    /// Register a new handler for the given signal with the provided behavior.
    ///
    /// # Panics
    ///
    /// If it is not possible to override the action for the provided signal.
    pub(crate) fn register(
        signal: SignalNumber,
        behavior: SignalHandlerBehavior,
    ) -> io::Result<Self> {
        if Self::FORBIDDEN.contains(&signal) {
            panic!(
                "the {} signal action cannot be overridden",
                signal_name(signal)
            );
        }

        let action = SignalAction::new(behavior)?;
        let original_action = action.register(signal)?;

        Ok(Self {
            signal,
            original_action,
        })
    }

    /// Forget this signal handler.
    ///
    /// This can be used to avoid restoring the original action for the signal,
    /// e.g. in a freshly forked child that is about to `exec`.
    pub(crate) fn forget(self) {
        std::mem::forget(self)
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.original_action.register(self.signal).ok();
    }
}

pub(crate) struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    pub(crate) fn full() -> io::Result<Self> {
        let mut raw = MaybeUninit::<libc::sigset_t>::uninit();

        cerr(unsafe { libc::sigfillset(raw.as_mut_ptr()) })?;

        Ok(Self {
            raw: unsafe { raw.assume_init() },
        })
    }
}

macro_rules! define_consts {
    ($($signal:ident,)*) => {
        pub(crate) mod consts {
            pub(crate) use libc::{$($signal,)*};
        }

        pub(crate) fn signal_name(signal: SignalNumber) -> &'static str {
            match signal {
                $(consts::$signal => stringify!($signal),)*
                _ => "unknown signal",
            }
        }
    };
}

define_consts! {
    SIGINT,
    SIGQUIT,
    SIGTSTP,
    SIGTERM,
    SIGCHLD,
    SIGCONT,
    SIGKILL,
    SIGSTOP,
}
