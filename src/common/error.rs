use std::{fmt, io, path::PathBuf};

#[derive(Debug)]
pub enum Error {
    /// The shell could not duplicate itself; no further children can be
    /// guaranteed to run, so this aborts the interpreter.
    Fork(io::Error),
    /// Signal handling could not be set up at startup.
    SignalSetup(io::Error),
    Io(Option<PathBuf>, io::Error),
    Parse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fork(err) => write!(f, "cannot create a new process: {err}"),
            Error::SignalSetup(err) => write!(f, "cannot set up signal handling: {err}"),
            Error::Io(Some(path), err) => write!(f, "cannot access '{}': {err}", path.display()),
            Error::Io(None, err) => write!(f, "IO error: {err}"),
            Error::Parse(message) => write!(f, "syntax error: {message}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(None, err)
    }
}
