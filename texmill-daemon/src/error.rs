//! Error types for the typesetting session.

use std::fmt;

/// An error surfaced by session setup or operation.
#[derive(Debug)]
pub enum DaemonError {
    /// An I/O failure creating or talking to session resources.
    Io(std::io::Error),
    /// A template that cannot be interpreted.
    Template(String),
    /// The engine stopped cooperating: it crashed, went silent past the
    /// submit timeout, or produced an undecodable page.
    EngineCrashed {
        /// What went wrong.
        message: String,
        /// Error lines collected from the engine log.
        log: Vec<String>,
    },
    /// An operation on a session that is already crashed or closed.
    SessionClosed,
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "session I/O error: {e}"),
            Self::Template(msg) => write!(f, "bad template: {msg}"),
            Self::EngineCrashed { message, log } => {
                write!(f, "engine crashed: {message}")?;
                for line in log {
                    write!(f, "\n  {line}")?;
                }
                Ok(())
            }
            Self::SessionClosed => write!(f, "session is closed"),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<nix::errno::Errno> for DaemonError {
    fn from(e: nix::errno::Errno) -> Self {
        Self::Io(std::io::Error::from(e))
    }
}

/// Convenience alias for results using [`DaemonError`].
pub type DaemonResult<T> = Result<T, DaemonError>;
