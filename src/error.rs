use std::{error::Error, fmt};

/// The classes of failures the engine can report.
///
/// `Bug` marks a broken internal invariant and is terminal for the process
/// that hit it. The other kinds are ordinary runtime failures that the
/// caller may handle (a lock timeout is retryable, a version mismatch is
/// fatal for the affected dataset only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Bug,
    Range,
    Version,
    Lock,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Bug => "bug",
            ErrorKind::Range => "range",
            ErrorKind::Version => "version",
            ErrorKind::Lock => "lock",
            ErrorKind::Io => "io",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub struct DbError {
    kind: ErrorKind,
    details: String,
}

impl DbError {
    pub fn new(kind: ErrorKind, msg: &str) -> DbError {
        DbError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn bug(msg: &str) -> DbError {
        DbError::new(ErrorKind::Bug, msg)
    }

    pub fn range(msg: &str) -> DbError {
        DbError::new(ErrorKind::Range, msg)
    }

    pub fn version(msg: &str) -> DbError {
        DbError::new(ErrorKind::Version, msg)
    }

    pub fn lock(msg: &str) -> DbError {
        DbError::new(ErrorKind::Lock, msg)
    }

    pub fn io(msg: &str) -> DbError {
        DbError::new(ErrorKind::Io, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Lock failures may be retried by the caller under a fresh session,
    /// everything else has to propagate.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Lock
    }

    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        log::error!("{}\nbacktrace:\n{:?}", self, bt);
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.details)
    }
}

impl Error for DbError {}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> DbError {
        DbError::new(ErrorKind::Io, &e.to_string())
    }
}

pub type DbResult<T = ()> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_display() {
        let e = DbError::lock("acquire table 3 timeout");
        assert_eq!(e.kind(), ErrorKind::Lock);
        assert!(e.is_retryable());
        assert_eq!(format!("{}", e), "[lock] acquire table 3 timeout");

        let e = DbError::version("expected 2, found 7");
        assert!(!e.is_retryable());
        assert_eq!(e.kind(), ErrorKind::Version);
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let e: DbError = io.into();
        assert_eq!(e.kind(), ErrorKind::Io);
    }
}
