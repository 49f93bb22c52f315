// Every error in the system goes through Error::new, so there is one
// place to set a breakpoint and one place that emits it into tracing.
// Errors also carry a coarse kind so callers at the factory boundary
// can tell a version mismatch from a corrupt file without string
// matching.

use std::{any::Any, borrow::Cow, fmt};
use backtrace_error::DynBacktraceError;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    VersionMismatch,
    Corrupt,
    UnknownName,
    Unsupported,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "i/o error",
            ErrorKind::VersionMismatch => "version mismatch",
            ErrorKind::Corrupt => "corrupt data",
            ErrorKind::UnknownName => "unknown name",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    #[allow(dead_code)]
    inner: DynBacktraceError,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        let kind = if (&err as &dyn Any).is::<std::io::Error>() {
            ErrorKind::Io
        } else {
            ErrorKind::Other
        };
        Error::new(kind, err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Error {
        error!(target: "colsieve", "{}: {:?}", kind, err);
        let msg = err.to_string();
        let inner = DynBacktraceError::from(err);
        Error { kind, msg, inner }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Corrupt, msg)
}

pub fn err_kind(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(kind, SimpleErr(msg.into()))
}

// I/O failures name the file so the message is useful at the factory boundary.
pub fn io_err(path: &std::path::Path, e: std::io::Error) -> Error {
    err_kind(ErrorKind::Io, format!("{}: {}", path.display(), e))
}
