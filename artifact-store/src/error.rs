use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::io;

use tracing_error::SpanTrace;

/// Categorizes artifact errors by what went wrong on disk, independent of
/// the operation that was being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactErrorKind {
    /// The file or directory does not exist.
    ///
    /// **Retryable:** No - the artifact is not there.
    NotFound,

    /// The process lacks permission to touch the file or directory.
    ///
    /// **Retryable:** No - unless permissions are fixed.
    PermissionDenied,

    /// The requested path is not a valid artifact location (absolute,
    /// escapes the root, or a project name containing separators).
    ///
    /// **Retryable:** No - the request itself is invalid.
    InvalidPath,

    /// Any other I/O failure (disk full, interrupted, ...).
    ///
    /// **Retryable:** Maybe - depends on whether the condition is transient.
    Io,
}

impl ArtifactErrorKind {
    /// Returns whether this error kind typically indicates a retryable condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArtifactErrorKind::Io)
    }
}

impl From<io::ErrorKind> for ArtifactErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ArtifactErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ArtifactErrorKind::PermissionDenied,
            _ => ArtifactErrorKind::Io,
        }
    }
}

impl fmt::Display for ArtifactErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactErrorKind::NotFound => write!(f, "not found"),
            ArtifactErrorKind::PermissionDenied => write!(f, "permission denied"),
            ArtifactErrorKind::InvalidPath => write!(f, "invalid path"),
            ArtifactErrorKind::Io => write!(f, "I/O error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Captured backtrace, subject to `RUST_BACKTRACE`.
    backtrace: Backtrace,

    /// Span context at the point the error was created.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// An error raised while writing or removing artifact files.
///
/// Carries the semantic [`ArtifactErrorKind`], the operation that failed,
/// the path involved (when known), and the captured backtrace and span trace.
#[derive(Debug)]
pub struct ArtifactError {
    kind: ArtifactErrorKind,
    operation: &'static str,
    path: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for ArtifactError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl ArtifactError {
    /// Create a new artifact error.
    pub fn new<E>(operation: &'static str, kind: ArtifactErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            operation,
            path: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Create an artifact error from an I/O error, classifying it by its `io::ErrorKind`.
    pub fn io(operation: &'static str, error: io::Error) -> Self {
        Self::new(operation, error.kind().into(), error)
    }

    /// Returns a closure converting an `io::Error` for use with `map_err`.
    pub fn with(operation: &'static str) -> impl FnOnce(io::Error) -> ArtifactError {
        move |error| ArtifactError::io(operation, error)
    }

    /// Attach the path this error concerns.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ArtifactErrorKind {
        self.kind
    }

    /// Returns the operation which failed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Returns the path involved, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns whether this error is likely retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact error [{}] during {}", self.kind, self.operation)?;

        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }

        write!(f, ": {}", self.source)
    }
}
