//! Error types for the relique core.

use thiserror::Error;

/// Coarse classification of a failure, independent of its concrete cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Catalog row or on-disk artifact is missing.
    NotFound,
    /// Schema or invariant violation.
    Invalid,
    /// Filesystem, serialization or database failure.
    Io,
    /// Client unreachable or a subprocess could not be run.
    Transport,
    /// The job ran to the end but some sync tasks only partially transferred.
    Partial,
    /// Execution could not begin or the catalog is unreachable.
    Fatal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("catalog unreachable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("TOML parse error: {}", .0.message())]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("partial transfer: {0}")]
    Partial(String),

    #[error("{0}")]
    Fatal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::Io(_)
            | Error::Database(_)
            | Error::TomlDe(_)
            | Error::TomlSer(_)
            | Error::Json(_) => ErrorKind::Io,
            Error::Pool(_) | Error::Fatal(_) => ErrorKind::Fatal,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Partial(_) => ErrorKind::Partial,
            Error::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Wrap this error with a short description of what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Attach context to any result whose error converts into [`Error`].
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
