use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Illegal archive path: {0}")]
    IllegalPath(String),

    #[error("Backup restore failed: {0}")]
    Restore(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Task(String),

    #[error("{0}; {1}")]
    Joined(Box<Error>, Box<Error>),

    #[error("No porting job started")]
    NoJob,

    #[error("Porting job already aborted")]
    AlreadyAborted,

    #[error("No running porting job")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error is (or wraps) a cancellation, as opposed to a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Joined(first, second) => first.is_cancelled() || second.is_cancelled(),
            _ => false,
        }
    }

    /// Fold two optional errors into one result, keeping both messages when
    /// both sides failed.
    pub fn join(first: Option<Error>, second: Option<Error>) -> Result<()> {
        match (first, second) {
            (None, None) => Ok(()),
            (Some(err), None) | (None, Some(err)) => Err(err),
            (Some(first), Some(second)) => Err(Error::Joined(Box::new(first), Box::new(second))),
        }
    }
}
