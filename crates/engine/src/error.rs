use sstable::TableError;
use thiserror::Error;
use wal::WalError;

/// The result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying storage failure. Fatal to the operation; a failed read
    /// leaves the engine usable, a failed WAL append or flush poisons it.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An SSTable failed footer, index, or partition validation. The engine
    /// refuses to open over a corrupt table; recovery is operator-driven.
    #[error("corrupt table: {0}")]
    CorruptTable(String),

    /// Operation not permitted in the engine's current state: called after
    /// `close`, `close` with operations in flight, or a write on an engine
    /// poisoned by an earlier write failure.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// Caller passed an argument outside the engine's domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl From<WalError> for Error {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => Error::Io(io),
        }
    }
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Io(io) => Error::Io(io),
            TableError::Corrupt(msg) => Error::CorruptTable(msg),
            TableError::DuplicateKey => {
                Error::IllegalState("table build input violated key ordering")
            }
            TableError::EmptyInput => Error::IllegalState("refused to build an empty table"),
        }
    }
}
