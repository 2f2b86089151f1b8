use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Replication error: {message}")]
    Replication { message: String },

    #[error("short buffer: need {need} more bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    #[error("wrong number of decoders for tuple fields: expected {expected}, got {got}")]
    FieldCountMismatch { expected: usize, got: usize },

    #[error("multi-dimensional arrays are not supported (ndim {0})")]
    UnsupportedArrayShape(i32),

    #[error("no binary decoder for column type {0:?}")]
    UnknownType(String),

    #[error("unknown relation id {0}")]
    UnknownRelation(u32),

    #[error("no replica identity columns for table {0:?}")]
    NoReplicaIdentity(String),

    #[error("not a CREATE TABLE statement, found {0:?}")]
    NotCreateTable(String),

    #[error("CREATE TABLE ... AS is not supported")]
    UnsupportedCTASTable,

    #[error("unexpected token {token:?} in {context}")]
    UnexpectedToken {
        token: String,
        context: &'static str,
    },

    #[error("invalid LSN {0:?}")]
    InvalidLsn(String),
}

impl Error {
    /// Wraps an error with the name of the failing operation so the
    /// terminal report reads as a causal chain.
    pub fn context(op: &str, err: impl std::fmt::Display) -> Self {
        Error::Replication {
            message: format!("{op}: {err}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
