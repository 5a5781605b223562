use thiserror::Error;

use crate::types::{Direction, MigrationId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("invalid migration script: {0}")]
    Script(String),

    #[error("{direction} procedure for {id} failed: {message}")]
    Procedure {
        id: MigrationId,
        direction: Direction,
        message: String,
    },

    /// The inverse procedure failed while compensating for `original`.
    #[error("{original}; compensation also failed: {compensation}")]
    Compensation {
        original: Box<Error>,
        compensation: Box<Error>,
    },

    #[error("bookkeeping error: {0}")]
    Bookkeeping(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn procedure(id: &MigrationId, direction: Direction, message: impl Into<String>) -> Self {
        Self::Procedure {
            id: id.clone(),
            direction,
            message: message.into(),
        }
    }

    /// The failure that started the chain, looking through compensation.
    pub fn root(&self) -> &Error {
        match self {
            Self::Compensation { original, .. } => original.root(),
            other => other,
        }
    }
}
