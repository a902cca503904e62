use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind UDP socket: {cause}")]
    BindError { cause: std::io::Error },

    #[error("failed to send to {to}: {cause}")]
    SendError {
        to: SocketAddr,
        cause: std::io::Error,
    },

    #[error("wire codec error: {0}")]
    Codec(#[from] krpc_encoding::Error),

    #[error("request timed out")]
    Timeout,

    #[error("transaction {0:?} was already removed (late or duplicate response)")]
    TransactionNotFound(crate::transport::messages::TransactionId),

    #[error("response declared method {got}, expected {expected} for this transaction")]
    MethodMismatch { expected: &'static str, got: String },

    #[error("response carried an error payload: {0}")]
    Remote(krpc_encoding::KRPCError),

    #[error("internal lock was poisoned")]
    LockPoisoned,
}
