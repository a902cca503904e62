use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while turning bytes into KRPC messages and back.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to decode KRPC message: {cause}")]
    DecodeError { cause: serde_bencode::Error },

    #[error("failed to encode KRPC message: {cause}")]
    EncodeError { cause: serde_bencode::Error },

    #[error("node id must be exactly 20 bytes, got {len}")]
    InvalidNodeIdLength { len: usize },

    #[error("hex node id must be exactly 40 characters, got {len}")]
    InvalidHexLength { len: usize },

    #[error("invalid hex digit in node id: {cause}")]
    InvalidHex { cause: hex::FromHexError },

    #[error("compact node list has a trailing partial record of {len} bytes")]
    TruncatedNodeInfo { len: usize },

    #[error("compact peer list has a trailing partial record of {len} bytes")]
    TruncatedPeerInfo { len: usize },
}
