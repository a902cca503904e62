use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] krpc_encoding::Error),

    #[error(transparent)]
    Transport(#[from] tokio_krpc::Error),

    #[error("no bootstrap host could be resolved")]
    NoBootstrapHosts,

    #[error("invalid bind address {addr}: {cause}")]
    InvalidBindAddr {
        addr: String,
        cause: std::net::AddrParseError,
    },

    #[error("failed to read config file {path}: {cause}")]
    ConfigRead {
        path: String,
        cause: std::io::Error,
    },

    #[error("failed to parse config file {path}: {cause}")]
    ConfigParse { path: String, cause: toml::de::Error },
}
