use mpn_proto::protocol::Ack;
use thiserror::Error;

/// Anything that means the connection to the server is unusable.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum MpdError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server rejected a command; the connection itself is fine.
    #[error("server error {0}")]
    Ack(Ack),
}

/// Failure to put something on screen.  Never fatal.
#[derive(Error, Debug)]
pub enum PresentationError {
    #[error("notification bus error: {0}")]
    Bus(#[from] zbus::Error),
    #[error("image export failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
