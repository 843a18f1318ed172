// Error type for relay start-up and the peer client.
//
// Only things that stop the relay from starting, or stop a client from
// talking to it, are errors. Runtime routing problems (unknown target,
// closed connection, upstream down) are not: they are logged where they
// happen and the relay carries on.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

impl From<tungstenite::Error> for RelayError {
    fn from(err: tungstenite::Error) -> Self {
        RelayError::WebSocket(Box::new(err))
    }
}
