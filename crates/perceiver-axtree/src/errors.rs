use cdp_bridge::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceiverError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed protocol payload: {0}")]
    Decode(String),
    #[error("structural tree has no <body> element")]
    MissingBody,
    #[error("unknown reference: {0}")]
    UnknownRef(String),
    #[error("no box model for node {0} (detached or unrendered)")]
    NoBounds(String),
}

impl PerceiverError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}
