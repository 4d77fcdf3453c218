use synapse_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("deadline exceeded")]
    Deadline,

    #[error("unexpected message type {0:#04x}")]
    UnexpectedMessage(u8),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no connected peer for agent {0:?}")]
    UnknownPeer(String),

    #[error("no capable peer for capability {0:?}")]
    NoCapablePeer(String),
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
