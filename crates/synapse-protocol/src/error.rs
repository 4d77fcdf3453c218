use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("random source failure: {0}")]
    RandomSource(String),

    #[error("encode error: {0}")]
    Encoding(String),

    #[error("{context}: decode error: {reason}")]
    Decoding { context: &'static str, reason: String },

    #[error("framing error: {0}")]
    Framing(String),

    #[error("private key not available")]
    NoPrivateKey,

    #[error("signing failed: {0}")]
    Sign(String),

    #[error("signature verification failed for {0}")]
    VerifyFailed(String),

    #[error("DID/key binding mismatch for {0}")]
    Binding(String),

    #[error("invalid DID: {0:?}")]
    InvalidDid(String),

    #[error("invalid public key: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("no handler registered for agent {0:?}")]
    UnknownPeer(String),
}

impl ProtocolError {
    pub(crate) fn decoding(context: &'static str, reason: impl Into<String>) -> Self {
        Self::Decoding { context, reason: reason.into() }
    }
}
