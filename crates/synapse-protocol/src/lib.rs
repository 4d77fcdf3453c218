pub mod constants;
pub mod did;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod negotiation;
pub mod trust;
mod wire;

pub use constants::*;
pub use did::{Agent, Did};
pub use discovery::DiscoveryRegistry;
pub use error::ProtocolError;
pub use handshake::{Handshake, HandshakeResult, HandshakeState};
pub use message::{
    CapabilityAnnouncement, HandshakeMessage, IntentMessage, Message, MessageType,
    NegotiationResponse, WorkflowMessage,
};
pub use negotiation::{AgentProfile, NegotiationBus, NegotiationPolicy};
pub use trust::TrustLedger;
