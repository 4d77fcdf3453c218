//! Connection-establishment handshake.
//!
//! Three-move challenge–response over a fresh stream:
//!
//! ```text
//! initiator                                   responder
//!   |-- H1 {identity, caps, challenge_i} ------->|
//!   |                                            | verify DID/key binding
//!   |<- H2 {identity, caps, challenge_r,         | sign challenge_i
//!   |       response = Sig(challenge_i)} --------|
//!   |-- verify binding + response                |
//! ```
//!
//! The initiator side is a small state machine (`Idle → Sent → Completed`
//! or `Failed`); the responder is stateless.

use std::time::SystemTime;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::{CHALLENGE_SIZE, PROTOCOL_VERSION};
use crate::did::{Agent, Did};
use crate::error::ProtocolError;
use crate::message::{now_nanos, HandshakeMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Sent,
    Completed,
    Failed,
}

/// Initiator half of one handshake exchange. Create one per exchange.
pub struct Handshake<'a> {
    agent: &'a Agent,
    version: String,
    challenge: [u8; CHALLENGE_SIZE],
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self {
            agent,
            version: PROTOCOL_VERSION.to_string(),
            challenge: [0u8; CHALLENGE_SIZE],
            state: HandshakeState::Idle,
        }
    }

    /// Override the advertised protocol version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Build the initiator's opening message, embedding a fresh random
    /// challenge the responder must sign. Transitions `Idle → Sent`.
    pub fn start(&mut self) -> Result<HandshakeMessage, ProtocolError> {
        assert_eq!(self.state, HandshakeState::Idle, "handshake already started");
        OsRng
            .try_fill_bytes(&mut self.challenge)
            .map_err(|e| ProtocolError::RandomSource(e.to_string()))?;
        self.state = HandshakeState::Sent;
        Ok(HandshakeMessage {
            agent_id: self.agent.id.clone(),
            did: self.agent.did.to_string(),
            capabilities: self.agent.capabilities.clone(),
            version: self.version.clone(),
            timestamp: now_nanos(),
            public_key: self.agent.public_key().to_vec(),
            challenge: self.challenge.to_vec(),
            challenge_response: Vec::new(),
        })
    }

    /// Validate the responder's message: DID/key binding, then the signature
    /// over our original challenge. Transitions `Sent → Completed` on
    /// success, `Sent → Failed` on any mismatch.
    pub fn finish(&mut self, response: &HandshakeMessage) -> Result<HandshakeResult, ProtocolError> {
        assert_eq!(self.state, HandshakeState::Sent, "finish called before start");
        match self.validate_response(response) {
            Ok(result) => {
                self.state = HandshakeState::Completed;
                Ok(result)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    fn validate_response(
        &self,
        response: &HandshakeMessage,
    ) -> Result<HandshakeResult, ProtocolError> {
        let claimed = Did::parse(&response.did)?;
        if !claimed.validate_binding(&response.public_key) {
            return Err(ProtocolError::Binding(response.agent_id.clone()));
        }

        // Rebuild the peer DID from the key itself so we can verify with it.
        let peer = Did::from_public_key(&response.public_key)?;
        if !peer.verify(&self.challenge, &response.challenge_response) {
            return Err(ProtocolError::VerifyFailed(format!(
                "challenge response from {}",
                response.agent_id
            )));
        }
        Ok(HandshakeResult::from_message(response))
    }
}

/// Build the responder's message for an incoming handshake: verify the
/// initiator's DID/key binding, sign its challenge, attach a fresh challenge
/// of our own.
pub fn respond(
    responder: &Agent,
    incoming: &HandshakeMessage,
) -> Result<HandshakeMessage, ProtocolError> {
    let claimed = Did::parse(&incoming.did)?;
    if !claimed.validate_binding(&incoming.public_key) {
        return Err(ProtocolError::Binding(incoming.agent_id.clone()));
    }

    let response_sig = responder.sign(&incoming.challenge)?;

    let mut nonce = [0u8; CHALLENGE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| ProtocolError::RandomSource(e.to_string()))?;

    Ok(HandshakeMessage {
        agent_id: responder.id.clone(),
        did: responder.did.to_string(),
        capabilities: responder.capabilities.clone(),
        version: PROTOCOL_VERSION.to_string(),
        timestamp: now_nanos(),
        public_key: responder.public_key().to_vec(),
        challenge: nonce.to_vec(),
        challenge_response: response_sig,
    })
}

/// Outcome of a completed handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub peer_agent_id: String,
    pub peer_did: String,
    pub peer_capabilities: Vec<String>,
    pub peer_public_key: Vec<u8>,
    pub protocol_version: String,
    pub completed_at: SystemTime,
}

impl HandshakeResult {
    fn from_message(msg: &HandshakeMessage) -> Self {
        Self {
            peer_agent_id: msg.agent_id.clone(),
            peer_did: msg.did.clone(),
            peer_capabilities: msg.capabilities.clone(),
            peer_public_key: msg.public_key.clone(),
            protocol_version: msg.version.clone(),
            completed_at: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, caps: &[&str]) -> Agent {
        Agent::new(id, caps.iter().map(|c| c.to_string()).collect()).unwrap()
    }

    #[test]
    fn three_move_exchange_completes() {
        let alpha = agent("alpha", &["nlp"]);
        let beta = agent("beta", &["code-gen"]);

        let mut hs = Handshake::new(&alpha);
        assert_eq!(hs.state(), HandshakeState::Idle);

        let h1 = hs.start().unwrap();
        assert_eq!(hs.state(), HandshakeState::Sent);
        assert_eq!(h1.challenge.len(), CHALLENGE_SIZE);
        assert!(h1.challenge_response.is_empty());

        let h2 = respond(&beta, &h1).unwrap();
        assert_eq!(h2.agent_id, "beta");
        assert!(!h2.challenge_response.is_empty());
        // The responder issues its own fresh challenge.
        assert_ne!(h2.challenge, h1.challenge);

        let result = hs.finish(&h2).unwrap();
        assert_eq!(hs.state(), HandshakeState::Completed);
        assert_eq!(result.peer_agent_id, "beta");
        assert_eq!(result.peer_capabilities, vec!["code-gen".to_string()]);
        assert_eq!(result.peer_did, beta.did.to_string());
    }

    #[test]
    fn responder_rejects_bad_binding() {
        let alpha = agent("alpha", &[]);
        let beta = agent("beta", &[]);

        let mut hs = Handshake::new(&alpha);
        let mut h1 = hs.start().unwrap();
        h1.public_key[0] ^= 0xFF;

        assert!(matches!(respond(&beta, &h1), Err(ProtocolError::Binding(_))));
    }

    #[test]
    fn finish_rejects_bad_binding() {
        let alpha = agent("alpha", &[]);
        let beta = agent("beta", &[]);

        let mut hs = Handshake::new(&alpha);
        let h1 = hs.start().unwrap();
        let mut h2 = respond(&beta, &h1).unwrap();
        h2.public_key[0] ^= 0xFF;

        assert!(matches!(hs.finish(&h2), Err(ProtocolError::Binding(_))));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn finish_rejects_wrong_challenge_signature() {
        let alpha = agent("alpha", &[]);
        let beta = agent("beta", &[]);

        let mut hs = Handshake::new(&alpha);
        let h1 = hs.start().unwrap();
        let mut h2 = respond(&beta, &h1).unwrap();
        // Signature over something other than our nonce.
        h2.challenge_response = beta.sign(b"not the challenge").unwrap();

        assert!(matches!(hs.finish(&h2), Err(ProtocolError::VerifyFailed(_))));
        assert_eq!(hs.state(), HandshakeState::Failed);
    }

    #[test]
    fn finish_rejects_missing_challenge_response() {
        let alpha = agent("alpha", &[]);
        let beta = agent("beta", &[]);

        let mut hs = Handshake::new(&alpha);
        let h1 = hs.start().unwrap();
        let mut h2 = respond(&beta, &h1).unwrap();
        h2.challenge_response.clear();

        assert!(matches!(hs.finish(&h2), Err(ProtocolError::VerifyFailed(_))));
    }

    #[test]
    fn responder_rejects_unparseable_did() {
        let beta = agent("beta", &[]);
        let h1 = HandshakeMessage { did: "not-a-did".to_string(), ..Default::default() };
        assert!(matches!(respond(&beta, &h1), Err(ProtocolError::InvalidDid(_))));
    }

    #[test]
    fn version_override_is_advertised() {
        let alpha = agent("alpha", &[]);
        let mut hs = Handshake::new(&alpha).with_version("2.0.0-rc1");
        let h1 = hs.start().unwrap();
        assert_eq!(h1.version, "2.0.0-rc1");
    }
}
