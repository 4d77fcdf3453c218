//! The Synapse wire message family.
//!
//! Five message kinds share the framing layer but carry different fields.
//! Field numbers are frozen; see the per-message `encode` implementations.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;
use crate::wire::{decode_packed_f32, decode_string_map_entry, WireReader, WireWriter};

/// Identifies the kind of a framed Synapse message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0x01,
    Intent = 0x02,
    Negotiation = 0x03,
    Workflow = 0x04,
    Capability = 0x05,
}

impl MessageType {
    /// Map a frame's type byte to a message kind. Unknown bytes yield `None`;
    /// the dispatcher drops such frames silently.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Handshake),
            0x02 => Some(Self::Intent),
            0x03 => Some(Self::Negotiation),
            0x04 => Some(Self::Workflow),
            0x05 => Some(Self::Capability),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Handshake => "HANDSHAKE",
            Self::Intent => "INTENT",
            Self::Negotiation => "NEGOTIATION",
            Self::Workflow => "WORKFLOW",
            Self::Capability => "CAPABILITY",
        };
        write!(f, "{name}")
    }
}

/// Implemented by every Synapse wire message.
pub trait Message: Send + Sync {
    fn message_type(&self) -> MessageType;
    fn encode(&self) -> Vec<u8>;
}

/// Current time as Unix nanoseconds.
pub fn now_nanos() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

// ============================================================================
// IntentMessage
// ============================================================================

/// A semantic request: an embedding vector expressing the goal plus the
/// capability tags required to fulfil it. `signature` covers `id ∥ payload`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentMessage {
    pub id: String,
    pub intent_vector: Vec<f32>,
    pub capabilities: Vec<String>,
    pub did: String,
    pub payload: String,
    pub timestamp: i64,
    pub trust_score: f32,
    pub metadata: HashMap<String, String>,
    pub signature: Vec<u8>,
}

impl Message for IntentMessage {
    fn message_type(&self) -> MessageType {
        MessageType::Intent
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.string(1, &self.id);
        w.packed_f32(2, &self.intent_vector);
        w.strings(3, &self.capabilities);
        w.string(4, &self.did);
        w.string(5, &self.payload);
        w.int64(6, self.timestamp);
        w.float(7, self.trust_score);
        w.string_map(8, &self.metadata);
        w.bytes(10, &self.signature);
        w.finish()
    }
}

impl IntentMessage {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        const CTX: &str = "intent";
        let mut m = Self::default();
        let mut r = WireReader::new(CTX, data);
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => m.id = r.string("id")?,
                2 => m.intent_vector = decode_packed_f32(&r.bytes("intent_vector")?),
                3 => m.capabilities.push(r.string("capability")?),
                4 => m.did = r.string("did")?,
                5 => m.payload = r.string("payload")?,
                6 => m.timestamp = r.varint("timestamp")? as i64,
                7 => m.trust_score = r.float("trust_score")?,
                8 => {
                    let entry = r.bytes("metadata entry")?;
                    let (k, v) = decode_string_map_entry(CTX, &entry)?;
                    m.metadata.insert(k, v);
                }
                10 => m.signature = r.bytes("signature")?,
                _ => r.skip(wire_type)?,
            }
        }
        Ok(m)
    }
}

// ============================================================================
// HandshakeMessage
// ============================================================================

/// Identity and capability exchange. `challenge` is this side's fresh nonce;
/// `challenge_response` is the signature over the peer's nonce.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandshakeMessage {
    pub agent_id: String,
    pub did: String,
    pub capabilities: Vec<String>,
    pub version: String,
    pub timestamp: i64,
    pub public_key: Vec<u8>,
    pub challenge: Vec<u8>,
    pub challenge_response: Vec<u8>,
}

impl Message for HandshakeMessage {
    fn message_type(&self) -> MessageType {
        MessageType::Handshake
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.string(1, &self.agent_id);
        w.string(2, &self.did);
        w.strings(3, &self.capabilities);
        w.string(4, &self.version);
        w.int64(5, self.timestamp);
        w.bytes(6, &self.public_key);
        w.bytes(7, &self.challenge);
        w.bytes(8, &self.challenge_response);
        w.finish()
    }
}

impl HandshakeMessage {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut m = Self::default();
        let mut r = WireReader::new("handshake", data);
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => m.agent_id = r.string("agent_id")?,
                2 => m.did = r.string("did")?,
                3 => m.capabilities.push(r.string("capability")?),
                4 => m.version = r.string("version")?,
                5 => m.timestamp = r.varint("timestamp")? as i64,
                6 => m.public_key = r.bytes("public_key")?,
                7 => m.challenge = r.bytes("challenge")?,
                8 => m.challenge_response = r.bytes("challenge_response")?,
                _ => r.skip(wire_type)?,
            }
        }
        Ok(m)
    }
}

// ============================================================================
// NegotiationResponse
// ============================================================================

/// Answer to an [`IntentMessage`]: accept/reject, a proposed workflow, and a
/// suggested trust delta. `signature` covers `request_id ∥ reason`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegotiationResponse {
    pub request_id: String,
    pub agent_id: String,
    pub accepted: bool,
    pub workflow_steps: Vec<String>,
    pub did: String,
    pub response_vector: Vec<f32>,
    pub timestamp: i64,
    pub reason: String,
    pub trust_delta: f32,
    pub signature: Vec<u8>,
}

impl Message for NegotiationResponse {
    fn message_type(&self) -> MessageType {
        MessageType::Negotiation
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.string(1, &self.request_id);
        w.string(2, &self.agent_id);
        w.boolean(3, self.accepted);
        w.strings(4, &self.workflow_steps);
        w.string(5, &self.did);
        w.packed_f32(6, &self.response_vector);
        w.int64(7, self.timestamp);
        w.string(8, &self.reason);
        w.float(9, self.trust_delta);
        w.bytes(10, &self.signature);
        w.finish()
    }
}

impl NegotiationResponse {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut m = Self::default();
        let mut r = WireReader::new("negotiation", data);
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => m.request_id = r.string("request_id")?,
                2 => m.agent_id = r.string("agent_id")?,
                3 => m.accepted = r.varint("accepted")? != 0,
                4 => m.workflow_steps.push(r.string("workflow_step")?),
                5 => m.did = r.string("did")?,
                6 => m.response_vector = decode_packed_f32(&r.bytes("response_vector")?),
                7 => m.timestamp = r.varint("timestamp")? as i64,
                8 => m.reason = r.string("reason")?,
                9 => m.trust_delta = r.float("trust_delta")?,
                10 => m.signature = r.bytes("signature")?,
                _ => r.skip(wire_type)?,
            }
        }
        Ok(m)
    }
}

// ============================================================================
// WorkflowMessage
// ============================================================================

/// One step of a distributed workflow dispatched to a worker agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowMessage {
    pub workflow_id: String,
    pub step_id: String,
    pub next_step_id: String,
    pub agent_id: String,
    pub did: String,
    pub action: String,
    pub params: HashMap<String, String>,
    pub result_chan: String,
    pub timestamp: i64,
}

impl Message for WorkflowMessage {
    fn message_type(&self) -> MessageType {
        MessageType::Workflow
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.string(1, &self.workflow_id);
        w.string(2, &self.step_id);
        w.string(3, &self.next_step_id);
        w.string(4, &self.agent_id);
        w.string(5, &self.did);
        w.string(6, &self.action);
        w.string_map(7, &self.params);
        w.string(8, &self.result_chan);
        w.int64(9, self.timestamp);
        w.finish()
    }
}

impl WorkflowMessage {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        const CTX: &str = "workflow";
        let mut m = Self::default();
        let mut r = WireReader::new(CTX, data);
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => m.workflow_id = r.string("workflow_id")?,
                2 => m.step_id = r.string("step_id")?,
                3 => m.next_step_id = r.string("next_step_id")?,
                4 => m.agent_id = r.string("agent_id")?,
                5 => m.did = r.string("did")?,
                6 => m.action = r.string("action")?,
                7 => {
                    let entry = r.bytes("params entry")?;
                    let (k, v) = decode_string_map_entry(CTX, &entry)?;
                    m.params.insert(k, v);
                }
                8 => m.result_chan = r.string("result_chan")?,
                9 => m.timestamp = r.varint("timestamp")? as i64,
                _ => r.skip(wire_type)?,
            }
        }
        Ok(m)
    }
}

// ============================================================================
// CapabilityAnnouncement
// ============================================================================

/// Broadcast of an agent's capabilities. `ttl` is in seconds; 0 means the
/// announcement never expires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityAnnouncement {
    pub agent_id: String,
    pub did: String,
    pub capabilities: Vec<String>,
    pub timestamp: i64,
    pub ttl: i64,
}

impl Message for CapabilityAnnouncement {
    fn message_type(&self) -> MessageType {
        MessageType::Capability
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.string(1, &self.agent_id);
        w.string(2, &self.did);
        w.strings(3, &self.capabilities);
        w.int64(4, self.timestamp);
        w.int64(5, self.ttl);
        w.finish()
    }
}

impl CapabilityAnnouncement {
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut m = Self::default();
        let mut r = WireReader::new("capability", data);
        while let Some((field, wire_type)) = r.next_field()? {
            match field {
                1 => m.agent_id = r.string("agent_id")?,
                2 => m.did = r.string("did")?,
                3 => m.capabilities.push(r.string("capability")?),
                4 => m.timestamp = r.varint("timestamp")? as i64,
                5 => m.ttl = r.varint("ttl")? as i64,
                _ => r.skip(wire_type)?,
            }
        }
        Ok(m)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_round_trip() {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), "unit-test".to_string());
        metadata.insert("priority".to_string(), "high".to_string());

        let original = IntentMessage {
            id: "test-intent-001".to_string(),
            intent_vector: vec![0.1, 0.5, -0.3, 0.9, 0.0, 1.0],
            capabilities: vec!["nlp".into(), "reasoning".into(), "code-gen".into()],
            did: "did:synapse:abcdef1234567890".to_string(),
            payload: r#"{"task":"summarise","lang":"en"}"#.to_string(),
            timestamp: now_nanos(),
            trust_score: 0.75,
            metadata,
            signature: vec![0xAB; 64],
        };

        let decoded = IntentMessage::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn intent_empty_round_trip() {
        let original = IntentMessage::default();
        let encoded = original.encode();
        assert!(encoded.is_empty(), "all-default message must encode to nothing");
        assert_eq!(IntentMessage::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn handshake_round_trip() {
        let original = HandshakeMessage {
            agent_id: "agent-alpha".to_string(),
            did: "did:synapse:deadbeef".to_string(),
            capabilities: vec!["nlp".into(), "vector-search".into()],
            version: "1.0.0".to_string(),
            timestamp: 1_000_000_000,
            public_key: vec![7u8; 32],
            challenge: vec![9u8; 32],
            challenge_response: vec![1, 2, 3],
        };
        assert_eq!(HandshakeMessage::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn negotiation_round_trip() {
        let original = NegotiationResponse {
            request_id: "req-abc".to_string(),
            agent_id: "agent-beta".to_string(),
            accepted: true,
            workflow_steps: vec!["parse_intent:req-abc".into(), "execute:nlp".into()],
            did: "did:synapse:cafebabe".to_string(),
            response_vector: vec![-0.1, -0.5, 0.3],
            timestamp: 999,
            reason: "all capabilities available".to_string(),
            trust_delta: 0.05,
            signature: vec![0xCD; 64],
        };
        assert_eq!(NegotiationResponse::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn negotiation_negative_trust_delta_survives() {
        let original = NegotiationResponse { trust_delta: -0.02, ..Default::default() };
        let decoded = NegotiationResponse::decode(&original.encode()).unwrap();
        assert_eq!(decoded.trust_delta, -0.02);
    }

    #[test]
    fn workflow_round_trip() {
        let mut params = HashMap::new();
        params.insert("doc".to_string(), "report.txt".to_string());
        let original = WorkflowMessage {
            workflow_id: "wf-1".to_string(),
            step_id: "s1".to_string(),
            next_step_id: "s2".to_string(),
            agent_id: "worker".to_string(),
            did: "did:synapse:00ff".to_string(),
            action: "summarise".to_string(),
            params,
            result_chan: "chan-9".to_string(),
            timestamp: 12345,
        };
        assert_eq!(WorkflowMessage::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn capability_round_trip() {
        let original = CapabilityAnnouncement {
            agent_id: "agent-1".to_string(),
            did: "did:synapse:aa".to_string(),
            capabilities: vec!["nlp".into(), "reasoning".into()],
            timestamp: 42,
            ttl: 300,
        };
        assert_eq!(CapabilityAnnouncement::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn decode_skips_unknown_fields() {
        // An intent with an extra field a future version might add.
        let mut w = crate::wire::WireWriter::new();
        w.string(1, "id-1");
        w.string(23, "from-the-future");
        let decoded = IntentMessage::decode(&w.finish()).unwrap();
        assert_eq!(decoded.id, "id-1");
    }

    #[test]
    fn decode_rejects_garbage() {
        // 0xFF repeated is an overlong varint tag.
        assert!(IntentMessage::decode(&[0xFF; 12]).is_err());
    }

    #[test]
    fn message_type_bytes_are_frozen() {
        assert_eq!(MessageType::Handshake.as_byte(), 0x01);
        assert_eq!(MessageType::Intent.as_byte(), 0x02);
        assert_eq!(MessageType::Negotiation.as_byte(), 0x03);
        assert_eq!(MessageType::Workflow.as_byte(), 0x04);
        assert_eq!(MessageType::Capability.as_byte(), 0x05);
        assert_eq!(MessageType::from_byte(0x06), None);
        assert_eq!(MessageType::from_byte(0x00), None);
    }
}
