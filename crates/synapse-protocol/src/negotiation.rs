//! Intent negotiation.
//!
//! Agent A expresses a semantic goal as a float vector plus required
//! capability tags; agent B answers with an accept/reject and, on accept, a
//! proposed workflow. Compatibility between an intent and candidate agents
//! is measured by cosine similarity against each candidate's embedding.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::{ACCEPT_DELTA, PROTOCOL_VERSION, REJECT_DELTA};
use crate::did::Agent;
use crate::error::ProtocolError;
use crate::message::{now_nanos, IntentMessage, NegotiationResponse};

/// A peer agent's public capability profile, as cached for ranking and
/// dispatch. `embedding` may be empty (such profiles rank last);
/// `public_key` is populated once a handshake has completed.
#[derive(Debug, Clone, Default)]
pub struct AgentProfile {
    pub agent_id: String,
    pub did: String,
    pub capabilities: Vec<String>,
    pub embedding: Vec<f32>,
    pub public_key: Vec<u8>,
}

/// Trust deltas the default handler suggests to the requester.
#[derive(Debug, Clone, Copy)]
pub struct NegotiationPolicy {
    pub accept_delta: f32,
    pub reject_delta: f32,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self { accept_delta: ACCEPT_DELTA, reject_delta: REJECT_DELTA }
    }
}

/// Callback invoked when an agent receives an intent.
pub type NegotiationHandler =
    Arc<dyn Fn(&IntentMessage) -> Result<NegotiationResponse, ProtocolError> + Send + Sync>;

/// Construct a signed [`IntentMessage`] ready to be sent.
///
/// The id is 128 bits of OS randomness, hex encoded. The signature covers
/// `id ∥ payload` and is mandatory: a signing failure aborts creation.
pub fn create_intent(
    sender: &Agent,
    intent_vector: Vec<f32>,
    required_capabilities: Vec<String>,
    payload: impl Into<String>,
) -> Result<IntentMessage, ProtocolError> {
    let payload = payload.into();
    let mut metadata = HashMap::new();
    metadata.insert("protocol".to_string(), PROTOCOL_VERSION.to_string());

    let mut intent = IntentMessage {
        id: random_id()?,
        intent_vector,
        capabilities: required_capabilities,
        did: sender.did.to_string(),
        payload,
        timestamp: now_nanos(),
        trust_score: 0.5,
        metadata,
        signature: Vec::new(),
    };
    intent.signature = sender
        .sign(&signing_input(&intent.id, &intent.payload))
        .map_err(|e| ProtocolError::Sign(e.to_string()))?;
    Ok(intent)
}

/// The default negotiation policy: accept iff every required capability tag
/// is present in the local agent's list.
///
/// On accept the response proposes the deterministic workflow
/// `parse_intent:<id>`, `execute:<cap>`…, `return_result:<id>`; on reject
/// the reason names the missing tags. The response vector is the pointwise
/// negation of the intent vector. The signature covers
/// `request_id ∥ reason`; if signing fails the response still goes out
/// unsigned.
pub fn handle_intent(
    agent: &Agent,
    intent: &IntentMessage,
    policy: NegotiationPolicy,
) -> NegotiationResponse {
    let (_, missing) = capability_diff(&intent.capabilities, &agent.capabilities);
    let accepted = missing.is_empty();

    let reason = if accepted {
        "all capabilities available".to_string()
    } else {
        format!("missing capabilities: {missing:?}")
    };

    let workflow_steps = if accepted { build_workflow(intent) } else { Vec::new() };

    let mut resp = NegotiationResponse {
        request_id: intent.id.clone(),
        agent_id: agent.id.clone(),
        accepted,
        workflow_steps,
        did: agent.did.to_string(),
        response_vector: reflect_vector(&intent.intent_vector),
        timestamp: now_nanos(),
        reason,
        trust_delta: if accepted { policy.accept_delta } else { policy.reject_delta },
        signature: Vec::new(),
    };
    if let Ok(sig) = agent.sign(&signing_input(&resp.request_id, &resp.reason)) {
        resp.signature = sig;
    }
    resp
}

/// Wrap [`handle_intent`] for an owned agent, for registration on a bus or
/// host.
pub fn default_handler(agent: Agent, policy: NegotiationPolicy) -> NegotiationHandler {
    Arc::new(move |intent| Ok(handle_intent(&agent, intent, policy)))
}

/// True when `intent.signature` is a valid Ed25519 signature of
/// `id ∥ payload` under `key`. Empty signatures pass: unsigned messages
/// remain acceptable for backward compatibility.
pub fn verify_intent_signature(intent: &IntentMessage, key: &VerifyingKey) -> bool {
    verify_detached(key, &signing_input(&intent.id, &intent.payload), &intent.signature)
}

/// True when `resp.signature` is a valid Ed25519 signature of
/// `request_id ∥ reason` under `key`. Empty signatures pass.
pub fn verify_response_signature(resp: &NegotiationResponse, key: &VerifyingKey) -> bool {
    verify_detached(key, &signing_input(&resp.request_id, &resp.reason), &resp.signature)
}

fn verify_detached(key: &VerifyingKey, data: &[u8], sig: &[u8]) -> bool {
    if sig.is_empty() {
        return true;
    }
    match Signature::from_slice(sig) {
        Ok(sig) => key.verify(data, &sig).is_ok(),
        Err(_) => false,
    }
}

fn signing_input(id: &str, payload: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(id.len() + payload.len());
    buf.extend_from_slice(id.as_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf
}

// ============================================================================
// Ranking
// ============================================================================

/// Cosine similarity of two equal-length vectors, in f64 arithmetic.
/// Returns 0 when the lengths differ, either vector is empty, or either
/// norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Sort candidate profiles by cosine similarity to the intent vector,
/// highest first. The sort is stable, so equal-scoring profiles (including
/// all embedding-less ones, which score 0) keep their input order.
pub fn rank_candidates(intent_vector: &[f32], candidates: Vec<AgentProfile>) -> Vec<AgentProfile> {
    let mut ranked: Vec<(f64, AgentProfile)> = candidates
        .into_iter()
        .map(|c| (cosine_similarity(intent_vector, &c.embedding), c))
        .collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().map(|(_, c)| c).collect()
}

// ============================================================================
// Capability matching
// ============================================================================

/// Partition `required` into the tags present in `available` and the tags
/// missing from it. Matching is exact string equality.
pub fn capability_diff(required: &[String], available: &[String]) -> (Vec<String>, Vec<String>) {
    let have: std::collections::HashSet<&str> = available.iter().map(String::as_str).collect();
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for cap in required {
        if have.contains(cap.as_str()) {
            present.push(cap.clone());
        } else {
            missing.push(cap.clone());
        }
    }
    (present, missing)
}

fn build_workflow(intent: &IntentMessage) -> Vec<String> {
    let mut steps = Vec::with_capacity(intent.capabilities.len() + 2);
    steps.push(format!("parse_intent:{}", intent.id));
    for cap in &intent.capabilities {
        steps.push(format!("execute:{cap}"));
    }
    steps.push(format!("return_result:{}", intent.id));
    steps
}

fn reflect_vector(v: &[f32]) -> Vec<f32> {
    v.iter().map(|x| -x).collect()
}

fn random_id() -> Result<String, ProtocolError> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| ProtocolError::RandomSource(e.to_string()))?;
    Ok(hex::encode(bytes))
}

// ============================================================================
// In-process negotiation bus
// ============================================================================

/// Zero-network negotiation conduit: in-process agents register handlers and
/// negotiate synchronously. Suitable for tests and single-process demos.
#[derive(Default)]
pub struct NegotiationBus {
    handlers: RwLock<HashMap<String, NegotiationHandler>>,
}

impl NegotiationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler for the given agent id, replacing any existing one.
    pub fn register(&self, agent_id: impl Into<String>, handler: NegotiationHandler) {
        let mut handlers = self.handlers.write().expect("bus lock poisoned");
        handlers.insert(agent_id.into(), handler);
    }

    /// Dispatch an intent to the named agent and return its response.
    pub fn negotiate(
        &self,
        target_agent_id: &str,
        intent: &IntentMessage,
    ) -> Result<NegotiationResponse, ProtocolError> {
        // Clone the handler out so it runs without the lock held.
        let handler = {
            let handlers = self.handlers.read().expect("bus lock poisoned");
            handlers
                .get(target_agent_id)
                .cloned()
                .ok_or_else(|| ProtocolError::UnknownPeer(target_agent_id.to_string()))?
        };
        handler(intent)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn agent(id: &str, caps: &[&str]) -> Agent {
        Agent::new(id, caps.iter().map(|c| c.to_string()).collect()).unwrap()
    }

    fn profile(agent_id: &str, embedding: Vec<f32>) -> AgentProfile {
        AgentProfile { agent_id: agent_id.to_string(), embedding, ..Default::default() }
    }

    // ── create_intent ───────────────────────────────────────────────────────

    #[test]
    fn create_intent_fills_and_signs() {
        let a = agent("alpha", &["nlp"]);
        let intent =
            create_intent(&a, vec![0.5, 0.5], vec!["nlp".into()], "hello").unwrap();

        assert_eq!(intent.id.len(), 32); // 16 random bytes, hex encoded
        assert_eq!(intent.did, a.did.to_string());
        assert_eq!(intent.trust_score, 0.5);
        assert_eq!(intent.metadata.get("protocol").map(String::as_str), Some(PROTOCOL_VERSION));
        assert!(!intent.signature.is_empty());
        assert!(verify_intent_signature(&intent, a.did.verifying_key().unwrap()));
    }

    #[test]
    fn intent_ids_are_unique() {
        let a = agent("alpha", &[]);
        let one = create_intent(&a, vec![], vec![], "").unwrap();
        let two = create_intent(&a, vec![], vec![], "").unwrap();
        assert_ne!(one.id, two.id);
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let a = agent("alpha", &[]);
        let mut intent = create_intent(&a, vec![0.5], vec![], "original").unwrap();
        intent.payload = "tampered".to_string();
        assert!(!verify_intent_signature(&intent, a.did.verifying_key().unwrap()));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let a = agent("alpha", &[]);
        let b = agent("beta", &[]);
        let intent = create_intent(&a, vec![0.5], vec![], "msg").unwrap();
        assert!(!verify_intent_signature(&intent, b.did.verifying_key().unwrap()));
    }

    #[test]
    fn unsigned_messages_pass_verification() {
        let a = agent("alpha", &[]);
        let intent = IntentMessage { id: "x".into(), payload: "y".into(), ..Default::default() };
        assert!(verify_intent_signature(&intent, a.did.verifying_key().unwrap()));
    }

    #[test]
    fn signature_survives_wire_round_trip() {
        let a = agent("alpha", &["nlp"]);
        let intent = create_intent(&a, vec![0.1, 0.9], vec!["nlp".into()], "payload").unwrap();

        let decoded = IntentMessage::decode(&intent.encode()).unwrap();
        assert_eq!(decoded.signature, intent.signature);
        assert!(verify_intent_signature(&decoded, a.did.verifying_key().unwrap()));
    }

    // ── handle_intent ───────────────────────────────────────────────────────

    #[test]
    fn accepted_intent_builds_workflow() {
        let responder = agent("beta", &["summarisation"]);
        let requester = agent("alpha", &["nlp"]);
        let intent =
            create_intent(&requester, vec![0.9, 0.1], vec!["summarisation".into()], "doc").unwrap();

        let resp = handle_intent(&responder, &intent, NegotiationPolicy::default());
        assert!(resp.accepted);
        assert_eq!(resp.trust_delta, ACCEPT_DELTA);
        assert_eq!(resp.workflow_steps.first().unwrap(), &format!("parse_intent:{}", intent.id));
        assert!(resp.workflow_steps.contains(&"execute:summarisation".to_string()));
        assert_eq!(resp.workflow_steps.last().unwrap(), &format!("return_result:{}", intent.id));
        // Response vector is the pointwise negation of the intent vector.
        assert_eq!(resp.response_vector, vec![-0.9, -0.1]);
        assert!(verify_response_signature(&resp, responder.did.verifying_key().unwrap()));
    }

    #[test]
    fn rejected_intent_names_missing_capabilities() {
        let responder = agent("beta", &["code-gen"]);
        let intent = IntentMessage {
            id: "req-1".into(),
            capabilities: vec!["summarisation".into()],
            ..Default::default()
        };

        let resp = handle_intent(&responder, &intent, NegotiationPolicy::default());
        assert!(!resp.accepted);
        assert!(resp.workflow_steps.is_empty());
        assert!(resp.reason.contains("summarisation"), "reason: {}", resp.reason);
        assert_eq!(resp.trust_delta, REJECT_DELTA);
    }

    #[test]
    fn tampered_reason_fails_response_verification() {
        let responder = agent("beta", &["nlp"]);
        let intent = IntentMessage {
            id: "req-1".into(),
            capabilities: vec!["nlp".into()],
            ..Default::default()
        };
        let mut resp = handle_intent(&responder, &intent, NegotiationPolicy::default());
        resp.reason = "tampered reason".to_string();
        assert!(!verify_response_signature(&resp, responder.did.verifying_key().unwrap()));
    }

    #[test]
    fn response_signature_survives_wire_round_trip() {
        let responder = agent("beta", &["nlp"]);
        let intent = IntentMessage {
            id: "round-trip-id".into(),
            capabilities: vec!["nlp".into()],
            ..Default::default()
        };
        let resp = handle_intent(&responder, &intent, NegotiationPolicy::default());
        let decoded = NegotiationResponse::decode(&resp.encode()).unwrap();
        assert_eq!(decoded.signature, resp.signature);
        assert!(verify_response_signature(&decoded, responder.did.verifying_key().unwrap()));
    }

    #[test]
    fn custom_policy_deltas_are_used() {
        let responder = agent("beta", &["nlp"]);
        let policy = NegotiationPolicy { accept_delta: 0.1, reject_delta: -0.5 };

        let ok = IntentMessage { capabilities: vec!["nlp".into()], ..Default::default() };
        assert_eq!(handle_intent(&responder, &ok, policy).trust_delta, 0.1);

        let nope = IntentMessage { capabilities: vec!["gpu".into()], ..Default::default() };
        assert_eq!(handle_intent(&responder, &nope, policy).trust_delta, -0.5);
    }

    // ── cosine similarity & ranking ─────────────────────────────────────────

    #[test]
    fn cosine_identities() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[0.3, 0.3], &[0.3, 0.3]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn ranking_orders_by_similarity() {
        let candidates = vec![
            profile("exact", vec![1.0, 0.0, 0.0]),
            profile("orthogonal", vec![0.0, 1.0, 0.0]),
            profile("close", vec![0.9, 0.1, 0.0]),
        ];
        let ranked = rank_candidates(&[1.0, 0.0, 0.0], candidates);
        let order: Vec<&str> = ranked.iter().map(|p| p.agent_id.as_str()).collect();
        assert_eq!(order, vec!["exact", "close", "orthogonal"]);

        let close = cosine_similarity(&[1.0, 0.0, 0.0], &[0.9, 0.1, 0.0]);
        assert!((close - 0.994).abs() < 1e-3, "close score {close}");
    }

    #[test]
    fn embedding_less_profiles_rank_last_in_input_order() {
        let candidates = vec![
            profile("first-bare", vec![]),
            profile("second-bare", vec![]),
            profile("embedded", vec![0.5, 0.5]),
        ];
        let ranked = rank_candidates(&[1.0, 0.0], candidates);
        let order: Vec<&str> = ranked.iter().map(|p| p.agent_id.as_str()).collect();
        assert_eq!(order, vec!["embedded", "first-bare", "second-bare"]);
    }

    // ── capability diff ─────────────────────────────────────────────────────

    #[test]
    fn capability_diff_partitions() {
        let required = vec!["nlp".to_string(), "gpu".to_string()];
        let available = vec!["nlp".to_string(), "code-gen".to_string()];
        let (present, missing) = capability_diff(&required, &available);
        assert_eq!(present, vec!["nlp".to_string()]);
        assert_eq!(missing, vec!["gpu".to_string()]);
    }

    // ── bus ─────────────────────────────────────────────────────────────────

    #[test]
    fn bus_dispatches_to_registered_handler() {
        let alpha = agent("alpha", &["nlp"]);
        let beta = agent("beta", &["summarisation"]);

        let bus = NegotiationBus::new();
        bus.register("beta", default_handler(beta, NegotiationPolicy::default()));

        let intent =
            create_intent(&alpha, vec![0.9], vec!["summarisation".into()], "doc").unwrap();
        let resp = bus.negotiate("beta", &intent).unwrap();
        assert!(resp.accepted);
        assert_eq!(resp.agent_id, "beta");
    }

    #[test]
    fn bus_unknown_target_errors() {
        let bus = NegotiationBus::new();
        let intent = IntentMessage::default();
        assert!(matches!(
            bus.negotiate("nobody", &intent),
            Err(ProtocolError::UnknownPeer(_))
        ));
    }
}
