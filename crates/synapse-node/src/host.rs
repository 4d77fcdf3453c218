//! The Synapse agent host.
//!
//! Wraps the libp2p transport and owns the local agent, the discovery
//! registry, and the trust ledger. Every inbound stream is serviced on its
//! own task under a deadline: exactly one framed message is read, dispatched
//! by type byte, answered where the protocol calls for it, and the stream is
//! released. Outbound exchanges open one fresh stream each.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use futures::{AsyncWriteExt, StreamExt};
use libp2p::{Multiaddr, PeerId, Stream, Swarm};

use synapse_protocol::discovery::build_announcement;
use synapse_protocol::frame::{read_message, write_message};
use synapse_protocol::handshake::{self, Handshake, HandshakeResult};
use synapse_protocol::negotiation::{self, NegotiationPolicy};
use synapse_protocol::{
    Agent, AgentProfile, CapabilityAnnouncement, DiscoveryRegistry, HandshakeMessage,
    IntentMessage, MessageType, NegotiationResponse, TrustLedger,
};

use crate::error::HostError;
use crate::network::{spawn_network, NetworkHandle, SynapseBehaviour, SYNAPSE_PROTOCOL};

/// Invoked when a peer initiates a handshake. Return a message to answer
/// with, or `None` to fall back to the default responder.
pub type HandshakeCallback =
    Arc<dyn Fn(PeerId, &HandshakeMessage) -> Option<HandshakeMessage> + Send + Sync>;

/// Invoked when a peer sends an intent. Return a response, or `None` to fall
/// back to the default negotiation handler.
pub type IntentCallback =
    Arc<dyn Fn(PeerId, &IntentMessage) -> Option<NegotiationResponse> + Send + Sync>;

/// Host tunables. Defaults follow the protocol's standard values.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub protocol_version: String,
    pub max_frame_bytes: usize,
    pub announcement_ttl_secs: i64,
    /// Deadline for one inbound or outbound exchange.
    pub handshake_deadline: Duration,
    pub policy: NegotiationPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            protocol_version: synapse_protocol::PROTOCOL_VERSION.to_string(),
            max_frame_bytes: synapse_protocol::MAX_FRAME_BYTES,
            announcement_ttl_secs: synapse_protocol::ANNOUNCEMENT_TTL_SECS as i64,
            handshake_deadline: Duration::from_secs(synapse_protocol::HANDSHAKE_DEADLINE_SECS),
            policy: NegotiationPolicy::default(),
        }
    }
}

/// Cheap clonable handle to a running agent host.
#[derive(Clone)]
pub struct AgentHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    agent: Agent,
    config: HostConfig,
    network: NetworkHandle,
    discovery: Arc<DiscoveryRegistry>,
    trust: Arc<TrustLedger>,
    /// Capability profiles by transport peer id, filled on handshake.
    known: RwLock<HashMap<PeerId, AgentProfile>>,
    /// Verifying keys by transport peer id, filled on handshake.
    keys: RwLock<HashMap<PeerId, VerifyingKey>>,
    on_handshake: RwLock<Option<HandshakeCallback>>,
    on_intent: RwLock<Option<IntentCallback>>,
}

impl AgentHost {
    /// Start the host: spawns the swarm event loop and the inbound stream
    /// acceptor.
    pub fn spawn(
        agent: Agent,
        config: HostConfig,
        swarm: Swarm<SynapseBehaviour>,
    ) -> anyhow::Result<Self> {
        let (network, mut incoming) = spawn_network(swarm)?;

        let inner = Arc::new(HostInner {
            agent,
            config,
            network,
            discovery: Arc::new(DiscoveryRegistry::new()),
            trust: Arc::new(TrustLedger::new()),
            known: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
            on_handshake: RwLock::new(None),
            on_intent: RwLock::new(None),
        });

        let acceptor = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some((peer, stream)) = incoming.next().await {
                let inner = Arc::clone(&acceptor);
                tokio::spawn(async move { inner.serve_stream(peer, stream).await });
            }
        });

        Ok(Self { inner })
    }

    pub fn agent(&self) -> &Agent {
        &self.inner.agent
    }

    pub fn discovery(&self) -> Arc<DiscoveryRegistry> {
        Arc::clone(&self.inner.discovery)
    }

    pub fn trust(&self) -> Arc<TrustLedger> {
        Arc::clone(&self.inner.trust)
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.inner.network.local_peer_id()
    }

    /// First listen address including the `/p2p/` suffix, once bound.
    pub async fn wait_listen_addr(&self) -> Result<Multiaddr, HostError> {
        self.inner.network.wait_listen_addr().await
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.network.connected_peers()
    }

    /// Dial a peer multiaddr and wait for the connection.
    pub async fn connect(&self, addr: Multiaddr) -> Result<PeerId, HostError> {
        self.inner.network.connect(addr).await
    }

    pub fn on_handshake(&self, callback: HandshakeCallback) {
        *self.inner.on_handshake.write().expect("callback lock poisoned") = Some(callback);
    }

    pub fn on_intent(&self, callback: IntentCallback) {
        *self.inner.on_intent.write().expect("callback lock poisoned") = Some(callback);
    }

    /// Transport peer id for a handshaken agent, if known.
    pub fn peer_for_agent(&self, agent_id: &str) -> Option<PeerId> {
        let known = self.inner.known.read().expect("known peers lock poisoned");
        known.iter().find(|(_, p)| p.agent_id == agent_id).map(|(peer, _)| *peer)
    }

    /// The cached verifying key for a transport peer, if a handshake has
    /// completed with it.
    pub fn key_for_peer(&self, peer: &PeerId) -> Option<VerifyingKey> {
        self.inner.keys.read().expect("key cache lock poisoned").get(peer).cloned()
    }

    // ========================================================================
    // Outbound exchanges
    // ========================================================================

    /// Initiate a handshake with a connected peer.
    pub async fn handshake(&self, peer: PeerId) -> Result<HandshakeResult, HostError> {
        tokio::time::timeout(
            self.inner.config.handshake_deadline,
            self.inner.outbound_handshake(peer),
        )
        .await
        .map_err(|_| HostError::Deadline)?
    }

    /// Send an intent to a connected peer and wait for its negotiation
    /// response. The received trust delta is applied to the local ledger.
    pub async fn send_intent(
        &self,
        peer: PeerId,
        intent: IntentMessage,
    ) -> Result<NegotiationResponse, HostError> {
        tokio::time::timeout(
            self.inner.config.handshake_deadline,
            self.inner.outbound_intent(peer, intent),
        )
        .await
        .map_err(|_| HostError::Deadline)?
    }

    /// Broadcast this agent's capabilities to every connected peer, one
    /// ephemeral stream each, in parallel. Failures are logged and ignored.
    pub fn announce_capabilities(&self) {
        let announcement =
            build_announcement(&self.inner.agent, self.inner.config.announcement_ttl_secs);
        let peers = self.inner.network.connected_peers();
        tracing::debug!(peers = peers.len(), "announcing capabilities");

        for peer in peers {
            let mut control = self.inner.network.control();
            let announcement = announcement.clone();
            tokio::spawn(async move {
                match control.open_stream(peer, SYNAPSE_PROTOCOL).await {
                    Ok(mut stream) => {
                        if let Err(e) = write_message(&mut stream, &announcement).await {
                            tracing::debug!(peer = %peer, error = %e, "announce write failed");
                        }
                        let _ = stream.close().await;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "announce stream failed");
                    }
                }
            });
        }
    }
}

impl HostInner {
    // ========================================================================
    // Inbound dispatch
    // ========================================================================

    async fn serve_stream(self: Arc<Self>, peer: PeerId, mut stream: Stream) {
        match tokio::time::timeout(
            self.config.handshake_deadline,
            self.dispatch(peer, &mut stream),
        )
        .await
        {
            Err(_) => tracing::debug!(peer = %peer, "inbound stream deadline exceeded"),
            Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "inbound stream dropped"),
            Ok(Ok(())) => {}
        }
    }

    async fn dispatch(&self, peer: PeerId, stream: &mut Stream) -> Result<(), HostError> {
        let (type_byte, payload) = read_message(stream, self.config.max_frame_bytes).await?;
        match MessageType::from_byte(type_byte) {
            Some(MessageType::Handshake) => self.handle_handshake(peer, stream, &payload).await,
            Some(MessageType::Intent) => self.handle_intent(peer, stream, &payload).await,
            Some(MessageType::Capability) => self.handle_capability(peer, &payload),
            _ => {
                tracing::trace!(peer = %peer, type_byte, "dropping unhandled message type");
                Ok(())
            }
        }
    }

    async fn handle_handshake(
        &self,
        peer: PeerId,
        stream: &mut Stream,
        payload: &[u8],
    ) -> Result<(), HostError> {
        let incoming = HandshakeMessage::decode(payload)?;

        let callback = self.on_handshake.read().expect("callback lock poisoned").clone();
        let response = match callback.and_then(|cb| cb(peer, &incoming)) {
            Some(resp) => resp,
            None => handshake::respond(&self.agent, &incoming)?,
        };

        // Cache before answering so the initiator observes a fully
        // registered responder once its own finish returns.
        self.cache_peer(
            peer,
            &incoming.agent_id,
            &incoming.did,
            &incoming.capabilities,
            &incoming.public_key,
        );

        write_message(stream, &response).await?;
        let _ = stream.close().await;
        tracing::info!(peer = %peer, agent = %incoming.agent_id, "handshake completed (responder)");
        Ok(())
    }

    async fn handle_intent(
        &self,
        peer: PeerId,
        stream: &mut Stream,
        payload: &[u8],
    ) -> Result<(), HostError> {
        let intent = IntentMessage::decode(payload)?;

        // When the sender's key is known from a handshake, a bad signature
        // drops the message before any handler sees it.
        let cached_key = self.keys.read().expect("key cache lock poisoned").get(&peer).cloned();
        if let Some(key) = cached_key {
            if !negotiation::verify_intent_signature(&intent, &key) {
                tracing::warn!(peer = %peer, intent = %intent.id, "dropping intent with invalid signature");
                return Ok(());
            }
        }

        let callback = self.on_intent.read().expect("callback lock poisoned").clone();
        let response = callback
            .and_then(|cb| cb(peer, &intent))
            .unwrap_or_else(|| negotiation::handle_intent(&self.agent, &intent, self.config.policy));

        write_message(stream, &response).await?;
        let _ = stream.close().await;

        self.trust.apply(&self.agent.did.to_string(), &intent.did, response.trust_delta);
        tracing::info!(
            peer = %peer,
            intent = %intent.id,
            accepted = response.accepted,
            "negotiated intent",
        );
        Ok(())
    }

    fn handle_capability(&self, peer: PeerId, payload: &[u8]) -> Result<(), HostError> {
        let announcement = CapabilityAnnouncement::decode(payload)?;
        tracing::debug!(
            peer = %peer,
            agent = %announcement.agent_id,
            capabilities = ?announcement.capabilities,
            ttl = announcement.ttl,
            "capability announcement",
        );
        self.discovery.announce_from_message(&announcement);
        Ok(())
    }

    // ========================================================================
    // Outbound exchanges
    // ========================================================================

    async fn outbound_handshake(&self, peer: PeerId) -> Result<HandshakeResult, HostError> {
        let mut control = self.network.control();
        let mut stream = control
            .open_stream(peer, SYNAPSE_PROTOCOL)
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;

        let mut hs =
            Handshake::new(&self.agent).with_version(self.config.protocol_version.clone());
        let h1 = hs.start()?;
        write_message(&mut stream, &h1).await?;

        let (type_byte, payload) = read_message(&mut stream, self.config.max_frame_bytes).await?;
        if MessageType::from_byte(type_byte) != Some(MessageType::Handshake) {
            return Err(HostError::UnexpectedMessage(type_byte));
        }
        let h2 = HandshakeMessage::decode(&payload)?;
        let result = hs.finish(&h2)?;
        let _ = stream.close().await;

        self.cache_peer(peer, &h2.agent_id, &h2.did, &h2.capabilities, &h2.public_key);
        tracing::info!(peer = %peer, agent = %result.peer_agent_id, "handshake completed (initiator)");
        Ok(result)
    }

    async fn outbound_intent(
        &self,
        peer: PeerId,
        intent: IntentMessage,
    ) -> Result<NegotiationResponse, HostError> {
        let mut control = self.network.control();
        let mut stream = control
            .open_stream(peer, SYNAPSE_PROTOCOL)
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;

        write_message(&mut stream, &intent).await?;

        let (type_byte, payload) = read_message(&mut stream, self.config.max_frame_bytes).await?;
        if MessageType::from_byte(type_byte) != Some(MessageType::Negotiation) {
            return Err(HostError::UnexpectedMessage(type_byte));
        }
        let response = NegotiationResponse::decode(&payload)?;
        let _ = stream.close().await;

        self.trust.apply(&self.agent.did.to_string(), &response.did, response.trust_delta);
        Ok(response)
    }

    /// Record a handshaken peer: profile by transport peer id, verifying key
    /// for inbound signature checks, permanent discovery entry, and the
    /// neutral trust seed for a first meeting.
    fn cache_peer(
        &self,
        peer: PeerId,
        agent_id: &str,
        did: &str,
        capabilities: &[String],
        public_key: &[u8],
    ) {
        let profile = AgentProfile {
            agent_id: agent_id.to_string(),
            did: did.to_string(),
            capabilities: capabilities.to_vec(),
            embedding: Vec::new(),
            public_key: public_key.to_vec(),
        };

        if let Ok(arr) = <[u8; 32]>::try_from(public_key) {
            if let Ok(key) = VerifyingKey::from_bytes(&arr) {
                self.keys.write().expect("key cache lock poisoned").insert(peer, key);
            }
        }
        self.known.write().expect("known peers lock poisoned").insert(peer, profile.clone());
        self.discovery.announce(profile, 0);
        self.trust.seed(&self.agent.did.to_string(), did);
    }
}

// ============================================================================
// Tests
// ============================================================================
