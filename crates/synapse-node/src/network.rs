//! libp2p transport layer.
//!
//! Each node wraps a libp2p swarm (TCP + Noise + Yamux) and uses the stream
//! behaviour to open one fresh bidirectional stream per protocol exchange
//! under the `/synapse/1.0.0` protocol ID. The swarm itself is driven by a
//! dedicated task; the rest of the node talks to it through a [`Control`]
//! handle for streams and a command channel for dials.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm};
use libp2p_stream as stream;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::HostError;

/// libp2p protocol identifier for Synapse v1 exchanges.
pub const SYNAPSE_PROTOCOL: StreamProtocol = StreamProtocol::new("/synapse/1.0.0");

#[derive(NetworkBehaviour)]
pub struct SynapseBehaviour {
    pub stream: stream::Behaviour,
}

/// Build the libp2p swarm and start listening.
pub fn build_swarm(
    keypair: libp2p::identity::Keypair,
    listen_addr: Multiaddr,
) -> anyhow::Result<Swarm<SynapseBehaviour>> {
    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)?
        .with_behaviour(|_| SynapseBehaviour { stream: stream::Behaviour::new() })?
        // Idle connections stay up between exchanges so announcements can
        // reuse them.
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
        .build();

    swarm.listen_on(listen_addr)?;
    Ok(swarm)
}

enum SwarmCommand {
    Dial { addr: Multiaddr, reply: oneshot::Sender<Result<(), String>> },
}

/// Cheap clonable handle onto the swarm task.
#[derive(Clone)]
pub struct NetworkHandle {
    local_peer_id: PeerId,
    control: stream::Control,
    cmd_tx: mpsc::Sender<SwarmCommand>,
    connected: Arc<RwLock<HashSet<PeerId>>>,
    listen_rx: watch::Receiver<Vec<Multiaddr>>,
}

impl NetworkHandle {
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub fn control(&self) -> stream::Control {
        self.control.clone()
    }

    /// Snapshot of currently connected peers.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.read().expect("connected set lock poisoned").iter().copied().collect()
    }

    /// Dial a multiaddr (which must carry a `/p2p/<peer-id>` component) and
    /// wait until the connection is established.
    pub async fn connect(&self, addr: Multiaddr) -> Result<PeerId, HostError> {
        let peer_id = addr
            .iter()
            .find_map(|p| if let Protocol::P2p(pid) = p { Some(pid) } else { None })
            .ok_or_else(|| {
                HostError::Transport("dial address must include /p2p/<peer-id>".to_string())
            })?;

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SwarmCommand::Dial { addr, reply })
            .await
            .map_err(|_| HostError::Transport("swarm task stopped".to_string()))?;
        rx.await
            .map_err(|_| HostError::Transport("swarm task stopped".to_string()))?
            .map_err(HostError::Transport)?;
        Ok(peer_id)
    }

    /// Wait for the swarm's first listen address and return it with the
    /// `/p2p/<peer-id>` component appended, ready to hand to a peer.
    pub async fn wait_listen_addr(&self) -> Result<Multiaddr, HostError> {
        let mut rx = self.listen_rx.clone();
        loop {
            let addr = rx.borrow_and_update().first().cloned();
            if let Some(addr) = addr {
                return Ok(addr.with(Protocol::P2p(self.local_peer_id)));
            }
            rx.changed()
                .await
                .map_err(|_| HostError::Transport("swarm task stopped".to_string()))?;
        }
    }
}

/// Spawn the swarm event loop. Returns the handle used by the host and the
/// stream of inbound protocol streams.
pub fn spawn_network(
    mut swarm: Swarm<SynapseBehaviour>,
) -> anyhow::Result<(NetworkHandle, stream::IncomingStreams)> {
    let mut control = swarm.behaviour().stream.new_control();
    let incoming = control.accept(SYNAPSE_PROTOCOL)?;

    let local_peer_id = *swarm.local_peer_id();
    let connected = Arc::new(RwLock::new(HashSet::new()));
    let (listen_tx, listen_rx) = watch::channel(Vec::new());
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(32);

    let handle = NetworkHandle {
        local_peer_id,
        control,
        cmd_tx,
        connected: Arc::clone(&connected),
        listen_rx,
    };

    tokio::spawn(async move {
        let mut pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), String>>>> =
            HashMap::new();
        loop {
            tokio::select! {
                event = swarm.select_next_some() => match event {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        tracing::info!(%address, "listening");
                        listen_tx.send_modify(|addrs| addrs.push(address));
                    }
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        tracing::debug!(peer = %peer_id, "connection established");
                        connected
                            .write()
                            .expect("connected set lock poisoned")
                            .insert(peer_id);
                        for reply in pending_dials.remove(&peer_id).unwrap_or_default() {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                        if num_established == 0 {
                            tracing::debug!(peer = %peer_id, "connection closed");
                            connected
                                .write()
                                .expect("connected set lock poisoned")
                                .remove(&peer_id);
                        }
                    }
                    SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                        if let Some(peer_id) = peer_id {
                            for reply in pending_dials.remove(&peer_id).unwrap_or_default() {
                                let _ = reply.send(Err(error.to_string()));
                            }
                        }
                    }
                    _ => {}
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(SwarmCommand::Dial { addr, reply }) => {
                        let peer_id = addr.iter().find_map(|p| {
                            if let Protocol::P2p(pid) = p { Some(pid) } else { None }
                        });
                        match swarm.dial(addr) {
                            Ok(()) => match peer_id {
                                Some(pid) => pending_dials.entry(pid).or_default().push(reply),
                                None => {
                                    let _ = reply.send(Ok(()));
                                }
                            },
                            Err(e) => {
                                let _ = reply.send(Err(e.to_string()));
                            }
                        }
                    }
                    // All handles dropped: the node is shutting down.
                    None => return,
                },
            }
        }
    });

    Ok((handle, incoming))
}
