use clap::Parser;
use libp2p::Multiaddr;
use std::path::PathBuf;
use std::time::Duration;

use synapse_protocol::NegotiationPolicy;

use crate::host::HostConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "synapse-node", about = "Synapse semantic agent mesh node")]
pub struct Config {
    /// libp2p listen multiaddr. Port 0 picks a free port.
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/0")]
    pub listen_addr: Multiaddr,

    /// Peer multiaddrs to connect and handshake with at startup (can repeat).
    /// Must include the /p2p/<peer-id> component.
    #[arg(long)]
    pub peer: Vec<Multiaddr>,

    /// Agent identifier announced to peers.
    #[arg(long, env = "SYNAPSE_AGENT_ID", default_value = "synapse-agent")]
    pub agent_id: String,

    /// Capability tags this agent offers (can repeat).
    #[arg(long = "capability")]
    pub capabilities: Vec<String>,

    /// Path to the 32-byte Ed25519 secret key file.
    #[arg(long, env = "SYNAPSE_KEYPAIR_PATH", default_value = "synapse-identity.key")]
    pub keypair_path: PathBuf,

    /// Protocol version advertised in handshakes.
    #[arg(long, default_value = synapse_protocol::PROTOCOL_VERSION)]
    pub protocol_version: String,

    /// Maximum accepted frame body size in bytes.
    #[arg(long, default_value_t = synapse_protocol::MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// TTL attached to outgoing capability announcements, in seconds.
    #[arg(long, default_value_t = 300)]
    pub announcement_ttl_secs: i64,

    /// Deadline for one handshake or intent exchange, in seconds.
    #[arg(long, default_value_t = 30)]
    pub handshake_deadline_secs: u64,

    /// How often the discovery registry purges expired entries, in seconds.
    #[arg(long, default_value_t = 60)]
    pub eviction_interval_secs: u64,

    /// How often capabilities are re-announced to connected peers, in seconds.
    #[arg(long, default_value_t = 60)]
    pub announce_interval_secs: u64,

    /// Per-step deadline for workflow dispatch, in seconds.
    #[arg(long, default_value_t = 30)]
    pub step_timeout_secs: u64,

    /// Capability tags of a workflow to run once peers are handshaken (can
    /// repeat). Each tag becomes one step dispatched to the best-capable peer.
    #[arg(long = "workflow-step")]
    pub workflow_step: Vec<String>,

    /// Trust delta suggested when accepting an intent.
    #[arg(long, default_value_t = 0.05, allow_hyphen_values = true)]
    pub accept_delta: f32,

    /// Trust delta suggested when rejecting an intent.
    #[arg(long, default_value_t = -0.02, allow_hyphen_values = true)]
    pub reject_delta: f32,
}

impl Config {
    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            protocol_version: self.protocol_version.clone(),
            max_frame_bytes: self.max_frame_bytes,
            announcement_ttl_secs: self.announcement_ttl_secs,
            handshake_deadline: Duration::from_secs(self.handshake_deadline_secs),
            policy: NegotiationPolicy {
                accept_delta: self.accept_delta,
                reject_delta: self.reject_delta,
            },
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}
