// ============================================================================
// Protocol constants
// ============================================================================

/// Wire-protocol version string carried in handshakes and intent metadata.
pub const PROTOCOL_VERSION: &str = "1.0.0";

// --- Identity ---------------------------------------------------------------

/// DID method token. DIDs read `did:synapse:<hex(sha256(public_key))>`.
pub const DID_METHOD: &str = "synapse";

/// Handshake challenge nonce length in bytes.
pub const CHALLENGE_SIZE: usize = 32;

// --- Transport --------------------------------------------------------------

/// Maximum framed message body (type byte + payload).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// Server-side deadline for servicing one inbound stream.
pub const HANDSHAKE_DEADLINE_SECS: u64 = 30;

// --- Discovery --------------------------------------------------------------

/// TTL attached to periodic capability announcements.
pub const ANNOUNCEMENT_TTL_SECS: u64 = 300;

/// How often the background sweep purges expired registry entries.
pub const EVICTION_INTERVAL_SECS: u64 = 60;

// --- Trust ------------------------------------------------------------------

/// Neutral starting score for a newly met peer.
pub const TRUST_SEED: f32 = 0.5;

/// Responder-suggested delta on an accepted intent.
pub const ACCEPT_DELTA: f32 = 0.05;

/// Responder-suggested delta on a rejected intent.
pub const REJECT_DELTA: f32 = -0.02;
