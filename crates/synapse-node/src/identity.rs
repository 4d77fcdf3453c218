use ed25519_dalek::SigningKey;
use libp2p::identity;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Node identity: one Ed25519 secret driving both Synapse message signing
/// (and hence the agent's DID) and the libp2p peer identity.
pub struct NodeIdentity {
    pub signing_key: SigningKey,
    pub libp2p_keypair: identity::Keypair,
}

impl NodeIdentity {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let libp2p_keypair = to_libp2p_keypair(&signing_key);
        Self { signing_key, libp2p_keypair }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use std::io::Write;
        // mode 0o600: owner read/write only — private key must never be world-readable.
        #[cfg(unix)]
        let mut file = std::fs::OpenOptions::new()
            .write(true).create(true).truncate(true).mode(0o600)
            .open(path)?;
        #[cfg(not(unix))]
        let mut file = std::fs::OpenOptions::new()
            .write(true).create(true).truncate(true)
            .open(path)?;
        file.write_all(&self.signing_key.to_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid key file: expected 32 bytes"))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&arr)))
    }

    /// Load the key file, or generate a fresh key pair when it is absent.
    /// A fresh key pair changes the node's DID and libp2p peer id.
    pub fn load_or_generate(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let id = Self::load(path)?;
            tracing::info!(
                peer_id = %id.libp2p_keypair.public().to_peer_id(),
                "Loaded identity from {:?}", path,
            );
            Ok(id)
        } else {
            let mut secret = [0u8; 32];
            OsRng.try_fill_bytes(&mut secret)?;
            let id = Self::from_signing_key(SigningKey::from_bytes(&secret));
            id.save(path)?;
            tracing::info!(
                peer_id = %id.libp2p_keypair.public().to_peer_id(),
                "Generated new identity, saved to {:?}", path,
            );
            Ok(id)
        }
    }

    pub fn peer_id(&self) -> libp2p::PeerId {
        self.libp2p_keypair.public().to_peer_id()
    }
}

fn to_libp2p_keypair(signing_key: &SigningKey) -> identity::Keypair {
    let mut bytes = signing_key.to_bytes();
    let secret = identity::ed25519::SecretKey::try_from_bytes(&mut bytes)
        .expect("valid 32-byte ed25519 secret");
    identity::Keypair::from(identity::ed25519::Keypair::from(secret))
}
