use libp2p::{identity, PeerId};
use std::fs;
use std::path::Path;

use crate::error::BridgeError;

/// Load or generate this instance's Ed25519 bridge identity.
///
/// The 32-byte secret is kept at `{data_dir}/bridge_identity.key` so the
/// PeerId survives restarts and sibling instances can pin it.
pub fn node_keypair(data_dir: &str) -> Result<identity::Keypair, BridgeError> {
    let key_path = Path::new(data_dir).join("bridge_identity.key");

    if key_path.exists() {
        let mut seed = fs::read(&key_path)?;
        if seed.len() == 32 {
            let keypair = identity::Keypair::ed25519_from_bytes(&mut seed)
                .map_err(|e| BridgeError::Transport(format!("invalid bridge key: {e}")))?;
            tracing::info!(
                peer_id = %PeerId::from(keypair.public()),
                path = %key_path.display(),
                "Bridge identity loaded"
            );
            return Ok(keypair);
        }
        tracing::warn!(
            "Bridge key file has wrong size ({}), regenerating",
            seed.len()
        );
    }

    let keypair = identity::Keypair::generate_ed25519();
    let ed25519 = keypair
        .clone()
        .try_into_ed25519()
        .map_err(|e| BridgeError::Transport(e.to_string()))?;

    // to_bytes() is secret || public; only the secret half is persisted.
    let full_bytes = ed25519.to_bytes();
    fs::create_dir_all(data_dir)?;
    fs::write(&key_path, &full_bytes[..32])?;

    tracing::info!(
        peer_id = %PeerId::from(keypair.public()),
        path = %key_path.display(),
        "Bridge identity generated"
    );
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let first = node_keypair(data_dir).unwrap();
        let second = node_keypair(data_dir).unwrap();
        assert_eq!(PeerId::from(first.public()), PeerId::from(second.public()));
    }
}
