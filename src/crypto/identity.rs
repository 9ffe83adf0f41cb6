use ed25519_dalek::{Signature as EdSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

use crate::error::OverlayError;
use crate::wire::messages::{NodeId, Signature};

/// The node's long-term ed25519 identity. Signs AuthCerts (binding an
/// ephemeral Curve25519 key to this identity) and is compared against a
/// peer's claimed identity to detect self-connects and duplicates.
pub struct LocalIdentity {
    signing_key: SigningKey,
}

impl LocalIdentity {
    pub fn generate() -> Self {
        LocalIdentity {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        LocalIdentity { signing_key }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

/// Verifies a signature from a peer's claimed long-term identity. Used to
/// check the AuthCert signature during handshake (`BadCert` on failure).
pub fn verify(node_id: &NodeId, message: &[u8], sig: &Signature) -> Result<(), OverlayError> {
    let verifying_key = VerifyingKey::from_bytes(&node_id.0)
        .map_err(|e| OverlayError::BadCert(format!("invalid peer identity: {e}")))?;
    let bytes: [u8; 64] = sig
        .0
        .as_slice()
        .try_into()
        .map_err(|_| OverlayError::BadCert("signature has wrong length".to_string()))?;
    let signature = EdSignature::from_bytes(&bytes);
    verifying_key
        .verify(message, &signature)
        .map_err(|e| OverlayError::BadCert(format!("signature verification failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let identity = LocalIdentity::generate();
        let node_id = identity.node_id();
        let sig = identity.sign(b"hello overlay");
        verify(&node_id, b"hello overlay", &sig).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let identity = LocalIdentity::generate();
        let node_id = identity.node_id();
        let sig = identity.sign(b"hello overlay");
        assert!(verify(&node_id, b"goodbye overlay", &sig).is_err());
    }

    #[test]
    fn wrong_identity_fails_verification() {
        let identity = LocalIdentity::generate();
        let other = LocalIdentity::generate();
        let sig = identity.sign(b"hello overlay");
        assert!(verify(&other.node_id(), b"hello overlay", &sig).is_err());
    }
}
