use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::OverlayError;
use crate::wire::messages::{AuthCert, Curve25519Public, NodeId, Signature, Uint256, Uint64};

use super::identity::{verify, LocalIdentity};

/// Per-connection ephemeral Curve25519 keypair, generated fresh for every
/// handshake (section 4.1, "an authentication certificate binding an
/// ephemeral public key").
pub struct EphemeralKeys {
    secret: StaticSecret,
    public: X25519Public,
}

impl EphemeralKeys {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        EphemeralKeys { secret, public }
    }

    pub fn public_bytes(&self) -> Uint256 {
        self.public.to_bytes()
    }
}

const AUTH_CERT_EXPIRATION_SECS: u64 = 3600;

fn auth_cert_signing_input(network_id: &Uint256, expiration: Uint64, pubkey: &Uint256) -> Vec<u8> {
    // Matches the teacher's `new_auth_cert`: network id, an envelope-type
    // discriminant, the expiration, and the ephemeral public key are
    // concatenated and hashed before signing, so the signature commits to
    // all four.
    let mut buf = Vec::with_capacity(32 + 4 + 8 + 32);
    buf.extend_from_slice(network_id);
    buf.extend_from_slice(&1u32.to_be_bytes()); // EnvelopeTypeAuth discriminant
    buf.extend_from_slice(&expiration.to_be_bytes());
    buf.extend_from_slice(pubkey);
    buf
}

/// Builds a fresh AuthCert binding `ephemeral_public` to the local identity,
/// valid for one hour from `now`.
pub fn build_auth_cert(identity: &LocalIdentity, network_id: &Uint256, ephemeral_public: &Uint256, now: u64) -> AuthCert {
    let expiration = now + AUTH_CERT_EXPIRATION_SECS;
    let input = auth_cert_signing_input(network_id, expiration, ephemeral_public);
    let hash = Sha256::digest(&input);
    let sig = identity.sign(&hash);
    AuthCert {
        pubkey: Curve25519Public { key: *ephemeral_public },
        expiration,
        sig,
    }
}

/// Verifies a peer's AuthCert: that it has not expired and that its
/// signature was produced by the claimed long-term identity over the
/// expected (network id, expiration, pubkey) tuple. Fatal `BadCert` on
/// either failure (section 4.1).
pub fn verify_auth_cert(
    cert: &AuthCert,
    claimed_node_id: &NodeId,
    network_id: &Uint256,
    now: u64,
) -> Result<(), OverlayError> {
    if cert.expiration < now {
        return Err(OverlayError::BadCert("auth certificate expired".to_string()));
    }
    let input = auth_cert_signing_input(network_id, cert.expiration, &cert.pubkey.key);
    let hash = Sha256::digest(&input);
    verify(claimed_node_id, &hash, &cert.sig)
}

/// The two per-direction MAC keys derived from a completed handshake.
pub struct SessionKeys {
    pub send_mac_key: Uint256,
    pub receive_mac_key: Uint256,
}

/// Derives both per-direction MAC keys from ECDH(local ephemeral secret,
/// remote ephemeral public) passed through HKDF, keyed with both nonces and
/// a role tag (section 4.1 "Key derivation roles"). `we_called_remote`
/// selects the role tag and the (public_a, public_b) ordering so that the
/// sender's send key equals the receiver's receive key: this function,
/// called once per side with `we_called_remote` flipped, yields keys that
/// necessarily agree across the two ends of the connection.
pub fn derive_session_keys(
    local_secret: &EphemeralKeys,
    remote_ephemeral_public: &Uint256,
    local_nonce: &Uint256,
    remote_nonce: &Uint256,
    we_called_remote: bool,
) -> Result<SessionKeys, OverlayError> {
    let remote_public = X25519Public::from(*remote_ephemeral_public);
    let shared = local_secret.secret.diffie_hellman(&remote_public);

    let local_public = local_secret.public_bytes();
    let (public_a, public_b) = if we_called_remote {
        (&local_public, remote_ephemeral_public)
    } else {
        (remote_ephemeral_public, &local_public)
    };

    let mut ikm = Vec::with_capacity(32 * 3);
    ikm.extend_from_slice(shared.as_bytes());
    ikm.extend_from_slice(public_a);
    ikm.extend_from_slice(public_b);

    let hk = Hkdf::<Sha256>::new(None, &ikm);

    let role_byte: u8 = if we_called_remote { 0 } else { 1 };

    let mut send_info = Vec::with_capacity(1 + 64);
    send_info.push(role_byte);
    send_info.extend_from_slice(local_nonce);
    send_info.extend_from_slice(remote_nonce);
    let mut send_mac_key = [0u8; 32];
    hk.expand(&send_info, &mut send_mac_key)
        .map_err(|_| OverlayError::BadCert("HKDF expand failed deriving send key".to_string()))?;

    let mut receive_info = Vec::with_capacity(1 + 64);
    receive_info.push(role_byte);
    receive_info.extend_from_slice(remote_nonce);
    receive_info.extend_from_slice(local_nonce);
    let mut receive_mac_key = [0u8; 32];
    hk.expand(&receive_info, &mut receive_mac_key)
        .map_err(|_| OverlayError::BadCert("HKDF expand failed deriving receive key".to_string()))?;

    Ok(SessionKeys {
        send_mac_key,
        receive_mac_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::identity::LocalIdentity;

    #[test]
    fn auth_cert_round_trips_through_verification() {
        let identity = LocalIdentity::generate();
        let network_id = [9u8; 32];
        let ephemeral = EphemeralKeys::generate();
        let cert = build_auth_cert(&identity, &network_id, &ephemeral.public_bytes(), 1_000);
        verify_auth_cert(&cert, &identity.node_id(), &network_id, 1_000).unwrap();
    }

    #[test]
    fn expired_auth_cert_is_rejected() {
        let identity = LocalIdentity::generate();
        let network_id = [9u8; 32];
        let ephemeral = EphemeralKeys::generate();
        let cert = build_auth_cert(&identity, &network_id, &ephemeral.public_bytes(), 1_000);
        let err = verify_auth_cert(&cert, &identity.node_id(), &network_id, 1_000 + 3601).unwrap_err();
        assert!(matches!(err, OverlayError::BadCert(_)));
    }

    #[test]
    fn wrong_network_id_fails_cert_verification() {
        let identity = LocalIdentity::generate();
        let ephemeral = EphemeralKeys::generate();
        let cert = build_auth_cert(&identity, &[1u8; 32], &ephemeral.public_bytes(), 1_000);
        assert!(verify_auth_cert(&cert, &identity.node_id(), &[2u8; 32], 1_000).is_err());
    }

    #[test]
    fn two_sides_derive_matching_send_receive_keys() {
        let a_ephemeral = EphemeralKeys::generate();
        let b_ephemeral = EphemeralKeys::generate();
        let a_nonce = [1u8; 32];
        let b_nonce = [2u8; 32];

        let a_keys = derive_session_keys(
            &a_ephemeral,
            &b_ephemeral.public_bytes(),
            &a_nonce,
            &b_nonce,
            true,
        )
        .unwrap();
        let b_keys = derive_session_keys(
            &b_ephemeral,
            &a_ephemeral.public_bytes(),
            &b_nonce,
            &a_nonce,
            false,
        )
        .unwrap();

        assert_eq!(a_keys.send_mac_key, b_keys.receive_mac_key);
        assert_eq!(a_keys.receive_mac_key, b_keys.send_mac_key);
        assert_ne!(a_keys.send_mac_key, a_keys.receive_mac_key);
    }
}
