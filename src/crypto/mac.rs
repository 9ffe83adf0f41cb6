use hmac::{Hmac, Mac as HmacTrait};
use sha2::Sha256;

use crate::error::OverlayError;
use crate::wire::messages::Uint256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the MAC over `(sequence ‖ encoded-message-body)` with the given
/// per-direction key (section 4.1 "Per-message MAC"). `encoded_message` is
/// the XDR encoding of the `Message` body alone, not the envelope.
pub fn compute_mac(key: &Uint256, sequence: u64, encoded_message: &[u8]) -> Uint256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&sequence.to_be_bytes());
    mac.update(encoded_message);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Verifies a received MAC in constant time (via the `hmac` crate's
/// `verify_slice`, which compares digests without early exit). Returns
/// `MacMismatch` on any failure — the caller still advances its receive
/// sequence counter afterward, per the spec.
pub fn verify_mac(
    key: &Uint256,
    sequence: u64,
    encoded_message: &[u8],
    received_mac: &Uint256,
) -> Result<(), OverlayError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&sequence.to_be_bytes());
    mac.update(encoded_message);
    mac.verify_slice(received_mac)
        .map_err(|_| OverlayError::MacMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_mac_verifies() {
        let key = [5u8; 32];
        let body = b"encoded message body";
        let mac = compute_mac(&key, 12, body);
        verify_mac(&key, 12, body, &mac).unwrap();
    }

    #[test]
    fn wrong_sequence_fails_verification() {
        let key = [5u8; 32];
        let body = b"encoded message body";
        let mac = compute_mac(&key, 12, body);
        assert!(verify_mac(&key, 13, body, &mac).is_err());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let key = [5u8; 32];
        let mac = compute_mac(&key, 12, b"original");
        assert!(verify_mac(&key, 12, b"tampered!", &mac).is_err());
    }

    #[test]
    fn tampered_mac_bit_fails_verification() {
        let key = [5u8; 32];
        let body = b"encoded message body";
        let mut mac = compute_mac(&key, 12, body);
        mac[0] ^= 0x01;
        assert!(verify_mac(&key, 12, body, &mac).is_err());
    }
}
