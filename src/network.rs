#![allow(dead_code)]

use sha2::{Digest, Sha256};

/// A network identifier. The overlay rejects a handshake whose claimed
/// network id does not match ours (`WrongNetwork`, section 4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    passphrase: String,
}

impl Network {
    pub fn new(passphrase: impl Into<String>) -> Network {
        Network {
            passphrase: passphrase.into(),
        }
    }

    pub fn public_network() -> Network {
        Self::new("Public Global Stellar Network ; September 2015")
    }

    pub fn test_network() -> Network {
        Self::new("Test SDF Network ; September 2015")
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// The network id carried in HELLO and mixed into the AuthCert
    /// signature: the hash of the network passphrase.
    pub fn id(&self) -> [u8; 32] {
        let digest = Sha256::digest(self.passphrase.as_bytes());
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::Network;

    #[test]
    fn public_network_id_matches_known_value() {
        let network = Network::public_network();
        let id = network.id();
        let expected: [u8; 32] = [
            0x7A, 0xC3, 0x39, 0x97, 0x54, 0x4E, 0x31, 0x75, 0xD2, 0x66, 0xBD, 0x02, 0x24, 0x39,
            0xB2, 0x2C, 0xDB, 0x16, 0x50, 0x8C, 0x01, 0x16, 0x3F, 0x26, 0xE5, 0xCB, 0x2A, 0x3E,
            0x10, 0x45, 0xA9, 0x79,
        ];
        assert_eq!(id, expected);
    }

    #[test]
    fn test_network_id_matches_known_value() {
        let network = Network::test_network();
        let id = network.id();
        let expected: [u8; 32] = [
            0xCE, 0xE0, 0x30, 0x2D, 0x59, 0x84, 0x4D, 0x32, 0xBD, 0xCA, 0x91, 0x5C, 0x82, 0x03,
            0xDD, 0x44, 0xB3, 0x3F, 0xBB, 0x7E, 0xDC, 0x19, 0x05, 0x1E, 0xA3, 0x7A, 0xBE, 0xDF,
            0x28, 0xEC, 0xD4, 0x72,
        ];
        assert_eq!(id, expected);
    }

    #[test]
    fn different_passphrases_yield_different_ids() {
        assert_ne!(Network::public_network().id(), Network::test_network().id());
    }
}
