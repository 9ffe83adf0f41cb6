pub mod handshake;
pub mod identity;
pub mod mac;

pub use handshake::{build_auth_cert, derive_session_keys, verify_auth_cert, EphemeralKeys, SessionKeys};
pub use identity::LocalIdentity;
pub use mac::{compute_mac, verify_mac};
