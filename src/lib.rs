//! Peer-to-peer overlay core: authenticated, flow-controlled, ordered
//! message exchange between validator nodes, plus the pull-based
//! transaction flood protocol layered on top of it.
//!
//! The crate is organized per-connection, leaves first: [`wire`] frames
//! bytes into messages, [`crypto`] handles the handshake and per-message
//! MAC, [`flow`] accounts credit, [`router`] categorizes inbound traffic,
//! [`advert`] runs the advertise/demand/deliver protocol, and [`session`]
//! composes all of it into one connection's lifecycle. [`scheduler`] and
//! [`collaborators`] are the concurrency and external-interface seams.

pub mod advert;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod network;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod wire;

pub use config::OverlayConfig;
pub use error::{DropMode, ErrorCode, OverlayError};
pub use metrics::OverlayMetrics;
pub use network::Network;
pub use session::{Collaborators, ConnectionState, DropDirection, PeerSession, Role};
