use std::time::Duration;

use serde::Deserialize;

/// Tunables for the overlay core. Values default to the constants named in
/// the spec (`PEER_FLOOD_READING_CAPACITY`, the straggler/idle timeouts,
/// advert batching bounds, the 16 MiB frame ceiling). Parsing the
/// validator's full configuration file is out of scope; this struct only
/// owns the overlay's own knobs, optionally overridden from a TOML
/// fragment the caller has already located.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Initial inbound message-axis credit grant (section 4.2).
    pub peer_flood_reading_capacity: u32,
    /// Ceiling on the total in-flight (flood + non-flood) inbound message
    /// budget, separate from the flood-only axis.
    pub peer_read_batch_size: u32,
    /// Byte-axis flood ceiling, used only when both sides advertise the
    /// byte flow-control capability in AUTH.
    pub flood_byte_capacity: u32,
    /// Overlay version at or above which byte-axis flow control is
    /// negotiable.
    pub byte_flow_control_min_version: u32,
    /// Minimum and current overlay protocol versions this node speaks.
    pub overlay_min_version: u32,
    pub overlay_version: u32,
    /// Ledger protocol version reported in HELLO.
    pub ledger_version: u32,
    /// Human-readable version string reported in HELLO.
    pub version_string: String,

    /// Maximum number of hashes batched into one FLOOD_ADVERT.
    pub max_advert_batch_size: usize,
    /// Hard ceiling on a single PendingAdvertBatch; hashes beyond this are
    /// dropped silently rather than growing the batch unbounded.
    pub max_advert_batch_vector: usize,
    /// How long a PendingAdvertBatch waits before it is flushed anyway.
    pub advert_flush_interval: Duration,
    /// Capacity of the bounded, randomized-eviction AdvertHistory.
    pub advert_history_capacity: usize,

    /// Handshake timeout: how long a connection may sit before GOT_AUTH
    /// without a read or write before it is dropped as idle.
    pub handshake_io_timeout: Duration,
    /// Same liveness check, but for an already-authenticated peer.
    pub peer_io_timeout: Duration,
    /// How long the peer may withhold SEND_MORE before we consider the
    /// connection flow-idle and drop it.
    pub flow_idle_timeout: Duration,
    /// How long our outbound queue may fail to drain before we consider the
    /// peer a straggler.
    pub straggler_timeout: Duration,
    /// Period of the recurring liveness-check timer.
    pub liveness_check_interval: Duration,

    /// Maximum droppable-class queue depth before load-shedding kicks in —
    /// shared by the outbound write queue (`sendMessage`) and the inbound
    /// scheduler's droppable queue (section 4.3, section 5).
    pub max_droppable_queue_depth: usize,

    /// Maximum encoded frame size accepted on the wire (section 6).
    pub max_frame_bytes: usize,

    /// Sane upper bound on a single SEND_MORE / SEND_MORE_EXTENDED credit
    /// increment, used to reject malformed grants.
    pub max_send_more_increment: u64,

    /// Maximum number of peer addresses returned from one GET_PEERS.
    pub max_peers_to_send: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            peer_flood_reading_capacity: 200,
            peer_read_batch_size: 1000,
            flood_byte_capacity: 300_000,
            byte_flow_control_min_version: 33,
            overlay_min_version: 27,
            overlay_version: 35,
            ledger_version: 21,
            version_string: "overlay-core[0.1.0]".to_string(),

            max_advert_batch_size: 100,
            max_advert_batch_vector: 1000,
            advert_flush_interval: Duration::from_millis(200),
            advert_history_capacity: 50_000,

            handshake_io_timeout: Duration::from_secs(5),
            peer_io_timeout: Duration::from_secs(120),
            flow_idle_timeout: Duration::from_secs(60),
            straggler_timeout: Duration::from_secs(120),
            liveness_check_interval: Duration::from_secs(5),

            max_droppable_queue_depth: 1500,

            max_frame_bytes: 16 * 1024 * 1024,

            max_send_more_increment: 10_000,

            max_peers_to_send: 50,
        }
    }
}

impl OverlayConfig {
    /// Load overrides from a TOML fragment, falling back to defaults for
    /// anything unspecified. Mirrors the teacher's `toml`-based config
    /// loading, scoped to this crate's own knobs.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = OverlayConfig::default();
        assert!(cfg.peer_flood_reading_capacity > 0);
        assert!(cfg.max_advert_batch_size <= cfg.max_advert_batch_vector);
        assert_eq!(cfg.max_frame_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg = OverlayConfig::from_toml_str("peer_flood_reading_capacity = 42\n").unwrap();
        assert_eq!(cfg.peer_flood_reading_capacity, 42);
        assert_eq!(
            cfg.max_advert_batch_size,
            OverlayConfig::default().max_advert_batch_size
        );
    }
}
