use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ErrorCode;

/// The fixed set of `overlay.*` counters/meters/timers named in section 6
/// ("Produced observability"). Kept as plain atomics rather than wired to a
/// specific exporter crate, since exporters are a named non-goal; this
/// struct is the seam a real exporter would read from.
#[derive(Debug, Default)]
pub struct OverlayMetrics {
    pub messages_read: AtomicU64,
    pub messages_written: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,

    pub flow_control_send_delays: AtomicU64,
    pub send_more_sent: AtomicU64,
    pub send_more_extended_sent: AtomicU64,

    pub adverts_sent: AtomicU64,
    pub adverts_received: AtomicU64,
    pub demands_sent: AtomicU64,
    pub demands_received: AtomicU64,
    pub flood_fulfilled: AtomicU64,
    pub flood_unfulfilled_unknown: AtomicU64,
    pub flood_unfulfilled_banned: AtomicU64,

    pub connections_authenticated: AtomicU64,
    pub drops_idle_timeout: AtomicU64,
    pub drops_flow_idle_timeout: AtomicU64,
    pub drops_straggler: AtomicU64,
    pub drops_handshake_error: AtomicU64,
    pub drops_auth_error: AtomicU64,
    pub drops_protocol_error: AtomicU64,
    pub drops_policy: AtomicU64,
    pub messages_load_shed: AtomicU64,
}

impl OverlayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, bytes: u64) {
        self.messages_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u64) {
        self.messages_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_send_more(&self) {
        self.send_more_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_more_extended(&self) {
        self.send_more_extended_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_shed(&self) {
        self.messages_load_shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flood_fulfillment(&self, fulfilled: u64, unfulfilled_unknown: u64, unfulfilled_banned: u64) {
        self.flood_fulfilled.fetch_add(fulfilled, Ordering::Relaxed);
        self.flood_unfulfilled_unknown.fetch_add(unfulfilled_unknown, Ordering::Relaxed);
        self.flood_unfulfilled_banned.fetch_add(unfulfilled_banned, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: &str) {
        match reason {
            "idle timeout" => self.drops_idle_timeout.fetch_add(1, Ordering::Relaxed),
            "idle timeout (no new flood requests)" => self.drops_flow_idle_timeout.fetch_add(1, Ordering::Relaxed),
            "straggling (cannot keep up)" => self.drops_straggler.fetch_add(1, Ordering::Relaxed),
            _ => self.drops_protocol_error.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Buckets a connection-fatal error per the section 7 disposition table
    /// it maps to, rather than the fixed liveness-drop strings `record_drop`
    /// matches on.
    pub fn record_error_drop(&self, code: Option<ErrorCode>) {
        match code {
            Some(ErrorCode::Conf) => self.drops_handshake_error.fetch_add(1, Ordering::Relaxed),
            Some(ErrorCode::Auth) => self.drops_auth_error.fetch_add(1, Ordering::Relaxed),
            Some(ErrorCode::Load) => self.drops_policy.fetch_add(1, Ordering::Relaxed),
            _ => self.drops_protocol_error.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot_messages_read(&self) -> u64 {
        self.messages_read.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_read_updates_both_counters() {
        let m = OverlayMetrics::new();
        m.record_read(128);
        m.record_read(64);
        assert_eq!(m.snapshot_messages_read(), 2);
        assert_eq!(m.bytes_read.load(Ordering::Relaxed), 192);
    }

    #[test]
    fn record_flood_fulfillment_splits_into_three_counters() {
        let m = OverlayMetrics::new();
        m.record_flood_fulfillment(1, 2, 3);
        assert_eq!(m.flood_fulfilled.load(Ordering::Relaxed), 1);
        assert_eq!(m.flood_unfulfilled_unknown.load(Ordering::Relaxed), 2);
        assert_eq!(m.flood_unfulfilled_banned.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn record_error_drop_buckets_by_wire_code() {
        let m = OverlayMetrics::new();
        m.record_error_drop(Some(ErrorCode::Conf));
        m.record_error_drop(Some(ErrorCode::Auth));
        m.record_error_drop(Some(ErrorCode::Load));
        m.record_error_drop(None);
        assert_eq!(m.drops_handshake_error.load(Ordering::Relaxed), 1);
        assert_eq!(m.drops_auth_error.load(Ordering::Relaxed), 1);
        assert_eq!(m.drops_policy.load(Ordering::Relaxed), 1);
        assert_eq!(m.drops_protocol_error.load(Ordering::Relaxed), 1);
    }
}
