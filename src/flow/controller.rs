use std::time::{Duration, Instant};

use crate::config::OverlayConfig;
use crate::error::OverlayError;
use crate::wire::messages::{SendMore, SendMoreExtended};

use super::window::{AxisState, InboundAxis, OutboundAxis, TotalBudget};

/// How many inbound-axis credits we coalesce before actually emitting a
/// `SEND_MORE`/`SEND_MORE_EXTENDED` grant (section 4.2 "Inbound
/// accounting"). A small ceiling grants back on (almost) every message; a
/// large one batches grants to cut down on control-message chatter.
fn grant_threshold(ceiling: u64) -> u64 {
    (ceiling / 4).max(1)
}

/// Two-axis (messages, bytes) per-direction credit accounting for one
/// connection (section 4.2). The byte axis is only ever consulted when
/// `byte_axis_enabled` is true, which the session sets once both sides'
/// AUTH flags and overlay versions negotiate it.
pub struct FlowController {
    message_inbound: InboundAxis,
    message_total_inbound: Option<TotalBudget>,
    message_outbound: OutboundAxis,

    byte_inbound: InboundAxis,
    byte_outbound: OutboundAxis,
    byte_axis_enabled: bool,

    max_send_more_increment: u64,
    pending_grants: Vec<OutgoingGrant>,
}

/// A grant to emit on the wire, produced by `release_inbound_flood` once
/// enough credit has accumulated.
pub enum OutgoingGrant {
    Messages(SendMore),
    MessagesAndBytes(SendMoreExtended),
}

impl FlowController {
    pub fn new(config: &OverlayConfig) -> Self {
        FlowController {
            message_inbound: InboundAxis::new(config.peer_flood_reading_capacity as u64),
            message_total_inbound: Some(TotalBudget::new(config.peer_read_batch_size as u64)),
            message_outbound: OutboundAxis::new(),
            byte_inbound: InboundAxis::new(config.flood_byte_capacity as u64),
            byte_outbound: OutboundAxis::new(),
            byte_axis_enabled: false,
            max_send_more_increment: config.max_send_more_increment,
            pending_grants: Vec::new(),
        }
    }

    pub fn enable_byte_axis(&mut self) {
        self.byte_axis_enabled = true;
    }

    pub fn byte_axis_enabled(&self) -> bool {
        self.byte_axis_enabled
    }

    /// Reads from the socket are suspended whenever this is false (section
    /// 4.2 "Backpressure", section 5 "Suspension points").
    pub fn can_read(&self) -> bool {
        self.message_inbound.state() == AxisState::Open
    }

    /// Admits one arriving message — of any category, flood or not —
    /// against the total in-flight inbound budget (section 4.2: "caps total
    /// in-flight (flood + non-flood) messages"). Must be paired with
    /// `release_inbound` once the message has been dispatched or discarded.
    pub fn admit_inbound(&mut self) -> Result<(), OverlayError> {
        if let Some(total) = &mut self.message_total_inbound {
            if !total.try_admit() {
                return Err(OverlayError::FloodWithoutCredit(
                    "total inbound message budget exhausted".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Releases the total-budget slot taken by a matching `admit_inbound`.
    pub fn release_inbound(&mut self) {
        if let Some(total) = &mut self.message_total_inbound {
            total.release();
        }
    }

    /// Accounts one arriving flood message of `byte_cost` encoded bytes
    /// against the flood-only axes. Returns an error if the peer has
    /// overrun its grant on either axis — the caller must drop the
    /// connection in that case.
    pub fn consume_inbound_flood(&mut self, byte_cost: u64) -> Result<(), OverlayError> {
        if !self.message_inbound.consume(1) {
            return Err(OverlayError::FloodWithoutCredit(
                "unexpected flood message, peer at capacity".to_string(),
            ));
        }
        if self.byte_axis_enabled && !self.byte_inbound.consume(byte_cost) {
            return Err(OverlayError::FloodWithoutCredit(
                "unexpected flood message, peer at byte capacity".to_string(),
            ));
        }
        Ok(())
    }

    /// Called once processing of an inbound flood message finishes;
    /// releases its flood-axis credit. If the coalesced return has crossed
    /// the threshold, queues a grant for the session to send; drain it with
    /// `take_pending_grants`.
    pub fn release_inbound_flood(&mut self, byte_cost: u64) {
        let message_threshold = grant_threshold(self.message_inbound.ceiling());
        let message_grant = self.message_inbound.release(1, message_threshold);

        if self.byte_axis_enabled {
            let byte_threshold = grant_threshold(self.byte_inbound.ceiling());
            let byte_grant = self.byte_inbound.release(byte_cost, byte_threshold);
            if message_grant.is_some() || byte_grant.is_some() {
                self.pending_grants.push(OutgoingGrant::MessagesAndBytes(SendMoreExtended {
                    num_messages: message_grant.unwrap_or(0) as u32,
                    num_bytes: byte_grant.unwrap_or(0) as u32,
                }));
            }
        } else if let Some(n) = message_grant {
            self.pending_grants.push(OutgoingGrant::Messages(SendMore {
                num_messages: n as u32,
            }));
        }
    }

    /// Drains any grants accumulated by `release_inbound_flood` since the
    /// last call, for the session's send loop to put on the wire.
    pub fn take_pending_grants(&mut self) -> Vec<OutgoingGrant> {
        std::mem::take(&mut self.pending_grants)
    }

    /// Whether an outgoing flood-class message of `byte_cost` may be
    /// released to the wire right now (section 4.2 "Outbound gating").
    pub fn can_send_flood(&self, byte_cost: u64) -> bool {
        let message_ok = self.message_outbound.capacity() >= 1;
        let byte_ok = !self.byte_axis_enabled || self.byte_outbound.capacity() >= byte_cost;
        message_ok && byte_ok
    }

    /// Spends outbound credit for a flood-class message about to be sent.
    /// Caller must have checked `can_send_flood` first; this re-checks
    /// atomically and returns false (spending nothing) if credit vanished
    /// in between.
    pub fn try_spend_outbound_flood(&mut self, byte_cost: u64) -> bool {
        if !self.can_send_flood(byte_cost) {
            return false;
        }
        let spent_messages = self.message_outbound.try_spend(1);
        if self.byte_axis_enabled {
            let spent_bytes = self.byte_outbound.try_spend(byte_cost);
            spent_messages && spent_bytes
        } else {
            spent_messages
        }
    }

    /// Applies a validated `SEND_MORE` from the peer.
    pub fn record_send_more(&mut self, grant: &SendMore, now: Instant) -> Result<(), OverlayError> {
        self.validate_increment(grant.num_messages as u64)?;
        self.message_outbound.grant(grant.num_messages as u64, now);
        Ok(())
    }

    /// Applies a validated `SEND_MORE_EXTENDED` from the peer. Rejected
    /// outright on a connection that never negotiated the byte axis
    /// (section 4.2 "Validation").
    pub fn record_send_more_extended(
        &mut self,
        grant: &SendMoreExtended,
        now: Instant,
    ) -> Result<(), OverlayError> {
        if !self.byte_axis_enabled {
            return Err(OverlayError::MalformedSendMore(
                "SEND_MORE_EXTENDED on a connection without byte flow control".to_string(),
            ));
        }
        self.validate_increment(grant.num_messages as u64)?;
        self.validate_increment(grant.num_bytes as u64)?;
        self.message_outbound.grant(grant.num_messages as u64, now);
        self.byte_outbound.grant(grant.num_bytes as u64, now);
        Ok(())
    }

    fn validate_increment(&self, amount: u64) -> Result<(), OverlayError> {
        if amount > self.max_send_more_increment {
            return Err(OverlayError::MalformedSendMore(format!(
                "increment {amount} exceeds configured bound {}",
                self.max_send_more_increment
            )));
        }
        Ok(())
    }

    /// Section 4.2 "Liveness": true once the peer has granted no outbound
    /// credit for at least `threshold` since the last grant (or ever, if no
    /// grant has arrived since GOT_AUTH and `since_auth` has elapsed).
    pub fn is_flow_idle(&self, now: Instant, threshold: Duration, since_auth: Instant) -> bool {
        match self.message_outbound.last_grant_at() {
            Some(last) => now.duration_since(last) >= threshold,
            None => now.duration_since(since_auth) >= threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> FlowController {
        FlowController::new(&OverlayConfig {
            peer_flood_reading_capacity: 4,
            flood_byte_capacity: 100,
            max_send_more_increment: 1000,
            ..OverlayConfig::default()
        })
    }

    #[test]
    fn consume_blocks_reads_once_capacity_hits_zero() {
        let mut fc = controller();
        for _ in 0..4 {
            fc.consume_inbound_flood(10).unwrap();
        }
        assert!(!fc.can_read());
        assert!(fc.consume_inbound_flood(1).is_err());
    }

    #[test]
    fn release_eventually_emits_a_grant() {
        let mut fc = FlowController::new(&OverlayConfig {
            peer_flood_reading_capacity: 8,
            flood_byte_capacity: 100,
            max_send_more_increment: 1000,
            ..OverlayConfig::default()
        });
        for _ in 0..8 {
            fc.consume_inbound_flood(1).unwrap();
        }
        fc.release_inbound_flood(1);
        assert!(fc.take_pending_grants().is_empty());
        for _ in 0..3 {
            fc.release_inbound_flood(1);
        }
        let grants = fc.take_pending_grants();
        assert_eq!(grants.len(), 1);
        assert!(matches!(grants[0], OutgoingGrant::Messages(_)));
        assert!(fc.can_read());
    }

    #[test]
    fn outbound_send_requires_credit() {
        let mut fc = controller();
        assert!(!fc.can_send_flood(1));
        fc.record_send_more(&SendMore { num_messages: 2 }, Instant::now())
            .unwrap();
        assert!(fc.try_spend_outbound_flood(1));
        assert!(fc.try_spend_outbound_flood(1));
        assert!(!fc.try_spend_outbound_flood(1));
    }

    #[test]
    fn send_more_extended_rejected_without_byte_axis() {
        let mut fc = controller();
        let err = fc
            .record_send_more_extended(
                &SendMoreExtended {
                    num_messages: 1,
                    num_bytes: 1,
                },
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(err, OverlayError::MalformedSendMore(_)));
    }

    #[test]
    fn oversized_increment_is_rejected() {
        let mut fc = controller();
        let err = fc
            .record_send_more(&SendMore { num_messages: 10_000 }, Instant::now())
            .unwrap_err();
        assert!(matches!(err, OverlayError::MalformedSendMore(_)));
    }

    #[test]
    fn zero_increment_is_accepted_as_keepalive() {
        let mut fc = controller();
        fc.record_send_more(&SendMore { num_messages: 0 }, Instant::now())
            .unwrap();
        assert!(!fc.can_send_flood(1));
    }

    #[test]
    fn flow_idle_detected_after_threshold_with_no_grant_since_auth() {
        let fc = controller();
        let auth_at = Instant::now();
        let later = auth_at + Duration::from_secs(61);
        assert!(fc.is_flow_idle(later, Duration::from_secs(60), auth_at));
    }
}
