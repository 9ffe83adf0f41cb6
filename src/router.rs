use crate::wire::messages::Message;

/// Which pipeline an inbound message belongs to (section 4.3). Handshake
/// messages are dispatched synchronously on the receiving task; everything
/// else is tagged with a scheduler class and posted for asynchronous
/// processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    Handshake,
    Control,
    FloodTx,
    InboundConsensusFetch,
    Consensus,
    Survey,
}

/// The cooperative scheduler's task classes (section 5). `Inline` never
/// actually goes through the scheduler queue — it is handled synchronously
/// on the I/O task, matching the spec's "inline, synchronous" dispatch of
/// handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    Inline,
    Normal,
    Droppable,
}

impl MessageCategory {
    pub fn scheduler_class(self) -> TaskClass {
        match self {
            MessageCategory::Handshake => TaskClass::Inline,
            MessageCategory::Control => TaskClass::Normal,
            MessageCategory::FloodTx => TaskClass::Droppable,
            MessageCategory::InboundConsensusFetch => TaskClass::Droppable,
            MessageCategory::Consensus => TaskClass::Normal,
            MessageCategory::Survey => TaskClass::Normal,
        }
    }

    /// Whether this category's messages are discarded outright when the
    /// ledger is not synced (section 4.3 "Drop if out-of-sync" column).
    /// Only flood-class traffic is droppable this way; consensus-fetch
    /// requests are droppable-scheduled but never silently discarded.
    pub fn drop_if_unsynced(self) -> bool {
        matches!(self, MessageCategory::FloodTx)
    }

    /// Whether this category's traffic consumes flow-control credit.
    /// Handshake and control messages bypass credit entirely (section 4.2
    /// "Outbound gating").
    pub fn is_flood_class(self) -> bool {
        matches!(self, MessageCategory::FloodTx)
    }
}

/// Categorizes an inbound message per the table in section 4.3. `TxSet`
/// and `GeneralizedTxSet` are deliberately routed identically — the spec's
/// Open Questions note preserves this from the source system intentionally
/// rather than treating it as an oversight.
pub fn categorize(message: &Message) -> MessageCategory {
    match message {
        Message::Hello(_) | Message::Auth(_) => MessageCategory::Handshake,

        Message::GetPeers(_)
        | Message::Peers(_)
        | Message::ErrorMsg(_)
        | Message::SendMore(_)
        | Message::SendMoreExtended(_) => MessageCategory::Control,

        Message::Transaction(_) | Message::FloodAdvert(_) | Message::FloodDemand(_) => {
            MessageCategory::FloodTx
        }

        Message::GetTxSet(_) | Message::GetScpQuorumSet(_) | Message::GetScpState(_) => {
            MessageCategory::InboundConsensusFetch
        }

        Message::DontHave(_)
        | Message::TxSet(_)
        | Message::GeneralizedTxSet(_)
        | Message::ScpQuorumSet(_)
        | Message::ScpMessage(_) => MessageCategory::Consensus,

        Message::SurveyRequest(_) | Message::SurveyResponse(_) => MessageCategory::Survey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::messages::*;

    #[test]
    fn handshake_messages_are_inline() {
        let hello = Message::Hello(Hello {
            ledger_version: 0,
            overlay_min_version: 0,
            overlay_version: 0,
            version_str: String::new(),
            network_id: [0; 32],
            listening_port: 0,
            peer_id: NodeId([0; 32]),
            cert: AuthCert {
                pubkey: Curve25519Public { key: [0; 32] },
                expiration: 0,
                sig: Signature(vec![]),
            },
            nonce: [0; 32],
        });
        assert_eq!(categorize(&hello), MessageCategory::Handshake);
        assert_eq!(categorize(&hello).scheduler_class(), TaskClass::Inline);
    }

    #[test]
    fn flood_messages_are_droppable_and_consume_credit() {
        let advert = Message::FloodAdvert(FloodAdvert { tx_hashes: vec![] });
        let cat = categorize(&advert);
        assert_eq!(cat, MessageCategory::FloodTx);
        assert_eq!(cat.scheduler_class(), TaskClass::Droppable);
        assert!(cat.drop_if_unsynced());
        assert!(cat.is_flood_class());
    }

    #[test]
    fn consensus_fetch_is_droppable_but_never_discarded() {
        let req = Message::GetTxSet(GetTxSet { tx_set_hash: [0; 32] });
        let cat = categorize(&req);
        assert_eq!(cat.scheduler_class(), TaskClass::Droppable);
        assert!(!cat.drop_if_unsynced());
    }

    #[test]
    fn tx_set_and_generalized_tx_set_route_identically() {
        let a = categorize(&Message::TxSet(TxSetFrame(vec![])));
        let b = categorize(&Message::GeneralizedTxSet(TxSetFrame(vec![])));
        assert_eq!(a, b);
        assert_eq!(a, MessageCategory::Consensus);
    }

    #[test]
    fn control_messages_bypass_flow_control() {
        let send_more = Message::SendMore(SendMore { num_messages: 1 });
        assert!(!categorize(&send_more).is_flood_class());
    }
}
