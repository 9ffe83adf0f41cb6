//! Thin facades onto the systems this overlay core treats as external
//! collaborators (section 1 "Deliberately out of scope", section 6
//! "Consumed collaborator interfaces"). The overlay core depends only on
//! these traits; the consensus protocol, ledger, peer directory, and ban
//! list live elsewhere and are injected at session construction time.
//!
//! Grounded in the same split the teacher uses between `overlay::Peer` (the
//! wire-protocol state machine) and `database::Peer` (the persisted peer
//! record it consults), generalized to named traits so tests can supply
//! mock implementations, in the style of `general_scp`'s `HerderDriver`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::wire::messages::{NodeId, PeerAddress, ScpEnvelope, ScpQuorumSet, TransactionEnvelope, TxSetFrame, Uint256};

/// Outcome of handing a received SCP envelope to the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpRecvOutcome {
    Processed,
    Discarded,
}

/// Outcome of offering a received transaction to the consensus engine's
/// pending-transaction pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxRecvOutcome {
    Pending,
    Duplicate,
    Rejected,
}

/// `isBanned(identity) -> bool` (section 6).
pub trait BanList: Send + Sync {
    fn is_banned(&self, node_id: &NodeId) -> bool;
}

/// `update`/`ensureExists`/`getPeersToSend` (section 6). Backs GET_PEERS /
/// PEERS handling.
pub trait PeerDirectory: Send + Sync {
    fn update(&self, address: &PeerAddress);
    fn ensure_exists(&self, address: &PeerAddress);
    fn get_peers_to_send(&self, max: usize, exclude: &NodeId) -> Vec<PeerAddress>;
}

/// The Consensus Engine collaborator (section 6). All methods are
/// synchronous facades; the real engine may dispatch internally however it
/// likes, but from the overlay's point of view a call either completes or
/// the overlay treats the connection as unable to proceed.
pub trait ConsensusEngine: Send + Sync {
    fn recv_scp_envelope(&self, envelope: &ScpEnvelope) -> ScpRecvOutcome;
    fn recv_tx_set(&self, hash: &Uint256, frame: &TxSetFrame);
    fn recv_transaction(&self, tx: &TransactionEnvelope) -> TxRecvOutcome;
    fn get_tx_set(&self, hash: &Uint256) -> Option<TxSetFrame>;
    fn get_qset(&self, hash: &Uint256) -> Option<ScpQuorumSet>;
    fn get_tx(&self, hash: &Uint256) -> Option<TransactionEnvelope>;
    fn is_banned_tx(&self, hash: &Uint256) -> bool;
    fn tracking_consensus_ledger_index(&self) -> u32;
    fn peer_doesnt_have(&self, kind: crate::wire::messages::MessageType, hash: &Uint256, peer: &NodeId);
    /// `sendSCPStateToPeer(ledgerSeq, peer)` (section 6), triggered by an
    /// inbound GET_SCP_STATE.
    fn send_scp_state_to_peer(&self, ledger_seq: u32, peer: &NodeId);
}

/// `isSynced`/`getLastClosedLedgerHeader` (section 6).
pub trait Ledger: Send + Sync {
    fn is_synced(&self) -> bool;
    fn last_closed_ledger_seq(&self) -> u32;
}

/// `relayOrProcessRequest`/`relayOrProcessResponse` (section 6).
pub trait SurveyManager: Send + Sync {
    fn relay_or_process_request(&self, msg: &crate::wire::messages::SurveyRequest, peer: &NodeId);
    fn relay_or_process_response(&self, msg: &crate::wire::messages::SurveyResponse, peer: &NodeId);
}

/// In-memory mock collaborators sufficient to drive the end-to-end
/// scenarios in section 8 without a real ledger or consensus engine
/// attached, analogous to `general_scp`'s `mock::herder`.
pub mod mock {
    use super::*;

    #[derive(Default)]
    pub struct MockBanList {
        banned: Mutex<Vec<NodeId>>,
    }

    impl MockBanList {
        pub fn ban(&self, node_id: NodeId) {
            self.banned.lock().unwrap().push(node_id);
        }
    }

    impl BanList for MockBanList {
        fn is_banned(&self, node_id: &NodeId) -> bool {
            self.banned.lock().unwrap().contains(node_id)
        }
    }

    #[derive(Default)]
    pub struct MockPeerDirectory {
        known: Mutex<Vec<PeerAddress>>,
    }

    impl PeerDirectory for MockPeerDirectory {
        fn update(&self, address: &PeerAddress) {
            let mut known = self.known.lock().unwrap();
            if !known.iter().any(|a| a.ip == address.ip && a.port == address.port) {
                known.push(address.clone());
            }
        }

        fn ensure_exists(&self, address: &PeerAddress) {
            self.update(address);
        }

        fn get_peers_to_send(&self, max: usize, _exclude: &NodeId) -> Vec<PeerAddress> {
            self.known.lock().unwrap().iter().take(max).cloned().collect()
        }
    }

    /// Holds transactions "known" to the engine, keyed by hash, so tests can
    /// exercise the advert/demand/deliver pull protocol (section 8 scenario
    /// 4) without a real mempool.
    #[derive(Default)]
    pub struct MockConsensusEngine {
        transactions: Mutex<HashMap<Uint256, TransactionEnvelope>>,
        banned_txs: Mutex<Vec<Uint256>>,
        tracking_ledger: Mutex<u32>,
    }

    impl MockConsensusEngine {
        pub fn insert_transaction(&self, hash: Uint256, tx: TransactionEnvelope) {
            self.transactions.lock().unwrap().insert(hash, tx);
        }

        pub fn ban_transaction(&self, hash: Uint256) {
            self.banned_txs.lock().unwrap().push(hash);
        }

        pub fn set_tracking_ledger(&self, seq: u32) {
            *self.tracking_ledger.lock().unwrap() = seq;
        }
    }

    impl ConsensusEngine for MockConsensusEngine {
        fn recv_scp_envelope(&self, _envelope: &ScpEnvelope) -> ScpRecvOutcome {
            ScpRecvOutcome::Processed
        }

        fn recv_tx_set(&self, _hash: &Uint256, _frame: &TxSetFrame) {}

        fn recv_transaction(&self, tx: &TransactionEnvelope) -> TxRecvOutcome {
            if tx.0.is_empty() {
                TxRecvOutcome::Rejected
            } else {
                TxRecvOutcome::Pending
            }
        }

        fn get_tx_set(&self, _hash: &Uint256) -> Option<TxSetFrame> {
            None
        }

        fn get_qset(&self, _hash: &Uint256) -> Option<ScpQuorumSet> {
            None
        }

        fn get_tx(&self, hash: &Uint256) -> Option<TransactionEnvelope> {
            self.transactions.lock().unwrap().get(hash).cloned()
        }

        fn is_banned_tx(&self, hash: &Uint256) -> bool {
            self.banned_txs.lock().unwrap().contains(hash)
        }

        fn tracking_consensus_ledger_index(&self) -> u32 {
            *self.tracking_ledger.lock().unwrap()
        }

        fn peer_doesnt_have(&self, _kind: crate::wire::messages::MessageType, _hash: &Uint256, _peer: &NodeId) {}

        fn send_scp_state_to_peer(&self, _ledger_seq: u32, _peer: &NodeId) {}
    }

    #[derive(Default)]
    pub struct MockLedger {
        synced: Mutex<bool>,
        seq: Mutex<u32>,
    }

    impl MockLedger {
        pub fn set_synced(&self, synced: bool) {
            *self.synced.lock().unwrap() = synced;
        }

        pub fn set_seq(&self, seq: u32) {
            *self.seq.lock().unwrap() = seq;
        }
    }

    impl Ledger for MockLedger {
        fn is_synced(&self) -> bool {
            *self.synced.lock().unwrap()
        }

        fn last_closed_ledger_seq(&self) -> u32 {
            *self.seq.lock().unwrap()
        }
    }

    #[derive(Default)]
    pub struct MockSurveyManager;

    impl SurveyManager for MockSurveyManager {
        fn relay_or_process_request(&self, _msg: &crate::wire::messages::SurveyRequest, _peer: &NodeId) {}
        fn relay_or_process_response(&self, _msg: &crate::wire::messages::SurveyResponse, _peer: &NodeId) {}
    }
}
