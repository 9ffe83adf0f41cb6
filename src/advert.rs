use std::collections::HashMap;

use rand::Rng;

use crate::collaborators::ConsensusEngine;
use crate::wire::messages::{FloodAdvert, FloodDemand, TransactionEnvelope, Uint256};

/// An ordered batch of hashes queued for the next FLOOD_ADVERT, flushed
/// once it reaches `max_batch_size` or a flush timer fires (section 4.4
/// "Outgoing advertisement"). Hashes beyond `max_vector_bound` are dropped
/// silently rather than growing unbounded.
#[derive(Debug, Default)]
pub struct PendingAdvertBatch {
    hashes: Vec<Uint256>,
    max_batch_size: usize,
    max_vector_bound: usize,
}

impl PendingAdvertBatch {
    pub fn new(max_batch_size: usize, max_vector_bound: usize) -> Self {
        PendingAdvertBatch {
            hashes: Vec::new(),
            max_batch_size,
            max_vector_bound,
        }
    }

    /// Enqueues a hash. Returns true if the batch should be flushed
    /// immediately because it just reached `max_batch_size`.
    pub fn push(&mut self, hash: Uint256) -> bool {
        if self.hashes.len() >= self.max_vector_bound {
            return false;
        }
        self.hashes.push(hash);
        self.hashes.len() >= self.max_batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Drains the batch into a FLOOD_ADVERT, ready for the send path.
    pub fn flush(&mut self) -> Option<FloodAdvert> {
        if self.hashes.is_empty() {
            return None;
        }
        Some(FloodAdvert {
            tx_hashes: std::mem::take(&mut self.hashes),
        })
    }
}

/// A bounded, randomized-eviction cache from transaction hash to the ledger
/// sequence at which we last saw it advertised (section 3 "AdvertHistory").
/// Used to suppress redundant adverts to a peer who already knows about a
/// hash, and pruned as ledgers seal.
#[derive(Debug)]
pub struct AdvertHistory {
    capacity: usize,
    entries: Vec<(Uint256, u32)>,
    index: HashMap<Uint256, usize>,
}

impl AdvertHistory {
    pub fn new(capacity: usize) -> Self {
        AdvertHistory {
            capacity,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records that hash `h` was advertised (by us or to us) at `ledger_seq`.
    pub fn record(&mut self, hash: Uint256, ledger_seq: u32) {
        if let Some(&idx) = self.index.get(&hash) {
            self.entries[idx].1 = ledger_seq;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_random();
        }
        let idx = self.entries.len();
        self.entries.push((hash, ledger_seq));
        self.index.insert(hash, idx);
    }

    /// Does the peer already know about `hash`? Used to suppress
    /// re-advertising.
    pub fn knows(&self, hash: &Uint256) -> bool {
        self.index.contains_key(hash)
    }

    fn evict_random(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let idx = rand::thread_rng().gen_range(0..self.entries.len());
        self.remove_at(idx);
    }

    fn remove_at(&mut self, idx: usize) {
        let last = self.entries.len() - 1;
        self.entries.swap(idx, last);
        let (removed_hash, _) = self.entries.pop().expect("checked non-empty by caller");
        self.index.remove(&removed_hash);
        if idx != last {
            let moved_hash = self.entries[idx].0;
            self.index.insert(moved_hash, idx);
        }
    }

    /// Prunes entries recorded at a ledger sequence below `floor`, called
    /// each time the ledger closes (section 4.4 "Advert memory").
    pub fn clear_below(&mut self, floor: u32) {
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].1 < floor {
                self.remove_at(i);
            } else {
                i += 1;
            }
        }
    }
}

/// Outcome of serving one FLOOD_DEMAND (section 4.4 "Incoming demand").
#[derive(Debug, Default)]
pub struct DemandOutcome {
    pub fulfilled: Vec<TransactionEnvelope>,
    pub unfulfilled_unknown: u32,
    pub unfulfilled_banned: u32,
}

/// Serves an inbound FLOOD_DEMAND against the consensus engine's
/// transaction pool. Unfulfillable demands are never acknowledged
/// negatively over the wire — only counted for metrics.
pub fn serve_demand(demand: &FloodDemand, engine: &dyn ConsensusEngine) -> DemandOutcome {
    let mut outcome = DemandOutcome::default();
    for hash in &demand.tx_hashes {
        if let Some(tx) = engine.get_tx(hash) {
            outcome.fulfilled.push(tx);
        } else if engine.is_banned_tx(hash) {
            outcome.unfulfilled_banned += 1;
        } else {
            outcome.unfulfilled_unknown += 1;
        }
    }
    outcome
}

/// Builds the outgoing FLOOD_DEMAND for hashes the local transaction
/// fetcher (external to this core) wants from this peer.
pub fn build_tx_demand(hashes: Vec<Uint256>) -> FloodDemand {
    FloodDemand { tx_hashes: hashes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mock::MockConsensusEngine;

    #[test]
    fn batch_flushes_once_max_size_reached() {
        let mut batch = PendingAdvertBatch::new(2, 10);
        assert!(!batch.push([1u8; 32]));
        assert!(batch.push([2u8; 32]));
        let advert = batch.flush().unwrap();
        assert_eq!(advert.tx_hashes.len(), 2);
        assert!(batch.is_empty());
    }

    #[test]
    fn batch_drops_overflow_beyond_vector_bound_silently() {
        let mut batch = PendingAdvertBatch::new(100, 2);
        assert!(!batch.push([1u8; 32]));
        assert!(!batch.push([2u8; 32]));
        assert!(!batch.push([3u8; 32]));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn history_never_exceeds_capacity() {
        let mut history = AdvertHistory::new(4);
        for i in 0..20u8 {
            let mut hash = [0u8; 32];
            hash[0] = i;
            history.record(hash, i as u32);
        }
        assert!(history.len() <= history.capacity());
    }

    #[test]
    fn clear_below_drops_only_stale_entries() {
        let mut history = AdvertHistory::new(10);
        history.record([1u8; 32], 5);
        history.record([2u8; 32], 15);
        history.clear_below(10);
        assert!(!history.knows(&[1u8; 32]));
        assert!(history.knows(&[2u8; 32]));
    }

    #[test]
    fn record_updates_existing_entry_in_place_without_growing() {
        let mut history = AdvertHistory::new(10);
        history.record([1u8; 32], 5);
        history.record([1u8; 32], 9);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn demand_reports_fulfilled_unknown_and_banned_separately() {
        let engine = MockConsensusEngine::default();
        let known = [1u8; 32];
        let banned = [2u8; 32];
        let unknown = [3u8; 32];
        engine.insert_transaction(known, TransactionEnvelope(vec![9]));
        engine.ban_transaction(banned);

        let outcome = serve_demand(
            &FloodDemand {
                tx_hashes: vec![known, banned, unknown],
            },
            &engine,
        );

        assert_eq!(outcome.fulfilled.len(), 1);
        assert_eq!(outcome.unfulfilled_banned, 1);
        assert_eq!(outcome.unfulfilled_unknown, 1);
    }
}
