//! In-process implementation of every repository trait.
//!
//! Miner records live in a `DashMap`; an upsert holds the shard write lock
//! for the whole read-modify-write, so updates to one pubkey are linearized
//! while different pubkeys proceed in parallel.

use crate::storage_traits::{ObservationStore, RiskRepository, StorageError, ViolationRepository};
use crate::types::{
    BlockObservation, MinerRiskRecord, Peer, PlaguedBlockRecord, TransactionObservation,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub struct MemoryStore {
    peers: DashMap<String, Peer>,
    next_peer_id: AtomicU64,
    transactions: DashMap<String, Vec<TransactionObservation>>,
    blocks_by_hash: DashMap<String, Vec<BlockObservation>>,
    blocks_by_number: DashMap<u64, Vec<BlockObservation>>,
    next_block_id: AtomicU64,
    risks: DashMap<String, MinerRiskRecord>,
    violations: DashMap<u64, PlaguedBlockRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn miner_count(&self) -> usize {
        self.risks.len()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn ensure_peer(&self, peer_id: &str) -> Peer {
        self.peers
            .entry(peer_id.to_string())
            .or_insert_with(|| {
                let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(peer_id, id, "Registered new peer");
                Peer {
                    id,
                    peer_id: peer_id.to_string(),
                }
            })
            .value()
            .clone()
    }
}

#[async_trait]
impl RiskRepository for MemoryStore {
    async fn upsert_risk(
        &self,
        pubkey: &str,
        value: f64,
        block_number: Option<u64>,
    ) -> Result<MinerRiskRecord, StorageError> {
        let mut record = self
            .risks
            .entry(pubkey.to_string())
            .or_insert_with(|| MinerRiskRecord::new(pubkey));
        record.apply_datapoint(value, block_number);
        trace!(pubkey, risk = record.risk, numblocks = record.numblocks, "Risk updated");
        Ok(record.value().clone())
    }

    async fn get_risk(&self, pubkey: &str) -> Result<Option<MinerRiskRecord>, StorageError> {
        Ok(self.risks.get(pubkey).map(|r| r.value().clone()))
    }

    async fn snapshot(&self) -> Result<Vec<MinerRiskRecord>, StorageError> {
        let mut records: Vec<MinerRiskRecord> =
            self.risks.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.pubkey.cmp(&b.pubkey));
        Ok(records)
    }
}

#[async_trait]
impl ViolationRepository for MemoryStore {
    async fn lookup_violation(
        &self,
        block_number: u64,
    ) -> Result<Option<PlaguedBlockRecord>, StorageError> {
        Ok(self.violations.get(&block_number).map(|r| r.value().clone()))
    }

    async fn put_violation(&self, record: PlaguedBlockRecord) -> Result<(), StorageError> {
        self.violations.insert(record.number, record);
        Ok(())
    }

    async fn flag_violation(
        &self,
        block_number: u64,
        label: &str,
        severity: i64,
        timestamp: Option<u64>,
    ) -> Result<PlaguedBlockRecord, StorageError> {
        let mut record = self
            .violations
            .entry(block_number)
            .or_insert_with(|| PlaguedBlockRecord::new(block_number));
        record.merge_flag(label, severity, timestamp);
        Ok(record.value().clone())
    }

    async fn clear_violation(&self, block_number: u64) -> Result<bool, StorageError> {
        Ok(match self.violations.get_mut(&block_number) {
            Some(mut record) => {
                record.violations.clear();
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn get_or_insert_peer(&self, peer_id: &str) -> Result<Peer, StorageError> {
        Ok(self.ensure_peer(peer_id))
    }

    async fn record_transaction(
        &self,
        observation: TransactionObservation,
    ) -> Result<bool, StorageError> {
        self.ensure_peer(&observation.peer_id);
        let mut rows = self
            .transactions
            .entry(observation.tx_hash.clone())
            .or_default();
        if rows.iter().any(|row| row.same_identity(&observation)) {
            return Ok(false);
        }
        rows.push(observation);
        Ok(true)
    }

    async fn record_block(
        &self,
        mut observation: BlockObservation,
    ) -> Result<BlockObservation, StorageError> {
        if let Some(peer_id) = observation.peer_id.as_deref() {
            self.ensure_peer(peer_id);
        }
        observation.id = self.next_block_id.fetch_add(1, Ordering::Relaxed) + 1;

        self.blocks_by_hash
            .entry(observation.block_hash.clone())
            .or_default()
            .push(observation.clone());
        if let Some(number) = observation.block_number {
            self.blocks_by_number
                .entry(number)
                .or_default()
                .push(observation.clone());
        }
        Ok(observation)
    }

    async fn first_transaction_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionObservation>, StorageError> {
        Ok(self.transactions.get(tx_hash).and_then(|rows| {
            rows.iter()
                .min_by(|a, b| {
                    a.tx_first_seen
                        .cmp(&b.tx_first_seen)
                        .then_with(|| a.peer_id.cmp(&b.peer_id))
                })
                .cloned()
        }))
    }

    async fn first_block_by_hash(
        &self,
        block_hash: &str,
    ) -> Result<Option<BlockObservation>, StorageError> {
        Ok(self.blocks_by_hash.get(block_hash).and_then(|rows| {
            rows.iter()
                .min_by(|a, b| BlockObservation::first_seen_order(a, b))
                .cloned()
        }))
    }

    async fn blocks_by_number(
        &self,
        block_number: u64,
    ) -> Result<Vec<BlockObservation>, StorageError> {
        let mut rows = self
            .blocks_by_number
            .get(&block_number)
            .map(|rows| rows.value().clone())
            .unwrap_or_default();
        rows.sort_by(BlockObservation::first_seen_order);
        Ok(rows)
    }

    async fn peer_transactions(
        &self,
        peer_id: &str,
    ) -> Result<Vec<TransactionObservation>, StorageError> {
        if !self.peers.contains_key(peer_id) {
            return Err(StorageError::UnknownPeer(peer_id.to_string()));
        }
        let mut rows: Vec<TransactionObservation> = self
            .transactions
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|row| row.peer_id == peer_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(|a, b| {
            a.tx_first_seen
                .cmp(&b.tx_first_seen)
                .then_with(|| a.tx_hash.cmp(&b.tx_hash))
        });
        Ok(rows)
    }

    async fn peer_blocks(&self, peer_id: &str) -> Result<Vec<BlockObservation>, StorageError> {
        if !self.peers.contains_key(peer_id) {
            return Err(StorageError::UnknownPeer(peer_id.to_string()));
        }
        let mut rows: Vec<BlockObservation> = self
            .blocks_by_hash
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|row| row.peer_id.as_deref() == Some(peer_id))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort_by(BlockObservation::first_seen_order);
        Ok(rows)
    }
}
