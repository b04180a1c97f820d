//! Repository traits the core depends on.
//! Implementations own persistence; callers only ever see cloned snapshots.

use crate::types::{
    BlockObservation, MinerRiskRecord, Peer, PlaguedBlockRecord, TransactionObservation,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("Storage operation failed: {0}")]
    Backend(String),
}

/// Per-miner risk accumulation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskRepository: Send + Sync {
    /// Atomically folds one datapoint into the miner's record, creating it if
    /// absent. Updates for the same pubkey must be linearized.
    async fn upsert_risk(
        &self,
        pubkey: &str,
        value: f64,
        block_number: Option<u64>,
    ) -> Result<MinerRiskRecord, StorageError>;

    /// Fetch a single miner record
    async fn get_risk(&self, pubkey: &str) -> Result<Option<MinerRiskRecord>, StorageError>;

    /// Point-in-time copy of every miner record, ordered by pubkey.
    async fn snapshot(&self) -> Result<Vec<MinerRiskRecord>, StorageError>;
}

/// Violation annotations keyed by block number.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViolationRepository: Send + Sync {
    async fn lookup_violation(
        &self,
        block_number: u64,
    ) -> Result<Option<PlaguedBlockRecord>, StorageError>;

    /// Insert or replace the record for `record.number`
    async fn put_violation(&self, record: PlaguedBlockRecord) -> Result<(), StorageError>;

    /// Atomically applies a flag to `block_number`, creating the record if
    /// absent. Label and severity are replaced; `last_violation` keeps the
    /// later timestamp. Flags for the same block must be linearized.
    async fn flag_violation(
        &self,
        block_number: u64,
        label: &str,
        severity: i64,
        timestamp: Option<u64>,
    ) -> Result<PlaguedBlockRecord, StorageError>;

    /// Atomically empties the label on `block_number`. Returns false when no
    /// record exists.
    async fn clear_violation(&self, block_number: u64) -> Result<bool, StorageError>;
}

/// Raw P2P propagation facts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Returns the existing peer or registers a new one.
    async fn get_or_insert_peer(&self, peer_id: &str) -> Result<Peer, StorageError>;

    /// Stores a transaction sighting. Returns false if an identical
    /// `(tx_hash, peer, tx_first_seen)` row already exists.
    async fn record_transaction(
        &self,
        observation: TransactionObservation,
    ) -> Result<bool, StorageError>;

    /// Stores a block sighting and returns it with its assigned id.
    async fn record_block(
        &self,
        observation: BlockObservation,
    ) -> Result<BlockObservation, StorageError>;

    /// Earliest sighting of a transaction hash
    async fn first_transaction_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionObservation>, StorageError>;

    /// Earliest sighting of a block hash
    async fn first_block_by_hash(
        &self,
        block_hash: &str,
    ) -> Result<Option<BlockObservation>, StorageError>;

    /// Every sighting claiming the given block number, earliest first.
    async fn blocks_by_number(
        &self,
        block_number: u64,
    ) -> Result<Vec<BlockObservation>, StorageError>;

    async fn peer_transactions(
        &self,
        peer_id: &str,
    ) -> Result<Vec<TransactionObservation>, StorageError>;

    async fn peer_blocks(&self, peer_id: &str) -> Result<Vec<BlockObservation>, StorageError>;
}
