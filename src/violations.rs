//! Violation annotations on block numbers.
//!
//! The annotator writes `PlaguedBlockRecord`s; the detector derives them from
//! conflicting block sightings in the observation store.

use crate::storage_traits::{ObservationStore, StorageError, ViolationRepository};
use crate::types::PlaguedBlockRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Label used when peers report different hashes for one block number.
pub const DOUBLE_BLOCK: &str = "double-block";

#[derive(Clone)]
pub struct ViolationAnnotator {
    repository: Arc<dyn ViolationRepository>,
}

impl ViolationAnnotator {
    pub fn new(repository: Arc<dyn ViolationRepository>) -> Self {
        Self { repository }
    }

    /// Flags `block_number`. A repeated flag replaces the label and severity
    /// and keeps the later of the two violation timestamps.
    #[instrument(skip(self))]
    pub async fn flag_block(
        &self,
        block_number: u64,
        label: &str,
        severity: i64,
        timestamp: Option<u64>,
    ) -> Result<PlaguedBlockRecord, StorageError> {
        self.repository
            .flag_violation(block_number, label, severity, timestamp)
            .await
    }

    /// Clears the label on `block_number`, leaving the timestamp for history.
    #[instrument(skip(self))]
    pub async fn clear_block(&self, block_number: u64) -> Result<(), StorageError> {
        if !self.repository.clear_violation(block_number).await? {
            debug!(block_number, "No violation record to clear");
        }
        Ok(())
    }
}

/// Flags block numbers that more than one block hash has been seen for.
#[derive(Clone)]
pub struct ViolationDetector {
    observations: Arc<dyn ObservationStore>,
    annotator: ViolationAnnotator,
    severity: i64,
}

impl ViolationDetector {
    pub fn new(
        observations: Arc<dyn ObservationStore>,
        annotator: ViolationAnnotator,
        severity: i64,
    ) -> Self {
        Self {
            observations,
            annotator,
            severity,
        }
    }

    /// Returns the new record when the block number was flagged.
    #[instrument(skip(self))]
    pub async fn scan_block_number(
        &self,
        block_number: u64,
    ) -> Result<Option<PlaguedBlockRecord>, StorageError> {
        let sightings = self.observations.blocks_by_number(block_number).await?;
        let hashes: BTreeSet<&str> = sightings.iter().map(|b| b.block_hash.as_str()).collect();
        if hashes.len() < 2 {
            return Ok(None);
        }

        let last_seen = sightings.iter().filter_map(|b| b.first_seen_ts).max();
        info!(
            block_number,
            distinct_hashes = hashes.len(),
            "Conflicting block hashes observed"
        );
        let record = self
            .annotator
            .flag_block(block_number, DOUBLE_BLOCK, self.severity, last_seen)
            .await?;
        Ok(Some(record))
    }
}
