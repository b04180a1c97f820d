use crate::storage_traits::{RiskRepository, StorageError};
use crate::types::MinerRiskRecord;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Folds per-block risk datapoints into running per-miner totals.
///
/// Risk is a plain running sum of submitted values; `numblocks` counts the
/// datapoints separately, so callers can derive an average if they need one.
#[derive(Clone)]
pub struct RiskAggregator {
    repository: Arc<dyn RiskRepository>,
}

impl RiskAggregator {
    pub fn new(repository: Arc<dyn RiskRepository>) -> Self {
        Self { repository }
    }

    #[instrument(skip(self))]
    pub async fn add_datapoint(&self, miner_id: &str, value: f64) -> Result<(), StorageError> {
        self.add_block_datapoint_inner(miner_id, value, None).await
    }

    /// Like [`add_datapoint`](Self::add_datapoint), also remembering
    /// `block_number` as the miner's latest block for violation lookups.
    #[instrument(skip(self))]
    pub async fn add_block_datapoint(
        &self,
        miner_id: &str,
        value: f64,
        block_number: u64,
    ) -> Result<(), StorageError> {
        self.add_block_datapoint_inner(miner_id, value, Some(block_number))
            .await
    }

    async fn add_block_datapoint_inner(
        &self,
        miner_id: &str,
        value: f64,
        block_number: Option<u64>,
    ) -> Result<(), StorageError> {
        let record = self
            .repository
            .upsert_risk(miner_id, value, block_number)
            .await?;
        debug!(
            miner = miner_id,
            risk = record.risk,
            numblocks = record.numblocks,
            "Applied risk datapoint"
        );
        Ok(())
    }

    pub async fn miner(&self, miner_id: &str) -> Result<Option<MinerRiskRecord>, StorageError> {
        self.repository.get_risk(miner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::storage_traits::MockRiskRepository;

    #[tokio::test]
    async fn test_running_sum_and_count() {
        let aggregator = RiskAggregator::new(Arc::new(MemoryStore::new()));
        aggregator.add_datapoint("ebf", 30.0).await.unwrap();
        aggregator.add_datapoint("ebf", 15.0).await.unwrap();

        let record = aggregator.miner("ebf").await.unwrap().unwrap();
        assert_eq!(record.risk, 45.0);
        assert_eq!(record.numblocks, 2.0);
        assert_eq!(record.block_number, None);
    }

    #[tokio::test]
    async fn test_empty_miner_id_is_a_valid_key() {
        let aggregator = RiskAggregator::new(Arc::new(MemoryStore::new()));
        aggregator.add_datapoint("", 1.0).await.unwrap();
        assert!(aggregator.miner("").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_block_number_tracks_latest() {
        let aggregator = RiskAggregator::new(Arc::new(MemoryStore::new()));
        aggregator.add_block_datapoint("abc", 1.0, 100).await.unwrap();
        aggregator.add_block_datapoint("abc", 1.0, 105).await.unwrap();
        aggregator.add_datapoint("abc", 1.0).await.unwrap();

        let record = aggregator.miner("abc").await.unwrap().unwrap();
        assert_eq!(record.block_number, Some(105));
        assert_eq!(record.numblocks, 3.0);
    }

    #[tokio::test]
    async fn test_storage_error_is_passed_through() {
        let mut repo = MockRiskRepository::new();
        repo.expect_upsert_risk()
            .returning(|_, _, _| Err(StorageError::Unavailable("db down".to_string())));

        let aggregator = RiskAggregator::new(Arc::new(repo));
        let err = aggregator.add_datapoint("abc", 1.0).await.unwrap_err();
        assert_eq!(err, StorageError::Unavailable("db down".to_string()));
    }
}
