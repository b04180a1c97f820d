//! Entry point the transport layer talks to.

use crate::aggregator::RiskAggregator;
use crate::config::Config;
use crate::memory_store::MemoryStore;
use crate::ranking::{DashboardPage, RankingEngine, RankingError, SortBy, SortOrder};
use crate::storage_traits::{ObservationStore, RiskRepository, StorageError, ViolationRepository};
use crate::violations::{ViolationAnnotator, ViolationDetector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Query parameters of a miners listing request, as the HTTP layer binds
/// them (`?page=0&pagesize=20&order_by=rank&sort_order=desc`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinersQuery {
    pub page: usize,
    #[serde(rename = "pagesize", alias = "page_size")]
    pub page_size: Option<usize>,
    pub order_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
}

/// One recorded risk datapoint, as replayed from a capture file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointEntry {
    pub miner: String,
    pub value: f64,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// One recorded violation flag. An empty label is stored like any other and
/// simply never surfaces on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationFlag {
    pub block_number: u64,
    pub violations: String,
    #[serde(default = "default_flag_severity")]
    pub severity: i64,
    #[serde(default)]
    pub last_violation: Option<u64>,
}

fn default_flag_severity() -> i64 {
    1
}

pub struct MinerDashboard {
    aggregator: RiskAggregator,
    annotator: ViolationAnnotator,
    detector: ViolationDetector,
    ranking: RankingEngine,
    default_page_size: usize,
}

impl MinerDashboard {
    pub fn new(
        config: &Config,
        risks: Arc<dyn RiskRepository>,
        violations: Arc<dyn ViolationRepository>,
        observations: Arc<dyn ObservationStore>,
    ) -> Self {
        let annotator = ViolationAnnotator::new(violations.clone());
        Self {
            aggregator: RiskAggregator::new(risks.clone()),
            detector: ViolationDetector::new(
                observations,
                annotator.clone(),
                config.ranking.violation_severity,
            ),
            annotator,
            ranking: RankingEngine::new(risks, violations, &config.ranking),
            default_page_size: config.ranking.default_page_size,
        }
    }

    /// Dashboard over a single in-process store.
    pub fn in_memory(config: &Config) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        info!("Using in-memory miner store");
        let dashboard = Self::new(config, store.clone(), store.clone(), store.clone());
        (dashboard, store)
    }

    pub async fn add_datapoint(&self, miner_id: &str, value: f64) -> Result<(), StorageError> {
        self.aggregator.add_datapoint(miner_id, value).await
    }

    pub async fn add_block_datapoint(
        &self,
        miner_id: &str,
        value: f64,
        block_number: u64,
    ) -> Result<(), StorageError> {
        self.aggregator
            .add_block_datapoint(miner_id, value, block_number)
            .await
    }

    pub async fn get_ranked_miners(
        &self,
        page: usize,
        page_size: usize,
        sort_by: Option<SortBy>,
        sort_order: Option<SortOrder>,
    ) -> Result<DashboardPage, RankingError> {
        self.ranking
            .get_ranked_miners(page, page_size, sort_by, sort_order)
            .await
    }

    /// Serves a listing request, falling back to the configured page size.
    #[instrument(skip(self))]
    pub async fn miners(&self, query: &MinersQuery) -> Result<DashboardPage, RankingError> {
        let page_size = query.page_size.unwrap_or(self.default_page_size);
        self.get_ranked_miners(query.page, page_size, query.order_by, query.sort_order)
            .await
    }

    /// Feeds recorded datapoints through the aggregator, in order.
    #[instrument(skip_all, fields(count = entries.len()))]
    pub async fn replay_datapoints(&self, entries: &[DatapointEntry]) -> Result<(), StorageError> {
        for entry in entries {
            match entry.block_number {
                Some(number) => {
                    self.add_block_datapoint(&entry.miner, entry.value, number)
                        .await?
                }
                None => self.add_datapoint(&entry.miner, entry.value).await?,
            }
        }
        Ok(())
    }

    /// Applies recorded violation flags, including empty-label ones.
    #[instrument(skip_all, fields(count = flags.len()))]
    pub async fn replay_violations(&self, flags: &[ViolationFlag]) -> Result<(), StorageError> {
        for flag in flags {
            self.annotator
                .flag_block(
                    flag.block_number,
                    &flag.violations,
                    flag.severity,
                    flag.last_violation,
                )
                .await?;
        }
        Ok(())
    }

    pub fn annotator(&self) -> &ViolationAnnotator {
        &self.annotator
    }

    pub fn detector(&self) -> &ViolationDetector {
        &self.detector
    }

    pub fn aggregator(&self) -> &RiskAggregator {
        &self.aggregator
    }
}
