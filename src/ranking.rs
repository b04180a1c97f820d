//! Miner leaderboard.
//!
//! Every request recomputes standings from a fresh snapshot of the risk
//! table: rank 0 is the lowest cumulative risk. The caller's sort key only
//! changes the order rows are returned in, never the rank they carry.

use crate::config::RankingConfig;
use crate::storage_traits::{RiskRepository, StorageError, ViolationRepository};
use crate::types::{MinerRiskRecord, PlaguedBlockRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum RankingError {
    #[error("Invalid page size {page_size}: must be between 1 and {max}")]
    InvalidPageSize { page_size: usize, max: usize },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseSortError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Rank,
    BlocksCreated,
    Address,
    Score,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

pub type Comparator = fn(&MinerRiskRecord, &MinerRiskRecord) -> Ordering;

/// Lower risk first; pubkey keeps the order total.
pub fn by_risk(a: &MinerRiskRecord, b: &MinerRiskRecord) -> Ordering {
    a.risk.total_cmp(&b.risk).then_with(|| a.pubkey.cmp(&b.pubkey))
}

pub fn by_numblocks(a: &MinerRiskRecord, b: &MinerRiskRecord) -> Ordering {
    a.numblocks
        .total_cmp(&b.numblocks)
        .then_with(|| a.pubkey.cmp(&b.pubkey))
}

pub fn by_pubkey(a: &MinerRiskRecord, b: &MinerRiskRecord) -> Ordering {
    a.pubkey.cmp(&b.pubkey)
}

/// Column each sort key orders by, indexed by `SortBy` discriminant.
/// `Rank` and `Score` share the standing comparator so both produce the same
/// sequence.
pub const SORT_COLUMNS: [(SortBy, Comparator); 4] = [
    (SortBy::Rank, by_risk),
    (SortBy::BlocksCreated, by_numblocks),
    (SortBy::Address, by_pubkey),
    (SortBy::Score, by_risk),
];

impl SortBy {
    pub fn comparator(self) -> Comparator {
        SORT_COLUMNS[self as usize].1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortBy::Rank => "rank",
            SortBy::BlocksCreated => "blocks_created",
            SortBy::Address => "address",
            SortBy::Score => "score",
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SORT_COLUMNS
            .iter()
            .map(|(key, _)| *key)
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ParseSortError {
                kind: "sort key",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => f.write_str("asc"),
            SortOrder::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(ParseSortError {
                kind: "sort order",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationDisplayData {
    #[serde(rename = "type")]
    pub violation_type: String,
    pub color: String,
    pub last_violation: u64,
    pub violation_severity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerDisplayRow {
    pub rank: usize,
    pub score: i64,
    pub address: String,
    pub name: String,
    /// Share of all observed blocks, in `[0, 1]`.
    pub blocks_created: f64,
    pub violations: Vec<ViolationDisplayData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardPage {
    pub data: Vec<MinerDisplayRow>,
    /// Miners in the snapshot, not rows on this page.
    pub total: usize,
}

/// Position of every pubkey in the risk-ascending standing.
pub fn compute_ranks(snapshot: &[MinerRiskRecord]) -> HashMap<String, usize> {
    let mut standing: Vec<&MinerRiskRecord> = snapshot.iter().collect();
    standing.sort_by(|a, b| by_risk(a, b));
    standing
        .into_iter()
        .enumerate()
        .map(|(rank, record)| (record.pubkey.clone(), rank))
        .collect()
}

/// `numblocks / total`, or 0.0 when nothing has been counted yet.
pub fn block_share(numblocks: f64, total_block_count: f64) -> f64 {
    if total_block_count > 0.0 {
        numblocks / total_block_count
    } else {
        0.0
    }
}

/// Half-open `[page * page_size, page * page_size + page_size)`, clamped to
/// `len`. Overflowing offsets are simply out of range.
pub fn page_bounds(page: usize, page_size: usize, len: usize) -> (usize, usize) {
    let start = page.checked_mul(page_size).unwrap_or(usize::MAX).min(len);
    let end = start.saturating_add(page_size).min(len);
    (start, end)
}

pub struct RankingEngine {
    risks: Arc<dyn RiskRepository>,
    violations: Arc<dyn ViolationRepository>,
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(
        risks: Arc<dyn RiskRepository>,
        violations: Arc<dyn ViolationRepository>,
        config: &RankingConfig,
    ) -> Self {
        Self {
            risks,
            violations,
            config: config.clone(),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_ranked_miners(
        &self,
        page: usize,
        page_size: usize,
        sort_by: Option<SortBy>,
        sort_order: Option<SortOrder>,
    ) -> Result<DashboardPage, RankingError> {
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(RankingError::InvalidPageSize {
                page_size,
                max: self.config.max_page_size,
            });
        }

        let mut miners = self.risks.snapshot().await?;
        let total = miners.len();
        let ranks = compute_ranks(&miners);
        let total_block_count: f64 = miners.iter().map(|m| m.numblocks).sum();

        // Without a sort key the order is fixed; `sort_order` alone is ignored.
        match (sort_by.map(SortBy::comparator), sort_order.unwrap_or_default()) {
            (Some(compare), SortOrder::Desc) => miners.sort_by(|a, b| compare(b, a)),
            (Some(compare), SortOrder::Asc) => miners.sort_by(compare),
            (None, _) => miners.sort_by(by_pubkey),
        }

        let (start, end) = page_bounds(page, page_size, total);
        let mut plagued: HashMap<u64, Option<PlaguedBlockRecord>> = HashMap::new();
        let mut data = Vec::with_capacity(end - start);
        for miner in &miners[start..end] {
            let violations = match miner.block_number {
                Some(number) => {
                    if !plagued.contains_key(&number) {
                        let record = self.violations.lookup_violation(number).await?;
                        plagued.insert(number, record);
                    }
                    self.violation_display(plagued.get(&number).and_then(Option::as_ref))
                }
                None => Vec::new(),
            };

            data.push(MinerDisplayRow {
                rank: ranks.get(&miner.pubkey).copied().unwrap_or_default(),
                score: miner.risk.round() as i64,
                address: miner.pubkey.clone(),
                name: self.config.unknown_miner_name.clone(),
                blocks_created: block_share(miner.numblocks, total_block_count),
                violations,
            });
        }

        debug!(
            total,
            returned = data.len(),
            total_block_count,
            "Ranked miners page computed"
        );
        Ok(DashboardPage { data, total })
    }

    /// Only the block's current flag is surfaced, never a history.
    fn violation_display(&self, record: Option<&PlaguedBlockRecord>) -> Vec<ViolationDisplayData> {
        match record {
            Some(record) if record.is_active() => vec![ViolationDisplayData {
                violation_type: record.violations.clone(),
                color: self.config.violation_color.clone(),
                last_violation: record.last_violation.unwrap_or_default(),
                violation_severity: self.config.violation_severity,
            }],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::storage_traits::{MockRiskRepository, MockViolationRepository};

    fn record(pubkey: &str, risk: f64, numblocks: f64, block_number: Option<u64>) -> MinerRiskRecord {
        MinerRiskRecord {
            pubkey: pubkey.to_string(),
            risk,
            numblocks,
            block_number,
        }
    }

    #[test]
    fn test_sort_keys_parse_and_display() {
        for (key, _) in SORT_COLUMNS {
            assert_eq!(key.as_str().parse::<SortBy>().unwrap(), key);
            assert_eq!(key.to_string(), key.as_str());
        }
        assert!("height".parse::<SortBy>().is_err());
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("DESC".parse::<SortOrder>().is_err());

        let parsed: SortBy = serde_json::from_str("\"blocks_created\"").unwrap();
        assert_eq!(parsed, SortBy::BlocksCreated);
    }

    #[test]
    fn test_sort_columns_indexed_by_key() {
        for (index, (key, _)) in SORT_COLUMNS.iter().enumerate() {
            assert_eq!(*key as usize, index);
        }
        let a = record("a", 9.0, 1.0, None);
        let b = record("b", 1.0, 5.0, None);
        assert_eq!(SortBy::Rank.comparator()(&a, &b), Ordering::Greater);
        assert_eq!(SortBy::Score.comparator()(&a, &b), Ordering::Greater);
        assert_eq!(SortBy::BlocksCreated.comparator()(&a, &b), Ordering::Less);
        assert_eq!(SortBy::Address.comparator()(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_compute_ranks_breaks_ties_by_pubkey() {
        let snapshot = vec![
            record("b", 10.0, 1.0, None),
            record("a", 10.0, 1.0, None),
            record("c", 5.0, 1.0, None),
        ];
        let ranks = compute_ranks(&snapshot);
        assert_eq!(ranks["c"], 0);
        assert_eq!(ranks["a"], 1);
        assert_eq!(ranks["b"], 2);
    }

    #[test]
    fn test_block_share_zero_total() {
        assert_eq!(block_share(0.0, 0.0), 0.0);
        assert_eq!(block_share(3.0, 6.0), 0.5);
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(0, 20, 3), (0, 3));
        assert_eq!(page_bounds(1, 2, 3), (2, 3));
        assert_eq!(page_bounds(5, 20, 3), (3, 3));
        assert_eq!(page_bounds(usize::MAX, 2, 3), (3, 3));
    }

    #[tokio::test]
    async fn test_rejects_invalid_page_size() {
        let store = Arc::new(MemoryStore::new());
        let engine = RankingEngine::new(store.clone(), store, &RankingConfig::default());

        assert!(matches!(
            engine.get_ranked_miners(0, 0, None, None).await,
            Err(RankingError::InvalidPageSize { page_size: 0, .. })
        ));
        assert!(matches!(
            engine.get_ranked_miners(0, 1001, None, None).await,
            Err(RankingError::InvalidPageSize { max: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_snapshot_yields_empty_page() {
        let store = Arc::new(MemoryStore::new());
        let engine = RankingEngine::new(store.clone(), store, &RankingConfig::default());
        let page = engine.get_ranked_miners(0, 20, None, None).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_zero_block_counts_give_zero_share() {
        let mut risks = MockRiskRepository::new();
        risks
            .expect_snapshot()
            .returning(|| Ok(vec![record("a", 1.0, 0.0, None), record("b", 2.0, 0.0, None)]));
        let engine = RankingEngine::new(
            Arc::new(risks),
            Arc::new(MockViolationRepository::new()),
            &RankingConfig::default(),
        );

        let page = engine.get_ranked_miners(0, 20, None, None).await.unwrap();
        assert!(page.data.iter().all(|row| row.blocks_created == 0.0));
    }

    #[tokio::test]
    async fn test_violation_lookup_cached_per_block() {
        let mut risks = MockRiskRepository::new();
        risks.expect_snapshot().returning(|| {
            Ok(vec![
                record("a", 1.0, 1.0, Some(7)),
                record("b", 2.0, 1.0, Some(7)),
            ])
        });
        let mut violations = MockViolationRepository::new();
        violations
            .expect_lookup_violation()
            .times(1)
            .returning(|number| {
                Ok(Some(PlaguedBlockRecord {
                    number,
                    violations: "equivocation".to_string(),
                    severity: 3,
                    last_violation: Some(1_700_000_000),
                }))
            });

        let engine = RankingEngine::new(
            Arc::new(risks),
            Arc::new(violations),
            &RankingConfig::default(),
        );
        let page = engine.get_ranked_miners(0, 20, None, None).await.unwrap();
        for row in &page.data {
            assert_eq!(row.violations.len(), 1);
            assert_eq!(row.violations[0].violation_type, "equivocation");
            assert_eq!(row.violations[0].color, "#D22B2B");
            assert_eq!(row.violations[0].violation_severity, 1);
            assert_eq!(row.violations[0].last_violation, 1_700_000_000);
        }
    }

    #[tokio::test]
    async fn test_violation_storage_error_propagates() {
        let mut risks = MockRiskRepository::new();
        risks
            .expect_snapshot()
            .returning(|| Ok(vec![record("a", 1.0, 1.0, Some(7))]));
        let mut violations = MockViolationRepository::new();
        violations
            .expect_lookup_violation()
            .returning(|_| Err(StorageError::Backend("timeout".to_string())));

        let engine = RankingEngine::new(
            Arc::new(risks),
            Arc::new(violations),
            &RankingConfig::default(),
        );
        let err = engine.get_ranked_miners(0, 20, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            RankingError::Storage(StorageError::Backend(ref msg)) if msg == "timeout"
        ));
    }

    #[test]
    fn test_display_row_serializes_type_field() {
        let row = ViolationDisplayData {
            violation_type: "double-block".to_string(),
            color: "#D22B2B".to_string(),
            last_violation: 5,
            violation_severity: 1,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "double-block");
        assert!(json.get("violation_type").is_none());
    }
}
