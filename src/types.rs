//! Core records shared by the observation store, the risk aggregator and the
//! ranking engine.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A network participant, identified by its P2P peer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub peer_id: String,
}

/// One sighting of a transaction hash relayed by a peer.
///
/// Identity is `(tx_hash, peer_id, tx_first_seen)`; the same transaction may
/// appear many times across peers and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionObservation {
    pub tx_hash: String,
    pub peer_id: String,
    pub tx_first_seen: u64,
    pub time: Option<u64>,
}

impl TransactionObservation {
    pub fn new(tx_hash: impl Into<String>, peer_id: impl Into<String>, tx_first_seen: u64) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            peer_id: peer_id.into(),
            tx_first_seen,
            time: None,
        }
    }

    pub fn with_time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn same_identity(&self, other: &Self) -> bool {
        self.tx_hash == other.tx_hash
            && self.peer_id == other.peer_id
            && self.tx_first_seen == other.tx_first_seen
    }
}

/// One sighting of a block relayed by a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockObservation {
    /// Assigned by the store on insert.
    pub id: u64,
    pub block_hash: String,
    pub block_number: Option<u64>,
    pub first_seen_ts: Option<u64>,
    pub peer_id: Option<String>,
    pub peer_remote_addr: Option<String>,
    pub peer_local_addr: Option<String>,
}

impl BlockObservation {
    pub fn new(block_hash: impl Into<String>) -> Self {
        Self {
            block_hash: block_hash.into(),
            ..Default::default()
        }
    }

    pub fn with_number(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }

    pub fn seen_at(mut self, first_seen_ts: u64) -> Self {
        self.first_seen_ts = Some(first_seen_ts);
        self
    }

    pub fn from_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_addrs(mut self, remote: impl Into<String>, local: impl Into<String>) -> Self {
        self.peer_remote_addr = Some(remote.into());
        self.peer_local_addr = Some(local.into());
        self
    }

    /// Orders sightings by first-seen time; rows without a timestamp come last,
    /// insertion order breaks ties.
    pub fn first_seen_order(a: &Self, b: &Self) -> Ordering {
        match (a.first_seen_ts, b.first_seen_ts) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then(a.id.cmp(&b.id))
    }
}

/// Running risk state for a single miner public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerRiskRecord {
    pub pubkey: String,
    /// Sum of every submitted datapoint value.
    pub risk: f64,
    /// Number of datapoints seen. Kept as a float so attribution can be
    /// fractional; never decreases.
    pub numblocks: f64,
    /// Highest block number attributed to this miner.
    pub block_number: Option<u64>,
}

impl MinerRiskRecord {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            risk: 0.0,
            numblocks: 0.0,
            block_number: None,
        }
    }

    /// Folds one datapoint into the record. A datapoint for an older block
    /// arriving late does not move `block_number` backwards.
    pub fn apply_datapoint(&mut self, value: f64, block_number: Option<u64>) {
        self.risk += value;
        self.numblocks += 1.0;
        self.block_number = self.block_number.max(block_number);
    }
}

/// Violation flag attached to a block number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaguedBlockRecord {
    pub number: u64,
    /// Violation label; empty means the block is not currently flagged.
    pub violations: String,
    pub severity: i64,
    pub last_violation: Option<u64>,
}

impl PlaguedBlockRecord {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            violations: String::new(),
            severity: 0,
            last_violation: None,
        }
    }

    /// Applies a new flag: label and severity are replaced, the violation
    /// timestamp only ever moves forward.
    pub fn merge_flag(&mut self, label: &str, severity: i64, timestamp: Option<u64>) {
        self.violations = label.to_string();
        self.severity = severity;
        self.last_violation = self.last_violation.max(timestamp);
    }

    /// True when the record carries something worth showing on the dashboard.
    pub fn is_active(&self) -> bool {
        !self.violations.is_empty() && self.last_violation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_datapoint_accumulates() {
        let mut record = MinerRiskRecord::new("abc");
        record.apply_datapoint(20.0, None);
        record.apply_datapoint(15.5, Some(42));
        record.apply_datapoint(1.0, None);

        assert_eq!(record.risk, 36.5);
        assert_eq!(record.numblocks, 3.0);
        assert_eq!(record.block_number, Some(42));
    }

    #[test]
    fn test_late_datapoint_keeps_highest_block() {
        let mut record = MinerRiskRecord::new("abc");
        record.apply_datapoint(1.0, Some(105));
        record.apply_datapoint(1.0, Some(100));
        record.apply_datapoint(1.0, None);
        assert_eq!(record.block_number, Some(105));
        assert_eq!(record.numblocks, 3.0);
    }

    #[test]
    fn test_merge_flag_keeps_latest_timestamp() {
        let mut record = PlaguedBlockRecord::new(9);
        record.merge_flag("equivocation", 1, Some(900));
        record.merge_flag("double-block", 2, Some(500));
        assert_eq!(record.violations, "double-block");
        assert_eq!(record.severity, 2);
        assert_eq!(record.last_violation, Some(900));

        record.merge_flag("double-block", 2, None);
        assert_eq!(record.last_violation, Some(900));
    }

    #[test]
    fn test_first_seen_order_puts_untimed_last() {
        let timed = BlockObservation {
            id: 2,
            first_seen_ts: Some(100),
            ..BlockObservation::new("0xaa")
        };
        let untimed = BlockObservation {
            id: 1,
            ..BlockObservation::new("0xaa")
        };
        assert_eq!(
            BlockObservation::first_seen_order(&timed, &untimed),
            Ordering::Less
        );
    }

    #[test]
    fn test_plagued_block_activity() {
        let mut record = PlaguedBlockRecord {
            number: 7,
            violations: String::new(),
            severity: 1,
            last_violation: Some(10),
        };
        assert!(!record.is_active());

        record.violations = "double-block".to_string();
        assert!(record.is_active());

        record.last_violation = None;
        assert!(!record.is_active());
    }
}
