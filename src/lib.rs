//! # minerwatch
//!
//! Risk scoring and ranking for a P2P block propagation dashboard.
//!
//! - [`types`]: observation, risk and violation records
//! - [`storage_traits`]: repository seams the core depends on
//! - [`memory_store`]: in-process implementation of those repositories
//! - [`aggregator`]: per-miner running risk totals
//! - [`violations`]: block-number violation flags and detection
//! - [`ranking`]: standings, sorting and pagination
//! - [`dashboard`]: the facade handed to the transport layer

pub mod aggregator;
pub mod config;
pub mod dashboard;
pub mod memory_store;
pub mod ranking;
pub mod storage_traits;
pub mod types;
pub mod violations;

pub use dashboard::{MinerDashboard, MinersQuery};
pub use ranking::{DashboardPage, MinerDisplayRow, RankingError, SortBy, SortOrder};
pub use storage_traits::StorageError;
