//! Quota accounting: operation costs and the per-tick unit budget

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// External API operations that consume quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiOperation {
    /// Discovery search (`search.list`)
    Search,
    /// Playlist details by id (`playlists.list`)
    ListPlaylists,
    /// One page of playlist members (`playlistItems.list`)
    ListPlaylistItems,
}

impl ApiOperation {
    /// All operations, in cost-table order
    pub const ALL: [ApiOperation; 3] = [
        ApiOperation::Search,
        ApiOperation::ListPlaylists,
        ApiOperation::ListPlaylistItems,
    ];

    /// Name used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ListPlaylists => "playlists.list",
            Self::ListPlaylistItems => "playlistItems.list",
        }
    }
}

impl fmt::Display for ApiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static mapping from operation to quota cost
///
/// Loaded once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaCostTable {
    pub search: u64,
    pub playlists: u64,
    pub playlist_items: u64,
}

impl Default for QuotaCostTable {
    fn default() -> Self {
        Self {
            search: 100,
            playlists: 1,
            playlist_items: 1,
        }
    }
}

impl QuotaCostTable {
    /// Cost of a single call of `op`
    pub fn cost(&self, op: ApiOperation) -> u64 {
        match op {
            ApiOperation::Search => self.search,
            ApiOperation::ListPlaylists => self.playlists,
            ApiOperation::ListPlaylistItems => self.playlist_items,
        }
    }
}

// ============================================================================
// Tick budget
// ============================================================================

/// Quota units one scheduler tick may spend
///
/// Shared between the pipeline and the paging client; every external call
/// reserves its cost here before it is issued.
#[derive(Debug)]
pub struct TickBudget {
    limit: u64,
    spent: AtomicU64,
}

impl TickBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            spent: AtomicU64::new(0),
        }
    }

    /// Budget that never runs out (manual ingestion)
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    /// Reserve `cost` units; returns `false` and reserves nothing when the
    /// call would exceed the limit
    pub fn try_reserve(&self, cost: u64) -> bool {
        self.spent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |spent| {
                let next = spent.checked_add(cost)?;
                (next <= self.limit).then_some(next)
            })
            .is_ok()
    }

    /// Give back units reserved for a call that was refused for quota
    pub fn release(&self, cost: u64) {
        self.spent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |spent| {
                Some(spent.saturating_sub(cost))
            })
            .ok();
    }

    /// Whether `cost` more units still fit
    pub fn can_afford(&self, cost: u64) -> bool {
        self.spent
            .load(Ordering::SeqCst)
            .checked_add(cost)
            .is_some_and(|next| next <= self.limit)
    }

    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.spent())
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_costs() {
        let table = QuotaCostTable::default();
        assert_eq!(table.cost(ApiOperation::Search), 100);
        assert_eq!(table.cost(ApiOperation::ListPlaylists), 1);
        assert_eq!(table.cost(ApiOperation::ListPlaylistItems), 1);
    }

    #[test]
    fn test_budget_reserve_stops_at_limit() {
        let budget = TickBudget::new(250);

        assert!(budget.try_reserve(100));
        assert!(budget.try_reserve(100));
        assert!(!budget.try_reserve(100));
        assert_eq!(budget.spent(), 200);
        assert_eq!(budget.remaining(), 50);

        assert!(budget.can_afford(50));
        assert!(budget.try_reserve(50));
        assert!(!budget.can_afford(1));
    }

    #[test]
    fn test_release_returns_reserved_units() {
        let budget = TickBudget::new(150);
        assert!(budget.try_reserve(100));
        budget.release(100);
        assert_eq!(budget.spent(), 0);
        assert!(budget.try_reserve(100));

        budget.release(500);
        assert_eq!(budget.spent(), 0);
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = TickBudget::unlimited();
        assert!(budget.try_reserve(u64::MAX / 2));
        assert!(budget.try_reserve(1000));
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(ApiOperation::Search.to_string(), "search");
        assert_eq!(ApiOperation::ListPlaylistItems.as_str(), "playlistItems.list");
    }
}
