//! Connection lifecycle statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let db = Db::new(Factory::in_memory(), Config::default());
//! db.create_store("users", None).await?;
//!
//! let stats = db.stats();
//! println!("Opens: {}", stats.opens);
//! println!("Upgrades: {}", stats.upgrades);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what a [`Db`](crate::Db) did with its connection.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct DbStats {
    /// Connections opened.
    opens: AtomicU64,
    /// Opens that ran an upgrade transaction.
    upgrades: AtomicU64,
    /// Version changes requested by other connections.
    version_changes: AtomicU64,
    /// Upgrades that had to wait for other connections.
    blocked: AtomicU64,
    /// Connections closed by the platform rather than by us.
    unexpected_closes: AtomicU64,
}

impl DbStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_open(&self, upgraded: bool) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        if upgraded {
            self.upgrades.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_version_change(&self) {
        self.version_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unexpected_close(&self) {
        self.unexpected_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            opens: self.opens.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
            version_changes: self.version_changes.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            unexpected_closes: self.unexpected_closes.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`DbStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Connections opened.
    pub opens: u64,
    /// Opens that ran an upgrade transaction.
    pub upgrades: u64,
    /// Version changes requested by other connections.
    pub version_changes: u64,
    /// Upgrades that had to wait for other connections.
    pub blocked: u64,
    /// Connections closed by the platform.
    pub unexpected_closes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = DbStats::new();
        stats.record_open(false);
        stats.record_open(true);
        stats.record_blocked();
        stats.record_version_change();
        stats.record_unexpected_close();

        let snap = stats.snapshot();
        assert_eq!(snap.opens, 2);
        assert_eq!(snap.upgrades, 1);
        assert_eq!(snap.blocked, 1);
        assert_eq!(snap.version_changes, 1);
        assert_eq!(snap.unexpected_closes, 1);
    }
}
