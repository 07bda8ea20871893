//! Stress scenarios for StashDB.
//!
//! These exercise many contexts sharing one database, each declaring its
//! own collections, so that schema upgrades keep invalidating the other
//! contexts' connections.

use crate::fixtures::{fast_retry, TestDomain};
use serde_json::json;
use stashdb_core::Config;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            duration,
        }
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent contexts.
    pub contexts: usize,
    /// Collections each context declares.
    pub collections_per_context: usize,
    /// Records written to each collection.
    pub records_per_collection: usize,
    /// Conflict retries per operation.
    pub max_retries: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            contexts: 4,
            collections_per_context: 3,
            records_per_collection: 20,
            max_retries: 10,
        }
    }
}

/// Runs every context concurrently; each writes to collections nobody
/// else declared, then checks it can read back everything it wrote.
///
/// Requires a multi-threaded Tokio runtime to produce real interleaving.
pub async fn stress_concurrent_contexts(
    domain: &TestDomain,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut tasks = Vec::with_capacity(config.contexts);

    for context in 0..config.contexts {
        let retry = fast_retry().max_retries(config.max_retries);
        let registry = domain.registry_with(Config::default().retry(retry));
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            let mut successful = 0usize;
            let mut failed = 0usize;
            for c in 0..config.collections_per_context {
                let store = registry.store(&format!("ctx{context}_col{c}"), None);
                for r in 0..config.records_per_collection {
                    match store.add(&format!("r{r}"), json!({ "context": context, "n": r })).await {
                        Ok(_) => successful += 1,
                        Err(_) => failed += 1,
                    }
                }
                if store.count().await != config.records_per_collection {
                    failed += 1;
                }
            }
            (successful, failed)
        }));
    }

    let mut successful = 0usize;
    let mut failed = 0usize;
    for task in tasks {
        match task.await {
            Ok((s, f)) => {
                successful += s;
                failed += f;
            }
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
