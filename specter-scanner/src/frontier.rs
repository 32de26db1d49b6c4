use crate::detection::DetectionResult;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Shared crawl state mutated by every fetch worker.
///
/// All three tables live behind a single mutex so that check-then-insert
/// operations (visited marking, budget accounting, detection caching) are
/// atomic with respect to concurrent workers.
pub struct FrontierState {
    inner: Mutex<FrontierTables>,
    max_pages_per_host: usize,
}

#[derive(Default)]
struct FrontierTables {
    /// domain -> exact URL strings already dispatched
    visited: HashMap<String, HashSet<String>>,
    /// host -> pages successfully processed. Never decreases. This is a
    /// page-count budget per host, not a true link-depth measure.
    host_pages: HashMap<String, usize>,
    /// host -> fingerprint from the first successful fetch. Write-once.
    detections: HashMap<String, DetectionResult>,
}

impl FrontierState {
    pub fn new(max_pages_per_host: usize) -> Self {
        Self {
            inner: Mutex::new(FrontierTables::default()),
            max_pages_per_host,
        }
    }

    /// Atomically checks and records a (domain, url) pair. Returns true
    /// exactly once per pair; callers must only enqueue on true.
    pub async fn mark_visited(&self, domain: &str, url: &str) -> bool {
        let mut tables = self.inner.lock().await;
        tables
            .visited
            .entry(domain.to_string())
            .or_default()
            .insert(url.to_string())
    }

    /// Whether the host has used up its page budget.
    pub async fn budget_exhausted(&self, host: &str) -> bool {
        let tables = self.inner.lock().await;
        tables
            .host_pages
            .get(host)
            .is_some_and(|count| *count >= self.max_pages_per_host)
    }

    /// Counts one successfully processed page against the host's budget.
    pub async fn record_page(&self, host: &str) {
        let mut tables = self.inner.lock().await;
        *tables.host_pages.entry(host.to_string()).or_insert(0) += 1;
    }

    /// Returns the cached fingerprint for a host, if one exists.
    pub async fn detection_for(&self, host: &str) -> Option<DetectionResult> {
        let tables = self.inner.lock().await;
        tables.detections.get(host).cloned()
    }

    /// Caches a fingerprint for a host and returns the stored value. First
    /// write wins; later calls for the same host get the original snapshot
    /// back, so every emission for a host is value-equal to the first.
    pub async fn cache_detection(&self, host: &str, result: DetectionResult) -> DetectionResult {
        let mut tables = self.inner.lock().await;
        tables
            .detections
            .entry(host.to_string())
            .or_insert(result)
            .clone()
    }

    #[cfg(test)]
    pub async fn pages_for(&self, host: &str) -> usize {
        let tables = self.inner.lock().await;
        tables.host_pages.get(host).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionResult;
    use std::sync::Arc;

    fn detection(url: &str, server: &str) -> DetectionResult {
        let mut result = DetectionResult::new(url.parse().unwrap(), 200);
        result.server = server.to_string();
        result
    }

    #[tokio::test]
    async fn test_mark_visited_once_per_pair() {
        let frontier = FrontierState::new(10);
        assert!(frontier.mark_visited("example.com", "http://example.com/a").await);
        assert!(!frontier.mark_visited("example.com", "http://example.com/a").await);
        // Same URL under another domain key is a distinct pair
        assert!(frontier.mark_visited("other.com", "http://example.com/a").await);
    }

    #[tokio::test]
    async fn test_mark_visited_concurrent_single_winner() {
        let frontier = Arc::new(FrontierState::new(10));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let frontier = frontier.clone();
            handles.push(tokio::spawn(async move {
                frontier.mark_visited("example.com", "http://example.com/x").await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let frontier = FrontierState::new(2);
        assert!(!frontier.budget_exhausted("example.com").await);
        frontier.record_page("example.com").await;
        assert!(!frontier.budget_exhausted("example.com").await);
        frontier.record_page("example.com").await;
        assert!(frontier.budget_exhausted("example.com").await);
        // Other hosts are unaffected
        assert!(!frontier.budget_exhausted("other.com").await);
    }

    #[tokio::test]
    async fn test_detection_cache_first_write_wins() {
        let frontier = FrontierState::new(10);
        assert!(frontier.detection_for("example.com").await.is_none());

        let first = frontier
            .cache_detection("example.com", detection("http://example.com/", "nginx"))
            .await;
        let second = frontier
            .cache_detection("example.com", detection("http://example.com/two", "apache"))
            .await;

        assert_eq!(first.server, "nginx");
        // Second write loses; caller gets the original snapshot back
        assert_eq!(second, first);
        assert_eq!(frontier.detection_for("example.com").await.unwrap(), first);
    }
}
