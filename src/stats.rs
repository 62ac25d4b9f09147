//! Per-rule connection counters and a 60-second sliding request-rate
//! window.
//!
//! Atomics for the counters, a mutex-guarded deque for the timestamp list
//! — the same split the teacher draws between lock-free hot counters and
//! coarser-grained auxiliary state (`router-core::app::proxy`'s
//! thread-local buffer pool is the same shape of idea: cheap fast path,
//! occasional lock for the slow path).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct RuleStats {
    total: AtomicU64,
    active: AtomicU64,
    recent_starts: Mutex<VecDeque<Instant>>,
}

/// A point-in-time view of one rule's counters, returned by `snapshot()`
/// for the admin `GET /status` endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RuleStatsSnapshot {
    pub total: u64,
    pub active: u64,
    pub requests_per_minute: u64,
}

/// Per-`pathPattern` counters, keyed by the rule's pattern string.
#[derive(Default)]
pub struct ConnectionStats {
    by_pattern: Mutex<HashMap<String, std::sync::Arc<RuleStats>>>,
}

/// RAII guard returned by `start`; decrements the active counter for its
/// pattern when dropped, regardless of how the request ends.
pub struct RequestGuard {
    rule: std::sync::Arc<RuleStats>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.rule.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConnectionStats {
    pub fn new() -> Self {
        ConnectionStats::default()
    }

    fn rule_stats(&self, pattern: &str) -> std::sync::Arc<RuleStats> {
        let mut map = self.by_pattern.lock().unwrap();
        map.entry(pattern.to_string())
            .or_insert_with(|| std::sync::Arc::new(RuleStats::default()))
            .clone()
    }

    /// Records the start of a request against `pattern`: increments total
    /// and active, appends a timestamp, prunes entries older than 60s.
    /// Returns a guard that decrements `active` on drop.
    pub fn start(&self, pattern: &str) -> RequestGuard {
        let rule = self.rule_stats(pattern);
        rule.total.fetch_add(1, Ordering::SeqCst);
        rule.active.fetch_add(1, Ordering::SeqCst);

        let now = Instant::now();
        let mut recent = rule.recent_starts.lock().unwrap();
        recent.push_back(now);
        while let Some(&front) = recent.front() {
            if now.duration_since(front) > WINDOW {
                recent.pop_front();
            } else {
                break;
            }
        }
        drop(recent);

        RequestGuard { rule }
    }

    /// Current `requestsPerMinute` (sliding 60s window size) for `pattern`.
    pub fn requests_per_minute(&self, pattern: &str) -> u64 {
        let map = self.by_pattern.lock().unwrap();
        match map.get(pattern) {
            Some(rule) => rule.recent_starts.lock().unwrap().len() as u64,
            None => 0,
        }
    }

    /// A snapshot of every pattern's counters, for the admin status
    /// endpoint.
    pub fn snapshot(&self) -> HashMap<String, RuleStatsSnapshot> {
        let map = self.by_pattern.lock().unwrap();
        map.iter()
            .map(|(pattern, rule)| {
                (
                    pattern.clone(),
                    RuleStatsSnapshot {
                        total: rule.total.load(Ordering::SeqCst),
                        active: rule.active.load(Ordering::SeqCst),
                        requests_per_minute: rule.recent_starts.lock().unwrap().len() as u64,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_increments_total_and_active_decrements_on_drop() {
        let stats = ConnectionStats::new();
        let guard = stats.start("/api/*");
        let snap = stats.snapshot();
        assert_eq!(snap["/api/*"].total, 1);
        assert_eq!(snap["/api/*"].active, 1);

        drop(guard);
        let snap = stats.snapshot();
        assert_eq!(snap["/api/*"].active, 0);
        assert_eq!(snap["/api/*"].total, 1);
    }

    #[test]
    fn requests_per_minute_reflects_recent_window_size() {
        let stats = ConnectionStats::new();
        for _ in 0..3 {
            std::mem::forget(stats.start("/x"));
        }
        assert_eq!(stats.requests_per_minute("/x"), 3);
    }

    #[test]
    fn unknown_pattern_reports_zero() {
        let stats = ConnectionStats::new();
        assert_eq!(stats.requests_per_minute("/nope"), 0);
    }
}
