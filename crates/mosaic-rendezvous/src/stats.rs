//! Per-primitive timing for the transport

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

/// Accumulated figures for one primitive
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PrimitiveStats {
    pub calls: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Timing table keyed by primitive name
#[derive(Debug, Default)]
pub struct TransportStats {
    entries: Mutex<BTreeMap<&'static str, PrimitiveStats>>,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, primitive: &'static str, elapsed: Duration, bytes: u64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(primitive).or_default();
        entry.calls += 1;
        entry.bytes += bytes;
        entry.elapsed += elapsed;
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, PrimitiveStats> {
        self.entries.lock().clone()
    }

    pub fn total_elapsed(&self) -> Duration {
        self.entries.lock().values().map(|s| s.elapsed).sum()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    /// Render seconds and share of total time per primitive
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let total = snapshot
            .values()
            .map(|s| s.elapsed)
            .sum::<Duration>()
            .as_secs_f64();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:>8} {:>14} {:>12} {:>8}",
            "primitive", "calls", "bytes", "seconds", "share"
        );
        for (name, stats) in &snapshot {
            let secs = stats.elapsed.as_secs_f64();
            let share = if total > 0.0 { secs / total * 100.0 } else { 0.0 };
            let _ = writeln!(
                out,
                "{:<24} {:>8} {:>14} {:>12.6} {:>7.2}%",
                name, stats.calls, stats.bytes, secs, share
            );
        }
        let _ = writeln!(out, "{:<24} {:>8} {:>14} {:>12.6}", "total", "", "", total);
        out
    }
}
