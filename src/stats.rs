use crate::checkpoint::CheckpointStats;
use crate::error::LinkDiagnostic;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected during link extraction
#[derive(Default)]
pub struct ExtractionStats {
    pub pages_processed: AtomicU64,
    pub sections_skipped: AtomicU64,
    pub links_resolved: AtomicU64,
    pub links_stored: AtomicU64,
    pub unresolvable_links: AtomicU64,
    pub spans_not_found: AtomicU64,
    pub span_mismatches: AtomicU64,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages(&self) {
        self.pages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sections_skipped(&self) {
        self.sections_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_resolved(&self, count: u64) {
        self.links_resolved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_stored(&self, count: u64) {
        self.links_stored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record(&self, diagnostic: LinkDiagnostic) {
        let counter = match diagnostic {
            LinkDiagnostic::UnresolvableLink => &self.unresolvable_links,
            LinkDiagnostic::SpanNotFound => &self.spans_not_found,
            LinkDiagnostic::SpanMismatch => &self.span_mismatches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pages(&self) -> u64 {
        self.pages_processed.load(Ordering::Relaxed)
    }

    pub fn sections_skipped(&self) -> u64 {
        self.sections_skipped.load(Ordering::Relaxed)
    }

    pub fn resolved(&self) -> u64 {
        self.links_resolved.load(Ordering::Relaxed)
    }

    pub fn stored(&self) -> u64 {
        self.links_stored.load(Ordering::Relaxed)
    }

    pub fn unresolvable(&self) -> u64 {
        self.unresolvable_links.load(Ordering::Relaxed)
    }

    pub fn not_found(&self) -> u64 {
        self.spans_not_found.load(Ordering::Relaxed)
    }

    pub fn mismatches(&self) -> u64 {
        self.span_mismatches.load(Ordering::Relaxed)
    }

    /// Create stats initialized from a checkpoint
    pub fn from_checkpoint(cp: &CheckpointStats) -> Self {
        Self {
            pages_processed: AtomicU64::new(cp.pages_processed),
            sections_skipped: AtomicU64::new(cp.sections_skipped),
            links_resolved: AtomicU64::new(cp.links_resolved),
            links_stored: AtomicU64::new(cp.links_stored),
            unresolvable_links: AtomicU64::new(cp.unresolvable_links),
            spans_not_found: AtomicU64::new(cp.spans_not_found),
            span_mismatches: AtomicU64::new(cp.span_mismatches),
        }
    }

    /// Convert to checkpoint stats for persistence
    pub fn to_checkpoint(&self) -> CheckpointStats {
        CheckpointStats {
            pages_processed: self.pages(),
            sections_skipped: self.sections_skipped(),
            links_resolved: self.resolved(),
            links_stored: self.stored(),
            unresolvable_links: self.unresolvable(),
            spans_not_found: self.not_found(),
            span_mismatches: self.mismatches(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = ExtractionStats::new();
        assert_eq!(stats.pages(), 0);
        assert_eq!(stats.sections_skipped(), 0);
        assert_eq!(stats.resolved(), 0);
        assert_eq!(stats.stored(), 0);
        assert_eq!(stats.unresolvable(), 0);
        assert_eq!(stats.not_found(), 0);
        assert_eq!(stats.mismatches(), 0);
    }

    #[test]
    fn record_routes_diagnostics() {
        let stats = ExtractionStats::new();
        stats.record(LinkDiagnostic::UnresolvableLink);
        stats.record(LinkDiagnostic::UnresolvableLink);
        stats.record(LinkDiagnostic::SpanNotFound);
        stats.record(LinkDiagnostic::SpanMismatch);
        assert_eq!(stats.unresolvable(), 2);
        assert_eq!(stats.not_found(), 1);
        assert_eq!(stats.mismatches(), 1);
    }

    #[test]
    fn checkpoint_roundtrip() {
        let original = ExtractionStats::new();
        original.inc_pages();
        original.inc_pages();
        original.inc_sections_skipped();
        original.add_resolved(12);
        original.add_stored(10);
        original.record(LinkDiagnostic::SpanNotFound);

        let cp = original.to_checkpoint();
        assert_eq!(cp.pages_processed, 2);
        assert_eq!(cp.links_resolved, 12);

        let restored = ExtractionStats::from_checkpoint(&cp);
        assert_eq!(restored.pages(), 2);
        assert_eq!(restored.sections_skipped(), 1);
        assert_eq!(restored.resolved(), 12);
        assert_eq!(restored.stored(), 10);
        assert_eq!(restored.not_found(), 1);
        assert_eq!(restored.unresolvable(), 0);
    }
}
