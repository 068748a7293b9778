use crate::store::WikiStore;
use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct RankSummary {
    pub targets: usize,
    pub pages_ranked: usize,
}

/// Orders targets by distinct inbound mentions and returns `(title, rank)` pairs,
/// rank 0 being the most linked-to page.
pub fn assign_ranks(counts: &[(String, u64)]) -> Vec<(String, i64)> {
    counts
        .iter()
        .enumerate()
        .map(|(rank, (title, _))| (title.clone(), rank as i64))
        .collect()
}

/// Recomputes `reference_rank` for every page from the stored links.
pub fn run_rank(store: &WikiStore) -> Result<RankSummary> {
    let counts = store
        .inbound_link_counts()
        .context("Failed to count inbound links")?;
    info!(targets = counts.len(), "Counted inbound links");

    let ranks = assign_ranks(&counts);
    let pages_ranked = store.set_reference_ranks(&ranks)?;
    info!(pages = pages_ranked, "Reference ranks written");

    Ok(RankSummary {
        targets: counts.len(),
        pages_ranked,
    })
}
