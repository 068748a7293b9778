//! Rank-biased mention sampling for the entity-linking dataset.
//!
//! Links pointing at a candidate's abstract are reservoir-sampled, deduplicated per
//! source document, grouped by mention text and capped, then turned into dataset items
//! with a left/right context window around each mention.

use crate::config::{ABSTRACT_SECTION, SAMPLER_BATCH_SIZE};
use crate::content::clean_content;
use crate::models::Page;
use crate::store::WikiStore;
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::{debug, info, warn};

/// One stored link, reduced to what the sampler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub target: String,
    pub source_doc: String,
    pub source_section: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Fixed-capacity uniform sample over a stream of unknown length (Algorithm R).
pub struct Reservoir<T> {
    capacity: usize,
    seen: u64,
    items: Vec<T>,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity.min(1 << 20)),
        }
    }

    pub fn offer<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) {
        self.seen += 1;
        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }
        let slot = rng.gen_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.items[slot as usize] = item;
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SampleParams {
    pub sample_size: usize,
    /// Max occurrences kept per (target, mention text)
    pub surface_appearance: usize,
    /// Max mention texts kept per target
    pub text_surfaces: usize,
}

#[derive(Debug, Clone)]
pub struct SurfaceGroup {
    pub text: String,
    /// Distinct source documents before slicing
    pub count: usize,
    pub occurrences: Vec<LinkOccurrence>,
}

#[derive(Debug, Clone)]
pub struct CandidateGroup {
    pub target: String,
    pub total: usize,
    pub surfaces: Vec<SurfaceGroup>,
}

/// Samples stored abstract-targeted links whose target is a candidate.
pub fn sample_links<R: Rng + ?Sized>(
    store: &WikiStore,
    candidates: &FxHashMap<String, usize>,
    sample_size: usize,
    rng: &mut R,
) -> Result<Vec<LinkOccurrence>> {
    let mut reservoir = Reservoir::new(sample_size);
    let scanned = store.scan_links_to_section(ABSTRACT_SECTION, |occurrence| {
        if candidates.contains_key(&occurrence.target) {
            reservoir.offer(occurrence, rng);
        }
    })?;
    info!(
        scanned,
        eligible = reservoir.seen(),
        sampled = reservoir.seen().min(sample_size as u64),
        "Sampled candidate links"
    );
    Ok(reservoir.into_items())
}

/// Random contiguous window of at most `cap` elements: starts at
/// `floor(r * max(0, len - cap))`.
fn random_slice<T, R: Rng + ?Sized>(mut items: Vec<T>, cap: usize, rng: &mut R) -> Vec<T> {
    let spare = items.len().saturating_sub(cap);
    let start = (rng.gen::<f64>() * spare as f64).floor() as usize;
    let start = start.min(spare);
    items.truncate(start + cap);
    items.drain(..start);
    items
}

/// Dedupes, groups and caps a sample into per-target groups, in random target order.
pub fn group_candidates<R: Rng + ?Sized>(
    sample: Vec<LinkOccurrence>,
    params: &SampleParams,
    rng: &mut R,
) -> Vec<CandidateGroup> {
    // First occurrence per (target, source doc, text) keeps its section and span
    let mut seen: FxHashSet<(String, String, String)> = FxHashSet::default();
    let mut surface_index: FxHashMap<(String, String), usize> = FxHashMap::default();
    let mut surfaces: Vec<(String, String, Vec<LinkOccurrence>)> = Vec::new();

    for occurrence in sample {
        let key = (
            occurrence.target.clone(),
            occurrence.source_doc.clone(),
            occurrence.text.clone(),
        );
        if !seen.insert(key) {
            continue;
        }
        let surface_key = (occurrence.target.clone(), occurrence.text.clone());
        let idx = *surface_index.entry(surface_key).or_insert_with(|| {
            surfaces.push((occurrence.target.clone(), occurrence.text.clone(), Vec::new()));
            surfaces.len() - 1
        });
        surfaces[idx].2.push(occurrence);
    }

    let mut sliced: Vec<(String, SurfaceGroup)> = surfaces
        .into_iter()
        .map(|(target, text, occurrences)| {
            let count = occurrences.len();
            let occurrences = random_slice(occurrences, params.surface_appearance, rng);
            (
                target,
                SurfaceGroup {
                    text,
                    count,
                    occurrences,
                },
            )
        })
        .collect();
    sliced.sort_by(|a, b| b.1.count.cmp(&a.1.count));

    let mut by_target: FxHashMap<String, usize> = FxHashMap::default();
    let mut groups: Vec<CandidateGroup> = Vec::new();
    for (target, surface) in sliced {
        let idx = *by_target.entry(target.clone()).or_insert_with(|| {
            groups.push(CandidateGroup {
                target,
                total: 0,
                surfaces: Vec::new(),
            });
            groups.len() - 1
        });
        groups[idx].total += surface.count;
        groups[idx].surfaces.push(surface);
    }

    groups.sort_by(|a, b| b.total.cmp(&a.total));
    for group in &mut groups {
        group.surfaces.truncate(params.text_surfaces);
    }
    groups.shuffle(rng);
    groups
}

/// Left and right context around `[start, end)` in chars, `max_chars` wide on each side
/// (the right side keeps one extra char). `None` when the span no longer holds `text`.
pub fn query_window(
    content: &str,
    start: usize,
    end: usize,
    text: &str,
    max_chars: usize,
) -> Option<(String, String)> {
    let chars: Vec<char> = content.chars().collect();
    if start > end || end > chars.len() || !chars[start..end].iter().copied().eq(text.chars()) {
        return None;
    }
    let left = chars[start.saturating_sub(max_chars)..start].iter().collect();
    let right_end = chars.len().min(end + max_chars + 1);
    let right = chars[end..right_end].iter().collect();
    Some((left, right))
}

/// One line of the train/validation/test files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub link: String,
    pub candidate_index: usize,
    pub source_doc: String,
    pub source_doc_section: String,
    pub query_left: String,
    pub query_right: String,
    pub query_index: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinksSummary {
    pub candidates_written: usize,
    pub items: usize,
    pub docs_missing: usize,
    pub sections_missing: usize,
    pub windows_rejected: usize,
}

/// Writes one `{target: [items]}` line per candidate with at least one usable item.
///
/// Groups are processed in batches; each batch fetches its source pages in one query.
pub fn write_links<W: Write>(
    store: &WikiStore,
    groups: &[CandidateGroup],
    candidate_index: &FxHashMap<String, usize>,
    language: &str,
    query_max_chars: usize,
    out: &mut W,
) -> Result<LinksSummary> {
    let mut summary = LinksSummary::default();

    for (batch_n, batch) in groups.chunks(SAMPLER_BATCH_SIZE).enumerate() {
        let mut titles: Vec<String> = batch
            .iter()
            .flat_map(|g| g.surfaces.iter())
            .flat_map(|s| s.occurrences.iter())
            .map(|o| o.source_doc.clone())
            .collect();
        titles.sort_unstable();
        titles.dedup();

        let docs: FxHashMap<String, Page> = store
            .find_pages_by_titles(&titles)?
            .into_iter()
            .map(|(title, raw)| (title, Page::from_raw(&raw, language)))
            .collect();

        for group in batch {
            let Some(&index) = candidate_index.get(&group.target) else {
                continue;
            };
            let mut items = Vec::new();

            for occurrence in group.surfaces.iter().flat_map(|s| s.occurrences.iter()) {
                let Some(doc) = docs.get(&occurrence.source_doc) else {
                    summary.docs_missing += 1;
                    info!(doc = %occurrence.source_doc, "Doc not found");
                    continue;
                };
                let Some(section) = doc.section(&clean_content(&occurrence.source_section)) else {
                    summary.sections_missing += 1;
                    info!(
                        doc = %occurrence.source_doc,
                        section = %occurrence.source_section,
                        "Section not found"
                    );
                    continue;
                };
                let Some((query_left, query_right)) = query_window(
                    &section.content,
                    occurrence.start,
                    occurrence.end,
                    &occurrence.text,
                    query_max_chars,
                ) else {
                    summary.windows_rejected += 1;
                    warn!(
                        doc = %occurrence.source_doc,
                        text = %occurrence.text,
                        start = occurrence.start,
                        "Mention no longer at its recorded span"
                    );
                    continue;
                };

                items.push(DatasetItem {
                    link: occurrence.text.clone(),
                    candidate_index: index,
                    source_doc: occurrence.source_doc.clone(),
                    source_doc_section: section.title.clone(),
                    query_left,
                    query_right,
                    query_index: summary.items,
                });
                summary.items += 1;
            }

            if items.is_empty() {
                debug!(candidate = %group.target, "No usable mentions");
                continue;
            }
            let line = BTreeMap::from([(group.target.as_str(), &items)]);
            serde_json::to_writer(&mut *out, &line).context("Failed to write links line")?;
            out.write_all(b"\n")?;
            summary.candidates_written += 1;
        }

        info!(
            candidates = (batch_n * SAMPLER_BATCH_SIZE + batch.len()),
            items = summary.items,
            "Finished batch"
        );
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSection;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn occ(target: &str, source: &str, text: &str, start: usize) -> LinkOccurrence {
        LinkOccurrence {
            target: target.to_string(),
            source_doc: source.to_string(),
            source_section: ABSTRACT_SECTION.to_string(),
            text: text.to_string(),
            start,
            end: start + text.chars().count(),
        }
    }

    fn params(surface_appearance: usize, text_surfaces: usize) -> SampleParams {
        SampleParams {
            sample_size: 1000,
            surface_appearance,
            text_surfaces,
        }
    }

    #[test]
    fn reservoir_keeps_everything_under_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reservoir = Reservoir::new(10);
        for i in 0..5 {
            reservoir.offer(i, &mut rng);
        }
        assert_eq!(reservoir.into_items(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reservoir_caps_and_samples_from_whole_stream() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reservoir = Reservoir::new(100);
        for i in 0..10_000 {
            reservoir.offer(i, &mut rng);
        }
        assert_eq!(reservoir.seen(), 10_000);
        let items = reservoir.into_items();
        assert_eq!(items.len(), 100);
        assert!(items.iter().any(|&i| i >= 100));
    }

    #[test]
    fn random_slice_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let slice = random_slice((0..20).collect::<Vec<_>>(), 5, &mut rng);
            assert_eq!(slice.len(), 5);
            assert!(slice.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(slice[4] < 20);
        }
        assert_eq!(random_slice(vec![1, 2], 5, &mut rng), vec![1, 2]);
    }

    #[test]
    fn dedupes_per_source_document() {
        let mut rng = StdRng::seed_from_u64(3);
        let sample = vec![
            occ("France", "A", "France", 10),
            occ("France", "A", "France", 90),
            occ("France", "B", "France", 5),
        ];
        let groups = group_candidates(sample, &params(10, 5), &mut rng);
        assert_eq!(groups.len(), 1);
        let surface = &groups[0].surfaces[0];
        assert_eq!(surface.count, 2);
        assert_eq!(surface.occurrences[0].start, 10);
    }

    #[test]
    fn caps_surfaces_and_appearances() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sample = Vec::new();
        for i in 0..30 {
            sample.push(occ("France", &format!("doc{i}"), "France", 0));
        }
        for i in 0..3 {
            sample.push(occ("France", &format!("doc{i}"), "the French", 0));
        }
        sample.push(occ("France", "doc0", "Gaul", 0));
        sample.push(occ("Rome", "doc0", "Rome", 0));

        let groups = group_candidates(sample, &params(4, 2), &mut rng);
        assert_eq!(groups.len(), 2);
        let france = groups.iter().find(|g| g.target == "France").unwrap();
        assert_eq!(france.total, 34);
        let texts: Vec<&str> = france.surfaces.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["France", "the French"]);
        assert_eq!(france.surfaces[0].occurrences.len(), 4);
        assert_eq!(france.surfaces[1].occurrences.len(), 3);
    }

    #[test]
    fn seeded_grouping_is_reproducible() {
        let sample: Vec<_> = (0..50)
            .map(|i| occ(&format!("T{}", i % 7), &format!("d{i}"), "x", 0))
            .collect();
        let order = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            group_candidates(sample.clone(), &params(3, 2), &mut rng)
                .into_iter()
                .map(|g| g.target)
                .collect::<Vec<_>>()
        };
        assert_eq!(order(11), order(11));
    }

    #[test]
    fn window_sizes() {
        let content = "abcdefghij";
        let (left, right) = query_window(content, 4, 6, "ef", 2).unwrap();
        assert_eq!(left, "cd");
        assert_eq!(right, "ghi");

        let (left, right) = query_window(content, 0, 2, "ab", 5).unwrap();
        assert_eq!(left, "");
        assert_eq!(right, "cdefghij");

        let (_, right) = query_window(content, 8, 10, "ij", 5).unwrap();
        assert_eq!(right, "");
    }

    #[test]
    fn window_rejects_drifted_span() {
        assert!(query_window("abcdefghij", 4, 6, "xy", 2).is_none());
        assert!(query_window("abc", 2, 8, "c", 2).is_none());
    }

    #[test]
    fn writes_one_line_per_candidate() {
        let store = WikiStore::open_in_memory().unwrap();
        let content = "Napoleon was born in Corsica and later ruled France as emperor.";
        let mut raw = crate::index::tests::article("Napoleon");
        raw.sections.insert(
            ABSTRACT_SECTION.to_string(),
            RawSection {
                text: content.to_string(),
                links: vec![],
                index: 0,
            },
        );
        store.upsert_pages(&[raw]).unwrap();

        let groups = vec![
            CandidateGroup {
                target: "France".to_string(),
                total: 2,
                surfaces: vec![SurfaceGroup {
                    text: "France".to_string(),
                    count: 2,
                    occurrences: vec![
                        occ("France", "Napoleon", "France", 45),
                        occ("France", "Missing", "France", 0),
                    ],
                }],
            },
            CandidateGroup {
                target: "Corsica".to_string(),
                total: 1,
                surfaces: vec![SurfaceGroup {
                    text: "Corsica".to_string(),
                    count: 1,
                    occurrences: vec![occ("Corsica", "Napoleon", "Corsica", 3)],
                }],
            },
        ];
        let candidates: FxHashMap<String, usize> =
            [("France".to_string(), 0), ("Corsica".to_string(), 1)].into_iter().collect();

        let mut out = Vec::new();
        let summary = write_links(&store, &groups, &candidates, "en", 8, &mut out).unwrap();
        assert_eq!(summary.candidates_written, 1);
        assert_eq!(summary.items, 1);
        assert_eq!(summary.docs_missing, 1);
        assert_eq!(summary.windows_rejected, 1);

        let text = String::from_utf8(out).unwrap();
        let line: BTreeMap<String, Vec<DatasetItem>> =
            serde_json::from_str(text.lines().next().unwrap()).unwrap();
        let item = &line["France"][0];
        assert_eq!(item.candidate_index, 0);
        assert_eq!(item.query_left, "r ruled ");
        assert_eq!(item.query_right, " as emper");
        assert_eq!(item.source_doc_section, ABSTRACT_SECTION);
        assert_eq!(item.query_index, 0);
    }
}
