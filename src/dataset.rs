use crate::config::{DatasetConfig, MIN_ABSTRACT_CHARS};
use crate::content::clean_content;
use crate::error::DatasetError;
use crate::sampler::{group_candidates, sample_links, write_links, DatasetItem, LinksSummary, SampleParams};
use crate::store::WikiStore;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const CANDIDATES_FILE: &str = "candidates.jsonl";
pub const LINKS_FILE: &str = "links.jsonl";
pub const DESCRIPTION_FILE: &str = "dataset_description.json";

/// A ranked page used as an entity label, with its cleaned abstract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub reference_rank: i64,
    pub candidate_index: usize,
}

/// Ranked pages with `min <= rank < max` that have a usable abstract, indexed from
/// `init_index` in rank order.
pub fn get_abstracts(
    store: &WikiStore,
    min_rank: Option<i64>,
    max_rank: Option<i64>,
    init_index: usize,
    max_chars: usize,
) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    store.for_each_ranked_page(min_rank, max_rank, |page| {
        // Years and list pages have no real abstract
        let Some(text) = page.abstract_text else {
            return Ok(());
        };
        if text.chars().count() <= MIN_ABSTRACT_CHARS {
            return Ok(());
        }
        candidates.push(Candidate {
            candidate: page.title,
            abstract_text: clean_content(&text).chars().take(max_chars).collect(),
            reference_rank: page.reference_rank,
            candidate_index: init_index + candidates.len(),
        });
        Ok(())
    })?;
    info!(
        candidates = candidates.len(),
        min_rank = ?min_rank,
        max_rank = ?max_rank,
        "Collected abstracts"
    );
    Ok(candidates)
}

fn write_candidates(path: &Path, candidates: &[Candidate], append: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    let mut writer = BufWriter::new(file);
    for candidate in candidates {
        serde_json::to_writer(&mut writer, candidate)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn file_name(&self) -> &'static str {
        match self {
            Split::Train => "train.jsonl",
            Split::Validation => "validation.jsonl",
            Split::Test => "test.jsonl",
        }
    }
}

/// Inclusive per-line index ranges of the three splits.
///
/// With `train_size = count - validation - test`: train is `[0, train_size]`, validation
/// `[train_size + 1, train_size + validation + 1]` and test runs from the line after
/// validation up to the number of candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitRanges {
    pub train: (usize, usize),
    pub validation: (usize, usize),
    pub test: (usize, usize),
}

impl SplitRanges {
    pub fn compute(
        count: usize,
        validation_size: usize,
        test_size: usize,
        n_candidates: usize,
    ) -> Result<Self, DatasetError> {
        let requested = validation_size + test_size;
        if count < requested {
            return Err(DatasetError::NotEnoughCandidates { count, requested });
        }
        let train_size = count - requested;
        let validation = (train_size + 1, train_size + validation_size + 1);
        Ok(Self {
            train: (0, train_size),
            validation,
            test: (validation.1 + 1, n_candidates),
        })
    }

    pub fn assign(&self, index: usize) -> Result<Split, DatasetError> {
        let within = |(lo, hi): (usize, usize)| index >= lo && index <= hi;
        if within(self.train) {
            Ok(Split::Train)
        } else if within(self.validation) {
            Ok(Split::Validation)
        } else if within(self.test) {
            Ok(Split::Test)
        } else {
            Err(DatasetError::SplitInconsistency {
                index,
                train: self.train,
                validation: self.validation,
                test: self.test,
            })
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitCounts {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

pub fn count_lines(path: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Flattens each candidate line of the links file into the split its index falls in.
pub fn write_splits(links_path: &Path, output_dir: &Path, ranges: &SplitRanges) -> Result<SplitCounts> {
    let open = |split: Split| -> Result<BufWriter<File>> {
        let path = output_dir.join(split.file_name());
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        Ok(BufWriter::new(file))
    };
    let mut train = open(Split::Train)?;
    let mut validation = open(Split::Validation)?;
    let mut test = open(Split::Test)?;
    let mut counts = SplitCounts::default();

    let reader = BufReader::new(
        File::open(links_path).with_context(|| format!("Failed to open {:?}", links_path))?,
    );
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let candidate_links: BTreeMap<String, Vec<DatasetItem>> = serde_json::from_str(&line)
            .with_context(|| format!("Malformed links line {}", index))?;
        let items = candidate_links.into_values().next().unwrap_or_default();

        let split = ranges.assign(index)?;
        let (writer, counter) = match split {
            Split::Train => (&mut train, &mut counts.train),
            Split::Validation => (&mut validation, &mut counts.validation),
            Split::Test => (&mut test, &mut counts.test),
        };
        for item in &items {
            serde_json::to_writer(&mut *writer, item)?;
            writer.write_all(b"\n")?;
        }
        *counter += items.len();
    }

    train.flush()?;
    validation.flush()?;
    test.flush()?;
    Ok(counts)
}

#[derive(Serialize)]
struct DatasetDescription<'a> {
    #[serde(flatten)]
    config: &'a DatasetConfig,
    query_max_chars: usize,
    effective_seed: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DatasetSummary {
    pub candidates: usize,
    pub padded_candidates: usize,
    pub links: LinksSummary,
    pub lines: usize,
    pub splits: SplitCounts,
    pub seed: u64,
}

fn rank_bound(rank: u64) -> Option<i64> {
    (rank > 0).then(|| i64::try_from(rank).unwrap_or(i64::MAX))
}

/// Builds the whole dataset under `config.output_path` from ranked pages and stored links.
pub fn build_dataset(store: &WikiStore, config: &DatasetConfig) -> Result<DatasetSummary> {
    let output_dir = Path::new(&config.output_path);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", config.output_path))?;

    let seed = config.seed.unwrap_or_else(rand::random);
    info!(seed, "Dataset RNG seeded");
    let mut rng = StdRng::seed_from_u64(seed);

    let max_rank = rank_bound(config.max_rank);
    let candidates = get_abstracts(
        store,
        max_rank.map(|_| 0),
        max_rank,
        0,
        config.abstract_max_chars,
    )?;
    let candidates_path = output_dir.join(CANDIDATES_FILE);
    write_candidates(&candidates_path, &candidates, false)?;

    let candidate_index: FxHashMap<String, usize> = candidates
        .iter()
        .map(|c| (c.candidate.clone(), c.candidate_index))
        .collect();

    let params = SampleParams {
        sample_size: config.sample_size,
        surface_appearance: config.candidate_surface_appearance,
        text_surfaces: config.candidate_text_surfaces,
    };
    let sample = sample_links(store, &candidate_index, params.sample_size, &mut rng)?;
    let groups = group_candidates(sample, &params, &mut rng);
    info!(groups = groups.len(), "Grouped candidate mentions");

    let links_path = output_dir.join(LINKS_FILE);
    let links = {
        let file = File::create(&links_path)
            .with_context(|| format!("Failed to create {:?}", links_path))?;
        let mut writer = BufWriter::new(file);
        let summary = write_links(
            store,
            &groups,
            &candidate_index,
            &config.language,
            config.query_max_chars(),
            &mut writer,
        )?;
        writer.flush()?;
        summary
    };

    let lines = count_lines(&links_path)?;
    let ranges = SplitRanges::compute(lines, config.validation_size, config.test_size, candidates.len())?;
    info!(
        lines,
        train = ?ranges.train,
        validation = ?ranges.validation,
        test = ?ranges.test,
        "Split ranges"
    );
    let splits = write_splits(&links_path, output_dir, &ranges)?;

    // Pad the candidate list with the next ranks so it reaches candidates_size
    let mut padded_candidates = 0;
    if let Some(max_rank) = max_rank {
        let wanted = config.candidates_size as usize;
        if wanted > candidates.len() {
            let extra = i64::try_from(wanted - candidates.len()).unwrap_or(i64::MAX);
            let padding = get_abstracts(
                store,
                Some(max_rank),
                Some(max_rank.saturating_add(extra)),
                candidates.len(),
                config.abstract_max_chars,
            )?;
            write_candidates(&candidates_path, &padding, true)?;
            padded_candidates = padding.len();
        }
    }

    let description = DatasetDescription {
        config,
        query_max_chars: config.query_max_chars(),
        effective_seed: seed,
    };
    let description_path = output_dir.join(DESCRIPTION_FILE);
    let file = File::create(&description_path)
        .with_context(|| format!("Failed to create {:?}", description_path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &description)?;

    Ok(DatasetSummary {
        candidates: candidates.len(),
        padded_candidates,
        links,
        lines,
        splits,
        seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::article;
    use crate::models::RawSection;
    use tempfile::TempDir;

    #[test]
    fn split_arithmetic() {
        let ranges = SplitRanges::compute(100, 10, 10, 100).unwrap();
        assert_eq!(ranges.train, (0, 80));
        assert_eq!(ranges.validation, (81, 91));
        assert_eq!(ranges.test, (92, 100));

        assert_eq!(ranges.assign(0).unwrap(), Split::Train);
        assert_eq!(ranges.assign(80).unwrap(), Split::Train);
        assert_eq!(ranges.assign(81).unwrap(), Split::Validation);
        assert_eq!(ranges.assign(91).unwrap(), Split::Validation);
        assert_eq!(ranges.assign(92).unwrap(), Split::Test);
        assert_eq!(ranges.assign(99).unwrap(), Split::Test);
    }

    #[test]
    fn index_outside_ranges_is_fatal() {
        let ranges = SplitRanges::compute(10, 2, 2, 8).unwrap();
        assert_eq!(ranges.validation, (7, 9));
        assert_eq!(ranges.test, (10, 8));
        match ranges.assign(10) {
            Err(DatasetError::SplitInconsistency { index, .. }) => assert_eq!(index, 10),
            other => panic!("expected split inconsistency, got {:?}", other),
        }
    }

    #[test]
    fn too_few_lines() {
        assert!(matches!(
            SplitRanges::compute(5, 3, 3, 5),
            Err(DatasetError::NotEnoughCandidates { count: 5, requested: 6 })
        ));
    }

    fn page_with_abstract(title: &str, text: &str, rank: i64) -> crate::models::RawPage {
        let mut page = article(title);
        page.reference_rank = Some(rank);
        page.sections.insert(
            "Abstract".to_string(),
            RawSection {
                text: text.to_string(),
                links: vec![],
                index: 0,
            },
        );
        page
    }

    #[test]
    fn abstracts_filter_short_and_truncate() {
        let store = WikiStore::open_in_memory().unwrap();
        let long = "France is a country in Western Europe with a long history and many regions.";
        store
            .upsert_pages(&[
                page_with_abstract("France", long, 0),
                page_with_abstract("1999", "1999 was a year.", 1),
                page_with_abstract("Rome", long, 2),
            ])
            .unwrap();

        let candidates = get_abstracts(&store, Some(0), Some(10), 5, 20).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].candidate, "France");
        assert_eq!(candidates[0].abstract_text, "France is a country ");
        assert_eq!(candidates[0].candidate_index, 5);
        assert_eq!(candidates[1].candidate, "Rome");
        assert_eq!(candidates[1].candidate_index, 6);
        assert_eq!(candidates[1].reference_rank, 2);
    }

    #[test]
    fn candidate_line_uses_abstract_key() {
        let candidate = Candidate {
            candidate: "France".to_string(),
            abstract_text: "France is".to_string(),
            reference_rank: 0,
            candidate_index: 0,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["abstract"], "France is");
    }

    #[test]
    fn splits_flatten_candidate_lines() {
        let dir = TempDir::new().unwrap();
        let links_path = dir.path().join(LINKS_FILE);
        let item = |i: usize| DatasetItem {
            link: "x".to_string(),
            candidate_index: i,
            source_doc: "D".to_string(),
            source_doc_section: "Abstract".to_string(),
            query_left: "a".to_string(),
            query_right: "b".to_string(),
            query_index: i,
        };
        let mut file = File::create(&links_path).unwrap();
        for i in 0..4 {
            let line = BTreeMap::from([(format!("T{i}"), vec![item(i), item(i)])]);
            writeln!(file, "{}", serde_json::to_string(&line).unwrap()).unwrap();
        }

        let ranges = SplitRanges::compute(4, 1, 1, 4).unwrap();
        let counts = write_splits(&links_path, dir.path(), &ranges).unwrap();
        // train [0, 2], validation [3, 4]
        assert_eq!(counts, SplitCounts { train: 6, validation: 2, test: 0 });
        assert_eq!(count_lines(&dir.path().join("train.jsonl")).unwrap(), 6);
        assert_eq!(count_lines(&dir.path().join("test.jsonl")).unwrap(), 0);
    }
}
