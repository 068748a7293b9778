use serde::Serialize;

/// Sections at or below this many characters are too short to yield useful queries
pub const DEFAULT_MIN_QUERY_SIZE: usize = 50;

/// Pages pulled from the store per extraction chunk
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Page records written per transaction when loading an export
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Candidate groups materialized at once while building the dataset
pub const SAMPLER_BATCH_SIZE: usize = 100;

/// Section name used when a link does not point at a specific section
pub const ABSTRACT_SECTION: &str = "Abstract";

/// Abstracts at or below this many characters are skipped (years, list pages)
pub const MIN_ABSTRACT_CHARS: usize = 64;

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Checkpoint every N chunks
pub const CHECKPOINT_INTERVAL: u32 = 10;

pub const CHECKPOINT_VERSION: u32 = 1;

pub const DEFAULT_DATABASE: &str = "wiki.sqlite";

/// Settings for one link extraction run. Built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub language: String,
    pub min_query_size: usize,
    pub chunk_size: usize,
    /// Resume strictly after this page id
    pub start_after: Option<i64>,
    /// Inclusive upper bound of the page-id range claimed by this worker
    pub end_at: Option<i64>,
    pub limit: Option<u64>,
    pub dry_run: bool,
}

impl ExtractConfig {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            min_query_size: DEFAULT_MIN_QUERY_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            start_after: None,
            end_at: None,
            limit: None,
            dry_run: false,
        }
    }
}

/// Settings for one dataset build. Serialized verbatim into `dataset_description.json`.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetConfig {
    pub language: String,
    pub output_path: String,
    /// Max chars for query left + right; each side gets half
    pub max_chars: usize,
    pub abstract_max_chars: usize,
    /// Exclusive upper rank bound for candidates, 0 for all ranked pages
    pub max_rank: u64,
    /// Total candidates to emit (padded with the next ranks), 0 to keep what max_rank gives
    pub candidates_size: u64,
    pub validation_size: usize,
    pub test_size: usize,
    pub candidate_text_surfaces: usize,
    pub candidate_surface_appearance: usize,
    pub sample_size: usize,
    pub seed: Option<u64>,
}

impl DatasetConfig {
    pub fn query_max_chars(&self) -> usize {
        self.max_chars / 2
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            output_path: "data/el_dataset".to_string(),
            max_chars: 2048,
            abstract_max_chars: 1000,
            max_rank: 100_000,
            candidates_size: 100_000,
            validation_size: 10_000,
            test_size: 10_000,
            candidate_text_surfaces: 5,
            candidate_surface_appearance: 10,
            sample_size: 10_000_000,
            seed: None,
        }
    }
}
