use std::fmt;
use thiserror::Error;

/// Why a link was dropped during resolution. None of these stop the extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDiagnostic {
    /// Target page absent, or the redirect it goes through is broken
    UnresolvableLink,
    /// Link text not present in the rest of the section
    SpanNotFound,
    /// Computed span does not hold the link text (normalization mismatch)
    SpanMismatch,
}

impl fmt::Display for LinkDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkDiagnostic::UnresolvableLink => "unresolvable link",
            LinkDiagnostic::SpanNotFound => "span not found",
            LinkDiagnostic::SpanMismatch => "span mismatch",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(
        "candidate line {index} falls outside every split range \
         (train {train:?}, validation {validation:?}, test {test:?})"
    )]
    SplitInconsistency {
        index: usize,
        train: (usize, usize),
        validation: (usize, usize),
        test: (usize, usize),
    },

    #[error("links file has {count} candidates, fewer than validation + test ({requested})")]
    NotEnoughCandidates { count: usize, requested: usize },
}
