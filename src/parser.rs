use crate::models::RawPage;
use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use tracing::warn;

/// Streams page documents from a JSON-lines export, one page per line.
///
/// Files ending in `.bz2` are decompressed on the fly. Blank lines are skipped; lines
/// that fail to parse are logged and skipped so one bad record does not end the load.
pub struct PageReader {
    lines: std::io::Lines<BufReader<Box<dyn Read>>>,
    line_no: u64,
    skipped: u64,
}

impl PageReader {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open page export: {}", path))?;
        let inner: Box<dyn Read> = if path.ends_with(".bz2") {
            Box::new(BzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self::from_reader(inner))
    }

    pub fn from_reader(inner: Box<dyn Read>) -> Self {
        Self {
            lines: BufReader::with_capacity(256 * 1024, inner).lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines that could not be parsed so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Iterator for PageReader {
    type Item = Result<RawPage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(
                        anyhow::Error::new(e).context("Failed to read page export")
                    ))
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RawPage>(&line) {
                Ok(page) => return Some(Ok(page)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_no, error = %e, "Skipping malformed page record");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::write::BzEncoder;
    use bzip2::Compression;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    const EXPORT: &str = r#"{"_id":"Paris","title":"Paris","pageID":1,"isRedirect":false,"sections":{}}

not json
{"_id":"Lutetia","title":"Lutetia","pageID":2,"isRedirect":true,"redirectTo":{"page":"Paris"}}
"#;

    #[test]
    fn reads_pages_and_skips_bad_lines() {
        let mut reader = PageReader::from_reader(Box::new(Cursor::new(EXPORT.as_bytes().to_vec())));
        let pages: Vec<RawPage> = reader.by_ref().map(|p| p.unwrap()).collect();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].id, "Paris");
        assert!(pages[1].is_redirect);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn reads_bz2_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.jsonl.bz2");
        let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(EXPORT.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let reader = PageReader::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reader.filter_map(|p| p.ok()).count(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(PageReader::open("/nonexistent/pages.jsonl").is_err());
    }
}
