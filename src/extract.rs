use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::{ExtractConfig, ABSTRACT_SECTION, PROGRESS_INTERVAL};
use crate::content::{encode_section, encode_title, is_legend};
use crate::error::LinkDiagnostic;
use crate::index::PageLookup;
use crate::models::{Link, LinkType, Page, ResolvedLink, Section};
use crate::redirect::translate_link;
use crate::stats::ExtractionStats;
use crate::store::WikiStore;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use memchr::memmem;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Forward-only search position inside one section's content.
///
/// Links arrive in document order, so each search starts where the previous match
/// ended. Byte and char positions are tracked together: searching happens on bytes,
/// spans are reported in chars.
struct SpanCursor<'a> {
    content: &'a str,
    byte_pos: usize,
    char_pos: usize,
}

struct Span {
    start: usize,
    end: usize,
    byte_start: usize,
    byte_end: usize,
}

impl<'a> SpanCursor<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            content,
            byte_pos: 0,
            char_pos: 0,
        }
    }

    fn find(&self, text: &str) -> Option<Span> {
        let rest = &self.content[self.byte_pos..];
        let offset = memmem::find(rest.as_bytes(), text.as_bytes())?;
        let start = self.char_pos + rest[..offset].chars().count();
        let byte_start = self.byte_pos + offset;
        Some(Span {
            start,
            end: start + text.chars().count(),
            byte_start,
            byte_end: byte_start + text.len(),
        })
    }

    fn advance(&mut self, span: &Span) {
        self.byte_pos = span.byte_end;
        self.char_pos = span.end;
    }

    fn holds(&self, span: &Span, text: &str) -> bool {
        span.end - span.start == text.chars().count()
            && self.content.get(span.byte_start..span.byte_end) == Some(text)
    }
}

fn resolvable_target(link: &Link) -> Option<&str> {
    if link.kind != LinkType::Internal || link.text.is_empty() {
        return None;
    }
    link.target_page.as_deref().filter(|t| !t.is_empty())
}

/// Sections too short to give useful context, or caption legends, yield no links.
pub fn section_qualifies(section: &Section, min_query_size: usize) -> bool {
    section.content.chars().count() > min_query_size && !is_legend(&section.content)
}

/// Resolves the links of one section into spans over its cleaned content.
pub fn extract_section_links<L: PageLookup + ?Sized>(
    section: &Section,
    page: &Page,
    lookup: &L,
    stats: &ExtractionStats,
) -> Result<Vec<ResolvedLink>> {
    let mut cursor = SpanCursor::new(&section.content);
    let mut resolved = Vec::new();
    let source_doc = encode_title(&page.title);
    let source_section = encode_section(&section.title);

    for link in &section.links {
        let Some(target) = resolvable_target(link) else {
            continue;
        };

        let Some(span) = cursor.find(&link.text) else {
            stats.record(LinkDiagnostic::SpanNotFound);
            debug!(
                source = %page.id,
                section = section.index,
                text = %link.text,
                "{}",
                LinkDiagnostic::SpanNotFound
            );
            continue;
        };
        cursor.advance(&span);

        if !cursor.holds(&span, &link.text) {
            stats.record(LinkDiagnostic::SpanMismatch);
            warn!(
                source = %page.id,
                section = section.index,
                text = %link.text,
                start = span.start,
                "{}",
                LinkDiagnostic::SpanMismatch
            );
            continue;
        }

        let translation = translate_link(lookup, &encode_title(target), link.section.as_deref())?;
        let Some(target_title) = translation.target else {
            stats.record(LinkDiagnostic::UnresolvableLink);
            debug!(
                source = %page.id,
                section = section.index,
                text = %link.text,
                link_target = target,
                "{}",
                LinkDiagnostic::UnresolvableLink
            );
            continue;
        };

        let target_section = translation
            .section
            .as_deref()
            .map(encode_section)
            .unwrap_or_else(|| ABSTRACT_SECTION.to_string());

        resolved.push(ResolvedLink {
            id: ResolvedLink::make_id(span.start, &page.id),
            start: span.start,
            end: span.end,
            text: link.text.clone(),
            target_title,
            target_section,
            source_doc: source_doc.clone(),
            source_section: source_section.clone(),
            language: link.language.clone(),
            kind: link.kind.as_str().to_string(),
        });
    }

    Ok(resolved)
}

pub fn extract_page_links<L: PageLookup + ?Sized>(
    page: &Page,
    lookup: &L,
    min_query_size: usize,
    stats: &ExtractionStats,
) -> Result<Vec<ResolvedLink>> {
    let mut links = Vec::new();
    for section in &page.sections {
        if !section_qualifies(section, min_query_size) {
            stats.inc_sections_skipped();
            continue;
        }
        links.extend(extract_section_links(section, page, lookup, stats)?);
    }
    Ok(links)
}

/// Resolves every qualifying section of every page, in page order.
pub fn extract_links<L: PageLookup + ?Sized>(
    pages: &[Page],
    lookup: &L,
    min_query_size: usize,
    stats: &ExtractionStats,
) -> Result<Vec<ResolvedLink>> {
    let mut links = Vec::new();
    for page in pages {
        links.extend(extract_page_links(page, lookup, min_query_size, stats)?);
        stats.inc_pages();
    }
    stats.add_resolved(links.len() as u64);
    Ok(links)
}

fn make_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Pulls non-redirect pages from the store in page-id order, resolves their links and
/// upserts them chunk by chunk. Progress is checkpointed as the last processed page id.
pub fn run_extraction<L: PageLookup + ?Sized>(
    store: &WikiStore,
    lookup: &L,
    config: &ExtractConfig,
    checkpoint: Option<&Checkpoint>,
    checkpoint_mgr: Option<&CheckpointManager>,
) -> Result<ExtractionStats> {
    let stats = match checkpoint {
        Some(cp) => ExtractionStats::from_checkpoint(&cp.stats),
        None => ExtractionStats::new(),
    };
    let mut after = checkpoint
        .map(|cp| cp.last_processed_id)
        .or(config.start_after);

    info!(
        language = %config.language,
        after = ?after,
        end_at = ?config.end_at,
        dry_run = config.dry_run,
        "Starting link extraction"
    );

    let chunk_limit = config.chunk_size.max(1);
    let pb = make_spinner();
    let mut processed: u64 = 0;
    let mut last_reported: u64 = 0;

    loop {
        let chunk_size = match config.limit {
            Some(limit) if processed >= limit => break,
            Some(limit) => (limit - processed).min(chunk_limit as u64) as usize,
            None => chunk_limit,
        };

        let raw_pages = store.pages_after(after, config.end_at, chunk_size)?;
        let Some(last) = raw_pages.last() else {
            break;
        };
        let last_id = last.page_id;

        let pages: Vec<Page> = raw_pages
            .iter()
            .map(|raw| Page::from_raw(raw, &config.language))
            .collect();
        let links = extract_links(&pages, lookup, config.min_query_size, &stats)?;

        if !config.dry_run {
            let stored = store.upsert_links(&links)?;
            stats.add_stored(stored as u64);
        }

        processed += pages.len() as u64;
        after = Some(last_id);

        if let Some(mgr) = checkpoint_mgr {
            mgr.maybe_save(last_id, &stats)?;
        }

        if processed - last_reported >= PROGRESS_INTERVAL {
            last_reported = processed;
            info!(
                pages = stats.pages(),
                links = stats.resolved(),
                last_id,
                "Extraction progress"
            );
        }
        pb.set_message(format!(
            "{} pages, {} links (page id {})",
            stats.pages(),
            stats.resolved(),
            last_id
        ));
    }

    if let (Some(mgr), Some(last_id)) = (checkpoint_mgr, after) {
        mgr.save(last_id, &stats)?;
    }

    pb.finish_with_message(format!(
        "Done: {} pages, {} links",
        stats.pages(),
        stats.resolved()
    ));

    Ok(stats)
}
