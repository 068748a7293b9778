//! SQLite-backed page and link store.
//!
//! Pages are kept as the parser exported them, with the section bodies in a JSON column
//! so title lookups can skip them. The `title` column holds the encoded title, which is
//! the form link targets and source documents are stored in.

use crate::config::ABSTRACT_SECTION;
use crate::content::title_key;
use crate::index::PageLookup;
use crate::models::{PageHeader, RawPage, RawRedirectTo, ResolvedLink};
use crate::sampler::LinkOccurrence;
use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit
const TITLE_QUERY_CHUNK: usize = 500;

const PAGE_COLUMNS: &str =
    "id, display_title, page_id, is_redirect, redirect_to, sections, reference_rank";

/// Candidate page with its raw abstract text, as read for the dataset build.
#[derive(Debug, Clone)]
pub struct RankedPage {
    pub title: String,
    pub reference_rank: i64,
    pub abstract_text: Option<String>,
}

pub struct WikiStore {
    conn: Connection,
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn page_from_row(row: &Row) -> rusqlite::Result<RawPage> {
    Ok(RawPage {
        id: row.get(0)?,
        title: row.get(1)?,
        page_id: row.get(2)?,
        is_redirect: row.get(3)?,
        redirect_to: optional_json_column(row, 4)?,
        sections: json_column(row, 5)?,
        reference_rank: row.get(6)?,
    })
}

fn header_from_row(row: &Row) -> rusqlite::Result<PageHeader> {
    Ok(PageHeader {
        id: row.get(0)?,
        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        is_redirect: row.get(2)?,
        redirect_to: optional_json_column::<RawRedirectTo>(row, 3)?,
    })
}

fn offset(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

impl WikiStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open page store: {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS pages (
                    id             TEXT PRIMARY KEY,
                    title          TEXT NOT NULL,
                    display_title  TEXT,
                    page_id        INTEGER NOT NULL,
                    is_redirect    INTEGER NOT NULL,
                    redirect_to    TEXT,
                    sections       TEXT NOT NULL,
                    reference_rank INTEGER
                );

                CREATE TABLE IF NOT EXISTS links (
                    id             TEXT PRIMARY KEY,
                    span_start     INTEGER NOT NULL,
                    span_end       INTEGER NOT NULL,
                    text           TEXT NOT NULL,
                    target_title   TEXT NOT NULL,
                    target_section TEXT NOT NULL,
                    source_doc     TEXT NOT NULL,
                    source_section TEXT NOT NULL,
                    language       TEXT NOT NULL,
                    type           TEXT NOT NULL
                );
                ",
            )
            .context("Failed to create store schema")?;
        Ok(())
    }

    /// Indexes used by chunked extraction, title lookups, ranking and sampling.
    pub fn create_indexes(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE INDEX IF NOT EXISTS idx_pages_redirect_page_id ON pages(is_redirect, page_id);
                CREATE INDEX IF NOT EXISTS idx_pages_title ON pages(title);
                CREATE INDEX IF NOT EXISTS idx_pages_rank ON pages(reference_rank);
                CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_title);
                CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_doc);
                CREATE INDEX IF NOT EXISTS idx_links_text ON links(text);
                ",
            )
            .context("Failed to create store indexes")?;
        info!("Store indexes ready");
        Ok(())
    }

    pub fn upsert_pages(&self, pages: &[RawPage]) -> Result<usize> {
        if pages.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pages (id, title, display_title, page_id, is_redirect, redirect_to, sections, reference_rank)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    display_title = excluded.display_title,
                    page_id = excluded.page_id,
                    is_redirect = excluded.is_redirect,
                    redirect_to = excluded.redirect_to,
                    sections = excluded.sections,
                    reference_rank = COALESCE(excluded.reference_rank, pages.reference_rank)",
            )?;
            for page in pages {
                let display_title = page.title.clone().unwrap_or_else(|| page.id.clone());
                let redirect_to = page
                    .redirect_to
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let sections = serde_json::to_string(&page.sections)?;
                count += stmt.execute(params![
                    page.id,
                    title_key(&display_title),
                    display_title,
                    page.page_id,
                    page.is_redirect,
                    redirect_to,
                    sections,
                    page.reference_rank,
                ])?;
            }
        }
        tx.commit().context("Failed to commit page batch")?;
        Ok(count)
    }

    /// Loads a page stream in batches of `batch_size`, returning the number of pages written.
    pub fn load_pages<I>(&self, pages: I, batch_size: usize) -> Result<u64>
    where
        I: IntoIterator<Item = Result<RawPage>>,
    {
        let batch_size = batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut loaded: u64 = 0;
        for page in pages {
            batch.push(page?);
            if batch.len() >= batch_size {
                loaded += self.upsert_pages(&batch)? as u64;
                batch.clear();
                debug!(pages = loaded, "Page batch loaded");
            }
        }
        loaded += self.upsert_pages(&batch)? as u64;
        Ok(loaded)
    }

    /// Non-redirect pages with `after < page_id <= until`, ordered by page id.
    pub fn pages_after(
        &self,
        after: Option<i64>,
        until: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawPage>> {
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM pages
             WHERE is_redirect = 0 AND page_id > ?1 AND (?2 IS NULL OR page_id <= ?2)
             ORDER BY page_id LIMIT ?3"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let pages = stmt
            .query_map(params![after.unwrap_or(i64::MIN), until, limit], page_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read page chunk")?;
        Ok(pages)
    }

    /// Header projection of every page, redirects included.
    pub fn for_each_page_header<F>(&self, mut f: F) -> Result<u64>
    where
        F: FnMut(PageHeader),
    {
        let mut stmt = self
            .conn
            .prepare("SELECT id, display_title, is_redirect, redirect_to FROM pages")?;
        let rows = stmt.query_map([], header_from_row)?;
        let mut count = 0;
        for row in rows {
            f(row?);
            count += 1;
        }
        Ok(count)
    }

    /// Full pages for the given encoded titles, keyed by encoded title.
    pub fn find_pages_by_titles(&self, titles: &[String]) -> Result<FxHashMap<String, RawPage>> {
        let mut found = FxHashMap::default();
        for chunk in titles.chunks(TITLE_QUERY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT title, {PAGE_COLUMNS} FROM pages WHERE title IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                let title: String = row.get(0)?;
                let page = RawPage {
                    id: row.get(1)?,
                    title: row.get(2)?,
                    page_id: row.get(3)?,
                    is_redirect: row.get(4)?,
                    redirect_to: optional_json_column(row, 5)?,
                    sections: json_column(row, 6)?,
                    reference_rank: row.get(7)?,
                };
                Ok((title, page))
            })?;
            for row in rows {
                let (title, page) = row?;
                found.insert(title, page);
            }
        }
        Ok(found)
    }

    /// Set-on-conflict write per link id. Re-running with the same links is a no-op.
    pub fn upsert_links(&self, links: &[ResolvedLink]) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO links (id, span_start, span_end, text, target_title, target_section,
                                    source_doc, source_section, language, type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    span_start = excluded.span_start,
                    span_end = excluded.span_end,
                    text = excluded.text,
                    target_title = excluded.target_title,
                    target_section = excluded.target_section,
                    source_doc = excluded.source_doc,
                    source_section = excluded.source_section,
                    language = excluded.language,
                    type = excluded.type",
            )?;
            for link in links {
                count += stmt.execute(params![
                    link.id,
                    link.start as i64,
                    link.end as i64,
                    link.text,
                    link.target_title,
                    link.target_section,
                    link.source_doc,
                    link.source_section,
                    link.language,
                    link.kind,
                ])?;
            }
        }
        tx.commit().context("Failed to commit link batch")?;
        debug!(links = count, "Link batch upserted");
        Ok(count)
    }

    pub fn count_links(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn find_link(&self, id: &str) -> Result<Option<ResolvedLink>> {
        let link = self
            .conn
            .query_row(
                "SELECT id, span_start, span_end, text, target_title, target_section,
                        source_doc, source_section, language, type
                 FROM links WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ResolvedLink {
                        id: row.get(0)?,
                        start: offset(row.get(1)?),
                        end: offset(row.get(2)?),
                        text: row.get(3)?,
                        target_title: row.get(4)?,
                        target_section: row.get(5)?,
                        source_doc: row.get(6)?,
                        source_section: row.get(7)?,
                        language: row.get(8)?,
                        kind: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(link)
    }

    /// Streams every stored link pointing at `section` of its target.
    pub fn scan_links_to_section<F>(&self, section: &str, mut f: F) -> Result<u64>
    where
        F: FnMut(LinkOccurrence),
    {
        let mut stmt = self.conn.prepare(
            "SELECT target_title, source_doc, source_section, text, span_start, span_end
             FROM links WHERE target_section = ?1",
        )?;
        let rows = stmt.query_map(params![section], |row| {
            Ok(LinkOccurrence {
                target: row.get(0)?,
                source_doc: row.get(1)?,
                source_section: row.get(2)?,
                text: row.get(3)?,
                start: offset(row.get(4)?),
                end: offset(row.get(5)?),
            })
        })?;

        let mut scanned = 0;
        for row in rows {
            f(row?);
            scanned += 1;
        }
        Ok(scanned)
    }

    /// Distinct (target, source, text) mentions counted per target, most linked first.
    pub fn inbound_link_counts(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_title, COUNT(*) AS mentions
             FROM (SELECT DISTINCT target_title, source_doc, text FROM links)
             GROUP BY target_title
             ORDER BY mentions DESC, target_title",
        )?;
        let counts = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok((row.get(0)?, count as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Replaces all reference ranks. Targets without a page row are ignored.
    pub fn set_reference_ranks(&self, ranks: &[(String, i64)]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;
        {
            tx.execute("UPDATE pages SET reference_rank = NULL", [])?;
            let mut stmt = tx.prepare("UPDATE pages SET reference_rank = ?2 WHERE title = ?1")?;
            for (title, rank) in ranks {
                updated += stmt.execute(params![title, rank])?;
            }
        }
        tx.commit().context("Failed to commit reference ranks")?;
        Ok(updated)
    }

    /// Non-redirect pages with `min <= reference_rank < max`, in rank order.
    pub fn for_each_ranked_page<F>(&self, min: Option<i64>, max: Option<i64>, mut f: F) -> Result<()>
    where
        F: FnMut(RankedPage) -> Result<()>,
    {
        let sql = format!(
            "SELECT title, reference_rank, json_extract(sections, '$.\"{ABSTRACT_SECTION}\".text')
             FROM pages
             WHERE is_redirect = 0 AND reference_rank IS NOT NULL
               AND (?1 IS NULL OR reference_rank >= ?1)
               AND (?2 IS NULL OR reference_rank < ?2)
             ORDER BY reference_rank"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![min, max], |row| {
            Ok(RankedPage {
                title: row.get(0)?,
                reference_rank: row.get(1)?,
                abstract_text: row.get(2)?,
            })
        })?;
        for row in rows {
            f(row?)?;
        }
        Ok(())
    }
}

impl PageLookup for WikiStore {
    fn find_by_title(&self, encoded_title: &str) -> Result<Option<PageHeader>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, display_title, is_redirect, redirect_to FROM pages WHERE title = ?1 LIMIT 1",
        )?;
        let header = stmt
            .query_row(params![encoded_title], header_from_row)
            .optional()
            .with_context(|| format!("Failed to look up page: {}", encoded_title))?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{article, redirect};

    fn link(start: usize, source: &str, target: &str, text: &str) -> ResolvedLink {
        ResolvedLink {
            id: ResolvedLink::make_id(start, source),
            start,
            end: start + text.chars().count(),
            text: text.to_string(),
            target_title: target.to_string(),
            target_section: ABSTRACT_SECTION.to_string(),
            source_doc: source.to_string(),
            source_section: ABSTRACT_SECTION.to_string(),
            language: "en".to_string(),
            kind: "internal".to_string(),
        }
    }

    fn numbered(title: &str, page_id: i64) -> RawPage {
        RawPage {
            page_id,
            ..article(title)
        }
    }

    #[test]
    fn upsert_links_is_idempotent() {
        let store = WikiStore::open_in_memory().unwrap();
        let batch = vec![link(0, "Paris", "France", "France"), link(10, "Paris", "Seine", "Seine")];

        store.upsert_links(&batch).unwrap();
        let first = store.find_link("0:Paris").unwrap();
        store.upsert_links(&batch).unwrap();

        assert_eq!(store.count_links().unwrap(), 2);
        assert_eq!(store.find_link("0:Paris").unwrap(), first);
    }

    #[test]
    fn upsert_links_overwrites_whole_record() {
        let store = WikiStore::open_in_memory().unwrap();
        store.upsert_links(&[link(0, "Paris", "France", "France")]).unwrap();
        let mut changed = link(0, "Paris", "French Republic", "France");
        changed.target_section = "History".to_string();
        store.upsert_links(&[changed.clone()]).unwrap();

        assert_eq!(store.count_links().unwrap(), 1);
        assert_eq!(store.find_link("0:Paris").unwrap(), Some(changed));
    }

    #[test]
    fn empty_batch_is_noop() {
        let store = WikiStore::open_in_memory().unwrap();
        assert_eq!(store.upsert_links(&[]).unwrap(), 0);
        assert_eq!(store.upsert_pages(&[]).unwrap(), 0);
    }

    #[test]
    fn title_lookup_uses_header_projection() {
        let store = WikiStore::open_in_memory().unwrap();
        store
            .upsert_pages(&[article("paris"), redirect("Lutetia", Some("Paris"), Some("#REDIRECT [[Paris]]"))])
            .unwrap();

        let header = store.find_by_title("Paris").unwrap().unwrap();
        assert!(!header.is_redirect);
        assert_eq!(header.title, "paris");

        let header = store.find_by_title("Lutetia").unwrap().unwrap();
        assert!(header.is_redirect);
        assert_eq!(
            header.redirect_to.and_then(|r| r.page).as_deref(),
            Some("Paris")
        );
        assert!(store.find_by_title("London").unwrap().is_none());
    }

    #[test]
    fn escaped_export_title_found_by_lookup_key() {
        let store = WikiStore::open_in_memory().unwrap();
        store.upsert_pages(&[article("AT&amp;T")]).unwrap();

        let header = store.find_by_title("AT&amp;T").unwrap().unwrap();
        assert_eq!(header.title, "AT&amp;T");
        assert!(store.find_by_title("AT&amp;amp;T").unwrap().is_none());

        let ranked = store
            .set_reference_ranks(&[("AT&amp;T".to_string(), 0)])
            .unwrap();
        assert_eq!(ranked, 1);
    }

    #[test]
    fn header_scan_feeds_memory_index() {
        let store = WikiStore::open_in_memory().unwrap();
        store
            .upsert_pages(&[article("Paris"), redirect("Lutetia", Some("Paris"), None)])
            .unwrap();

        let mut index = crate::index::WikiIndex::new();
        let scanned = store.for_each_page_header(|h| index.insert_header(h)).unwrap();
        assert_eq!(scanned, 2);
        assert_eq!(index.redirect_count(), 1);
        assert!(index.find_by_title("Paris").unwrap().is_some());
    }

    #[test]
    fn pages_after_skips_redirects_and_respects_range() {
        let store = WikiStore::open_in_memory().unwrap();
        let mut lutetia = redirect("Lutetia", Some("Paris"), None);
        lutetia.page_id = 2;
        store
            .upsert_pages(&[numbered("Paris", 1), lutetia, numbered("Rome", 3), numbered("Oslo", 4)])
            .unwrap();
        store.create_indexes().unwrap();

        let ids = |pages: Vec<RawPage>| pages.into_iter().map(|p| p.page_id).collect::<Vec<_>>();
        assert_eq!(ids(store.pages_after(None, None, 10).unwrap()), vec![1, 3, 4]);
        assert_eq!(ids(store.pages_after(Some(1), None, 1).unwrap()), vec![3]);
        assert_eq!(ids(store.pages_after(Some(1), Some(3), 10).unwrap()), vec![3]);
        assert!(store.pages_after(Some(4), None, 10).unwrap().is_empty());
    }

    #[test]
    fn load_pages_batches_stream() {
        let store = WikiStore::open_in_memory().unwrap();
        let pages = (1..=5).map(|i| Ok(numbered(&format!("Page {i}"), i)));
        assert_eq!(store.load_pages(pages, 2).unwrap(), 5);
        assert_eq!(store.pages_after(None, None, 10).unwrap().len(), 5);

        let failing = vec![Ok(numbered("Ok", 9)), Err(anyhow::anyhow!("read failed"))];
        assert!(store.load_pages(failing, 10).is_err());
    }

    #[test]
    fn find_pages_by_titles_keys_by_encoded_title() {
        let store = WikiStore::open_in_memory().unwrap();
        store.upsert_pages(&[article("paris"), article("Rome")]).unwrap();
        let found = store
            .find_pages_by_titles(&["Paris".to_string(), "Oslo".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["Paris"].id, "paris");
    }

    #[test]
    fn inbound_counts_use_distinct_mentions() {
        let store = WikiStore::open_in_memory().unwrap();
        store
            .upsert_links(&[
                link(0, "A", "France", "France"),
                link(50, "A", "France", "France"),
                link(90, "A", "France", "the French"),
                link(0, "B", "France", "France"),
                link(5, "B", "Rome", "Rome"),
            ])
            .unwrap();
        let counts = store.inbound_link_counts().unwrap();
        assert_eq!(counts, vec![("France".to_string(), 3), ("Rome".to_string(), 1)]);
    }

    #[test]
    fn ranks_and_ranked_pages() {
        let store = WikiStore::open_in_memory().unwrap();
        let mut france = article("France");
        france.sections.insert(
            ABSTRACT_SECTION.to_string(),
            crate::models::RawSection {
                text: "France is a country.".to_string(),
                links: vec![],
                index: 0,
            },
        );
        store.upsert_pages(&[france, article("Rome"), article("Oslo")]).unwrap();
        let updated = store
            .set_reference_ranks(&[("France".to_string(), 0), ("Rome".to_string(), 1), ("Ghost".to_string(), 2)])
            .unwrap();
        assert_eq!(updated, 2);

        let mut seen = Vec::new();
        store
            .for_each_ranked_page(None, Some(5), |page| {
                seen.push(page);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].title, "France");
        assert_eq!(seen[0].abstract_text.as_deref(), Some("France is a country."));
        assert_eq!(seen[1].abstract_text, None);

        let mut later = Vec::new();
        store
            .for_each_ranked_page(Some(1), None, |page| {
                later.push(page.title);
                Ok(())
            })
            .unwrap();
        assert_eq!(later, vec!["Rome"]);
    }

    #[test]
    fn scan_links_filters_by_section() {
        let store = WikiStore::open_in_memory().unwrap();
        let mut history = link(20, "A", "Rome", "Rome");
        history.target_section = "History".to_string();
        store
            .upsert_links(&[link(0, "A", "France", "France"), history])
            .unwrap();

        let mut targets = Vec::new();
        let scanned = store
            .scan_links_to_section(ABSTRACT_SECTION, |occ| targets.push(occ.target))
            .unwrap();
        assert_eq!(scanned, 1);
        assert_eq!(targets, vec!["France"]);
    }
}
