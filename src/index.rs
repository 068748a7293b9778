use crate::content::title_key;
use crate::models::{PageHeader, RawPage};
use anyhow::Result;
use rustc_hash::FxHashMap;
use tracing::info;

/// Find-by-title over the page store. Implementations return only the header
/// projection; section bodies are never needed to resolve a link target.
pub trait PageLookup {
    fn find_by_title(&self, encoded_title: &str) -> Result<Option<PageHeader>>;
}

/// In-memory title index, keyed by the encoded title the store would be queried with.
#[derive(Default)]
pub struct WikiIndex {
    by_title: FxHashMap<String, PageHeader>,
}

impl WikiIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pages<'a>(pages: impl IntoIterator<Item = &'a RawPage>) -> Self {
        let mut index = Self::new();
        for page in pages {
            index.insert(page);
        }
        info!(pages = index.len(), "Index built");
        index
    }

    pub fn insert(&mut self, page: &RawPage) {
        self.insert_header(PageHeader::from(page));
    }

    pub fn insert_header(&mut self, header: PageHeader) {
        self.by_title.insert(title_key(&header.title), header);
    }

    pub fn len(&self) -> usize {
        self.by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }

    pub fn redirect_count(&self) -> usize {
        self.by_title.values().filter(|h| h.is_redirect).count()
    }
}

impl PageLookup for WikiIndex {
    fn find_by_title(&self, encoded_title: &str) -> Result<Option<PageHeader>> {
        Ok(self.by_title.get(encoded_title).cloned())
    }
}
