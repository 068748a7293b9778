use crate::config::ABSTRACT_SECTION;
use crate::content::{clean_content, decode_for_display};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Page document as exported by the markup parser and kept in the page store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPage {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "pageID", default)]
    pub page_id: i64,
    #[serde(rename = "isRedirect", default)]
    pub is_redirect: bool,
    #[serde(rename = "redirectTo", default)]
    pub redirect_to: Option<RawRedirectTo>,
    #[serde(default)]
    pub sections: BTreeMap<String, RawSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_rank: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRedirectTo {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSection {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub links: Vec<RawLink>,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLink {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub wiki: Option<WikiField>,
}

/// The parser emits `wiki` either as a language code or as an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WikiField {
    Lang(String),
    Object { lang: String },
    Other(serde_json::Value),
}

/// Projection of a page without its sections, enough to resolve a link target.
#[derive(Debug, Clone)]
pub struct PageHeader {
    pub id: String,
    pub title: String,
    pub is_redirect: bool,
    pub redirect_to: Option<RawRedirectTo>,
}

impl From<&RawPage> for PageHeader {
    fn from(raw: &RawPage) -> Self {
        Self {
            id: raw.id.clone(),
            title: raw.title.clone().unwrap_or_default(),
            is_redirect: raw.is_redirect,
            redirect_to: raw.redirect_to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkType {
    Internal,
    External,
    Interwiki,
    Other(String),
}

impl LinkType {
    pub fn as_str(&self) -> &str {
        match self {
            LinkType::Internal => "internal",
            LinkType::External => "external",
            LinkType::Interwiki => "interwiki",
            LinkType::Other(kind) => kind,
        }
    }
}

impl From<&str> for LinkType {
    fn from(kind: &str) -> Self {
        match kind {
            "internal" => LinkType::Internal,
            "external" => LinkType::External,
            "interwiki" => LinkType::Interwiki,
            other => LinkType::Other(other.to_string()),
        }
    }
}

/// Where a raw link record keeps its target. Each parser schema has its own rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSchema {
    /// Interwiki link whose `wiki` is an object; the target is the link text.
    InterwikiObject { lang: String, target: String },
    /// Regular `page` field, with an optional `#anchor` section.
    Page {
        target: String,
        anchor: Option<String>,
    },
    Site { target: String },
    /// Anchor-only schema; a string `wiki` names the target language.
    Anchor {
        target: String,
        wiki: Option<String>,
    },
    TextOnly {
        target: String,
        wiki: Option<String>,
    },
    Unresolved,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl LinkSchema {
    pub fn classify(raw: &RawLink) -> Self {
        let kind = LinkType::from(raw.kind.as_str());
        if kind == LinkType::Interwiki {
            if let Some(WikiField::Object { lang }) = &raw.wiki {
                if let Some(text) = non_empty(&raw.text) {
                    return LinkSchema::InterwikiObject {
                        lang: lang.clone(),
                        target: text.to_string(),
                    };
                }
            }
        }

        if let Some(page) = non_empty(&raw.page) {
            return LinkSchema::Page {
                target: page.to_string(),
                anchor: non_empty(&raw.anchor).map(str::to_string),
            };
        }
        if let Some(site) = non_empty(&raw.site) {
            return LinkSchema::Site {
                target: site.to_string(),
            };
        }

        let wiki = match &raw.wiki {
            Some(WikiField::Lang(lang)) => Some(lang.clone()),
            _ => None,
        };
        if let Some(anchor) = non_empty(&raw.anchor) {
            return LinkSchema::Anchor {
                target: anchor.to_string(),
                wiki,
            };
        }
        if let Some(text) = non_empty(&raw.text) {
            return LinkSchema::TextOnly {
                target: text.to_string(),
                wiki,
            };
        }
        LinkSchema::Unresolved
    }
}

#[derive(Debug, Clone)]
pub struct Link {
    pub text: String,
    /// `None` when no schema produced a usable target; such links are dropped.
    pub target_page: Option<String>,
    pub kind: LinkType,
    pub language: String,
    pub section: Option<String>,
}

impl Link {
    pub fn from_raw(raw: &RawLink, language: &str) -> Self {
        let mut language = language.to_string();
        let mut section = None;

        let target = match LinkSchema::classify(raw) {
            LinkSchema::InterwikiObject { lang, target } => {
                language = lang;
                Some(target)
            }
            LinkSchema::Page { target, anchor } => {
                section = anchor.map(|a| decode_for_display(&a));
                Some(target)
            }
            LinkSchema::Site { target } => Some(target),
            LinkSchema::Anchor { target, wiki } | LinkSchema::TextOnly { target, wiki } => {
                if let Some(wiki) = wiki {
                    language = wiki;
                }
                Some(target)
            }
            LinkSchema::Unresolved => None,
        };

        let decoded = target.map(|t| decode_for_display(&t));
        let text = match non_empty(&raw.text) {
            Some(text) => clean_content(text),
            None => decoded.clone().unwrap_or_default(),
        };

        Self {
            text,
            // Wiki titles use underscores for spaces in link targets
            target_page: decoded.map(|t| t.replace('_', " ")),
            kind: LinkType::from(raw.kind.as_str()),
            language,
            section,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub links: Vec<Link>,
    pub index: u32,
}

impl Section {
    pub fn from_raw(title: &str, raw: &RawSection, language: &str) -> Self {
        Self {
            title: decode_for_display(title),
            content: clean_content(&raw.text),
            links: raw
                .links
                .iter()
                .map(|link| Link::from_raw(link, language))
                .collect(),
            index: raw.index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub sections: Vec<Section>,
    pub language: String,
}

impl Page {
    pub fn from_raw(raw: &RawPage, language: &str) -> Self {
        let mut sections: Vec<Section> = raw
            .sections
            .iter()
            .map(|(title, section)| Section::from_raw(title, section, language))
            .collect();
        sections.sort_by_key(|s| s.index);

        Self {
            id: decode_for_display(&raw.id),
            title: decode_for_display(raw.title.as_deref().unwrap_or_default()),
            sections,
            language: language.to_string(),
        }
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPage {
    pub id: String,
    pub title: String,
    /// `None` marks a broken redirect
    pub redirect_to_page: Option<String>,
    pub redirect_to_section: Option<String>,
}

impl RedirectPage {
    pub fn from_header(header: &PageHeader) -> Self {
        let mut redirect_to_page = None;
        let mut redirect_to_section = None;

        if let Some(target) = header.redirect_to.as_ref() {
            if let Some(page) = non_empty(&target.page) {
                redirect_to_section = target
                    .raw
                    .as_deref()
                    .and_then(|raw| redirect_section(raw, page));
                redirect_to_page = Some(decode_for_display(page).replace('_', " "));
            }
        }

        Self {
            id: decode_for_display(&header.id),
            title: clean_content(&header.title),
            redirect_to_page,
            redirect_to_section,
        }
    }
}

static SECTION_FRAGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(.*)\]\]").unwrap());

/// Section named in `[[Target#Section]]` redirect markup, if it points at `page`.
fn redirect_section(raw: &str, page: &str) -> Option<String> {
    let needle = format!("[[{}#", page);
    let start = raw.find(&needle)?;
    SECTION_FRAGMENT
        .captures(&raw[start + needle.len() - 1..])
        .map(|c| c[1].to_string())
}

/// Link record persisted in the link store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub target_title: String,
    pub target_section: String,
    pub source_doc: String,
    pub source_section: String,
    pub language: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResolvedLink {
    /// Spans never overlap within one page, so the start offset plus the page id is unique.
    pub fn make_id(start: usize, source_id: &str) -> String {
        format!("{}:{}", start, source_id)
    }

    pub fn links_to_abstract(&self) -> bool {
        self.target_section == ABSTRACT_SECTION
    }
}
