use crate::content::encode_title;
use crate::index::PageLookup;
use crate::models::RedirectPage;
use anyhow::Result;
use tracing::debug;

/// Outcome of translating a link target. `target` is `None` when the link must be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub target: Option<String>,
    pub section: Option<String>,
}

impl Translation {
    fn dropped(section: Option<String>) -> Self {
        Self {
            target: None,
            section,
        }
    }
}

/// Resolves an encoded target title against the page store, following at most one
/// redirect hop. A redirect's own section is adopted only when the link names none.
pub fn translate_link<L: PageLookup + ?Sized>(
    lookup: &L,
    encoded_title: &str,
    section_hint: Option<&str>,
) -> Result<Translation> {
    let hint = section_hint.map(str::to_string);

    let header = match lookup.find_by_title(encoded_title)? {
        Some(header) => header,
        None => return Ok(Translation::dropped(hint)),
    };

    if !header.is_redirect {
        return Ok(Translation {
            target: Some(encoded_title.to_string()),
            section: hint,
        });
    }

    let redirect = RedirectPage::from_header(&header);
    let destination = match redirect.redirect_to_page {
        Some(page) => encode_title(&page),
        None => {
            debug!(redirect = %redirect.id, "Broken redirect");
            return Ok(Translation::dropped(hint));
        }
    };

    if lookup.find_by_title(&destination)?.is_none() {
        debug!(redirect = %redirect.id, to = %destination, "Redirect to a missing page");
        return Ok(Translation::dropped(hint));
    }

    debug!(from = encoded_title, to = %destination, "Following redirect");
    Ok(Translation {
        target: Some(destination),
        section: hint.or(redirect.redirect_to_section),
    })
}
