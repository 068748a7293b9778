use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Storage-safe escapes for characters the page store refuses in key paths.
const ESCAPED_DOLLAR: &str = "\\u0024";
const ESCAPED_DOT: &str = "\\u002e";

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").unwrap());

static EMPTY_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)").unwrap());

static EMPTY_BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\s*\]").unwrap());

static EMPTY_BRACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*\}").unwrap());

static DOUBLE_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*,").unwrap());

static DOUBLE_PERIOD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s*\.").unwrap());

/// Image/table captions such as `thumb|left [[File:...]]`. Links inside them rarely
/// line up with the surrounding text.
static LEGEND_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+\|[\w']+ ?\[\[[^\\]*\]\]").unwrap());

/// Reverses the storage escaping and NFKD-normalizes so every language ends up with a
/// single representation per character.
pub fn decode_for_display(text: &str) -> String {
    let normalized: String = text.nfkd().collect();
    normalized
        .replace("\\\\", "\\")
        .replace(ESCAPED_DOLLAR, "$")
        .replace(ESCAPED_DOT, ".")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Inverse of [`decode_for_display`] for the escaping (normalization is not undone).
///
/// Wiki titles are case-insensitive only in their first character, so titles get it
/// uppercased. Title paths skip the dot/dollar escaping.
pub fn encode_for_storage(text: &str, force_upper_first: bool, is_title_path: bool) -> String {
    let normalized: String = text.nfkd().collect();
    let mut encoded = if force_upper_first {
        upper_first(&normalized)
    } else {
        normalized
    };

    if !is_title_path {
        encoded = encoded
            .replace('\\', "\\\\")
            .replace('$', ESCAPED_DOLLAR)
            .replace('.', ESCAPED_DOT);
    }

    encoded
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .trim()
        .to_string()
}

/// Encoded form of a page title as stored in the `title` path.
pub fn encode_title(text: &str) -> String {
    encode_for_storage(text, true, true)
}

/// Store key for a title exactly as the export carries it, escapes included. Decoding
/// first gives the same key that link targets and source docs are looked up with.
pub fn title_key(raw_title: &str) -> String {
    encode_title(&decode_for_display(raw_title))
}

/// Encoded form of a section name. Section names keep their case.
pub fn encode_section(text: &str) -> String {
    encode_for_storage(text, false, false)
}

fn upper_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Cleans parser output into the text that link spans are measured against.
///
/// Every step either shortens the text or is a no-op on its own output, so the pass is
/// repeated until nothing changes. That keeps `clean_content` idempotent even when one
/// fix uncovers another (`"a ( ) , , b"`).
pub fn clean_content(text: &str) -> String {
    let mut current = clean_pass(text);
    loop {
        let next = clean_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(text: &str) -> String {
    let decoded = decode_for_display(text).replace(['\n', '\r'], " ");
    let collapsed = MULTI_SPACE.replace_all(&decoded, " ");
    let unescaped = collapsed.trim().replace("\\`", "`").replace("\\'", "'");

    let text = EMPTY_PARENS.replace_all(&unescaped, "");
    let text = EMPTY_BRACKETS.replace_all(&text, "");
    let text = EMPTY_BRACES.replace_all(&text, "");
    let text = DOUBLE_COMMA.replace_all(&text, ",");
    DOUBLE_PERIOD.replace_all(&text, ".").into_owned()
}

pub fn is_legend(text: &str) -> bool {
    LEGEND_REGEX.is_match(text)
}
