use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

pub const NO_TITLE: &str = "제목 없음";

/// Candidate locations of the main policy description, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    ".txt-tp1",
    "#detail_con .line-box",
    ".box-gray",
    ".con-box",
    ".content-area",
    ".detail-content",
];

/// Candidate title locations; `title` is the generic fallback.
const TITLE_SELECTORS: &[&str] = &[
    ".title-area h2",
    ".b-title-box span",
    "h1",
    ".page-title",
    "title",
];

static CONTENT_CASCADE: LazyLock<Vec<(&'static str, Selector)>> =
    LazyLock::new(|| compile(CONTENT_SELECTORS));
static TITLE_CASCADE: LazyLock<Vec<(&'static str, Selector)>> =
    LazyLock::new(|| compile(TITLE_SELECTORS));

fn compile(list: &[&'static str]) -> Vec<(&'static str, Selector)> {
    list.iter()
        .map(|s| (*s, Selector::parse(s).unwrap()))
        .collect()
}

/// First content-block selector with a match wins. Returns the selector that matched.
pub fn content_block(doc: &Html) -> Option<(&'static str, ElementRef<'_>)> {
    CONTENT_CASCADE
        .iter()
        .find_map(|(name, sel)| doc.select(sel).next().map(|el| (*name, el)))
}

/// Title cascade. A selector only wins if its first match has text.
pub fn title(doc: &Html) -> String {
    TITLE_CASCADE
        .iter()
        .find_map(|(_, sel)| {
            doc.select(sel)
                .next()
                .map(flatten_text)
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| NO_TITLE.to_string())
}

/// All text under `el`, each fragment trimmed, joined by single spaces.
pub fn flatten_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
