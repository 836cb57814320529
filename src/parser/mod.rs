pub mod content;
pub mod patterns;
pub mod sections;

use scraper::Html;
use tracing::debug;

use crate::normalize::{PolicyDraft, RegionField};

/// A fetched page plus the region its seed list belongs to.
pub struct RawPage {
    pub url: String,
    pub html: String,
    pub region: String,
}

/// Locate the content block and pull every field out of it.
/// `None` means the page has no recognizable content block, or the block is empty.
pub fn extract(page: &RawPage) -> Option<PolicyDraft> {
    let doc = Html::parse_document(&page.html);
    let (selector, block) = content::content_block(&doc)?;
    debug!(url = %page.url, selector, "Content block matched");

    let text = content::flatten_text(block);
    if text.is_empty() {
        debug!(url = %page.url, selector, "Content block is empty");
        return None;
    }
    let sections = sections::extract_sections(block);

    let region = if page.region.trim().is_empty() {
        RegionField::Many(patterns::detect_regions(&text))
    } else {
        RegionField::One(page.region.clone())
    };

    let age_range = patterns::extract_age(&text)
        .map(|(lo, hi)| vec![lo, hi])
        .unwrap_or_default();

    Some(PolicyDraft {
        title: content::title(&doc),
        url: page.url.clone(),
        region,
        age_range,
        application_period: patterns::extract_period(&text),
        conditions: sections.conditions,
        benefits: sections.benefits,
    })
}

// ── Tests ──
