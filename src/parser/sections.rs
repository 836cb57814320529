use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use super::content::flatten_text;

pub const CONDITION_KEYWORDS: &[&str] = &["지원대상", "사업대상", "신청자격", "지원자격", "조건"];
pub const BENEFIT_KEYWORDS: &[&str] = &["사업내용", "지원내용", "혜택", "지원금액"];

/// Siblings read after a heading before the section is considered exhausted.
const SIBLING_CAP: usize = 3;

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];
const CONTENT_TAGS: &[&str] = &["ul", "ol", "p", "div"];

static SECTION_HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3, h4, h5").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Conditions,
    Benefits,
    Other,
}

/// Conditions keywords are checked before benefits keywords.
pub fn classify_label(label: &str) -> SectionKind {
    if CONDITION_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        SectionKind::Conditions
    } else if BENEFIT_KEYWORDS.iter().any(|kw| label.contains(kw)) {
        SectionKind::Benefits
    } else {
        SectionKind::Other
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SectionText {
    pub conditions: String,
    pub benefits: String,
}

#[derive(Debug)]
enum State {
    Idle,
    InSection { kind: SectionKind, taken: usize },
}

/// Single-state machine: a heading opens a section, content siblings feed it,
/// the next heading closes it.
#[derive(Debug)]
struct Sectioner {
    state: State,
    out: SectionText,
}

impl Sectioner {
    fn new() -> Self {
        Sectioner {
            state: State::Idle,
            out: SectionText::default(),
        }
    }

    fn heading(&mut self, label: &str) {
        self.state = State::InSection {
            kind: classify_label(label),
            taken: 0,
        };
    }

    fn content(&mut self, text: &str) {
        let State::InSection { kind, taken } = &mut self.state else {
            return;
        };
        if *taken >= SIBLING_CAP {
            return;
        }
        *taken += 1;

        let target = match kind {
            SectionKind::Conditions => &mut self.out.conditions,
            SectionKind::Benefits => &mut self.out.benefits,
            SectionKind::Other => return,
        };
        if !text.is_empty() {
            target.push_str(text);
            target.push(' ');
        }
    }

    fn close(&mut self) {
        self.state = State::Idle;
    }

    fn finish(self) -> SectionText {
        SectionText {
            conditions: self.out.conditions.trim().to_string(),
            benefits: self.out.benefits.trim().to_string(),
        }
    }
}

/// Walk h3–h5 headings inside `block` in document order and collect the
/// text of the sibling elements that follow each one.
pub fn extract_sections(block: ElementRef<'_>) -> SectionText {
    let mut sectioner = Sectioner::new();

    for heading in block.select(&SECTION_HEADINGS) {
        sectioner.heading(&flatten_text(heading));

        for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
            let name = sibling.value().name();
            if HEADING_TAGS.contains(&name) {
                break;
            }
            if CONTENT_TAGS.contains(&name) {
                sectioner.content(&flatten_text(sibling));
            }
        }

        sectioner.close();
    }

    sectioner.finish()
}
