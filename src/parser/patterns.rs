use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const UNDETERMINED_PERIOD: &str = "미정";

const YOUTH_KEYWORDS: &[&str] = &["청년", "대학생"];
const YOUTH_DEFAULT: (i64, i64) = (20, 29);
const REGION_NAMES: &[&str] = &["서울", "인천", "경기"];

const DATE: &str = r"(\d{4}[.\-]\d{2}[.\-]\d{2})";

/// One rung of the age ladder: a pattern and how its captures become bounds.
struct AgeRule {
    pattern: Regex,
    fold: fn(&Captures) -> Option<(i64, i64)>,
}

static AGE_RULES: LazyLock<Vec<AgeRule>> = LazyLock::new(|| {
    vec![
        // 20세~29세
        AgeRule {
            pattern: Regex::new(r"(\d{1,2})\s*세\s*[~\-]\s*(\d{1,2})\s*세").unwrap(),
            fold: two_bounds,
        },
        // 만 29세 이하
        AgeRule {
            pattern: Regex::new(r"만\s*(\d{1,2})\s*세\s*이하").unwrap(),
            fold: ceiling,
        },
        // 20~29세
        AgeRule {
            pattern: Regex::new(r"(\d{1,2})\s*[~\-]\s*(\d{1,2})\s*세").unwrap(),
            fold: two_bounds,
        },
        // 만 20~29세. Every match here is already a match of the rule above,
        // so this rung never decides.
        AgeRule {
            pattern: Regex::new(r"만\s*(\d{1,2})\s*[~\-]\s*(\d{1,2})\s*세").unwrap(),
            fold: two_bounds,
        },
    ]
});

static PERIOD_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"신청기간\D*{DATE}\s*[~\-]\s*{DATE}"),
        format!(r"접수기간\D*{DATE}\s*[~\-]\s*{DATE}"),
        format!(r"{DATE}\s*[~\-]\s*{DATE}"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn two_bounds(caps: &Captures) -> Option<(i64, i64)> {
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

fn ceiling(caps: &Captures) -> Option<(i64, i64)> {
    Some((0, caps[1].parse().ok()?))
}

/// Age bounds from flattened page text. First matching rule wins; a youth
/// keyword alone implies the default 20s range.
pub fn extract_age(text: &str) -> Option<(i64, i64)> {
    let matched = AGE_RULES
        .iter()
        .find_map(|rule| rule.pattern.captures(text).and_then(|c| (rule.fold)(&c)));
    if matched.is_some() {
        return matched;
    }
    if YOUTH_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Some(YOUTH_DEFAULT);
    }
    None
}

/// `"<start>~<end>"` or [`UNDETERMINED_PERIOD`].
pub fn extract_period(text: &str) -> String {
    PERIOD_RULES
        .iter()
        .find_map(|re| re.captures(text))
        .map(|c| format!("{}~{}", &c[1], &c[2]))
        .unwrap_or_else(|| UNDETERMINED_PERIOD.to_string())
}

/// Region names mentioned in the text, in fixed order.
pub fn detect_regions(text: &str) -> Vec<String> {
    REGION_NAMES
        .iter()
        .filter(|r| text.contains(*r))
        .map(|r| r.to_string())
        .collect()
}
