use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::db::PolicyRecord;

pub const UNSPECIFIED_REGION: &str = "미정";
pub const NO_AGE: i64 = -1;

/// Region as it arrives: a single name or a list of names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionField {
    One(String),
    Many(Vec<String>),
}

impl Default for RegionField {
    fn default() -> Self {
        RegionField::One(String::new())
    }
}

/// Extractor output and bulk-import record shape. Absent and `null` fields
/// both fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDraft {
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub region: RegionField,
    #[serde(deserialize_with = "lenient_ages")]
    pub age_range: Vec<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub application_period: String,
    #[serde(deserialize_with = "null_as_default")]
    pub conditions: String,
    #[serde(deserialize_with = "null_as_default")]
    pub benefits: String,
}

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// Anything other than a list of integers means "no age information".
fn lenient_ages<'de, D>(de: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(de)?;
    Ok(value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("missing title")]
    MissingTitle,
    #[error("missing url")]
    MissingUrl,
}

pub fn normalize(draft: &PolicyDraft) -> Result<PolicyRecord, Rejected> {
    let title = draft.title.trim();
    let url = draft.url.trim();
    if title.is_empty() {
        return Err(Rejected::MissingTitle);
    }
    if url.is_empty() {
        return Err(Rejected::MissingUrl);
    }

    let (age_min, age_max) = age_bounds(&draft.age_range);

    Ok(PolicyRecord {
        url: url.to_string(),
        title: title.to_string(),
        region: normalize_region(&draft.region),
        age_min,
        age_max,
        application_period: draft.application_period.trim().to_string(),
        conditions: draft.conditions.trim().to_string(),
        benefits: draft.benefits.trim().to_string(),
    })
}

pub fn normalize_region(region: &RegionField) -> String {
    let joined = match region {
        RegionField::One(s) => s.trim().to_string(),
        RegionField::Many(list) => list
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    };
    if joined.is_empty() {
        UNSPECIFIED_REGION.to_string()
    } else {
        joined
    }
}

/// (min, max) of the range, or the (-1, -1) sentinel when empty.
pub fn age_bounds(range: &[i64]) -> (i64, i64) {
    match (range.iter().min(), range.iter().max()) {
        (Some(lo), Some(hi)) => (*lo, *hi),
        _ => (NO_AGE, NO_AGE),
    }
}
