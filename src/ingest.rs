use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{self, PolicyRecord, WriteStats};
use crate::fetch::{host_of, ClientConfig, FetchError, Fetcher};
use crate::normalize::{normalize, PolicyDraft, Rejected};
use crate::parser::{self, RawPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Upsert by url, leaving other rows alone.
    Merge,
    /// Delete every row, then insert the batch.
    Replace,
}

#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("no content block")]
    NoContent,
    #[error("rejected: {0}")]
    Rejected(#[from] Rejected),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("store write failed: {0}")]
    Store(String),
}

#[derive(Debug)]
pub struct Skip {
    pub url: String,
    pub reason: SkipReason,
}

impl Skip {
    fn new(url: &str, reason: SkipReason) -> Self {
        warn!("Skipped {}: {}", url, reason);
        Skip {
            url: url.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub pages: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: Vec<Skip>,
}

impl BatchSummary {
    pub fn print(&self) {
        println!(
            "Done: {} pages ({} inserted, {} updated, {} skipped).",
            self.pages,
            self.inserted,
            self.updated,
            self.skipped.len()
        );
        for s in &self.skipped {
            println!("  skipped {} ({})", s.url, s.reason);
        }
    }
}

// ── Crawl ──

pub struct CrawlOutcome {
    pub summary: BatchSummary,
    /// Every draft the extractor produced, before normalization.
    pub drafts: Vec<PolicyDraft>,
}

/// Fetch and extract every seed, then write the surviving records in one batch.
pub fn crawl(
    conn: &Connection,
    seeds: &[(String, String)],
    client: &ClientConfig,
    mode: WriteMode,
    parallel: bool,
) -> Result<CrawlOutcome> {
    let pb = progress_bar(seeds.len());
    let results = if parallel {
        harvest_by_host(seeds, client, &pb)?
    } else {
        let mut fetcher = Fetcher::new(client)?;
        harvest(&mut fetcher, seeds, &pb)
    };
    pb.finish_and_clear();

    let mut skipped = Vec::new();
    let mut drafts = Vec::new();
    for r in results {
        match r {
            Ok(d) => drafts.push(d),
            Err(s) => skipped.push(s),
        }
    }
    info!("Extracted {} of {} pages", drafts.len(), seeds.len());

    let mut summary = store(conn, &drafts, mode, skipped)?;
    summary.pages = seeds.len();
    Ok(CrawlOutcome { summary, drafts })
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

fn harvest(
    fetcher: &mut Fetcher,
    seeds: &[(String, String)],
    pb: &ProgressBar,
) -> Vec<Result<PolicyDraft, Skip>> {
    seeds
        .iter()
        .map(|(url, region)| {
            pb.set_message(url.clone());
            let r = fetch_page(fetcher, url, region).map_err(|reason| Skip::new(url, reason));
            pb.inc(1);
            r
        })
        .collect()
}

fn fetch_page(fetcher: &mut Fetcher, url: &str, region: &str) -> Result<PolicyDraft, SkipReason> {
    let html = fetcher.fetch(url)?;
    let page = RawPage {
        url: url.to_string(),
        html,
        region: region.to_string(),
    };
    parser::extract(&page).ok_or(SkipReason::NoContent)
}

/// Seeds grouped by host in first-seen order. Unparseable urls share one group
/// and fail at fetch time.
fn group_by_host(seeds: &[(String, String)]) -> Vec<Vec<(String, String)>> {
    let mut hosts: Vec<String> = Vec::new();
    let mut groups: Vec<Vec<(String, String)>> = Vec::new();
    for seed in seeds {
        let host = host_of(&seed.0).unwrap_or_default();
        match hosts.iter().position(|h| *h == host) {
            Some(i) => groups[i].push(seed.clone()),
            None => {
                hosts.push(host);
                groups.push(vec![seed.clone()]);
            }
        }
    }
    groups
}

/// One sequential fetcher per host, hosts in parallel. Output keeps group order.
fn harvest_by_host(
    seeds: &[(String, String)],
    client: &ClientConfig,
    pb: &ProgressBar,
) -> Result<Vec<Result<PolicyDraft, Skip>>> {
    let groups = group_by_host(seeds);
    info!("Crawling {} hosts in parallel", groups.len());

    let per_host: Vec<Result<Vec<_>, FetchError>> = groups
        .par_iter()
        .map(|group| -> Result<Vec<_>, FetchError> {
            let mut fetcher = Fetcher::new(client)?;
            Ok(harvest(&mut fetcher, group, pb))
        })
        .collect();

    let mut out = Vec::with_capacity(seeds.len());
    for r in per_host {
        out.extend(r?);
    }
    Ok(out)
}

// ── Import ──

/// Load one or more JSON draft files and write them as a single batch.
pub fn import(conn: &Connection, paths: &[impl AsRef<Path>], mode: WriteMode) -> Result<BatchSummary> {
    let mut drafts = Vec::new();
    let mut skipped = Vec::new();
    let mut pages = 0;

    for path in paths {
        let path = path.as_ref();
        let items = load_drafts(path)?;
        info!("Loaded {} items from {:?}", items.len(), path);
        pages += items.len();
        for item in items {
            match item {
                Ok(d) => drafts.push(d),
                Err(s) => skipped.push(s),
            }
        }
    }

    let mut summary = store(conn, &drafts, mode, skipped)?;
    summary.pages = pages;
    Ok(summary)
}

/// Parse a JSON array of drafts. An unreadable file or a non-array document is
/// fatal; a single bad item is skipped.
pub fn load_drafts(path: &Path) -> Result<Vec<Result<PolicyDraft, Skip>>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let items: Vec<serde_json::Value> =
        serde_json::from_str(&raw).with_context(|| format!("{:?} is not a JSON array", path))?;

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let label = value
                .get("url")
                .and_then(|u| u.as_str())
                .map(|u| u.to_string())
                .unwrap_or_else(|| format!("{}#{}", path.display(), i));
            serde_json::from_value::<PolicyDraft>(value)
                .map_err(|e| Skip::new(&label, SkipReason::Malformed(e.to_string())))
        })
        .collect())
}

pub fn export_drafts(path: &Path, drafts: &[PolicyDraft]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let json = serde_json::to_string_pretty(drafts)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Exported {} drafts to {:?}", drafts.len(), path);
    Ok(())
}

// ── Write ──

fn store(
    conn: &Connection,
    drafts: &[PolicyDraft],
    mode: WriteMode,
    mut skipped: Vec<Skip>,
) -> Result<BatchSummary> {
    let mut records: Vec<PolicyRecord> = Vec::with_capacity(drafts.len());
    for d in drafts {
        match normalize(d) {
            Ok(r) => records.push(r),
            Err(e) => skipped.push(Skip::new(&d.url, e.into())),
        }
    }

    let WriteStats {
        inserted,
        updated,
        failed,
    } = match mode {
        WriteMode::Merge => db::upsert_batch(conn, &records)?,
        WriteMode::Replace => db::replace_all(conn, &records)?,
    };
    skipped.extend(
        failed
            .into_iter()
            .map(|(url, err)| Skip::new(&url, SkipReason::Store(err))),
    );

    Ok(BatchSummary {
        pages: drafts.len(),
        inserted,
        updated,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{memory_db, record};
    use crate::normalize::RegionField;
    use std::time::Duration;

    fn client() -> ClientConfig {
        ClientConfig {
            user_agent: "welfare-test/1.0".into(),
            timeout: Duration::from_secs(5),
            delay: Duration::ZERO,
        }
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn serve(server: &mut mockito::Server) -> Vec<(String, String)> {
        server.mock("GET", "/good").with_status(200).with_body(fixture("seoul")).create();
        server.mock("GET", "/gone").with_status(404).create();
        server.mock("GET", "/empty").with_status(200).with_body(fixture("no_content")).create();
        ["/good", "/gone", "/empty"]
            .iter()
            .map(|p| (format!("{}{}", server.url(), p), "서울".to_string()))
            .collect()
    }

    #[test]
    fn crawl_skips_bad_pages_and_stores_good_ones() {
        let mut server = mockito::Server::new();
        let seeds = serve(&mut server);
        let conn = memory_db();

        let out = crawl(&conn, &seeds, &client(), WriteMode::Merge, false).unwrap();
        assert_eq!(out.summary.pages, 3);
        assert_eq!(out.summary.inserted, 1);
        assert_eq!(out.summary.skipped.len(), 2);
        assert!(matches!(
            out.summary.skipped[0].reason,
            SkipReason::Fetch(FetchError::Status(404))
        ));
        assert!(matches!(out.summary.skipped[1].reason, SkipReason::NoContent));
        assert_eq!(out.drafts.len(), 1);

        let stored = db::fetch_by_url(&conn, &seeds[0].0).unwrap().unwrap();
        assert_eq!(stored.record.title, "청년 월세 지원");
        assert_eq!((stored.record.age_min, stored.record.age_max), (19, 39));
        assert_eq!(db::count(&conn).unwrap(), 1);

        // Second run updates in place
        let again = crawl(&conn, &seeds, &client(), WriteMode::Merge, false).unwrap();
        assert_eq!((again.summary.inserted, again.summary.updated), (0, 1));
        assert_eq!(db::count(&conn).unwrap(), 1);
    }

    #[test]
    fn parallel_crawl_matches_sequential() {
        let mut server = mockito::Server::new();
        let seeds = serve(&mut server);
        let conn = memory_db();

        let out = crawl(&conn, &seeds, &client(), WriteMode::Merge, true).unwrap();
        assert_eq!(out.summary.inserted, 1);
        assert_eq!(out.summary.skipped.len(), 2);
        assert_eq!(out.summary.skipped[1].url, seeds[2].0);
    }

    #[test]
    fn crawl_replace_drops_stale_rows() {
        let mut server = mockito::Server::new();
        let seeds = serve(&mut server);
        let conn = memory_db();
        db::upsert(&conn, &record("https://stale", "예전 정책", "인천")).unwrap();

        crawl(&conn, &seeds, &client(), WriteMode::Replace, false).unwrap();
        assert!(db::fetch_by_url(&conn, "https://stale").unwrap().is_none());
        assert_eq!(db::count(&conn).unwrap(), 1);
    }

    #[test]
    fn group_by_host_keeps_first_seen_order() {
        let seeds: Vec<(String, String)> = [
            "https://a.go.kr/1",
            "https://b.go.kr/1",
            "https://a.go.kr/2",
            "nope",
        ]
        .iter()
        .map(|u| (u.to_string(), "서울".to_string()))
        .collect();
        let groups = group_by_host(&seeds);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][1].0, "https://a.go.kr/2");
        assert_eq!(groups[2][0].0, "nope");
    }

    #[test]
    fn import_skips_rejected_and_malformed_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");
        std::fs::write(
            &path,
            r#"[
                {"title": "청년 월세", "url": "https://a", "region": ["서울", "인천"], "age_range": [19, 20, 21]},
                {"title": "  ", "url": "https://no-title"},
                {"title": ["제목"], "url": "https://bad-title"}
            ]"#,
        )
        .unwrap();

        let conn = memory_db();
        let summary = import(&conn, &[&path], WriteMode::Merge).unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped.len(), 2);
        assert!(summary
            .skipped
            .iter()
            .any(|s| s.url == "https://no-title" && matches!(s.reason, SkipReason::Rejected(Rejected::MissingTitle))));
        assert!(summary
            .skipped
            .iter()
            .any(|s| s.url == "https://bad-title" && matches!(s.reason, SkipReason::Malformed(_))));

        let stored = db::fetch_by_url(&conn, "https://a").unwrap().unwrap();
        assert_eq!(stored.record.region, "서울, 인천");
        assert_eq!((stored.record.age_min, stored.record.age_max), (19, 21));
    }

    #[test]
    fn import_keeps_items_with_null_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nulls.json");
        std::fs::write(
            &path,
            r#"[
                {"title": "A", "url": "https://a", "region": null, "age_range": []},
                {"title": "B", "url": "https://b", "region": "서울", "age_range": null, "conditions": null}
            ]"#,
        )
        .unwrap();

        let conn = memory_db();
        let summary = import(&conn, &[&path], WriteMode::Merge).unwrap();
        assert_eq!(summary.inserted, 2);
        assert!(summary.skipped.is_empty());

        let a = db::fetch_by_url(&conn, "https://a").unwrap().unwrap().record;
        assert_eq!(a.region, crate::normalize::UNSPECIFIED_REGION);
        let b = db::fetch_by_url(&conn, "https://b").unwrap().unwrap().record;
        assert_eq!((b.age_min, b.age_max), (-1, -1));
        assert_eq!(b.conditions, "");
    }

    #[test]
    fn import_combines_files_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        std::fs::write(&first, r#"[{"title": "A", "url": "https://a", "region": "서울"}]"#).unwrap();
        std::fs::write(&second, r#"[{"title": "B", "url": "https://b"}]"#).unwrap();

        let conn = memory_db();
        db::upsert(&conn, &record("https://old", "예전", "경기")).unwrap();
        let summary = import(&conn, &[&first, &second], WriteMode::Replace).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(db::count(&conn).unwrap(), 2);
        assert!(db::fetch_by_url(&conn, "https://old").unwrap().is_none());
    }

    #[test]
    fn unreadable_or_non_array_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = memory_db();
        assert!(import(&conn, &[dir.path().join("missing.json")], WriteMode::Merge).is_err());

        let obj = dir.path().join("obj.json");
        std::fs::write(&obj, r#"{"title": "A"}"#).unwrap();
        assert!(import(&conn, &[&obj], WriteMode::Merge).is_err());
    }

    #[test]
    fn exported_drafts_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/drafts.json");
        let draft = PolicyDraft {
            title: "경기 청년 기본소득".into(),
            url: "https://youth.gg.go.kr/x".into(),
            region: RegionField::Many(vec!["경기".into()]),
            age_range: vec![20, 29],
            application_period: "미정".into(),
            conditions: "경기도 3년 이상 거주".into(),
            benefits: "분기별 25만원".into(),
        };
        export_drafts(&path, &[draft.clone()]).unwrap();

        let loaded = load_drafts(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_ref().unwrap(), &draft);
    }
}
