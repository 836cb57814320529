use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::db;
use crate::normalize::UNSPECIFIED_REGION;

const TITLE_CEILING: usize = 100;
const TEXT_CEILING: usize = 1000;
const MIN_RECORDS: usize = 50;
const REPORT_FILE: &str = "validation_report.json";

/// Youth policy window, inclusive.
const YOUTH_WINDOW: (i64, i64) = (20, 39);
/// Coverage groups: a policy counts toward every group its range overlaps.
const AGE_GROUPS: &[(&str, i64, i64)] = &[
    ("teens", 0, 19),
    ("20s", 20, 29),
    ("30s", 30, 39),
    ("40s+", 40, 100),
];

#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub source: String,
    pub basic_stats: BasicStats,
    pub quality: Quality,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BasicStats {
    pub total: usize,
    pub regions: Vec<Share>,
    pub age_buckets: Vec<Share>,
    /// Overlap counts; one policy may appear in several groups.
    pub age_coverage: Vec<Share>,
    pub youth_target: usize,
    pub domains: Vec<Share>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Share {
    pub label: String,
    pub count: usize,
    pub percent: f64,
}

#[derive(Debug, Serialize)]
pub struct Quality {
    pub completeness: Completeness,
    pub anomalies: Anomalies,
    pub duplicates: Duplicates,
}

#[derive(Debug, Default, Serialize)]
pub struct Completeness {
    pub empty_title: usize,
    pub empty_url: usize,
    pub empty_region: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct Anomalies {
    pub inverted_age_range: usize,
    pub long_title: usize,
    pub long_text: usize,
    pub non_http_url: usize,
    pub no_age_info: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct Duplicates {
    pub titles: Vec<DuplicateGroup>,
    pub urls: Vec<DuplicateGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub value: String,
    pub ids: Vec<i64>,
}

/// Run every check against the current store contents. Never writes.
pub fn validate(conn: &Connection, source: &str) -> Result<Report> {
    let total = db::count(conn)?;

    let regions = db::region_counts(conn)?;
    let basic_stats = BasicStats {
        total,
        regions: shares(regions, total),
        age_buckets: shares(age_buckets(conn)?, total),
        age_coverage: shares(age_coverage(conn)?, total),
        youth_target: overlapping(conn, YOUTH_WINDOW.0, YOUTH_WINDOW.1)?,
        domains: shares(domains(conn)?, total),
    };

    let quality = Quality {
        completeness: completeness(conn)?,
        anomalies: anomalies(conn)?,
        duplicates: Duplicates {
            titles: duplicate_groups(conn, "title")?,
            urls: duplicate_groups(conn, "url")?,
        },
    };

    let recommendations = recommend(total, &quality);

    Ok(Report {
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        source: source.to_string(),
        basic_stats,
        quality,
        recommendations,
    })
}

fn count_where(conn: &Connection, condition: &str) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM welfare_policies WHERE {}", condition);
    let n: usize = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(n)
}

fn completeness(conn: &Connection) -> Result<Completeness> {
    Ok(Completeness {
        empty_title: count_where(conn, "title IS NULL OR title = ''")?,
        empty_url: count_where(conn, "url IS NULL OR url = ''")?,
        empty_region: conn.query_row(
            "SELECT COUNT(*) FROM welfare_policies WHERE region IS NULL OR region = '' OR region = ?1",
            [UNSPECIFIED_REGION],
            |r| r.get(0),
        )?,
    })
}

fn anomalies(conn: &Connection) -> Result<Anomalies> {
    Ok(Anomalies {
        inverted_age_range: count_where(conn, "age_min > age_max AND age_min != -1 AND age_max != -1")?,
        long_title: count_where(conn, &format!("LENGTH(title) > {}", TITLE_CEILING))?,
        long_text: count_where(
            conn,
            &format!("LENGTH(conditions) > {0} OR LENGTH(benefits) > {0}", TEXT_CEILING),
        )?,
        non_http_url: count_where(conn, "url NOT LIKE 'http%'")?,
        no_age_info: count_where(conn, "age_min = -1 OR age_max = -1")?,
    })
}

fn age_buckets(conn: &Connection) -> Result<Vec<(String, usize)>> {
    grouped(
        conn,
        "SELECT CASE
             WHEN age_min = -1 THEN 'unknown'
             WHEN age_min >= 0 AND age_max <= 19 THEN 'teens'
             WHEN age_min >= 20 AND age_max <= 29 THEN '20s'
             WHEN age_min >= 30 AND age_max <= 39 THEN '30s'
             WHEN age_min >= 40 THEN '40s+'
             ELSE 'other'
         END AS bucket, COUNT(*) AS n
         FROM welfare_policies GROUP BY bucket ORDER BY n DESC, bucket",
    )
}

/// Rows with known ages whose [age_min, age_max] overlaps [lo, hi].
fn overlapping(conn: &Connection, lo: i64, hi: i64) -> Result<usize> {
    let n: usize = conn.query_row(
        "SELECT COUNT(*) FROM welfare_policies
         WHERE age_min >= 0 AND age_min <= ?2 AND age_max >= ?1",
        [lo, hi],
        |r| r.get(0),
    )?;
    Ok(n)
}

fn age_coverage(conn: &Connection) -> Result<Vec<(String, usize)>> {
    AGE_GROUPS
        .iter()
        .map(|(label, lo, hi)| Ok((label.to_string(), overlapping(conn, *lo, *hi)?)))
        .collect()
}

fn domains(conn: &Connection) -> Result<Vec<(String, usize)>> {
    grouped(
        conn,
        "SELECT CASE
             WHEN url LIKE '%seoul%' THEN 'seoul'
             WHEN url LIKE '%incheon%' THEN 'incheon'
             WHEN url LIKE '%gg.go.kr%' THEN 'gyeonggi'
             WHEN url LIKE '%bokjiro%' THEN 'bokjiro'
             ELSE 'other'
         END AS domain, COUNT(*) AS n
         FROM welfare_policies GROUP BY domain ORDER BY n DESC, domain",
    )
}

fn grouped(conn: &Connection, sql: &str) -> Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn shares(counts: Vec<(String, usize)>, total: usize) -> Vec<Share> {
    counts
        .into_iter()
        .map(|(label, count)| Share {
            percent: percent(count, total),
            label,
            count,
        })
        .collect()
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 1000.0 / total as f64).round() / 10.0
}

/// Groups of rows sharing an identical `column` value. `column` is one of our own identifiers.
fn duplicate_groups(conn: &Connection, column: &str) -> Result<Vec<DuplicateGroup>> {
    let sql = format!(
        "SELECT {0}, group_concat(id) FROM welfare_policies
         GROUP BY {0} HAVING COUNT(*) > 1
         ORDER BY COUNT(*) DESC, {0}",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let value: Option<String> = row.get(0)?;
            let ids: String = row.get(1)?;
            Ok((value.unwrap_or_default(), ids))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(value, ids)| {
            let mut ids: Vec<i64> = ids.split(',').filter_map(|s| s.parse().ok()).collect();
            ids.sort_unstable();
            DuplicateGroup { value, ids }
        })
        .collect())
}

fn recommend(total: usize, q: &Quality) -> Vec<String> {
    let mut out = Vec::new();
    if total < MIN_RECORDS {
        out.push(format!(
            "Collect more policy data: {} records stored, at least {} expected.",
            total, MIN_RECORDS
        ));
    }
    if q.completeness.empty_title > 0 {
        out.push(format!("Fix {} records with a missing title.", q.completeness.empty_title));
    }
    if q.completeness.empty_url > 0 {
        out.push(format!("Fix {} records with a missing URL.", q.completeness.empty_url));
    }
    if q.completeness.empty_region > 0 {
        out.push(format!(
            "Assign a region to {} records marked unspecified.",
            q.completeness.empty_region
        ));
    }
    if q.anomalies.inverted_age_range > 0 {
        out.push(format!(
            "Review {} records whose age_min exceeds age_max.",
            q.anomalies.inverted_age_range
        ));
    }
    if !q.duplicates.titles.is_empty() || !q.duplicates.urls.is_empty() {
        out.push(format!(
            "Resolve duplicates: {} title groups, {} URL groups.",
            q.duplicates.titles.len(),
            q.duplicates.urls.len()
        ));
    }
    out
}

pub fn default_report_path(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map(|d| d.join(REPORT_FILE))
        .unwrap_or_else(|| PathBuf::from(REPORT_FILE))
}

pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Validation report written to {:?}", path);
    Ok(())
}

impl Report {
    pub fn print(&self) {
        let s = &self.basic_stats;
        println!("Total policies: {}", s.total);

        println!("\nBy region:");
        for r in &s.regions {
            println!("  {:<20} {:>5} ({:.1}%)", r.label, r.count, r.percent);
        }
        println!("\nBy age bucket:");
        for r in &s.age_buckets {
            println!("  {:<20} {:>5} ({:.1}%)", r.label, r.count, r.percent);
        }
        println!("\nAge coverage (overlapping ranges, youth 20-39: {}):", s.youth_target);
        for r in &s.age_coverage {
            println!("  {:<20} {:>5} ({:.1}%)", r.label, r.count, r.percent);
        }
        println!("\nBy source domain:");
        for r in &s.domains {
            println!("  {:<20} {:>5} ({:.1}%)", r.label, r.count, r.percent);
        }

        let c = &self.quality.completeness;
        let a = &self.quality.anomalies;
        println!("\nMissing:   title {} | url {} | region {}", c.empty_title, c.empty_url, c.empty_region);
        println!(
            "Anomalies: inverted ages {} | long titles {} | long text {} | non-http urls {} | no age {}",
            a.inverted_age_range, a.long_title, a.long_text, a.non_http_url, a.no_age_info
        );

        let d = &self.quality.duplicates;
        println!("Duplicates: {} title groups, {} url groups", d.titles.len(), d.urls.len());
        for g in &d.titles {
            println!("  title {:?} -> ids {:?}", g.value, g.ids);
        }

        if !self.recommendations.is_empty() {
            println!("\nRecommendations:");
            for r in &self.recommendations {
                println!("  - {}", r);
            }
        }
    }
}
