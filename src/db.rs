use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{info, warn};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS welfare_policies (
            id                 INTEGER PRIMARY KEY,
            url                TEXT NOT NULL,
            title              TEXT NOT NULL,
            region             TEXT NOT NULL,
            age_min            INTEGER NOT NULL DEFAULT -1,
            age_max            INTEGER NOT NULL DEFAULT -1,
            application_period TEXT NOT NULL DEFAULT '',
            conditions         TEXT NOT NULL DEFAULT '',
            benefits           TEXT NOT NULL DEFAULT '',
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_policies_url ON welfare_policies(url);
        CREATE INDEX IF NOT EXISTS idx_policies_region ON welfare_policies(region);
        CREATE INDEX IF NOT EXISTS idx_policies_age ON welfare_policies(age_min, age_max);
        ",
    )?;
    Ok(())
}

// ── Records ──

/// Canonical record as written by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRecord {
    pub url: String,
    pub title: String,
    pub region: String,
    pub age_min: i64,
    pub age_max: i64,
    pub application_period: String,
    pub conditions: String,
    pub benefits: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredPolicy {
    pub id: i64,
    #[serde(flatten)]
    pub record: PolicyRecord,
    pub created_at: String,
    pub updated_at: String,
}

const POLICY_COLUMNS: &str = "id, url, title, region, age_min, age_max, application_period, \
                              conditions, benefits, created_at, updated_at";

fn policy_from_row(row: &Row) -> rusqlite::Result<StoredPolicy> {
    Ok(StoredPolicy {
        id: row.get(0)?,
        record: PolicyRecord {
            url: row.get(1)?,
            title: row.get(2)?,
            region: row.get(3)?,
            age_min: row.get(4)?,
            age_max: row.get(5)?,
            application_period: row.get(6)?,
            conditions: row.get(7)?,
            benefits: row.get(8)?,
        },
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ── Writes ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Per-batch write counts. `failed` holds (url, error) for rows that were skipped.
#[derive(Debug, Default)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub failed: Vec<(String, String)>,
}

pub fn upsert(conn: &Connection, record: &PolicyRecord) -> Result<UpsertOutcome> {
    upsert_at(conn, record, &timestamp())
}

/// Update-by-url if present, insert otherwise. `now` stamps `updated_at`
/// (and `created_at` on insert).
pub fn upsert_at(conn: &Connection, record: &PolicyRecord, now: &str) -> Result<UpsertOutcome> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM welfare_policies WHERE url = ?1",
            [&record.url],
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE welfare_policies
                 SET title = ?1, region = ?2, age_min = ?3, age_max = ?4,
                     application_period = ?5, conditions = ?6, benefits = ?7, updated_at = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    record.title, record.region, record.age_min, record.age_max,
                    record.application_period, record.conditions, record.benefits, now, id,
                ],
            )?;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            insert_at(conn, record, now)?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

fn insert_at(conn: &Connection, record: &PolicyRecord, now: &str) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO welfare_policies
         (url, title, region, age_min, age_max, application_period, conditions, benefits,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
    )?;
    stmt.execute(rusqlite::params![
        record.url, record.title, record.region, record.age_min, record.age_max,
        record.application_period, record.conditions, record.benefits, now,
    ])?;
    Ok(())
}

/// Upsert a batch in one transaction. Row-level failures are logged and
/// reported; transaction failures abort the batch.
pub fn upsert_batch(conn: &Connection, records: &[PolicyRecord]) -> Result<WriteStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = WriteStats::default();
    for r in records {
        match upsert(&tx, r) {
            Ok(UpsertOutcome::Inserted) => stats.inserted += 1,
            Ok(UpsertOutcome::Updated) => stats.updated += 1,
            Err(e) => {
                warn!("Upsert failed for {}: {}", r.url, e);
                stats.failed.push((r.url.clone(), e.to_string()));
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

/// Full reload: delete every row, then insert the batch, all in one transaction.
pub fn replace_all(conn: &Connection, records: &[PolicyRecord]) -> Result<WriteStats> {
    let tx = conn.unchecked_transaction()?;
    let deleted = tx
        .execute("DELETE FROM welfare_policies", [])
        .context("Failed to clear welfare_policies")?;
    info!("Full reload: cleared {} existing rows", deleted);

    let now = timestamp();
    let mut stats = WriteStats::default();
    for r in records {
        match insert_at(&tx, r, &now) {
            Ok(()) => stats.inserted += 1,
            Err(e) => {
                warn!("Insert failed for {}: {}", r.url, e);
                stats.failed.push((r.url.clone(), e.to_string()));
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

// ── Reads ──

fn query_policies(
    conn: &Connection,
    where_clause: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<StoredPolicy>> {
    let sql = format!(
        "SELECT {} FROM welfare_policies{} ORDER BY region, title",
        POLICY_COLUMNS, where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, policy_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_all(conn: &Connection) -> Result<Vec<StoredPolicy>> {
    query_policies(conn, "", &[])
}

pub fn fetch_by_url(conn: &Connection, url: &str) -> Result<Option<StoredPolicy>> {
    let sql = format!("SELECT {} FROM welfare_policies WHERE url = ?1", POLICY_COLUMNS);
    let row = conn.query_row(&sql, [url], policy_from_row).optional()?;
    Ok(row)
}

/// Exact region, or membership in a comma-joined region list.
pub fn fetch_by_region(conn: &Connection, region: &str) -> Result<Vec<StoredPolicy>> {
    query_policies(
        conn,
        " WHERE region = ?1 OR instr(', ' || region || ',', ', ' || ?1 || ',') > 0",
        &[&region],
    )
}

/// Records whose [age_min, age_max] covers `age`. Sentinel rows never match.
pub fn fetch_by_age(conn: &Connection, age: i64) -> Result<Vec<StoredPolicy>> {
    query_policies(
        conn,
        " WHERE age_min <= ?1 AND age_max >= ?1 AND age_min >= 0",
        &[&age],
    )
}

pub fn search(conn: &Connection, keyword: &str) -> Result<Vec<StoredPolicy>> {
    let pattern = format!("%{}%", keyword);
    query_policies(
        conn,
        " WHERE title LIKE ?1 OR conditions LIKE ?1 OR benefits LIKE ?1",
        &[&pattern],
    )
}

pub fn distinct_regions(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT region FROM welfare_policies ORDER BY region")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(conn: &Connection) -> Result<usize> {
    let n: usize = conn.query_row("SELECT COUNT(*) FROM welfare_policies", [], |r| r.get(0))?;
    Ok(n)
}

/// (region, count), largest first.
pub fn region_counts(conn: &Connection) -> Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare(
        "SELECT region, COUNT(*) AS n FROM welfare_policies GROUP BY region ORDER BY n DESC, region",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    pub(crate) fn record(url: &str, title: &str, region: &str) -> PolicyRecord {
        PolicyRecord {
            url: url.to_string(),
            title: title.to_string(),
            region: region.to_string(),
            age_min: 19,
            age_max: 39,
            application_period: "2024.03.01~2024.03.31".into(),
            conditions: "무주택 청년".into(),
            benefits: "월 20만원".into(),
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let conn = memory_db();
        let r = record("https://wis.seoul.go.kr/a", "청년 월세", "서울");

        assert_eq!(upsert_at(&conn, &r, "2024-01-01T00:00:00.000000Z").unwrap(), UpsertOutcome::Inserted);
        assert_eq!(upsert_at(&conn, &r, "2024-01-02T00:00:00.000000Z").unwrap(), UpsertOutcome::Updated);
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn update_keeps_created_at() {
        let conn = memory_db();
        let mut r = record("https://wis.seoul.go.kr/a", "청년 월세", "서울");
        upsert_at(&conn, &r, "2024-01-01T00:00:00.000000Z").unwrap();

        r.benefits = "월 30만원".into();
        upsert_at(&conn, &r, "2024-02-01T00:00:00.000000Z").unwrap();

        let stored = fetch_by_url(&conn, &r.url).unwrap().unwrap();
        assert_eq!(stored.record.benefits, "월 30만원");
        assert_eq!(stored.created_at, "2024-01-01T00:00:00.000000Z");
        assert_eq!(stored.updated_at, "2024-02-01T00:00:00.000000Z");
    }

    #[test]
    fn replace_all_leaves_exactly_the_batch() {
        let conn = memory_db();
        upsert(&conn, &record("https://old/1", "예전 정책", "서울")).unwrap();
        upsert(&conn, &record("https://old/2", "예전 정책 2", "인천")).unwrap();

        let batch = vec![
            record("https://new/1", "새 정책 1", "경기"),
            record("https://new/2", "새 정책 2", "경기"),
            record("https://new/3", "새 정책 3", "서울"),
        ];
        let stats = replace_all(&conn, &batch).unwrap();
        assert_eq!(stats.inserted, 3);
        assert!(stats.failed.is_empty());

        let rows = fetch_all(&conn).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.record.url.starts_with("https://new/")));
    }

    #[test]
    fn duplicate_url_in_reload_is_row_local() {
        let conn = memory_db();
        let batch = vec![
            record("https://dup", "첫번째", "서울"),
            record("https://dup", "두번째", "서울"),
            record("https://ok", "정상", "서울"),
        ];
        let stats = replace_all(&conn, &batch).unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.failed[0].0, "https://dup");
        assert_eq!(count(&conn).unwrap(), 2);
    }

    #[test]
    fn batch_upsert_counts() {
        let conn = memory_db();
        upsert(&conn, &record("https://a", "A", "서울")).unwrap();
        let stats = upsert_batch(
            &conn,
            &[record("https://a", "A2", "서울"), record("https://b", "B", "인천")],
        )
        .unwrap();
        assert_eq!((stats.inserted, stats.updated), (1, 1));
        assert_eq!(fetch_by_url(&conn, "https://a").unwrap().unwrap().record.title, "A2");
    }

    #[test]
    fn reads_by_region_age_and_keyword() {
        let conn = memory_db();
        let mut teen = record("https://t", "청소년 바우처", "서울, 인천");
        teen.age_min = 13;
        teen.age_max = 18;
        let mut none = record("https://n", "어르신 돌봄", "경기");
        none.age_min = -1;
        none.age_max = -1;
        none.benefits = "돌봄 서비스".into();
        for r in [&teen, &none, &record("https://y", "청년 월세", "서울")] {
            upsert(&conn, r).unwrap();
        }

        let seoul: Vec<_> = fetch_by_region(&conn, "서울").unwrap();
        assert_eq!(seoul.len(), 2);
        assert_eq!(fetch_by_region(&conn, "인천").unwrap().len(), 1);
        assert!(fetch_by_region(&conn, "서").unwrap().is_empty());

        let fifteen = fetch_by_age(&conn, 15).unwrap();
        assert_eq!(fifteen.len(), 1);
        assert_eq!(fifteen[0].record.url, "https://t");
        assert_eq!(fetch_by_age(&conn, 25).unwrap().len(), 1);
        assert!(fetch_by_age(&conn, -1).unwrap().is_empty());

        assert_eq!(search(&conn, "돌봄").unwrap().len(), 1);
        assert_eq!(search(&conn, "월").unwrap().len(), 2);

        assert_eq!(distinct_regions(&conn).unwrap(), vec!["경기", "서울", "서울, 인천"]);
        let counts = region_counts(&conn).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(count(&conn).unwrap(), 3);
    }

    #[test]
    fn connect_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/welfare.sqlite");
        let conn = connect(&path).unwrap();
        init_schema(&conn).unwrap();
        assert!(path.exists());
    }
}
