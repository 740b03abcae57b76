use rusqlite::{Connection, Row};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::stats::{Category, DateCategoryTotal, DomainTotal, TimeEntry, WeeklyReport};

/// A validated delta from a collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    pub domain: String,
    pub time_spent: i64,
    pub date: String,
    pub category: Category,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertResult {
    Created,
    Updated,
}

#[derive(Clone, Debug, Serialize)]
pub struct StoredWeeklyReport {
    pub week_start: String,
    pub total_time: i64,
    pub productive_time: i64,
    pub unproductive_time: i64,
    pub neutral_time: i64,
    pub productivity_score: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS time_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  domain TEXT NOT NULL,
  date TEXT NOT NULL,
  time_spent INTEGER NOT NULL,
  category TEXT NOT NULL,
  visits INTEGER NOT NULL DEFAULT 1,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_time_entries_domain_date ON time_entries(domain, date);
CREATE INDEX IF NOT EXISTS idx_time_entries_date ON time_entries(date);

CREATE TABLE IF NOT EXISTS weekly_reports (
  week_start TEXT PRIMARY KEY,
  total_time INTEGER NOT NULL,
  productive_time INTEGER NOT NULL,
  unproductive_time INTEGER NOT NULL,
  neutral_time INTEGER NOT NULL,
  productivity_score INTEGER NOT NULL,
  report_json TEXT,
  created_at TEXT NOT NULL
);
"#,
    )
}

/// Adds one delta to its (domain, date) row inside a single transaction.
///
/// The category is only written when the row is created.
pub fn apply_delta(
    conn: &mut Connection,
    delta: &Delta,
    now_ts: &str,
) -> rusqlite::Result<UpsertResult> {
    let tx = conn.transaction()?;
    let updated = tx.execute(
        r#"
UPDATE time_entries
SET time_spent = time_spent + ?1, visits = visits + 1, updated_at = ?2
WHERE domain = ?3 AND date = ?4
        "#,
        (delta.time_spent, now_ts, &delta.domain, &delta.date),
    )?;
    let result = if updated == 0 {
        tx.execute(
            r#"
INSERT INTO time_entries (domain, date, time_spent, category, visits, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
            "#,
            (
                &delta.domain,
                &delta.date,
                delta.time_spent,
                delta.category.as_str(),
                now_ts,
            ),
        )?;
        UpsertResult::Created
    } else {
        UpsertResult::Updated
    };
    tx.commit()?;
    Ok(result)
}

fn row_to_entry(row: &Row) -> rusqlite::Result<TimeEntry> {
    let category: String = row.get("category")?;
    Ok(TimeEntry {
        id: row.get("id")?,
        domain: row.get("domain")?,
        date: row.get("date")?,
        time_spent: row.get("time_spent")?,
        category: Category::from_stored(&category),
        visits: row.get("visits")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Collects mapped rows, skipping (and logging) any row that fails to decode.
fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> Vec<T> {
    let mut out = Vec::new();
    for r in rows {
        match r {
            Ok(v) => out.push(v),
            Err(err) => warn!("skipping malformed {what} row: {err}"),
        }
    }
    out
}

pub fn list_entries_for_date(conn: &mut Connection, date: &str) -> rusqlite::Result<Vec<TimeEntry>> {
    list_entries_between(conn, date, date)
}

/// Inclusive range, ordered by date then time spent (largest first).
pub fn list_entries_between(
    conn: &mut Connection,
    from: &str,
    to: &str,
) -> rusqlite::Result<Vec<TimeEntry>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, domain, date, time_spent, category, visits, created_at, updated_at
FROM time_entries
WHERE date BETWEEN ?1 AND ?2
ORDER BY date, time_spent DESC, domain
        "#,
    )?;
    let rows = stmt.query_map((from, to), row_to_entry)?;
    Ok(collect_rows(rows, "time_entries"))
}

/// Sums per (date, category), optionally limited to dates on or after `since`.
pub fn category_totals_by_date(
    conn: &mut Connection,
    since: Option<&str>,
) -> rusqlite::Result<Vec<DateCategoryTotal>> {
    let mut stmt = conn.prepare(
        r#"
SELECT date, category, SUM(time_spent) AS total_time
FROM time_entries
WHERE ?1 IS NULL OR date >= ?1
GROUP BY date, category
ORDER BY date
        "#,
    )?;
    let rows = stmt.query_map([since], |row| {
        let category: String = row.get(1)?;
        Ok(DateCategoryTotal {
            date: row.get(0)?,
            category: Category::from_stored(&category),
            total_time: row.get(2)?,
        })
    })?;
    Ok(collect_rows(rows, "category total"))
}

/// Sums per (domain, category) across an inclusive date range, largest first.
pub fn domain_totals_between(
    conn: &mut Connection,
    from: &str,
    to: &str,
) -> rusqlite::Result<Vec<DomainTotal>> {
    let mut stmt = conn.prepare(
        r#"
SELECT domain, category, SUM(time_spent) AS total_time, SUM(visits) AS total_visits
FROM time_entries
WHERE date BETWEEN ?1 AND ?2
GROUP BY domain, category
ORDER BY total_time DESC, domain
        "#,
    )?;
    let rows = stmt.query_map((from, to), |row| {
        let category: String = row.get(1)?;
        Ok(DomainTotal {
            domain: row.get(0)?,
            category: Category::from_stored(&category),
            total_time: row.get(2)?,
            total_visits: row.get(3)?,
        })
    })?;
    Ok(collect_rows(rows, "domain total"))
}

/// Replaces any earlier snapshot for the same week.
pub fn upsert_weekly_report(
    conn: &mut Connection,
    report: &WeeklyReport,
    created_at: &str,
) -> rusqlite::Result<()> {
    let report_json = serde_json::to_string(report)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        r#"
INSERT INTO weekly_reports
  (week_start, total_time, productive_time, unproductive_time, neutral_time, productivity_score, report_json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(week_start) DO UPDATE SET
  total_time=excluded.total_time,
  productive_time=excluded.productive_time,
  unproductive_time=excluded.unproductive_time,
  neutral_time=excluded.neutral_time,
  productivity_score=excluded.productivity_score,
  report_json=excluded.report_json,
  created_at=excluded.created_at
        "#,
        (
            &report.week_start,
            report.stats.total_time,
            report.stats.productive_time,
            report.stats.unproductive_time,
            report.stats.neutral_time,
            report.stats.productivity_score,
            report_json,
            created_at,
        ),
    )?;
    Ok(())
}

/// Newest week first.
pub fn list_weekly_reports(
    conn: &mut Connection,
    limit: usize,
) -> rusqlite::Result<Vec<StoredWeeklyReport>> {
    let mut stmt = conn.prepare(
        r#"
SELECT week_start, total_time, productive_time, unproductive_time, neutral_time,
       productivity_score, report_json, created_at
FROM weekly_reports
ORDER BY week_start DESC
LIMIT ?1
        "#,
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        let report_json: Option<String> = row.get(6)?;
        Ok(StoredWeeklyReport {
            week_start: row.get(0)?,
            total_time: row.get(1)?,
            productive_time: row.get(2)?,
            unproductive_time: row.get(3)?,
            neutral_time: row.get(4)?,
            productivity_score: row.get(5)?,
            report: report_json.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.get(7)?,
        })
    })?;
    Ok(collect_rows(rows, "weekly_reports"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    fn delta(domain: &str, date: &str, ms: i64, category: Category) -> Delta {
        Delta {
            domain: domain.to_string(),
            time_spent: ms,
            date: date.to_string(),
            category,
        }
    }

    #[test]
    fn same_delta_twice_accumulates_one_row() {
        let mut conn = open();
        let d = delta("leetcode.com", "2024-01-01", 600_000, Category::Productive);
        assert_eq!(
            apply_delta(&mut conn, &d, "2024-01-01T10:00:00Z").unwrap(),
            UpsertResult::Created
        );
        assert_eq!(
            apply_delta(&mut conn, &d, "2024-01-01T10:01:00Z").unwrap(),
            UpsertResult::Updated
        );

        let rows = list_entries_for_date(&mut conn, "2024-01-01").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].domain, "leetcode.com");
        assert_eq!(rows[0].time_spent, 1_200_000);
        assert_eq!(rows[0].visits, 2);
        assert_eq!(rows[0].created_at, "2024-01-01T10:00:00Z");
        assert_eq!(rows[0].updated_at, "2024-01-01T10:01:00Z");
    }

    #[test]
    fn first_category_sticks() {
        let mut conn = open();
        apply_delta(
            &mut conn,
            &delta("github.com", "2024-01-01", 10, Category::Productive),
            "t",
        )
        .unwrap();
        apply_delta(
            &mut conn,
            &delta("github.com", "2024-01-01", 10, Category::Unproductive),
            "t",
        )
        .unwrap();
        let rows = list_entries_for_date(&mut conn, "2024-01-01").unwrap();
        assert_eq!(rows[0].category, Category::Productive);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let mut conn = open();
        apply_delta(
            &mut conn,
            &delta("github.com", "2024-01-01", 10, Category::Productive),
            "t",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO time_entries (domain, date, time_spent, category, visits, created_at, updated_at) VALUES ('bad.com', '2024-01-01', 'lots', 'neutral', 1, 't', 't')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO time_entries (domain, date, time_spent, category, visits, created_at, updated_at) VALUES ('odd.com', '2024-01-01', 5, 'weird', 1, 't', 't')",
            [],
        )
        .unwrap();

        let rows = list_entries_for_date(&mut conn, "2024-01-01").unwrap();
        assert_eq!(rows.len(), 2);
        let odd = rows.iter().find(|r| r.domain == "odd.com").unwrap();
        assert_eq!(odd.category, Category::Neutral);
    }

    #[test]
    fn aggregates_by_date_and_domain() {
        let mut conn = open();
        for (domain, date, ms, c) in [
            ("github.com", "2024-01-01", 100, Category::Productive),
            ("github.com", "2024-01-02", 200, Category::Productive),
            ("reddit.com", "2024-01-02", 50, Category::Unproductive),
            ("github.com", "2024-02-01", 999, Category::Productive),
        ] {
            apply_delta(&mut conn, &delta(domain, date, ms, c), "t").unwrap();
        }

        let totals = category_totals_by_date(&mut conn, Some("2024-01-02")).unwrap();
        assert_eq!(totals.len(), 3);
        assert_eq!(totals[0].date, "2024-01-02");
        assert_eq!(category_totals_by_date(&mut conn, None).unwrap().len(), 4);

        let domains = domain_totals_between(&mut conn, "2024-01-01", "2024-01-07").unwrap();
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].domain, "github.com");
        assert_eq!(domains[0].total_time, 300);
        assert_eq!(domains[0].total_visits, 2);
    }

    #[test]
    fn weekly_snapshot_is_replaced_per_week() {
        let mut conn = open();
        let first = stats::weekly_report(
            "2024-01-01",
            "2024-01-07",
            &[DomainTotal {
                domain: "github.com".to_string(),
                category: Category::Productive,
                total_time: 100,
                total_visits: 1,
            }],
        );
        upsert_weekly_report(&mut conn, &first, "2024-01-08T00:00:00Z").unwrap();
        let second = stats::weekly_report("2024-01-01", "2024-01-07", &[]);
        upsert_weekly_report(&mut conn, &second, "2024-01-09T00:00:00Z").unwrap();
        let other = stats::weekly_report("2024-01-08", "2024-01-14", &[]);
        upsert_weekly_report(&mut conn, &other, "2024-01-15T00:00:00Z").unwrap();

        let stored = list_weekly_reports(&mut conn, 10).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].week_start, "2024-01-08");
        assert_eq!(stored[1].week_start, "2024-01-01");
        assert_eq!(stored[1].total_time, 0);
        assert_eq!(stored[1].created_at, "2024-01-09T00:00:00Z");
        assert_eq!(
            stored[1].report.as_ref().unwrap()["weekStart"],
            "2024-01-01"
        );
    }
}
