use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::classifier::{
    classify, default_productive_sites, default_unproductive_sites, Category,
};
use crate::tracker::Measurement;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub tracking_enabled: bool,
    pub productive_sites: Vec<String>,
    pub unproductive_sites: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            productive_sites: default_productive_sites(),
            unproductive_sites: default_unproductive_sites(),
        }
    }
}

impl Settings {
    pub fn classify(&self, domain: &str) -> Category {
        classify(domain, &self.productive_sites, &self.unproductive_sites)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateEntry {
    pub time_ms: i64,
    pub visits: i64,
    pub category: Category,
    pub last_title: String,
    pub last_url: String,
}

pub type DayEntries = BTreeMap<String, AggregateEntry>;

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS time_data (
  date TEXT NOT NULL,
  domain TEXT NOT NULL,
  time_ms INTEGER NOT NULL DEFAULT 0,
  visits INTEGER NOT NULL DEFAULT 0,
  category TEXT NOT NULL,
  last_title TEXT NOT NULL DEFAULT '',
  last_url TEXT NOT NULL DEFAULT '',
  PRIMARY KEY (date, domain)
);

CREATE TABLE IF NOT EXISTS settings (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  tracking_enabled INTEGER NOT NULL DEFAULT 1,
  productive_sites_json TEXT NOT NULL,
  unproductive_sites_json TEXT NOT NULL
);
"#,
    )
}

pub fn load_or_init_settings(conn: &mut Connection) -> rusqlite::Result<Settings> {
    if let Some(settings) = load_settings(conn)? {
        return Ok(settings);
    }
    let defaults = Settings::default();
    save_settings(conn, &defaults)?;
    Ok(defaults)
}

fn load_settings(conn: &mut Connection) -> rusqlite::Result<Option<Settings>> {
    conn.query_row(
        "SELECT tracking_enabled, productive_sites_json, unproductive_sites_json FROM settings WHERE id = 1",
        [],
        |row| {
            let enabled: i64 = row.get(0)?;
            let productive: String = row.get(1)?;
            let unproductive: String = row.get(2)?;
            Ok(Settings {
                tracking_enabled: enabled != 0,
                productive_sites: serde_json::from_str(&productive)
                    .unwrap_or_else(|_| default_productive_sites()),
                unproductive_sites: serde_json::from_str(&unproductive)
                    .unwrap_or_else(|_| default_unproductive_sites()),
            })
        },
    )
    .optional()
}

pub fn save_settings(conn: &mut Connection, settings: &Settings) -> rusqlite::Result<()> {
    let productive = serde_json::to_string(&settings.productive_sites)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let unproductive = serde_json::to_string(&settings.unproductive_sites)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        r#"
INSERT INTO settings (id, tracking_enabled, productive_sites_json, unproductive_sites_json)
VALUES (1, ?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET
  tracking_enabled=excluded.tracking_enabled,
  productive_sites_json=excluded.productive_sites_json,
  unproductive_sites_json=excluded.unproductive_sites_json
        "#,
        (settings.tracking_enabled as i64, productive, unproductive),
    )?;
    Ok(())
}

/// Adds one measurement to its (date, domain) row and returns the row's category.
///
/// The category is derived only when the row is created.
pub fn fold(
    conn: &mut Connection,
    m: &Measurement,
    settings: &Settings,
) -> rusqlite::Result<Option<Category>> {
    if m.domain.is_empty() || m.duration_ms <= 0 {
        return Ok(None);
    }
    let date = m.date.to_string();
    let tx = conn.transaction()?;
    tx.execute(
        r#"
INSERT INTO time_data (date, domain, time_ms, visits, category, last_title, last_url)
VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
ON CONFLICT(date, domain) DO UPDATE SET
  time_ms = time_ms + excluded.time_ms,
  visits = visits + 1,
  last_title = excluded.last_title,
  last_url = excluded.last_url
        "#,
        (
            &date,
            &m.domain,
            m.duration_ms,
            settings.classify(&m.domain).as_str(),
            &m.title,
            &m.url,
        ),
    )?;
    let category: String = tx.query_row(
        "SELECT category FROM time_data WHERE date = ?1 AND domain = ?2",
        (&date, &m.domain),
        |row| row.get(0),
    )?;
    tx.commit()?;
    Ok(Some(Category::parse(&category)))
}

pub fn get_day(conn: &Connection, date: NaiveDate) -> rusqlite::Result<DayEntries> {
    let range = get_range(conn, date, date)?;
    Ok(range.into_values().next().unwrap_or_default())
}

/// Inclusive on both ends. Days with no rows are absent.
pub fn get_range(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> rusqlite::Result<BTreeMap<String, DayEntries>> {
    let mut stmt = conn.prepare(
        "SELECT date, domain, time_ms, visits, category, last_title, last_url FROM time_data WHERE date BETWEEN ?1 AND ?2 ORDER BY date",
    )?;
    let rows = stmt.query_map((from.to_string(), to.to_string()), |row| {
        let category: String = row.get(4)?;
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            AggregateEntry {
                time_ms: row.get(2)?,
                visits: row.get(3)?,
                category: Category::parse(&category),
                last_title: row.get(5)?,
                last_url: row.get(6)?,
            },
        ))
    })?;

    let mut out: BTreeMap<String, DayEntries> = BTreeMap::new();
    for r in rows {
        let (date, domain, entry) = r?;
        out.entry(date).or_default().insert(domain, entry);
    }
    Ok(out)
}

/// Re-derives every stored category from the current site lists. Returns rows changed.
pub fn reclassify_all(conn: &mut Connection, settings: &Settings) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let domains: Vec<String> = {
        let mut stmt = tx.prepare("SELECT DISTINCT domain FROM time_data")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let domains = rows.collect::<rusqlite::Result<Vec<String>>>()?;
        domains
    };
    let mut changed = 0;
    for domain in &domains {
        changed += tx.execute(
            "UPDATE time_data SET category = ?1 WHERE domain = ?2 AND category != ?1",
            (settings.classify(domain).as_str(), domain),
        )?;
    }
    tx.commit()?;
    Ok(changed)
}
