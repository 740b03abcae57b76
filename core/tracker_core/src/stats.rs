use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// Unproductive time above this over a week triggers a high-priority recommendation.
pub const UNPRODUCTIVE_WEEK_LIMIT_MS: i64 = 2 * 60 * 60 * 1000;
/// Fewer distinct productive domains than this over a week triggers a recommendation.
pub const MIN_PRODUCTIVE_DOMAINS: usize = 3;
pub const TOP_SITES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Productive,
    Unproductive,
    Neutral,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Productive => "productive",
            Category::Unproductive => "unproductive",
            Category::Neutral => "neutral",
        }
    }

    /// Exact match; used to validate incoming deltas.
    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "productive" => Some(Category::Productive),
            "unproductive" => Some(Category::Unproductive),
            "neutral" => Some(Category::Neutral),
            _ => None,
        }
    }

    /// Stored rows with an unknown category count as neutral.
    pub fn from_stored(s: &str) -> Category {
        Category::parse(s.trim()).unwrap_or(Category::Neutral)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TimeEntry {
    pub id: i64,
    pub domain: String,
    pub date: String,
    pub time_spent: i64,
    pub category: Category,
    pub visits: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One (date, category) sum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateCategoryTotal {
    pub date: String,
    pub category: Category,
    pub total_time: i64,
}

/// One (domain, category) sum over a date range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainTotal {
    pub domain: String,
    pub category: Category,
    pub total_time: i64,
    pub total_visits: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTotals {
    pub productive: i64,
    pub unproductive: i64,
    pub neutral: i64,
}

impl CategoryTotals {
    pub fn add(&mut self, category: Category, ms: i64) {
        match category {
            Category::Productive => self.productive += ms,
            Category::Unproductive => self.unproductive += ms,
            Category::Neutral => self.neutral += ms,
        }
    }

    pub fn total(&self) -> i64 {
        self.productive + self.unproductive + self.neutral
    }

    pub fn score(&self) -> i64 {
        productivity_score(self.productive, self.total())
    }
}

/// `round(productive / total * 100)`, or 0 when nothing was tracked.
pub fn productivity_score(productive: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    let productive = productive.clamp(0, total) as i128;
    let total = total as i128;
    ((productive * 100 * 2 + total) / (total * 2)) as i64
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    pub total_time: i64,
    pub productive_time: i64,
    pub unproductive_time: i64,
    pub neutral_time: i64,
    pub productivity_score: i64,
    pub total_sites: usize,
}

impl DayStats {
    pub fn from_items<I: IntoIterator<Item = (Category, i64)>>(items: I) -> Self {
        let mut totals = CategoryTotals::default();
        let mut sites = 0;
        for (category, ms) in items {
            totals.add(category, ms);
            sites += 1;
        }
        DayStats {
            total_time: totals.total(),
            productive_time: totals.productive,
            unproductive_time: totals.unproductive,
            neutral_time: totals.neutral,
            productivity_score: totals.score(),
            total_sites: sites,
        }
    }
}

pub fn day_stats(entries: &[TimeEntry]) -> DayStats {
    DayStats::from_items(entries.iter().map(|e| (e.category, e.time_spent)))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DayBreakdown {
    #[serde(flatten)]
    pub totals: CategoryTotals,
    pub sites: Vec<TimeEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyAggregate {
    pub week_start: String,
    pub week_end: String,
    pub daily_data: BTreeMap<String, DayBreakdown>,
    pub category_totals: CategoryTotals,
    pub total_time: i64,
    pub productivity_score: i64,
}

pub fn weekly(week_start: &str, week_end: &str, entries: &[TimeEntry]) -> WeeklyAggregate {
    let mut daily_data: BTreeMap<String, DayBreakdown> = BTreeMap::new();
    let mut category_totals = CategoryTotals::default();
    for e in entries {
        let day = daily_data.entry(e.date.clone()).or_default();
        day.totals.add(e.category, e.time_spent);
        day.sites.push(e.clone());
        category_totals.add(e.category, e.time_spent);
    }
    WeeklyAggregate {
        week_start: week_start.to_string(),
        week_end: week_end.to_string(),
        daily_data,
        total_time: category_totals.total(),
        productivity_score: category_totals.score(),
        category_totals,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CategorySeries {
    pub productive: Vec<i64>,
    pub unproductive: Vec<i64>,
    pub neutral: Vec<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Positive,
    Warning,
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Analytics {
    pub period: String,
    pub dates: Vec<String>,
    pub categories: CategorySeries,
    pub insights: Vec<Insight>,
}

/// Series are aligned to the sorted distinct dates present in `rows`.
pub fn analytics(period: &str, rows: &[DateCategoryTotal]) -> Analytics {
    let mut by_date: BTreeMap<&str, CategoryTotals> = BTreeMap::new();
    for r in rows {
        by_date
            .entry(r.date.as_str())
            .or_default()
            .add(r.category, r.total_time);
    }

    let mut dates = Vec::with_capacity(by_date.len());
    let mut categories = CategorySeries::default();
    for (date, totals) in by_date {
        dates.push(date.to_string());
        categories.productive.push(totals.productive);
        categories.unproductive.push(totals.unproductive);
        categories.neutral.push(totals.neutral);
    }

    let insights = insights(&dates, &categories);
    Analytics {
        period: period.to_string(),
        dates,
        categories,
        insights,
    }
}

fn insights(dates: &[String], series: &CategorySeries) -> Vec<Insight> {
    if dates.is_empty() {
        return vec![Insight {
            kind: InsightKind::Info,
            message: "No activity recorded in this period".to_string(),
        }];
    }

    // Both sums span the same days, so comparing them compares the exact averages.
    let days = dates.len() as i64;
    let productive = series.productive.iter().sum::<i64>();
    let unproductive = series.unproductive.iter().sum::<i64>();
    let avg_productive = productive / days;
    let avg_unproductive = unproductive / days;

    let mut out = Vec::with_capacity(2);
    if productive > unproductive {
        out.push(Insight {
            kind: InsightKind::Positive,
            message: format!(
                "Your productive time averages {}m per day - great job!",
                round_minutes(avg_productive)
            ),
        });
    } else {
        out.push(Insight {
            kind: InsightKind::Warning,
            message: format!(
                "Consider reducing unproductive time (avg {}m/day)",
                round_minutes(avg_unproductive)
            ),
        });
    }

    // Earliest day wins a tie.
    let mut best = 0;
    for (i, ms) in series.productive.iter().enumerate() {
        if *ms > series.productive[best] {
            best = i;
        }
    }
    out.push(Insight {
        kind: InsightKind::Info,
        message: format!("{} was your most productive day", dates[best]),
    });
    out
}

fn round_minutes(ms: i64) -> i64 {
    (ms.max(0) + 30_000) / 60_000
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub priority: Priority,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReport {
    pub week_start: String,
    pub week_end: String,
    pub stats: DayStats,
    pub top_sites: Vec<DomainTotal>,
    pub recommendations: Vec<Recommendation>,
}

pub fn weekly_report(week_start: &str, week_end: &str, domains: &[DomainTotal]) -> WeeklyReport {
    let mut sorted = domains.to_vec();
    sorted.sort_by(|a, b| {
        b.total_time
            .cmp(&a.total_time)
            .then_with(|| a.domain.cmp(&b.domain))
            .then_with(|| a.category.cmp(&b.category))
    });

    let stats = DayStats::from_items(sorted.iter().map(|d| (d.category, d.total_time)));
    let recommendations = recommendations(&sorted);
    sorted.truncate(TOP_SITES);

    WeeklyReport {
        week_start: week_start.to_string(),
        week_end: week_end.to_string(),
        stats,
        top_sites: sorted,
        recommendations,
    }
}

pub fn recommendations(domains: &[DomainTotal]) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let unproductive: i64 = domains
        .iter()
        .filter(|d| d.category == Category::Unproductive)
        .map(|d| d.total_time)
        .sum();
    if unproductive > UNPRODUCTIVE_WEEK_LIMIT_MS {
        out.push(Recommendation {
            kind: "time_management".to_string(),
            message: "Consider using website blockers during work hours to reduce distractions"
                .to_string(),
            priority: Priority::High,
        });
    }

    let productive_domains: BTreeSet<&str> = domains
        .iter()
        .filter(|d| d.category == Category::Productive)
        .map(|d| d.domain.as_str())
        .collect();
    if productive_domains.len() < MIN_PRODUCTIVE_DOMAINS {
        out.push(Recommendation {
            kind: "productivity".to_string(),
            message: "Try to spend more time on learning and development platforms".to_string(),
            priority: Priority::Medium,
        });
    }

    out
}
