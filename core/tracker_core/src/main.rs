mod db;
mod stats;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::db::{Delta, UpsertResult};
use crate::stats::{Category, DayStats, TimeEntry};

const DEFAULT_PORT: u16 = 3000;
const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;

#[derive(Parser, Debug)]
#[command(name = "tracker_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:3000
    /// - ip (implies port 3000), e.g. 127.0.0.1
    /// - localhost or localhost:port
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/tracker-core.db")]
    db: PathBuf,
}

#[derive(Clone)]
struct AppState {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    success: bool,
    error: &'static str,
}

fn err_response(status: StatusCode, error: &'static str) -> Response {
    (
        status,
        Json(ErrResponse {
            success: false,
            error,
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
struct TrackRequest {
    #[serde(default)]
    domain: Option<String>,
    #[serde(rename = "timeSpent", default)]
    time_spent: Option<i64>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Serialize)]
struct TrackResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<bool>,
}

#[derive(Deserialize)]
struct TodayQuery {
    /// Client local offset minutes, e.g. 480 for UTC+8.
    tz_offset_minutes: Option<i32>,
}

#[derive(Serialize)]
struct TodayResponse {
    data: Vec<TimeEntry>,
    stats: DayStats,
}

#[derive(Deserialize)]
struct WeekQuery {
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    tz_offset_minutes: Option<i32>,
}

#[derive(Deserialize)]
struct AnalyticsQuery {
    period: Option<String>,
    tz_offset_minutes: Option<i32>,
}

#[derive(Deserialize)]
struct ReportQuery {
    #[serde(rename = "weekStart")]
    week_start: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    12
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_core=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&args.db)?;
    db::init_db(&conn)?;

    let state = AppState {
        conn: Arc::new(Mutex::new(conn)),
    };

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/track", post(post_track).options(options_ok))
        .route("/today", get(get_today))
        .route("/week", get(get_week))
        .route("/analytics", get(get_analytics))
        .route("/report/weekly", get(get_weekly_report))
        .route("/report/weekly/history", get(get_weekly_report_history))
        .with_state(state)
        .layer(cors)
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        if host == "localhost" {
            let port: u16 = port_str.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                    input,
                    DEFAULT_PORT
                )
            })?;
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
        }
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        success: true,
        data: Some(HealthInfo {
            service: "tracker_core",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

async fn post_track(State(state): State<AppState>, Json(payload): Json<Value>) -> Response {
    let req: TrackRequest = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return err_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };

    let domain = req
        .domain
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty());
    let date = req.date.filter(|d| !d.trim().is_empty());
    let category = req.category.filter(|c| !c.trim().is_empty());
    let (Some(domain), Some(time_spent), Some(date), Some(category)) =
        (domain, req.time_spent, date, category)
    else {
        return err_response(StatusCode::BAD_REQUEST, "missing_fields");
    };

    if time_spent <= 0 {
        return err_response(StatusCode::BAD_REQUEST, "invalid_time_spent");
    }
    let Some(date) = parse_date(&date) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_date");
    };
    let Some(category) = Category::parse(category.trim()) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_category");
    };

    let delta = Delta {
        domain,
        time_spent,
        date: date.to_string(),
        category,
    };
    let now_ts = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();

    let mut conn = state.conn.lock().await;
    match db::apply_delta(&mut conn, &delta, &now_ts) {
        Ok(UpsertResult::Created) => Json(TrackResponse {
            success: true,
            created: Some(true),
            updated: None,
        })
        .into_response(),
        Ok(UpsertResult::Updated) => Json(TrackResponse {
            success: true,
            created: None,
            updated: Some(true),
        })
        .into_response(),
        Err(err) => {
            error!("apply_delta failed for {} ({}): {err}", delta.domain, delta.date);
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_today(State(state): State<AppState>, Query(q): Query<TodayQuery>) -> Response {
    let today = today_for_offset(q.tz_offset_minutes).to_string();
    let mut conn = state.conn.lock().await;
    match db::list_entries_for_date(&mut conn, &today) {
        Ok(mut data) => {
            data.sort_by(|a, b| b.time_spent.cmp(&a.time_spent));
            let stats = stats::day_stats(&data);
            Json(TodayResponse { data, stats }).into_response()
        }
        Err(err) => {
            error!("list_entries_for_date failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_week(State(state): State<AppState>, Query(q): Query<WeekQuery>) -> Response {
    let week_start = match q.start_date.as_deref() {
        Some(s) => match parse_date(s) {
            Some(d) => d,
            None => return err_response(StatusCode::BAD_REQUEST, "invalid_date"),
        },
        None => week_start_for(today_for_offset(q.tz_offset_minutes)),
    };
    let week_end = add_days(week_start, 6);
    let (from, to) = (week_start.to_string(), week_end.to_string());

    let mut conn = state.conn.lock().await;
    match db::list_entries_between(&mut conn, &from, &to) {
        Ok(entries) => Json(stats::weekly(&from, &to, &entries)).into_response(),
        Err(err) => {
            error!("list_entries_between failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_analytics(State(state): State<AppState>, Query(q): Query<AnalyticsQuery>) -> Response {
    let today = today_for_offset(q.tz_offset_minutes);
    let (period, since) = analytics_window(q.period.as_deref(), today);
    let since = since.map(|d| d.to_string());

    let mut conn = state.conn.lock().await;
    match db::category_totals_by_date(&mut conn, since.as_deref()) {
        Ok(rows) => Json(stats::analytics(period, &rows)).into_response(),
        Err(err) => {
            error!("category_totals_by_date failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

async fn get_weekly_report(State(state): State<AppState>, Query(q): Query<ReportQuery>) -> Response {
    let Some(raw) = q.week_start.filter(|s| !s.trim().is_empty()) else {
        return err_response(StatusCode::BAD_REQUEST, "missing_week_start");
    };
    let Some(week_start) = parse_date(&raw) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_date");
    };
    let (from, to) = (week_start.to_string(), add_days(week_start, 6).to_string());

    let mut conn = state.conn.lock().await;
    let domains = match db::domain_totals_between(&mut conn, &from, &to) {
        Ok(v) => v,
        Err(err) => {
            error!("domain_totals_between failed: {err}");
            return err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error");
        }
    };
    let report = stats::weekly_report(&from, &to, &domains);

    let created_at = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    if let Err(err) = db::upsert_weekly_report(&mut conn, &report, &created_at) {
        error!("upsert_weekly_report failed for {from}: {err}");
    }

    Json(report).into_response()
}

async fn get_weekly_report_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    let limit = q.limit.clamp(1, 520);
    let mut conn = state.conn.lock().await;
    match db::list_weekly_reports(&mut conn, limit) {
        Ok(reports) => Json(OkResponse {
            success: true,
            data: Some(reports),
        })
        .into_response(),
        Err(err) => {
            error!("list_weekly_reports failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error")
        }
    }
}

fn normalize_tz_offset_minutes(v: Option<i32>) -> i32 {
    v.unwrap_or(0)
        .clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

fn tz_offset_from_minutes(minutes: i32) -> time::UtcOffset {
    time::UtcOffset::from_whole_seconds(minutes.saturating_mul(60))
        .unwrap_or(time::UtcOffset::UTC)
}

fn today_for_offset(tz_offset_minutes: Option<i32>) -> Date {
    let offset = tz_offset_from_minutes(normalize_tz_offset_minutes(tz_offset_minutes));
    OffsetDateTime::now_utc().to_offset(offset).date()
}

/// Parses YYYY-MM-DD. Callers store `Date::to_string()` so keys are always zero-padded.
fn parse_date(s: &str) -> Option<Date> {
    let parts: Vec<&str> = s.trim().split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let y: i32 = parts[0].parse().ok()?;
    let m: u8 = parts[1].parse().ok()?;
    let d: u8 = parts[2].parse().ok()?;
    let month = time::Month::try_from(m).ok()?;
    Date::from_calendar_date(y, month, d).ok()
}

fn add_days(date: Date, days: i64) -> Date {
    date.checked_add(time::Duration::days(days)).unwrap_or(date)
}

/// Weeks start on Sunday.
fn week_start_for(date: Date) -> Date {
    add_days(date, -(date.weekday().number_days_from_sunday() as i64))
}

fn one_month_before(date: Date) -> Date {
    let (year, month) = match date.month() {
        time::Month::January => (date.year() - 1, time::Month::December),
        m => (date.year(), m.previous()),
    };
    let day = date.day().min(month.length(year));
    Date::from_calendar_date(year, month, day).unwrap_or(date)
}

/// `week` and `month` look back from `today`; anything else covers all rows.
fn analytics_window(period: Option<&str>, today: Date) -> (&'static str, Option<Date>) {
    match period.unwrap_or("week") {
        "week" => ("week", Some(add_days(today, -7))),
        "month" => ("month", Some(one_month_before(today))),
        _ => ("all", None),
    }
}
