use chrono::{DateTime, Local, NaiveDate, TimeZone};
use reqwest::Url;

/// A live interval of focus on one domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub tab_id: Option<i64>,
    pub domain: String,
    pub started_at: DateTime<Local>,
    pub title: String,
    pub url: String,
}

/// A closed interval, ready to be folded into the local store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub domain: String,
    pub date: NaiveDate,
    pub duration_ms: i64,
    pub occurred_at: DateTime<Local>,
    pub title: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking(Session),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerEvent {
    TabFocused {
        tab_id: Option<i64>,
        url: String,
        title: String,
    },
    BrowserGainedFocus {
        tab_id: Option<i64>,
        url: String,
        title: String,
    },
    BrowserLostFocus,
    /// Page hidden or the user went idle.
    Suspend,
    /// Page visible again or user activity. Leaves a live session on the same domain alone.
    Resume {
        tab_id: Option<i64>,
        url: String,
        title: String,
    },
    PeriodicTick,
}

pub struct SessionTracker {
    state: TrackerState,
    enabled: bool,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            state: TrackerState::Idle,
            enabled: true,
        }
    }

    pub fn current_session(&self) -> Option<&Session> {
        match &self.state {
            TrackerState::Tracking(s) => Some(s),
            TrackerState::Idle => None,
        }
    }

    pub fn current_domain(&self) -> Option<&str> {
        match &self.state {
            TrackerState::Tracking(s) => Some(s.domain.as_str()),
            TrackerState::Idle => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling closes the live session; no session opens until re-enabled.
    pub fn set_enabled(&mut self, enabled: bool, now: DateTime<Local>) -> Vec<Measurement> {
        self.enabled = enabled;
        if enabled {
            return Vec::new();
        }
        self.close(now)
    }

    pub fn handle(&mut self, event: TrackerEvent, now: DateTime<Local>) -> Vec<Measurement> {
        match event {
            TrackerEvent::TabFocused { tab_id, url, title }
            | TrackerEvent::BrowserGainedFocus { tab_id, url, title } => {
                let out = self.close(now);
                if self.enabled {
                    if let Some(domain) = trackable_domain(&url) {
                        self.state = TrackerState::Tracking(Session {
                            tab_id,
                            domain,
                            started_at: now,
                            title,
                            url,
                        });
                    }
                }
                out
            }
            TrackerEvent::Resume { tab_id, url, title } => {
                let same = trackable_domain(&url)
                    .is_some_and(|d| self.current_domain() == Some(d.as_str()));
                if same {
                    return Vec::new();
                }
                self.handle(TrackerEvent::TabFocused { tab_id, url, title }, now)
            }
            TrackerEvent::BrowserLostFocus | TrackerEvent::Suspend => self.close(now),
            TrackerEvent::PeriodicTick => {
                let reopen = match &self.state {
                    TrackerState::Tracking(s) => Some(s.clone()),
                    TrackerState::Idle => None,
                };
                let out = self.close(now);
                if let Some(prev) = reopen {
                    self.state = TrackerState::Tracking(Session {
                        started_at: now,
                        ..prev
                    });
                }
                out
            }
        }
    }

    /// Always leaves the tracker idle.
    fn close(&mut self, now: DateTime<Local>) -> Vec<Measurement> {
        match std::mem::replace(&mut self.state, TrackerState::Idle) {
            TrackerState::Tracking(session) => split_by_day(&session, now),
            TrackerState::Idle => Vec::new(),
        }
    }
}

/// Only http(s) URLs with a host are tracked; browser-internal pages are not.
pub fn trackable_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.trim().to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn split_by_day(session: &Session, end: DateTime<Local>) -> Vec<Measurement> {
    let mut out = Vec::new();
    if session.domain.is_empty() || end <= session.started_at {
        return out;
    }

    let mut cursor = session.started_at;
    while cursor < end {
        let day = cursor.date_naive();
        let segment_end = next_local_midnight(day)
            .filter(|m| *m > cursor && *m < end)
            .unwrap_or(end);
        let duration_ms = (segment_end - cursor).num_milliseconds();
        if duration_ms > 0 {
            out.push(Measurement {
                domain: session.domain.clone(),
                date: day,
                duration_ms,
                occurred_at: segment_end,
                title: session.title.clone(),
                url: session.url.clone(),
            });
        }
        cursor = segment_end;
    }
    out
}

fn next_local_midnight(day: NaiveDate) -> Option<DateTime<Local>> {
    let next = day.succ_opt()?.and_hms_opt(0, 0, 0)?;
    Local.from_local_datetime(&next).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    fn focus(url: &str) -> TrackerEvent {
        TrackerEvent::TabFocused {
            tab_id: Some(1),
            url: url.to_string(),
            title: String::new(),
        }
    }

    #[test]
    fn focus_change_then_blur_emits_two_measurements() {
        let t0 = at(10, 0, 0);
        let mut tracker = SessionTracker::new();
        assert!(tracker.handle(focus("https://a.com/x"), t0).is_empty());

        let first = tracker.handle(focus("https://b.com/"), t0 + Duration::milliseconds(5000));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].domain, "a.com");
        assert_eq!(first[0].duration_ms, 5000);

        let second = tracker.handle(
            TrackerEvent::BrowserLostFocus,
            t0 + Duration::milliseconds(9000),
        );
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].domain, "b.com");
        assert_eq!(second[0].duration_ms, 4000);
        assert_eq!(&tracker.state, &TrackerState::Idle);
    }

    #[test]
    fn tick_closes_and_reopens_same_domain() {
        let t0 = at(10, 0, 0);
        let mut tracker = SessionTracker::new();
        tracker.handle(focus("https://github.com/rust-lang"), t0);

        let mut total = 0;
        for i in 1..=4 {
            let out = tracker.handle(TrackerEvent::PeriodicTick, t0 + Duration::seconds(30 * i));
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].duration_ms, 30_000);
            total += out[0].duration_ms;
        }
        let out = tracker.handle(TrackerEvent::BrowserLostFocus, t0 + Duration::seconds(130));
        total += out[0].duration_ms;
        assert_eq!(total, 130_000);
        assert_eq!(&tracker.state, &TrackerState::Idle);
    }

    #[test]
    fn tick_while_idle_is_noop() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.handle(TrackerEvent::PeriodicTick, at(9, 0, 0)).is_empty());
        assert_eq!(&tracker.state, &TrackerState::Idle);
    }

    #[test]
    fn internal_pages_go_idle() {
        let t0 = at(10, 0, 0);
        let mut tracker = SessionTracker::new();
        tracker.handle(focus("https://a.com"), t0);
        let out = tracker.handle(focus("chrome://settings"), t0 + Duration::seconds(2));
        assert_eq!(out.len(), 1);
        assert_eq!(&tracker.state, &TrackerState::Idle);

        assert_eq!(trackable_domain("chrome-extension://abc/popup.html"), None);
        assert_eq!(trackable_domain("about:blank"), None);
        assert_eq!(trackable_domain("file:///tmp/x.html"), None);
        assert_eq!(trackable_domain("not a url"), None);
        assert_eq!(
            trackable_domain("https://Docs.RS/chrono").as_deref(),
            Some("docs.rs")
        );
    }

    #[test]
    fn clock_skew_emits_nothing() {
        let t0 = at(10, 0, 0);
        let mut tracker = SessionTracker::new();
        tracker.handle(focus("https://a.com"), t0);
        let out = tracker.handle(TrackerEvent::BrowserLostFocus, t0 - Duration::seconds(5));
        assert!(out.is_empty());
        assert_eq!(&tracker.state, &TrackerState::Idle);
    }

    #[test]
    fn gained_focus_opens_session() {
        let t0 = at(10, 0, 0);
        let mut tracker = SessionTracker::new();
        tracker.handle(
            TrackerEvent::BrowserGainedFocus {
                tab_id: Some(7),
                url: "https://leetcode.com/problems".to_string(),
                title: "Problems".to_string(),
            },
            t0,
        );
        assert_eq!(tracker.current_domain(), Some("leetcode.com"));
        let out = tracker.handle(TrackerEvent::Suspend, t0 + Duration::seconds(1));
        assert_eq!(out[0].title, "Problems");
        assert_eq!(out[0].url, "https://leetcode.com/problems");
    }

    #[test]
    fn disabled_tracker_stays_idle() {
        let t0 = at(10, 0, 0);
        let mut tracker = SessionTracker::new();
        tracker.handle(focus("https://a.com"), t0);
        let out = tracker.set_enabled(false, t0 + Duration::seconds(3));
        assert_eq!(out[0].duration_ms, 3000);

        tracker.handle(focus("https://b.com"), t0 + Duration::seconds(4));
        assert_eq!(&tracker.state, &TrackerState::Idle);

        tracker.set_enabled(true, t0 + Duration::seconds(5));
        tracker.handle(focus("https://b.com"), t0 + Duration::seconds(6));
        assert_eq!(tracker.current_domain(), Some("b.com"));
    }

    #[test]
    fn resume_reopens_after_suspend_only() {
        let t0 = at(10, 0, 0);
        let resume = |url: &str| TrackerEvent::Resume {
            tab_id: Some(1),
            url: url.to_string(),
            title: String::new(),
        };
        let mut tracker = SessionTracker::new();
        tracker.handle(focus("https://a.com"), t0);
        assert!(tracker
            .handle(resume("https://a.com/other"), t0 + Duration::seconds(5))
            .is_empty());
        assert_eq!(tracker.current_session().unwrap().started_at, t0);

        tracker.handle(TrackerEvent::Suspend, t0 + Duration::seconds(10));
        assert!(tracker
            .handle(resume("https://a.com"), t0 + Duration::seconds(70))
            .is_empty());
        assert_eq!(tracker.current_domain(), Some("a.com"));

        let out = tracker.handle(TrackerEvent::PeriodicTick, t0 + Duration::seconds(100));
        assert_eq!(out[0].duration_ms, 30_000);

        let out = tracker.handle(resume("https://b.com"), t0 + Duration::seconds(101));
        assert_eq!(out[0].domain, "a.com");
        assert_eq!(tracker.current_domain(), Some("b.com"));
    }

    #[test]
    fn session_across_midnight_is_split_per_day() {
        let start = Local.with_ymd_and_hms(2024, 1, 1, 23, 59, 50).unwrap();
        let end = Local.with_ymd_and_hms(2024, 1, 2, 0, 0, 20).unwrap();
        let mut tracker = SessionTracker::new();
        tracker.handle(focus("https://a.com"), start);
        let out = tracker.handle(TrackerEvent::BrowserLostFocus, end);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(out[0].duration_ms, 10_000);
        assert_eq!(out[1].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(out[1].duration_ms, 20_000);
    }
}
