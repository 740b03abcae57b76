use chrono::{DateTime, Days, Local};
use rusqlite::Connection;
use tokio::io::AsyncWrite;
use tracing::{debug, error, info, warn};

use crate::host::{write_message, HostError, Incoming, Outgoing, TabInfo};
use crate::store::{self, Settings};
use crate::sync::{Delta, SyncEmitter};
use crate::tracker::{Measurement, SessionTracker, TrackerEvent};

/// Owns all client state. Every method runs to completion before the next event is taken,
/// so at most one session is ever live.
pub struct Collector {
    conn: Connection,
    settings: Settings,
    tracker: SessionTracker,
    emitter: SyncEmitter,
}

impl Collector {
    pub fn new(conn: Connection, settings: Settings, emitter: SyncEmitter) -> Self {
        let mut tracker = SessionTracker::new();
        tracker.set_enabled(settings.tracking_enabled, Local::now());
        Self {
            conn,
            settings,
            tracker,
            emitter,
        }
    }

    pub fn on_event(&mut self, event: TrackerEvent, now: DateTime<Local>) {
        let measurements = self.tracker.handle(event, now);
        self.record(measurements);
        if let Some(s) = self.tracker.current_session() {
            debug!(tab_id = ?s.tab_id, domain = %s.domain, "tracking");
        }
    }

    /// Local fold first, then forward. A failed fold is logged and the delta still goes out.
    fn record(&mut self, measurements: Vec<Measurement>) {
        for m in measurements {
            let category = match store::fold(&mut self.conn, &m, &self.settings) {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(err) => {
                    error!("local fold failed for {} ({}): {err}", m.domain, m.date);
                    self.settings.classify(&m.domain)
                }
            };
            self.emitter.emit(Delta {
                domain: m.domain,
                time_spent_ms: m.duration_ms,
                date: m.date.to_string(),
                category,
            });
        }
    }

    pub async fn handle_frame<W: AsyncWrite + Unpin>(
        &mut self,
        bytes: &[u8],
        now: DateTime<Local>,
        out: &mut W,
    ) -> Result<(), HostError> {
        match serde_json::from_slice::<Incoming>(bytes) {
            Ok(msg) => self.handle_message(msg, now, out).await,
            Err(err) => {
                warn!("ignoring malformed message: {err}");
                write_message(out, &Outgoing::Error { error: "bad_message" }).await
            }
        }
    }

    pub async fn handle_message<W: AsyncWrite + Unpin>(
        &mut self,
        msg: Incoming,
        now: DateTime<Local>,
        out: &mut W,
    ) -> Result<(), HostError> {
        match msg {
            Incoming::TabActivated(tab) | Incoming::TabUpdated(tab) => {
                self.on_event(focus_event(tab, false), now);
            }
            Incoming::WindowFocusGained(tab) => self.on_event(focus_event(tab, true), now),
            Incoming::WindowFocusLost => self.on_event(TrackerEvent::BrowserLostFocus, now),
            Incoming::PageHidden | Incoming::UserIdle => self.on_event(TrackerEvent::Suspend, now),
            Incoming::PageVisible(tab) | Incoming::UserActive(tab) => {
                let event = TrackerEvent::Resume {
                    tab_id: tab.tab_id,
                    url: tab.url,
                    title: tab.title,
                };
                self.on_event(event, now);
            }
            Incoming::GetToday => {
                let date = now.date_naive();
                let entries = match store::get_day(&self.conn, date) {
                    Ok(v) => v,
                    Err(err) => {
                        error!("get_day failed: {err}");
                        return write_message(out, &Outgoing::Error { error: "db_error" }).await;
                    }
                };
                let reply = Outgoing::Today {
                    date: date.to_string(),
                    entries: &entries,
                };
                write_message(out, &reply).await?;
            }
            Incoming::GetWeek => {
                let to = now.date_naive();
                let from = to.checked_sub_days(Days::new(6)).unwrap_or(to);
                let days = match store::get_range(&self.conn, from, to) {
                    Ok(v) => v,
                    Err(err) => {
                        error!("get_range failed: {err}");
                        return write_message(out, &Outgoing::Error { error: "db_error" }).await;
                    }
                };
                write_message(out, &Outgoing::Week { days: &days }).await?;
            }
            Incoming::GetSettings => {
                write_message(
                    out,
                    &Outgoing::Settings {
                        settings: &self.settings,
                    },
                )
                .await?;
            }
            Incoming::UpdateSettings(update) => {
                let mut next = self.settings.clone();
                let lists_changed = update.apply(&mut next);
                if let Err(err) = store::save_settings(&mut self.conn, &next) {
                    error!("save_settings failed: {err}");
                    return write_message(out, &Outgoing::Error { error: "db_error" }).await;
                }
                if next.tracking_enabled != self.tracker.is_enabled() {
                    info!("tracking enabled: {}", next.tracking_enabled);
                    let measurements = self.tracker.set_enabled(next.tracking_enabled, now);
                    self.record(measurements);
                }
                self.settings = next;
                if lists_changed {
                    match store::reclassify_all(&mut self.conn, &self.settings) {
                        Ok(n) => info!("site lists changed; reclassified {n} entries"),
                        Err(err) => error!("reclassify_all failed: {err}"),
                    }
                }
                write_message(
                    out,
                    &Outgoing::Settings {
                        settings: &self.settings,
                    },
                )
                .await?;
            }
            Incoming::GetStatus => {
                let reply = Outgoing::Status {
                    tracking_enabled: self.tracker.is_enabled(),
                    current_domain: self.tracker.current_domain(),
                    sync: self.emitter.counts(),
                };
                write_message(out, &reply).await?;
            }
        }
        Ok(())
    }

    /// Closes the live session and gives queued deltas a bounded window to go out.
    pub async fn shutdown(mut self, now: DateTime<Local>, grace: std::time::Duration) {
        self.on_event(TrackerEvent::Suspend, now);
        let counts = self.emitter.drain(grace).await;
        info!(
            "collector stopped; synced {} failed {} dropped {}",
            counts.delivered, counts.failed, counts.dropped
        );
    }
}

fn focus_event(tab: TabInfo, window: bool) -> TrackerEvent {
    if window {
        TrackerEvent::BrowserGainedFocus {
            tab_id: tab.tab_id,
            url: tab.url,
            title: tab.title,
        }
    } else {
        TrackerEvent::TabFocused {
            tab_id: tab.tab_id,
            url: tab.url,
            title: tab.title,
        }
    }
}
