//! Browser native messaging: each frame is a native-endian u32 length followed by that
//! many bytes of UTF-8 JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::store::{DayEntries, Settings};
use crate::sync::SyncCounts;

/// Browsers cap host-bound messages well below this; anything larger is a corrupt stream.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>, HostError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_ne_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(HostError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(
    w: &mut W,
    msg: &T,
) -> Result<(), HostError> {
    let body = serde_json::to_vec(msg)?;
    let len = u32::try_from(body.len()).map_err(|_| HostError::FrameTooLarge(body.len()))?;
    w.write_all(&len.to_ne_bytes()).await?;
    w.write_all(&body).await?;
    w.flush().await?;
    Ok(())
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incoming {
    TabActivated(TabInfo),
    /// Sent by the extension only for the active tab once loading completes.
    TabUpdated(TabInfo),
    WindowFocusGained(TabInfo),
    WindowFocusLost,
    PageHidden,
    UserIdle,
    /// Page became visible again; carries the page's tab.
    PageVisible(TabInfo),
    /// Any interaction after idle; carries the page's tab.
    UserActive(TabInfo),
    GetToday,
    GetWeek,
    GetSettings,
    UpdateSettings(SettingsUpdate),
    GetStatus,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct TabInfo {
    #[serde(rename = "tabId", default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub tracking_enabled: Option<bool>,
    #[serde(default)]
    pub productive_sites: Option<Vec<String>>,
    #[serde(default)]
    pub unproductive_sites: Option<Vec<String>>,
}

impl SettingsUpdate {
    /// Applies the update; returns true when either site list changed.
    pub fn apply(self, settings: &mut Settings) -> bool {
        let mut lists_changed = false;
        if let Some(v) = self.tracking_enabled {
            settings.tracking_enabled = v;
        }
        if let Some(v) = self.productive_sites {
            let v = normalize_sites(v);
            lists_changed |= v != settings.productive_sites;
            settings.productive_sites = v;
        }
        if let Some(v) = self.unproductive_sites {
            let v = normalize_sites(v);
            lists_changed |= v != settings.unproductive_sites;
            settings.unproductive_sites = v;
        }
        lists_changed
    }
}

fn normalize_sites(v: Vec<String>) -> Vec<String> {
    v.into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing<'a> {
    Today {
        date: String,
        entries: &'a DayEntries,
    },
    Week {
        days: &'a BTreeMap<String, DayEntries>,
    },
    Settings {
        settings: &'a Settings,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        tracking_enabled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_domain: Option<&'a str>,
        sync: SyncCounts,
    },
    Error {
        error: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> Vec<u8> {
        let mut out = (json.len() as u32).to_ne_bytes().to_vec();
        out.extend_from_slice(json.as_bytes());
        out
    }

    #[tokio::test]
    async fn reads_frames_until_eof() {
        let mut bytes = frame(r#"{"type":"window_focus_lost"}"#);
        bytes.extend(frame(
            r#"{"type":"tab_activated","tabId":3,"url":"https://a.com","title":"A"}"#,
        ));
        let mut r = bytes.as_slice();

        let first = read_frame(&mut r).await.unwrap().unwrap();
        let msg: Incoming = serde_json::from_slice(&first).unwrap();
        assert_eq!(msg, Incoming::WindowFocusLost);

        let second = read_frame(&mut r).await.unwrap().unwrap();
        let msg: Incoming = serde_json::from_slice(&second).unwrap();
        assert_eq!(
            msg,
            Incoming::TabActivated(TabInfo {
                tab_id: Some(3),
                url: "https://a.com".to_string(),
                title: "A".to_string(),
            })
        );

        assert!(read_frame(&mut r).await.unwrap().is_none());
    }

    #[test]
    fn resume_messages_carry_tab() {
        let msg: Incoming = serde_json::from_str(
            r#"{"type":"user_active","tabId":2,"url":"https://a.com","title":"A"}"#,
        )
        .unwrap();
        assert!(matches!(msg, Incoming::UserActive(TabInfo { tab_id: Some(2), .. })));
        let msg: Incoming =
            serde_json::from_str(r#"{"type":"page_visible","url":"https://a.com"}"#).unwrap();
        assert!(matches!(msg, Incoming::PageVisible(_)));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let bytes = u32::MAX.to_ne_bytes();
        let mut r = &bytes[..];
        assert!(matches!(
            read_frame(&mut r).await,
            Err(HostError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn writes_length_prefixed_json() {
        let mut out: Vec<u8> = Vec::new();
        write_message(&mut out, &Outgoing::Error { error: "bad_message" })
            .await
            .unwrap();
        let len = u32::from_ne_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(len, out.len() - 4);
        let v: serde_json::Value = serde_json::from_slice(&out[4..]).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["error"], "bad_message");
    }

    #[test]
    fn settings_update_reports_list_changes() {
        let mut settings = Settings::default();
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"trackingEnabled":false}"#).unwrap();
        assert!(!update.apply(&mut settings));
        assert!(!settings.tracking_enabled);

        let update: SettingsUpdate =
            serde_json::from_str(r#"{"productiveSites":[" Docs.rs ",""]}"#).unwrap();
        assert!(update.apply(&mut settings));
        assert_eq!(settings.productive_sites, vec!["docs.rs".to_string()]);
    }
}
