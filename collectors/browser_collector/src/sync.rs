use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::classifier::Category;

/// One measurement as forwarded to the core service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub domain: String,
    #[serde(rename = "timeSpent")]
    pub time_spent_ms: i64,
    pub date: String,
    pub category: Category,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Delivered,
    Failed(String),
}

#[derive(Default)]
pub struct SyncStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl SyncStats {
    pub fn record(&self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Delivered => self.delivered.fetch_add(1, Ordering::Relaxed),
            SyncOutcome::Failed(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> SyncCounts {
        SyncCounts {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Fire-and-forget forwarding of deltas. Sends never block the caller and are never retried.
pub struct SyncEmitter {
    tx: mpsc::Sender<Delta>,
    stats: Arc<SyncStats>,
    worker: Option<JoinHandle<()>>,
}

impl SyncEmitter {
    /// Spawns the delivery worker on the current runtime.
    pub fn spawn(core_url: &str, timeout: Duration, capacity: usize) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/track", core_url.trim_end_matches('/'));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(SyncStats::default());
        let worker = tokio::spawn(run_worker(rx, client, endpoint, stats.clone()));
        Ok(Self {
            tx,
            stats,
            worker: Some(worker),
        })
    }

    pub fn emit(&self, delta: Delta) {
        if let Err(err) = self.tx.try_send(delta) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("sync delta dropped: {err}");
        }
    }

    pub fn counts(&self) -> SyncCounts {
        self.stats.snapshot()
    }

    /// Stops accepting deltas and waits up to `grace` for the queue to empty.
    pub async fn drain(self, grace: Duration) -> SyncCounts {
        let SyncEmitter { tx, stats, worker } = self;
        drop(tx);
        if let Some(worker) = worker {
            if tokio::time::timeout(grace, worker).await.is_err() {
                warn!("sync queue not drained within {grace:?}; remaining deltas dropped");
            }
        }
        stats.snapshot()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Delta>,
    client: Client,
    endpoint: String,
    stats: Arc<SyncStats>,
) {
    while let Some(delta) = rx.recv().await {
        let outcome = deliver(&client, &endpoint, &delta).await;
        match &outcome {
            SyncOutcome::Delivered => {
                debug!("synced {} +{}ms ({})", delta.domain, delta.time_spent_ms, delta.date)
            }
            SyncOutcome::Failed(reason) => {
                warn!("sync failed for {} ({}): {reason}", delta.domain, delta.date)
            }
        }
        stats.record(&outcome);
    }
}

pub async fn deliver(client: &Client, endpoint: &str, delta: &Delta) -> SyncOutcome {
    match client.post(endpoint).json(delta).send().await {
        Ok(res) if res.status().is_success() => SyncOutcome::Delivered,
        Ok(res) => SyncOutcome::Failed(format!("http_{}", res.status().as_u16())),
        Err(err) if err.is_timeout() => SyncOutcome::Failed("timeout".to_string()),
        Err(err) => SyncOutcome::Failed(err.to_string()),
    }
}
