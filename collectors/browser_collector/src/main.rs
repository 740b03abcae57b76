mod app;
mod classifier;
mod host;
mod store;
mod sync;
mod tracker;

use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::app::Collector;
use crate::host::read_frame;
use crate::sync::SyncEmitter;
use crate::tracker::TrackerEvent;

#[derive(Parser, Debug)]
#[command(name = "browser_collector", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:3000
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    core_url: String,

    /// SQLite database for the local aggregate store.
    #[arg(long, default_value = "./data/browser-collector.db")]
    db: PathBuf,

    /// Flush interval (seconds): the live session is closed and reopened this often,
    /// which bounds how much unrecorded time a crash can lose.
    #[arg(long, default_value_t = 30)]
    tick_seconds: u64,

    /// Timeout for each delta sent to the core (milliseconds). Timed-out deltas are dropped.
    #[arg(long, default_value_t = 5000)]
    sync_timeout_ms: u64,

    /// Deltas waiting for delivery beyond this are dropped.
    #[arg(long, default_value_t = 256)]
    sync_queue: usize,

    /// Extension origin, passed by the browser when it launches a native messaging host.
    origin: Option<String>,

    /// Window handle passed by Chrome on Windows; unused.
    #[arg(long = "parent-window", hide = true)]
    #[allow(dead_code)]
    parent_window: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries native messaging frames, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "browser_collector=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(&args.db)?;
    store::init_db(&conn)?;
    let settings = store::load_or_init_settings(&mut conn)?;

    let emitter = SyncEmitter::spawn(
        &args.core_url,
        Duration::from_millis(args.sync_timeout_ms.max(1)),
        args.sync_queue,
    )?;
    let mut collector = Collector::new(conn, settings, emitter);

    info!(
        "browser collector started for {}; syncing to {}",
        args.origin.as_deref().unwrap_or("(no origin)"),
        args.core_url
    );
    info!("DB: {}", args.db.display());

    // Frames are read on their own task so a partial read is never cancelled by the tick.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        loop {
            match read_frame(&mut stdin).await {
                Ok(Some(frame)) => {
                    if frame_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("browser closed the port");
                    break;
                }
                Err(err) => {
                    error!("read failed: {err}");
                    break;
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut tick = interval(Duration::from_secs(args.tick_seconds.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = collector.handle_frame(&frame, Local::now(), &mut stdout).await {
                    error!("reply failed: {err}");
                }
            }
            _ = tick.tick() => {
                collector.on_event(TrackerEvent::PeriodicTick, Local::now());
            }
        }
    }

    collector
        .shutdown(Local::now(), Duration::from_millis(args.sync_timeout_ms.max(1)))
        .await;
    Ok(())
}
