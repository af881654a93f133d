use chrono::Utc;
use shared::icao::Icao;
use shared::notam::NotamRecord;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

/// User-facing changes produced by the orchestrator. Silent refreshes never
/// emit `NewNotices`/`RemovedNotices`; failures always surface.
#[derive(Debug, Clone)]
pub enum Event {
    NewNotices { code: Icao, records: Vec<NotamRecord> },
    RemovedNotices { code: Icao, count: usize },
    LoadFailed { code: Icao },
}

pub fn channel() -> (UnboundedSender<Event>, UnboundedReceiver<Event>) {
    mpsc::unbounded_channel()
}

/// Whether a notice is recent enough to announce. Records with no usable
/// timestamp are announced rather than silently dropped.
fn is_recent(record: &NotamRecord, recency: chrono::Duration) -> bool {
    let Some(stamp) = record.issued.or(record.valid_from) else {
        return true;
    };
    Utc::now() - stamp <= recency
}

/// Drains the event channel and renders each event as a structured log line.
/// Old notices surfacing for the first time (e.g. after a cache wipe) are
/// filtered by the recency window so only genuinely new activity announces.
pub async fn run_sink(mut rx: UnboundedReceiver<Event>, recency: chrono::Duration) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::NewNotices { code, records } => {
                let recent: Vec<&NotamRecord> =
                    records.iter().filter(|r| is_recent(r, recency)).collect();
                if recent.is_empty() {
                    continue;
                }
                for record in recent {
                    info!(
                        icao = %code,
                        id = %record.id,
                        classification = ?record.classification,
                        summary = %record.summary,
                        "new notice"
                    );
                }
            }
            Event::RemovedNotices { code, count } => {
                info!(icao = %code, count, "notices no longer in effect");
            }
            Event::LoadFailed { code } => {
                warn!(icao = %code, "failed to load notices after retries");
            }
        }
    }
}
