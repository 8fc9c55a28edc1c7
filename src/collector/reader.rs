//! JSON-lines event feed.
//!
//! Reads one [`UsageEvent`] per line from any buffered reader (a file or
//! stdin) and forwards it to the tracker's channel on a background thread.
//! Malformed lines are logged and skipped.

use crate::collector::types::UsageEvent;
use crate::collector::CollectorError;
use crossbeam_channel::Sender;
use std::io::BufRead;
use std::thread::{self, JoinHandle};

/// Summary of a finished feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub forwarded: u64,
    pub skipped: u64,
}

/// Forward every event in `reader` to `sender`, blocking while the queue is full.
pub fn forward_json_lines<R: BufRead>(
    reader: R,
    sender: &Sender<UsageEvent>,
) -> Result<FeedSummary, CollectorError> {
    let mut summary = FeedSummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<UsageEvent>(trimmed) {
            Ok(event) => {
                sender
                    .send(event)
                    .map_err(|_| CollectorError::Disconnected)?;
                summary.forwarded += 1;
            }
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping malformed event");
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Run [`forward_json_lines`] on a dedicated thread.
pub fn spawn_json_lines_feed<R>(
    reader: R,
    sender: Sender<UsageEvent>,
) -> JoinHandle<Result<FeedSummary, CollectorError>>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        let result = forward_json_lines(reader, &sender);
        match &result {
            Ok(summary) => tracing::info!(
                forwarded = summary.forwarded,
                skipped = summary.skipped,
                "event feed finished"
            ),
            Err(e) => tracing::error!(error = %e, "event feed stopped"),
        }
        result
    })
}
