//! Newline-delimited JSON in and out.

use anyhow::{Context, Result};
use coordination::events::FilteredReceiver;
use coordination::{EngineHandle, EngineError, InboundEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Counters for one input stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub malformed: usize,
}

impl FeedSummary {
    fn record(&mut self, result: Result<(), EngineError>) {
        match result {
            Ok(()) => self.accepted += 1,
            Err(EngineError::InvalidEvent(_)) => self.malformed += 1,
            Err(_) => self.rejected += 1,
        }
    }
}

/// Submit each line of `reader` to the engine in order.
///
/// Blank lines and lines starting with `#` are skipped. A bad line is
/// logged and counted; it never stops the feed.
pub async fn feed_lines<R>(reader: R, handle: &EngineHandle) -> Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = FeedSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read event line")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = match InboundEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed event");
                summary.record(Err(e));
                continue;
            }
        };

        match handle.submit(event).await {
            Ok(outcome) => {
                debug!(line = line_no, ?outcome, "Event applied");
                summary.record(Ok(()));
            }
            Err(EngineError::Closed) => {
                return Err(EngineError::Closed).context("Engine stopped while feeding events")
            }
            Err(e) => {
                debug!(line = line_no, code = e.code(), "Event rejected");
                summary.record(Err(e));
            }
        }
    }

    Ok(summary)
}

/// Submit already-built events, as the demo does.
pub async fn feed_events(
    events: impl IntoIterator<Item = InboundEvent>,
    handle: &EngineHandle,
) -> Result<FeedSummary> {
    let mut summary = FeedSummary::default();
    for event in events {
        let event_type = event.event_type();
        let result = handle.submit(event).await.map(|_| ());
        if let Err(EngineError::Closed) = result {
            return Err(EngineError::Closed).context("Engine stopped while feeding events");
        }
        if let Err(e) = &result {
            warn!(event_type, error = %e, "Scripted event rejected");
        }
        summary.record(result);
    }
    Ok(summary)
}

/// Write every received envelope as one JSON line until the bus closes.
/// Returns the number of lines written and the writer.
pub async fn write_events<W>(mut receiver: FilteredReceiver, mut writer: W) -> Result<(u64, W)>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    loop {
        let envelope = match receiver.recv().await {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Output fell behind, events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let mut line = serde_json::to_vec(&envelope).context("Failed to encode event")?;
        line.push(b'\n');
        writer.write_all(&line).await.context("Failed to write event")?;
        writer.flush().await.context("Failed to flush output")?;
        written += 1;
    }
    Ok((written, writer))
}
