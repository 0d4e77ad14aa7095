//! Newline-delimited JSON event source

use herald_delivery::Event;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

/// Reads one [`Event`] per line
///
/// Blank lines are ignored. Lines that are not a valid event are logged and
/// skipped; only I/O errors end the stream early.
pub struct EventSource<R> {
    lines: Lines<R>,
    line_number: u64,
    skipped: u64,
}

impl EventSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
    }
}

impl<R> EventSource<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Next valid event, or `None` at end of input
    pub async fn next_event(&mut self) -> io::Result<Option<Event>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_number, error = %e, "Skipping malformed event");
                }
            }
        }

        Ok(None)
    }

    /// Lines rejected so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
