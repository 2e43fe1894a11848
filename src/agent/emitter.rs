//! Line emitter for the output protocol
//!
//! Every event becomes exactly one JSON line, written and flushed before
//! `emit` returns. Nothing may follow the terminal `done` line.

use crate::agent::types::OutputEvent;
use crate::error::{Error, Result};
use std::io::Write;

/// Writes output events as NDJSON to a sink
pub struct LineEmitter<W: Write> {
    sink: W,
    lines_written: usize,
    done_emitted: bool,
}

impl LineEmitter<std::io::Stdout> {
    /// Emitter bound to the process standard output
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> LineEmitter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            lines_written: 0,
            done_emitted: false,
        }
    }

    /// Serialize one event and write it as a single flushed line
    pub fn emit(&mut self, event: &OutputEvent) -> Result<()> {
        if self.done_emitted {
            return Err(Error::Protocol(format!(
                "event emitted after done: {:?}",
                event
            )));
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        self.sink
            .write_all(&line)
            .and_then(|()| self.sink.flush())
            .map_err(|e| Error::Protocol(format!("failed to write output line: {}", e)))?;

        self.lines_written += 1;
        if event.is_done() {
            self.done_emitted = true;
        }
        tracing::trace!(lines = self.lines_written, "Emitted output event");
        Ok(())
    }

    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    pub fn done_emitted(&self) -> bool {
        self.done_emitted
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
