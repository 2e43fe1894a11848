//! Session driver
//!
//! Runs one upstream attempt to completion, feeding every event through the
//! normalizer. Upstream failures are returned to the retry controller.

use crate::agent::emitter::LineEmitter;
use crate::agent::normalizer::{EventNormalizer, TurnAccumulator};
use crate::agent::tools::ToolCallRecord;
use crate::agent::upstream::{Upstream, UpstreamOptions, UpstreamRequest};
use crate::error::Result;
use futures::StreamExt;
use std::io::Write;
use std::path::Path;

/// Drives single upstream attempts
pub struct SessionDriver<U> {
    upstream: U,
    options: UpstreamOptions,
}

impl<U: Upstream> SessionDriver<U> {
    pub fn new(upstream: U, options: UpstreamOptions) -> Self {
        Self { upstream, options }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Run one turn against the upstream.
    ///
    /// `session_id` is only sent upstream when `resume` is set. Every call
    /// starts from an empty accumulator and tool record.
    pub async fn run_turn<W: Write>(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        cwd: Option<&Path>,
        resume: bool,
        emitter: &mut LineEmitter<W>,
    ) -> Result<TurnAccumulator> {
        let request = UpstreamRequest {
            prompt: prompt.to_string(),
            cwd: cwd.map(Path::to_path_buf),
            resume: session_id.filter(|_| resume).map(str::to_string),
            options: self.options.clone(),
        };

        let mut stream = self.upstream.open(request).await?;
        let mut tools = ToolCallRecord::new();
        let mut normalizer = EventNormalizer::new();
        let mut events = 0usize;

        while let Some(event) = stream.next().await {
            normalizer.handle(event?, &mut tools, emitter)?;
            events += 1;
        }

        let acc = normalizer.finish();
        tracing::debug!(
            session_id = %acc.session_id,
            events,
            tools = tools.emitted_count(),
            "Upstream stream finished"
        );
        Ok(acc)
    }
}
