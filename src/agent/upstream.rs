//! Upstream agent abstraction
//!
//! The session driver only needs "open a stream of events for this prompt".
//! How the stream is produced (a spawned CLI, a scripted test double) sits
//! behind the [`Upstream`] trait.

use crate::agent::types::UpstreamEvent;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Stream of normalized upstream events for one attempt
pub type UpstreamStream = BoxStream<'static, Result<UpstreamEvent>>;

/// Options passed through to the upstream untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamOptions {
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    /// Extra environment for the upstream process
    pub env: BTreeMap<String, String>,
    /// Ask for streaming partials (text deltas, early tool starts)
    pub include_partial_messages: bool,
    pub extra_args: Vec<String>,
}

/// One stream-open request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub prompt: String,
    pub cwd: Option<PathBuf>,
    /// Session to resume, if any
    pub resume: Option<String>,
    pub options: UpstreamOptions,
}

/// Source of upstream event streams
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Open a stream for one turn.
    ///
    /// Both this call and the items of the returned stream fail with
    /// `Error::Upstream` when the upstream cannot deliver the turn.
    async fn open(&self, request: UpstreamRequest) -> Result<UpstreamStream>;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory upstream that plays back one script per attempt

    use super::*;
    use crate::error::Error;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What a single `open` call produces
    pub enum Attempt {
        /// `open` itself fails
        OpenFails(String),
        /// `open` succeeds and the stream yields these items
        Stream(Vec<Result<UpstreamEvent>>),
    }

    impl Attempt {
        pub fn ok(events: Vec<UpstreamEvent>) -> Self {
            Attempt::Stream(events.into_iter().map(Ok).collect())
        }

        /// Yields `events`, then fails mid-iteration
        pub fn fails_after(events: Vec<UpstreamEvent>, message: &str) -> Self {
            let mut items: Vec<Result<UpstreamEvent>> = events.into_iter().map(Ok).collect();
            items.push(Err(Error::Upstream(message.to_string())));
            Attempt::Stream(items)
        }
    }

    #[derive(Default)]
    pub struct ScriptedUpstream {
        attempts: Mutex<VecDeque<Attempt>>,
        requests: Mutex<Vec<UpstreamRequest>>,
    }

    impl ScriptedUpstream {
        pub fn new(attempts: Vec<Attempt>) -> Self {
            Self {
                attempts: Mutex::new(attempts.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Requests seen so far, in order
        pub fn requests(&self) -> Vec<UpstreamRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn open(&self, request: UpstreamRequest) -> Result<UpstreamStream> {
            self.requests.lock().unwrap().push(request);
            let attempt = self.attempts.lock().unwrap().pop_front();
            match attempt {
                Some(Attempt::OpenFails(message)) => Err(Error::Upstream(message)),
                Some(Attempt::Stream(items)) => Ok(futures::stream::iter(items).boxed()),
                None => Err(Error::Upstream("no scripted attempt left".to_string())),
            }
        }
    }
}
