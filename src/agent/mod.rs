//! Agent module - Claude Code stream bridging
//!
//! Turns one upstream agent session into the bridge's NDJSON output
//! protocol: normalizes events, resolves tool identities across sub-agents,
//! and applies the resume-then-fresh retry policy.
//!
//! ## Architecture
//!
//! ```text
//! RetryController ──► SessionDriver ──► Upstream (claude CLI, stream-json)
//!                          │
//!                          ▼ per event
//!                   EventNormalizer ──► ToolCallRecord
//!                          │
//!                          ▼
//!                    LineEmitter ──► stdout (NDJSON)
//! ```

pub mod emitter;
pub mod launcher;
pub mod normalizer;
pub mod retry;
pub mod session;
pub mod tools;
pub mod types;
pub mod upstream;

pub use emitter::LineEmitter;
pub use launcher::ClaudeCliUpstream;
pub use normalizer::{EventNormalizer, TurnAccumulator};
pub use retry::{RetryController, TurnOutcome};
pub use session::SessionDriver;
pub use tools::ToolCallRecord;
pub use types::{OutputEvent, UpstreamEvent, UpstreamEventKind};
pub use upstream::{Upstream, UpstreamOptions, UpstreamRequest, UpstreamStream};
