//! Agent Stream Bridge - Claude Code session to NDJSON protocol
//!
//! Runs one agent turn against the Claude Code CLI and re-emits it as a
//! small, closed line protocol that a UI can consume without knowing the
//! upstream's message formats.
//!
//! ## Output Protocol
//!
//! One JSON object per line on stdout, discriminated by `type`:
//!
//! | type           | fields                                       |
//! |----------------|----------------------------------------------|
//! | `session-init` | `sessionId`                                  |
//! | `text-delta`   | `text`                                       |
//! | `tool-start`   | `id`, `name`, `input`                        |
//! | `tool-result`  | `id`, `name`, `output` (max 500 chars)       |
//! | `session-reset`|                                              |
//! | `error`        | `error`                                      |
//! | `done`         | `sessionId`, `fullText`, `usage?`, `costUsd?`|
//!
//! Every turn ends with exactly one `done`.
//!
//! ## Modules
//!
//! - [`agent`]: Upstream streaming, normalization and retry policy
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod agent;
pub mod config;
pub mod error;

pub use config::BridgeConfig;
pub use error::{Error, Result};
