//! Bridge configuration management

use crate::agent::upstream::UpstreamOptions;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Upstream agent configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Upstream (Claude Code CLI) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Path to the claude binary (looked up when unset)
    pub binary: Option<PathBuf>,

    /// Model override
    pub model: Option<String>,

    /// Permission mode (default, acceptEdits, bypassPermissions, plan)
    pub permission_mode: Option<String>,

    /// Tools the agent may use without asking
    pub allowed_tools: Vec<String>,

    /// Tools the agent may never use
    pub disallowed_tools: Vec<String>,

    /// Extra environment for the agent process
    pub env: BTreeMap<String, String>,

    /// Request streaming partials (text deltas, early tool starts)
    pub include_partial_messages: bool,

    /// Arguments appended verbatim to the command line
    pub extra_args: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            binary: None,
            model: None,
            permission_mode: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            env: BTreeMap::new(),
            include_partial_messages: true,
            extra_args: Vec::new(),
        }
    }
}

impl UpstreamConfig {
    /// Options bag handed to the upstream on every attempt
    pub fn to_options(&self) -> UpstreamOptions {
        UpstreamOptions {
            model: self.model.clone(),
            permission_mode: self.permission_mode.clone(),
            allowed_tools: self.allowed_tools.clone(),
            disallowed_tools: self.disallowed_tools.clone(),
            env: self.env.clone(),
            include_partial_messages: self.include_partial_messages,
            extra_args: self.extra_args.clone(),
        }
    }
}
