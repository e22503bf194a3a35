//! Static grounding data for prompts: the rule knowledge base and the
//! reference list of known-good tokens.
//!
//! Both are opaque to the pipeline. The knowledge base is serialized into
//! the prompt as compact JSON; reference tokens are listed as exemplars.

use anyhow::{Context, Result};
use std::path::Path;

const BUILTIN_KNOWLEDGE_BASE: &str = include_str!("../config/knowledge_base.json");

/// Rule knowledge base, kept as parsed JSON.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    value: serde_json::Value,
}

impl KnowledgeBase {
    /// The rule set shipped with the binary.
    pub fn builtin() -> Self {
        let value = serde_json::from_str(BUILTIN_KNOWLEDGE_BASE)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        Self { value }
    }

    /// Load a knowledge base from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge base: {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid knowledge base JSON: {}", path.display()))?;
        Ok(Self { value })
    }

    /// The configured file when given, the built-in rules otherwise.
    pub fn from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::builtin()),
        }
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Compact single-line JSON for embedding in a prompt.
    pub fn to_prompt_json(&self) -> String {
        self.value.to_string()
    }
}

/// Load up to `max` reference tokens, one per line, skipping blanks.
///
/// The list only improves prompt quality, so an absent or unreadable file
/// yields an empty list and a warning instead of an error.
pub fn load_reference_tokens(path: Option<&Path>, max: usize) -> Vec<String> {
    let Some(path) = path else {
        tracing::debug!("no reference token file configured");
        return Vec::new();
    };

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "reference token file unavailable; prompts will carry no exemplars");
            return Vec::new();
        }
    };

    let tokens: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .take(max)
        .map(str::to_string)
        .collect();

    tracing::info!(path = %path.display(), count = tokens.len(), "loaded reference tokens");
    tokens
}
