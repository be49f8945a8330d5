//! Configuration resolution for codecheck-jit
//!
//! The AI credential resolves ENV → TOML. A missing credential is not an
//! error: extraction runs on patterns only.

use codecheck_common::config::TomlConfig;
use tracing::{info, warn};

/// Service-specific variable, checked first
pub const ENV_CLAUDE_API_KEY: &str = "CODECHECK_CLAUDE_API_KEY";
/// Conventional Anthropic variable, checked second
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Resolve the AI API key
///
/// **Priority:** `CODECHECK_CLAUDE_API_KEY` → `ANTHROPIC_API_KEY` → `[ai] api_key`
pub fn resolve_ai_api_key(toml_config: &TomlConfig) -> Option<String> {
    let candidates = [
        (ENV_CLAUDE_API_KEY, std::env::var(ENV_CLAUDE_API_KEY).ok()),
        (ENV_ANTHROPIC_API_KEY, std::env::var(ENV_ANTHROPIC_API_KEY).ok()),
        ("TOML config", toml_config.ai.api_key.clone()),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(origin, key)| key.filter(|k| is_valid_key(k)).map(|k| (origin, k)))
        .collect();

    if valid.len() > 1 {
        let origins: Vec<&str> = valid.iter().map(|(origin, _)| *origin).collect();
        warn!(
            "AI API key found in multiple sources: {}. Using {} (highest priority).",
            origins.join(", "),
            origins[0]
        );
    }

    match valid.into_iter().next() {
        Some((origin, key)) => {
            info!("AI API key loaded from {}", origin);
            Some(key.trim().to_string())
        }
        None => {
            warn!(
                "AI API key not configured; set {} or [ai] api_key to enable AI extraction",
                ENV_CLAUDE_API_KEY
            );
            None
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
