//! Fetched document text

use crate::models::CodeSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw text of one code source, as retrieved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub source: CodeSource,
    pub text: String,
    /// Character count of `text`
    pub length: usize,
    /// Set by validation; invalid documents never reach extraction
    pub valid: bool,
    pub content_type: String,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedDocument {
    pub fn new(source: CodeSource, text: String, content_type: impl Into<String>) -> Self {
        let length = text.chars().count();
        Self {
            source,
            text,
            length,
            valid: false,
            content_type: content_type.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn stats(&self) -> DocumentStats {
        DocumentStats::of(&self.text)
    }
}

/// Size and structure counts, used in fetch logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub chars: usize,
    pub words: usize,
    pub lines: usize,
    pub sections: usize,
    pub chapters: usize,
}

impl DocumentStats {
    pub fn of(text: &str) -> Self {
        Self {
            chars: text.chars().count(),
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
            sections: text.matches("SECTION").count(),
            chapters: text.matches("CHAPTER").count(),
        }
    }
}
