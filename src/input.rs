//! Input Fields - Sanitized Free Text
//!
//! Every keystroke rebuilds a `TextField`. The sanitized value is a pure,
//! idempotent function of the raw value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_INPUT_LENGTH: usize = 150;

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").expect("Invalid script block regex")
});

static IFRAME_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*iframe\b[^>]*>.*?<\s*/\s*iframe\s*>").expect("Invalid iframe block regex")
});

// Unterminated or orphaned tags left behind by the block patterns.
static STRAY_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(?:script|iframe)[^>]*>?").expect("Invalid stray tag regex")
});

static URI_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:javascript|vbscript)\s*:|data\s*:\s*text/html").expect("Invalid URI scheme regex")
});

static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)on[a-z]+\s*=").expect("Invalid event handler regex")
});

/// Which certificate line a field feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Name,
    Organization,
}

impl FieldRole {
    pub const ALL: [FieldRole; 2] = [FieldRole::Name, FieldRole::Organization];

    pub fn label(&self) -> &'static str {
        match self {
            FieldRole::Name => "full name",
            FieldRole::Organization => "club name",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            FieldRole::Name => 0,
            FieldRole::Organization => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextField {
    pub role: FieldRole,
    pub raw_value: String,
    pub sanitized_value: String,
}

impl TextField {
    pub fn new(role: FieldRole, raw: &str, sanitizer: &Sanitizer) -> Self {
        Self {
            role,
            raw_value: raw.to_string(),
            sanitized_value: sanitizer.sanitize(raw),
        }
    }

    pub fn empty(role: FieldRole) -> Self {
        Self {
            role,
            raw_value: String::new(),
            sanitized_value: String::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.sanitized_value.is_empty()
    }
}

/// Strips markup and script-triggering substrings, trims, then truncates.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_length: usize,
}

impl Sanitizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn sanitize(&self, raw: &str) -> String {
        let mut current = raw.to_string();

        // Removing one pattern can splice together another, so run to a fixed point.
        loop {
            let next = strip_once(&current);
            if next == current {
                break;
            }
            current = next;
        }

        let trimmed = current.trim();
        let truncated: String = trimmed.chars().take(self.max_length).collect();
        truncated.trim_end().to_string()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INPUT_LENGTH)
    }
}

fn strip_once(input: &str) -> String {
    let s = SCRIPT_BLOCK.replace_all(input, "");
    let s = IFRAME_BLOCK.replace_all(&s, "");
    let s = STRAY_TAG.replace_all(&s, "");
    let s = URI_SCHEME.replace_all(&s, "");
    EVENT_HANDLER.replace_all(&s, "").into_owned()
}

/// Convenience wrapper using the default length cap.
pub fn sanitize(raw: &str) -> String {
    Sanitizer::default().sanitize(raw)
}
