// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Highlight records: the domain payload carried inside events and stored
//! by the dual-write repository.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::event::now_millis;
use crate::sanitize;
use crate::validation::ValidationError;

/// Color role of a highlight. Rendering maps roles to actual colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Pink => "pink",
            Self::Purple => "purple",
        };
        f.write_str(s)
    }
}

/// A highlighted span of text on a web page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub url: String,
    pub text: String,
    /// Serialized range descriptors; opaque to the sync core
    pub ranges: Vec<String>,
    #[serde(default)]
    pub color: HighlightColor,
    /// Dedup key derived from url + text
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Soft-delete marker set by the remote store
    #[serde(default)]
    pub deleted: bool,
}

/// Partial update for [`Highlight`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightPatch {
    pub text: Option<String>,
    pub color: Option<HighlightColor>,
    pub ranges: Option<Vec<String>>,
}

impl Highlight {
    pub fn new(
        url: impl Into<String>,
        text: impl Into<String>,
        ranges: Vec<String>,
        color: HighlightColor,
    ) -> Self {
        let url = url.into();
        let text = text.into();
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_hash: Self::compute_content_hash(&url, &text),
            url,
            text,
            ranges,
            color,
            created_at: now,
            updated_at: now,
            user_id: None,
            deleted: false,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn compute_content_hash(url: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Apply a patch, bumping `updated_at` and refreshing the content hash.
    pub fn apply(&mut self, patch: HighlightPatch) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(ranges) = patch.ranges {
            self.ranges = ranges;
        }
        self.content_hash = Self::compute_content_hash(&self.url, &self.text);
        self.updated_at = now_millis().max(self.updated_at);
    }

    /// Strip executable content from user-supplied fields.
    ///
    /// Fails if the URL uses a disallowed scheme, since a highlight without
    /// a page to anchor to is meaningless.
    pub fn sanitized(mut self) -> Result<Self, ValidationError> {
        self.url = sanitize::sanitize_url(&self.url).ok_or(ValidationError::InvalidUrl)?;
        self.text = sanitize::sanitize_text(&self.text);
        self.content_hash = Self::compute_content_hash(&self.url, &self.text);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Highlight {
        Highlight::new(
            "https://example.com/article",
            "the quick brown fox",
            vec!["/html/body/p[1]:0-19".into()],
            HighlightColor::Green,
        )
    }

    #[test]
    fn test_new_highlight() {
        let h = sample();
        assert!(!h.id.is_empty());
        assert_eq!(h.created_at, h.updated_at);
        assert!(!h.deleted);
        assert_eq!(h.content_hash.len(), 64);
    }

    #[test]
    fn test_content_hash_is_dedup_key() {
        let a = sample();
        let b = sample();
        assert_ne!(a.id, b.id);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_apply_patch() {
        let mut h = sample();
        let before_hash = h.content_hash.clone();
        h.apply(HighlightPatch {
            text: Some("jumps over".into()),
            color: Some(HighlightColor::Pink),
            ranges: None,
        });

        assert_eq!(h.text, "jumps over");
        assert_eq!(h.color, HighlightColor::Pink);
        assert_eq!(h.ranges.len(), 1);
        assert_ne!(h.content_hash, before_hash);
        assert!(h.updated_at >= h.created_at);
    }

    #[test]
    fn test_sanitized_strips_script() {
        let mut h = sample();
        h.text = "hello <script>alert(1)</script>world".into();
        let clean = h.sanitized().unwrap();
        assert_eq!(clean.text, "hello world");
    }

    #[test]
    fn test_sanitized_rejects_javascript_url() {
        let mut h = sample();
        h.url = "javascript:alert(1)".into();
        assert_eq!(h.sanitized(), Err(ValidationError::InvalidUrl));
    }

    #[test]
    fn test_deserialize_defaults() {
        let h: Highlight = serde_json::from_value(json!({
            "id": "h1",
            "url": "https://a.test",
            "text": "t",
            "ranges": ["r"],
            "content_hash": "x",
            "created_at": 1,
            "updated_at": 1
        }))
        .unwrap();
        assert_eq!(h.color, HighlightColor::Yellow);
        assert!(!h.deleted);
        assert!(h.user_id.is_none());
    }
}
