// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Input sanitizing for user-supplied text, markup and URLs.
//!
//! All three functions strip executable content (script blocks, event
//! handler attributes, `javascript:` URLs) and otherwise leave the input
//! alone, including every non-control Unicode character.
//!
//! [`sanitize_url`] returns `None` for disallowed input instead of failing:
//! the caller drops the field rather than aborting the whole operation.
//!
//! # Example
//!
//! ```
//! use highlight_sync::sanitize::{sanitize_html, sanitize_text, sanitize_url};
//!
//! assert_eq!(sanitize_text("hi <b>there</b> 👋"), "hi there 👋");
//! assert_eq!(
//!     sanitize_html(r#"<a href="/x" onclick="steal()">link</a>"#),
//!     r#"<a href="/x">link</a>"#
//! );
//! assert_eq!(sanitize_url("javascript:alert(1)"), None);
//! ```

use regex::{Captures, Regex};
use std::sync::OnceLock;
use url::Url;

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

fn script_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|iframe|object|embed)\b[^>]*>.*?</\s*(script|style|iframe|object|embed)\s*>")
            .expect("script block pattern is valid")
    })
}

fn dangerous_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)</?\s*(script|style|iframe|object|embed)\b[^>]*>")
            .expect("dangerous tag pattern is valid")
    })
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(/?[A-Za-z][^>]*|!--.*?--)>").expect("tag pattern is valid")
    })
}

fn opening_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[A-Za-z][^>]*>").expect("opening tag pattern is valid"))
}

// Browsers accept `/` and a closing quote as attribute separators too.
fn event_handlers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)([\s/"'])on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
            .expect("event handler pattern is valid")
    })
}

fn script_urls() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\b(href|src|action|formaction|xlink:href)\s*=\s*("\s*(javascript|vbscript|data):[^"]*"|'\s*(javascript|vbscript|data):[^']*'|(javascript|vbscript|data):[^\s>]*)"#,
        )
        .expect("script url pattern is valid")
    })
}

fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Reduce input to plain text: drops script/style blocks, then every tag.
#[must_use]
pub fn sanitize_text(input: &str) -> String {
    let without_scripts = script_blocks().replace_all(input, "");
    let without_tags = any_tag().replace_all(&without_scripts, "");
    strip_control_chars(&without_tags)
}

/// Keep benign markup, remove anything executable.
///
/// Attributes are only rewritten inside tags; text that merely looks like
/// `name=value` is left alone.
#[must_use]
pub fn sanitize_html(input: &str) -> String {
    let cleaned = script_blocks().replace_all(input, "");
    let cleaned = dangerous_tags().replace_all(&cleaned, "");
    let cleaned = opening_tags().replace_all(&cleaned, |tag: &Captures<'_>| clean_tag(&tag[0]));
    strip_control_chars(&cleaned)
}

fn clean_tag(tag: &str) -> String {
    let without_handlers = event_handlers().replace_all(tag, |caps: &Captures<'_>| {
        // Whitespace goes with the attribute; `/` and quotes belong to
        // what came before it.
        let separator = &caps[1];
        if separator.trim().is_empty() {
            String::new()
        } else {
            separator.to_string()
        }
    });
    script_urls()
        .replace_all(&without_handlers, r##"${1}="#""##)
        .into_owned()
}

/// Normalize a URL, or `None` when it is unparsable or not http(s)/mailto.
#[must_use]
pub fn sanitize_url(input: &str) -> Option<String> {
    let parsed = Url::parse(input.trim()).ok()?;
    if ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        Some(parsed.into())
    } else {
        None
    }
}
