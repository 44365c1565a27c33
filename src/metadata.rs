//! Deterministic metadata extraction — no LLM, no I/O.
//!
//! Turns raw text into the `(title, summary, tags, fingerprint)` tuple that
//! gets mirrored to the audit log. Extraction must be a pure function of its
//! inputs: the same content and user tags always produce bit-identical
//! metadata, and the fingerprint doubles as the off-chain/on-chain link.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::GatewayError;
use crate::models::Metadata;

/// Title budget in code points (the audit contract bounds the field).
const TITLE_MAX_POINTS: usize = 100;
/// Summary budget in code points.
const SUMMARY_MAX_POINTS: usize = 200;
/// Merged tag list budget in code points.
const TAGS_MAX_POINTS: usize = 200;
/// Number of auto-extracted keywords.
const AUTO_TAG_COUNT: usize = 5;
/// Minimum token length considered for auto-tagging.
const MIN_TOKEN_LEN: usize = 3;

/// Fixed stopword list. Part of the metadata contract: changing it changes
/// which tags existing content would re-extract to, so it is frozen.
const STOPWORDS: &[&str] = &[
    "the", "a", "of", "and", "is", "in", "to", "for", "with", "on", "this", "that", "are", "be",
    "it", "as", "by", "an", "or", "at", "from", "we", "you", "they", "i",
];

/// Extract metadata from raw content, merging optional user-supplied tags.
///
/// Fails only when `content` is empty after whitespace stripping.
pub fn extract(content: &str, user_tags: Option<&str>) -> Result<Metadata, GatewayError> {
    if content.trim().is_empty() {
        return Err(GatewayError::bad_request("content must not be empty"));
    }

    let title = extract_title(content);
    let summary = extract_summary(content);
    let tags = merge_tags(user_tags, auto_tags(content));

    Ok(Metadata {
        title,
        summary,
        tags,
        fingerprint: fingerprint(content),
    })
}

/// SHA-256 of the exact input bytes, as `0x` + 64 lowercase hex digits.
pub fn fingerprint(content: &str) -> String {
    format!("0x{}", hex::encode(Sha256::digest(content.as_bytes())))
}

/// First markdown heading wins; otherwise the first non-empty line.
fn extract_title(content: &str) -> String {
    for line in content.lines() {
        if let Some(text) = heading_text(line.trim()) {
            return truncate_points(text, TITLE_MAX_POINTS);
        }
    }
    for line in content.lines() {
        let line = line.trim();
        if !line.is_empty() {
            return truncate_points(line, TITLE_MAX_POINTS);
        }
    }
    // Unreachable behind the emptiness check in `extract`.
    "Untitled".to_string()
}

/// Returns the heading text of a `#+ <text>` line, if it is one.
fn heading_text(line: &str) -> Option<&str> {
    let stripped = line.trim_start_matches('#');
    if stripped.len() == line.len() {
        return None;
    }
    // The hashes must be followed by whitespace, then non-empty text.
    if !stripped.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let text = stripped.trim();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Markdown-stripped summary: paragraphs joined by single spaces, truncated
/// to the budget with backoff to the previous word boundary on a mid-word cut.
///
/// Heading lines feed the title and never appear in the summary; they act
/// as paragraph breaks instead.
fn extract_summary(content: &str) -> String {
    let mut cleaned_lines: Vec<String> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        // Drop fence delimiter lines; the fenced content itself stays.
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            cleaned_lines.push(String::new());
            continue;
        }
        if heading_text(trimmed).is_some() {
            cleaned_lines.push(String::new());
            continue;
        }
        let without_links = strip_links(trimmed);
        let cleaned: String = without_links
            .chars()
            .filter(|c| !matches!(c, '*' | '_' | '`'))
            .collect();
        cleaned_lines.push(cleaned.trim().to_string());
    }

    // Join paragraph-internal lines, then paragraphs, with single spaces.
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in cleaned_lines {
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current = Vec::new();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    truncate_word_boundary(&paragraphs.join(" "), SUMMARY_MAX_POINTS)
}

/// Replace `[anchor](url)` spans with their anchor text.
fn strip_links(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find("](") {
            Some(mid) => {
                let anchor = &after_open[..mid];
                let after_mid = &after_open[mid + 2..];
                match after_mid.find(')') {
                    Some(close) => {
                        out.push_str(anchor);
                        rest = &after_mid[close + 1..];
                    }
                    None => {
                        out.push('[');
                        rest = after_open;
                    }
                }
            }
            None => {
                out.push('[');
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Top keywords by frequency, tie-broken by first occurrence. No stemming.
pub fn auto_tags(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut position = 0usize;

    for token in lower.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        position += 1;
        if token.chars().count() < MIN_TOKEN_LEN || STOPWORDS.contains(&token) {
            continue;
        }
        let entry = counts.entry(token).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(AUTO_TAG_COUNT)
        .map(|(token, _)| token.to_string())
        .collect()
}

/// User tags first (lowercased, trimmed, deduplicated, original order), then
/// auto tags not already present. The joined list is cut at the last whole
/// tag that fits the budget.
fn merge_tags(user_tags: Option<&str>, auto: Vec<String>) -> String {
    let mut merged: Vec<String> = Vec::new();
    if let Some(user) = user_tags {
        for raw in user.split(',') {
            let tag = raw.trim().to_lowercase();
            if !tag.is_empty() && !merged.contains(&tag) {
                merged.push(tag);
            }
        }
    }
    for tag in auto {
        if !merged.contains(&tag) {
            merged.push(tag);
        }
    }

    let mut out = String::new();
    let mut points = 0usize;
    for tag in merged {
        let tag_points = tag.chars().count();
        let sep = usize::from(!out.is_empty());
        if points + sep + tag_points > TAGS_MAX_POINTS {
            break;
        }
        if sep == 1 {
            out.push(',');
        }
        out.push_str(&tag);
        points += sep + tag_points;
    }
    out
}

/// Truncate to `max` code points, dropping trailing whitespace on a cut.
pub fn truncate_points(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    cut.trim_end().to_string()
}

/// Truncate to `max` code points; if the cut lands mid-word, back off to the
/// previous word boundary.
fn truncate_word_boundary(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    let next_is_word = s
        .chars()
        .nth(max)
        .map(|c| !c.is_whitespace())
        .unwrap_or(false);
    if next_is_word && !cut.ends_with(|c: char| c.is_whitespace()) {
        if let Some(pos) = cut.rfind(|c: char| c.is_whitespace()) {
            return cut[..pos].trim_end().to_string();
        }
    }
    cut.trim_end().to_string()
}
