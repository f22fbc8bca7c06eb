//! Core data types for the caption refinement engine.
//!
//! Tag normalization happens exactly once, at the `TagSet::parse` boundary;
//! everything downstream consumes normalized tokens.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A normalized ground-truth descriptor token for an image.
///
/// Underscores and hyphens are replaced with spaces at construction, so a
/// raw token like `blue_eyes` compares as `blue eyes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: &str) -> Self {
        Self(raw.replace(['_', '-'], " "))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image's ground-truth tag set.
///
/// Unordered conceptually; duplicates are allowed and treated independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    /// Parse raw tag-file text into normalized tokens.
    ///
    /// Each line is one logical tag group, optionally prefixed `label:`;
    /// the prefix is stripped and the remainder split on whitespace into
    /// individual tokens.
    pub fn parse(raw: &str) -> Self {
        let mut tags = Vec::new();
        for line in raw.lines() {
            let line = match line.split_once(':') {
                Some((_, rest)) => rest,
                None => line,
            };
            for token in line.split_whitespace() {
                tags.push(Tag::new(token));
            }
        }
        Self { tags }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Whether the raw tag list contains the given normalized token.
    pub fn contains(&self, token: &str) -> bool {
        self.tags.iter().any(|t| t.as_str() == token)
    }
}

/// One generated caption paired with the tags it failed to cover.
///
/// The score is the missing-tag count; lower is better, zero is perfect.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub missing: Vec<Tag>,
}

impl Candidate {
    pub fn score(&self) -> usize {
        self.missing.len()
    }

    pub fn is_perfect(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Counts reported at the end of a dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Images whose best caption covered every tag
    pub accepted: usize,
    /// Images persisted with a nonzero score after the retry budget ran out
    pub exhausted: usize,
    /// Images skipped (existing output, missing tag file, or cancellation)
    pub skipped: usize,
    /// Images that failed outright
    pub failed: usize,
}

impl RunStats {
    pub fn total(&self) -> usize {
        self.accepted + self.exhausted + self.skipped + self.failed
    }
}

/// Process-wide cancellation flag shared across workers.
///
/// Checked at the top of each attempt and inside every cooldown wait; once
/// raised it is never lowered.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-image filesystem contract.
///
/// For an image `<name>.<ext>`: tags live in `<name>.txt`, the accepted
/// caption in `<name>_caption.txt`, non-selected candidates in
/// `<name>_caption_<i>.txt`, and the fatal-failure dump in
/// `<name>_caption_error.txt`.
pub mod artifacts {
    use super::*;

    fn sibling(image: &Path, suffix: &str) -> PathBuf {
        let stem = image
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        image.with_file_name(format!("{stem}{suffix}"))
    }

    /// Ground-truth tag file for an image.
    pub fn tags_path(image: &Path) -> PathBuf {
        sibling(image, ".txt")
    }

    /// Accepted best caption.
    pub fn caption_path(image: &Path) -> PathBuf {
        sibling(image, "_caption.txt")
    }

    /// Non-selected candidate from the winning attempt.
    pub fn alternate_path(image: &Path, index: usize) -> PathBuf {
        sibling(image, &format!("_caption_{index}.txt"))
    }

    /// Diagnostic dump written only on fatal, unrecoverable failure.
    pub fn error_path(image: &Path) -> PathBuf {
        sibling(image, "_caption_error.txt")
    }
}
