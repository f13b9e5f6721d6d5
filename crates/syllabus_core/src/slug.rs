//! URL-safe slug generation.
//!
//! # Responsibility
//! - Map arbitrary display text to a lowercase, hyphen-joined identifier.
//! - Validate caller-supplied slugs before they reach storage.
//!
//! # Invariants
//! - `generate_slug` is total and never returns an empty string.
//! - Every generated slug matches `^[a-z0-9-]+$`.
//! - Identical input yields identical output, except inputs that filter down
//!   to nothing, which get a per-call unique fallback token.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix for slugs synthesized when no ASCII characters survive filtering.
pub const SLUG_FALLBACK_PREFIX: &str = "item";

static NON_SLUG_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug separator regex"));
static VALID_SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid slug shape regex"));

static FALLBACK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates a slug from display text.
///
/// Runs of characters outside `[a-z0-9]` (after lowercasing) collapse into a
/// single `-`, and leading/trailing hyphens are trimmed. Characters without an
/// ASCII lowercase form are dropped rather than transliterated.
///
/// ```
/// use syllabus_core::generate_slug;
///
/// assert_eq!(generate_slug("  Intro to Rust: Part 1! "), "intro-to-rust-part-1");
/// assert!(generate_slug("日本語").starts_with("item-"));
/// ```
pub fn generate_slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    let joined = NON_SLUG_RUN_RE.replace_all(&lowered, "-");
    let trimmed = joined.trim_matches('-');
    if trimmed.is_empty() {
        return fallback_slug();
    }
    trimmed.to_string()
}

/// Returns whether `value` is an acceptable slug (non-empty, `[a-z0-9-]` only).
pub fn is_valid_slug(value: &str) -> bool {
    VALID_SLUG_RE.is_match(value)
}

fn fallback_slug() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let sequence = FALLBACK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{SLUG_FALLBACK_PREFIX}-{millis}-{sequence}")
}

#[cfg(test)]
mod tests {
    use super::{generate_slug, is_valid_slug, SLUG_FALLBACK_PREFIX};
    use std::collections::HashSet;

    #[test]
    fn collapses_whitespace_and_punctuation() {
        assert_eq!(generate_slug("Lesson 1"), "lesson-1");
        assert_eq!(generate_slug("Lesson One"), "lesson-one");
        assert_eq!(generate_slug("--Hello,   World!!--"), "hello-world");
        assert_eq!(generate_slug("C++ & Rust / FFI"), "c-rust-ffi");
    }

    #[test]
    fn drops_characters_without_ascii_form() {
        assert_eq!(generate_slug("Café au lait"), "caf-au-lait");
        assert_eq!(generate_slug("Rust 入門"), "rust");
    }

    #[test]
    fn is_deterministic_for_regular_input() {
        assert_eq!(generate_slug("Same Title"), generate_slug("Same Title"));
    }

    #[test]
    fn degenerate_input_falls_back_to_unique_tokens() {
        let inputs = ["", "   ", "!!!", "日本語", "\u{00e9}\u{00e8}"];
        let mut seen = HashSet::new();
        for input in inputs {
            for _ in 0..3 {
                let slug = generate_slug(input);
                assert!(slug.starts_with(SLUG_FALLBACK_PREFIX), "{slug}");
                assert!(is_valid_slug(&slug), "{slug}");
                assert!(seen.insert(slug), "fallback slugs must not repeat");
            }
        }
    }

    #[test]
    fn generated_slugs_always_match_the_slug_shape() {
        for input in ["", "a", "A B C", "émigré", "tab\tand\nnewline", "__x__", "ÀÉÎ 42"] {
            let slug = generate_slug(input);
            assert!(!slug.is_empty());
            assert!(is_valid_slug(&slug), "`{input}` produced `{slug}`");
        }
    }

    #[test]
    fn validation_rejects_foreign_characters() {
        assert!(is_valid_slug("lesson-one"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Lesson-One"));
        assert!(!is_valid_slug("lesson one"));
        assert!(!is_valid_slug("lesson_one"));
    }
}
