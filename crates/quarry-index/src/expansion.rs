//! Query expansion by synonym substitution.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};

const SYNONYMS: &[(&str, &[&str])] = &[
    ("function", &["method", "procedure", "func", "def"]),
    ("class", &["object", "type", "struct"]),
    ("variable", &["var", "field", "property"]),
    ("error", &["exception", "issue", "problem", "bug"]),
    ("test", &["testing", "spec", "validation"]),
    ("api", &["interface", "endpoint", "service"]),
    ("database", &["db", "storage", "data store"]),
    ("config", &["configuration", "settings", "options"]),
    ("deploy", &["deployment", "release", "publish"]),
];

static PATTERNS: LazyLock<Vec<(Regex, &'static [&'static str])>> = LazyLock::new(|| {
    SYNONYMS
        .iter()
        .map(|(term, alts)| {
            let pattern = Regex::new(&format!(r"(?i)\b{term}\b")).expect("synonym pattern is valid");
            (pattern, *alts)
        })
        .collect()
});

/// The original query followed by synonym variants, deduplicated in
/// first-seen order and capped at `max_variants`.
///
/// Each variant replaces the first whole-word, case-insensitive occurrence
/// of one table term with one of its synonyms.
#[must_use]
pub fn expand_query(query: &str, max_variants: usize) -> Vec<String> {
    let max_variants = max_variants.max(1);
    let mut variants = vec![query.to_owned()];

    'outer: for (pattern, alternatives) in PATTERNS.iter() {
        if !pattern.is_match(query) {
            continue;
        }
        for alt in *alternatives {
            if variants.len() >= max_variants {
                break 'outer;
            }
            let variant = pattern.replace(query, NoExpand(alt)).into_owned();
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }
    variants
}
