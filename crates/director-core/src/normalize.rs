//! Application name normalization.
//!
//! Names exposed to runtimes are lowercased, every run of characters outside
//! `[a-z0-9-]` collapses to a single `-`, leading and trailing dashes are
//! dropped, and the tenant prefix is prepended.
//! A name that already starts with the prefix and is already in normalized
//! form is returned unchanged.

use std::sync::LazyLock;

use regex::Regex;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-a-z0-9]+").expect("valid regex"));
static DASH_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    prefix: String,
}

impl Normalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `name` keeps any letter or digit once normalized.
    pub fn has_slug(&self, name: &str) -> bool {
        !slug(name).is_empty()
    }

    pub fn normalize(&self, name: &str) -> String {
        if name.starts_with(&self.prefix) && slug(name) == name {
            return name.to_string();
        }
        format!("{}{}", self.prefix, slug(name))
    }
}

fn slug(name: &str) -> String {
    let lower = name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lower, "-");
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}
