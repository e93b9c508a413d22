// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identifier renaming inside free-form program text.
//!
//! This is a word-boundary scoped textual substitution, not a parse: an
//! occurrence inside a comment or string literal is rewritten like any
//! other. Generated program text rarely contains either, which is the
//! extent of the guarantee.

use indexmap::IndexMap;
use regex::{NoExpand, Regex};

/// Replace every whole-word occurrence of `from` with `to`
pub fn rename_identifier(text: &str, from: &str, to: &str) -> Result<String, regex::Error> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(from)))?;
    Ok(pattern.replace_all(text, NoExpand(to)).into_owned())
}

/// Apply a set of renames, in order
pub fn rename_all(text: &str, renames: &IndexMap<String, String>) -> Result<String, regex::Error> {
    renames
        .iter()
        .try_fold(text.to_string(), |text, (from, to)| rename_identifier(&text, from, to))
}
