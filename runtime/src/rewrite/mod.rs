// Copyright 2026 weread-extract contributors
// SPDX-License-Identifier: Apache-2.0

//! Response rewriting.
//!
//! Two pure transforms run on intercepted response bodies:
//!
//! - [`document::rewrite_document`] exposes the host application state from
//!   the inline bootstrap script of a reader page.
//! - [`script::rewrite_script`] binds the page's decryption routine to a
//!   global, trying each locator strategy in turn.
//!
//! Both are total: anything they cannot handle comes back byte-identical.
//! Edits are splices into the original source, never a re-serialisation, so
//! bytes outside the inserted text are preserved.

pub mod document;
pub mod lexer;
pub mod script;
pub mod tree;

pub use document::rewrite_document;
pub use script::{rewrite_script, rewrite_script_detailed, ScriptRewrite};

/// Text inserted at a byte offset of the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub at: usize,
    pub text: String,
}

/// A set of insertions applied together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edit {
    insertions: Vec<Insertion>,
}

impl Edit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::default().and_insert(at, text)
    }

    pub fn and_insert(mut self, at: usize, text: impl Into<String>) -> Self {
        self.insertions.push(Insertion {
            at,
            text: text.into(),
        });
        self
    }

    pub fn insertions(&self) -> &[Insertion] {
        &self.insertions
    }

    /// Apply to `source`. Returns `None` when an offset is out of range or
    /// splits a character.
    pub fn apply(&self, source: &str) -> Option<String> {
        let mut sorted: Vec<&Insertion> = self.insertions.iter().collect();
        sorted.sort_by_key(|ins| ins.at);

        let extra: usize = sorted.iter().map(|ins| ins.text.len()).sum();
        let mut out = String::with_capacity(source.len() + extra);
        let mut cursor = 0;
        for ins in sorted {
            if ins.at > source.len() || !source.is_char_boundary(ins.at) {
                return None;
            }
            out.push_str(&source[cursor..ins.at]);
            out.push_str(&ins.text);
            cursor = ins.at;
        }
        out.push_str(&source[cursor..]);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_orders_insertions() {
        let edit = Edit::insert(3, "]").and_insert(0, "[");
        assert_eq!(edit.apply("abc").as_deref(), Some("[abc]"));
    }

    #[test]
    fn test_apply_rejects_bad_offsets() {
        assert_eq!(Edit::insert(10, "x").apply("abc"), None);
        // inside a multi-byte character
        assert_eq!(Edit::insert(1, "x").apply("章"), None);
    }
}
