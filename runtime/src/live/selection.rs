//! Chapter request resolution.
//!
//! A request is a list of chapter titles. The `...` token stands for every
//! chapter strictly between its neighbours. At the start or end of the
//! request a missing neighbour means the matching end of the book; anywhere
//! else an unknown neighbour turns the ellipsis into a no-op.

use std::collections::HashMap;

use crate::bridge::Chapter;

pub const ELLIPSIS: &str = "...";

/// Map a chapter request to chapter indices, in request order.
pub fn resolve_selection(chapters: &[Chapter], requested: &[String]) -> Vec<usize> {
    // later duplicates overwrite earlier ones
    let by_title: HashMap<&str, usize> = chapters
        .iter()
        .map(|c| (c.title.as_str(), c.index))
        .collect();
    let lookup = |i: Option<usize>| {
        i.and_then(|i| requested.get(i))
            .and_then(|name| by_title.get(name.as_str()).copied())
    };

    let mut indices = Vec::new();
    for (i, name) in requested.iter().enumerate() {
        if name != ELLIPSIS {
            match by_title.get(name.as_str()) {
                Some(&index) => indices.push(index),
                None => tracing::warn!(chapter = %name, "no chapter with this title"),
            }
            continue;
        }

        let prev = lookup(i.checked_sub(1));
        let next = lookup(Some(i + 1));
        if prev.is_none() && i != 0 {
            continue;
        }
        if next.is_none() && i != requested.len() - 1 {
            continue;
        }
        let from = prev.map_or(0, |p| p + 1);
        let to = next.unwrap_or(chapters.len());
        indices.extend(from..to);
    }
    indices
}
