//! `cache clear`: reset cache namespaces.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cache::{CacheOptions, LocalCache};

/// Clear one namespace, or every namespace in `dir`.
pub fn run_clear(dir: &Path, namespace: Option<&str>) -> Result<Vec<String>> {
    let namespaces = match namespace {
        Some(ns) => vec![ns.to_string()],
        None => list_namespaces(dir)?,
    };
    for ns in &namespaces {
        LocalCache::open(dir, ns, CacheOptions::default()).clear();
        println!("[OK] cleared {ns}");
    }
    if namespaces.is_empty() {
        println!("Nothing to clear in {}", dir.display());
    }
    Ok(namespaces)
}

fn list_namespaces(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
