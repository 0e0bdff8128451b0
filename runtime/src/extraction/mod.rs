//! Output text and file naming.

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::bridge::Chapter;

/// Directory under a book's output directory holding combined files.
pub const COMBINED_DIR: &str = "combines";

/// Reduce decrypted chapter HTML to its text.
pub fn html_to_text(html: &str) -> String {
    static BODY: OnceLock<Selector> = OnceLock::new();
    let body = BODY.get_or_init(|| Selector::parse("body").expect("valid selector"));
    let document = Html::parse_document(html);
    match document.select(body).next() {
        Some(el) => el.text().collect(),
        None => document.root_element().text().collect(),
    }
}

/// Replace characters that are invalid in file names on common filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    INVALID
        .get_or_init(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex"))
        .replace_all(name, "_")
        .into_owned()
}

/// `<index>_<title>.txt`
pub fn chapter_file_name(chapter: &Chapter) -> String {
    format!("{}_{}.txt", chapter.index, sanitize_file_name(&chapter.title))
}

pub fn chapter_path(book_dir: &Path, chapter: &Chapter) -> PathBuf {
    book_dir.join(chapter_file_name(chapter))
}

/// Write a chapter's text, creating the book directory when needed.
pub fn write_chapter(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

/// Join the selected chapters' files, in selection order, into
/// `combines/<first title>.txt`. Missing chapter files are skipped.
pub fn combine_chapters(book_dir: &Path, chapters: &[&Chapter]) -> Result<Option<PathBuf>> {
    let Some(first) = chapters.first() else {
        return Ok(None);
    };
    let mut parts = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let path = chapter_path(book_dir, chapter);
        match std::fs::read_to_string(&path) {
            Ok(text) => parts.push(text),
            Err(e) => tracing::warn!(chapter = %chapter.title, "not combined, {}: {e}", path.display()),
        }
    }
    let target = book_dir
        .join(COMBINED_DIR)
        .join(format!("{}.txt", sanitize_file_name(&first.title)));
    write_chapter(&target, &parts.join("\n"))?;
    Ok(Some(target))
}
