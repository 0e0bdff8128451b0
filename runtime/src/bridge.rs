// Copyright 2026 weread-extract contributors
// SPDX-License-Identifier: Apache-2.0

//! Browser bridge contract.
//!
//! Everything the engine shares with the page is defined here: the two
//! globals the rewritten page writes to, the host application's own state
//! global, the DOM selectors of the reader chrome, and every script snippet
//! evaluated in the page. Other modules build page-side code only through the
//! functions below, never from string literals of their own.
//!
//! The page-side shapes are:
//!
//! - `window[STATE_GLOBAL]`: a shallow copy of the host state object. Its
//!   `reader` member is shared with the application, so it keeps tracking the
//!   live reader store after the copy is made.
//! - `window[DECRYPT_GLOBAL]`: `(ciphertext, bookId, chapterUid, sectionIdx) -> html`.

use serde::{Deserialize, Serialize};

/// Global holding the exposed application state.
const STATE_GLOBAL: &str = "__WREX_STATE_SNAPSHOT__";

/// Global holding the exposed decryption routine.
const DECRYPT_GLOBAL: &str = "__WREX_DECRYPT_SECTION__";

/// Value of `chapterContentState` once the current chapter is decryptable.
pub const CONTENT_READY: &str = "DONE";

/// DOM selectors of the reader chrome.
pub mod selectors {
    pub const CATALOGUE_BUTTON: &str = ".readerControls_item.catalog";
    pub const HORIZONTAL_TOGGLE: &str = ".readerControls_item.isHorizontalReader";
    pub const CATALOGUE_LIST: &str = ".readerCatalog_list";
    pub const CATALOGUE_SELECTED: &str = ".readerCatalog_list_item_selected";
    pub const CATALOGUE_LEVEL_3: &str = "readerCatalog_list_item_level_3";
    pub const AVATAR: &str = ".wr_avatar";
    pub const META_DESCRIPTION: &str = "meta[name=\"description\"]";
    /// Visible label of the "start reading" control on the book detail page.
    pub const BEGIN_READ_LABEL: &str = "开始阅读";
}

/// Name of the exposed state global, for code that has to match on it.
pub fn state_global() -> &'static str {
    STATE_GLOBAL
}

/// Name of the exposed decryption global.
pub fn decrypt_global() -> &'static str {
    DECRYPT_GLOBAL
}

/// Statement copying the host state object into the exposed state global.
pub fn state_exposure_statement(host_state_global: &str) -> String {
    format!("window.{STATE_GLOBAL} = Object.assign({{}}, window.{host_state_global});")
}

/// Assignment prefix binding whatever expression follows it to the
/// decryption global. Spliced in front of a function or after an `=`.
pub fn decrypt_binding_prefix() -> String {
    format!("window.{DECRYPT_GLOBAL}=")
}

/// Element id the engine tags on a catalogue entry before clicking it.
pub fn chapter_entry_id(index: usize) -> String {
    format!("wrex-chapter-{index}")
}

/// Element id the engine tags on the "start reading" control.
pub fn begin_read_id() -> &'static str {
    "wrex-begin-read"
}

// ── Snapshot types ──

/// Read-only snapshot of the reader store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReaderState {
    pub book_id: Option<String>,
    pub book_info: BookInfo,
    pub chapter_infos: Vec<ChapterInfo>,
    pub chapter_content_state: Option<String>,
    pub chapter_content_html: Vec<SectionCipher>,
    pub current_chapter: Option<CurrentChapter>,
    pub current_section_idx: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookInfo {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterInfo {
    pub level: u32,
    pub title: String,
}

impl Default for ChapterInfo {
    fn default() -> Self {
        Self {
            level: 1,
            title: String::new(),
        }
    }
}

/// One encrypted section of the current chapter. The value is opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionCipher {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentChapter {
    /// Passed back to the page untouched; the site has used both numbers and strings.
    pub chapter_uid: serde_json::Value,
}

/// A chapter of the table of contents. `index` is the canonical identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub level: u32,
}

/// Arguments of one call to the exposed decryption routine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecryptRequest {
    pub ciphertext: String,
    pub book_id: String,
    pub chapter_uid: serde_json::Value,
    pub section_idx: usize,
}

impl ReaderState {
    /// Whether the current chapter's content has finished loading.
    pub fn is_content_ready(&self) -> bool {
        self.chapter_content_state.as_deref() == Some(CONTENT_READY)
    }

    /// Table of contents with positional indices. Untitled chapters are
    /// named after their position.
    pub fn chapters(&self) -> Vec<Chapter> {
        self.chapter_infos
            .iter()
            .enumerate()
            .map(|(index, info)| Chapter {
                index,
                title: if info.title.is_empty() {
                    format!("第{}章", index + 1)
                } else {
                    info.title.clone()
                },
                level: info.level,
            })
            .collect()
    }

    /// Build the decryption call for the current section, if there is one.
    pub fn current_section_request(&self) -> Option<DecryptRequest> {
        let section = self.chapter_content_html.get(self.current_section_idx)?;
        let chapter = self.current_chapter.as_ref()?;
        Some(DecryptRequest {
            ciphertext: section.value.clone(),
            book_id: self.book_id.clone().unwrap_or_default(),
            chapter_uid: chapter.chapter_uid.clone(),
            section_idx: self.current_section_idx,
        })
    }
}

/// Catalogue highlight as seen by the page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogueSelection {
    pub list_present: bool,
    pub selected_text: Option<String>,
    pub selected_is_subsection: bool,
    pub previous_sibling_text: Option<String>,
}

/// Viewport position of a located catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EntryPosition {
    pub x: f64,
    pub y: f64,
}

// ── Page-side scripts ──

fn js_string(value: &str) -> String {
    // serde_json string encoding is a valid JS string literal
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Projection of the reader store, serialisable as `ReaderState`.
pub fn snapshot_script() -> String {
    format!(
        r#"(() => {{
  const s = window.{STATE_GLOBAL};
  if (!s || !s.reader) return null;
  const r = s.reader;
  return {{
    bookId: r.bookId == null ? null : String(r.bookId),
    bookInfo: {{ title: (r.bookInfo && r.bookInfo.title) || "" }},
    chapterInfos: (r.chapterInfos || []).map(c => ({{ level: c.level || 1, title: c.title || "" }})),
    chapterContentState: r.chapterContentState == null ? null : String(r.chapterContentState),
    chapterContentHtml: (r.chapterContentHtml || []).map(x => ({{ value: x && x.value != null ? String(x.value) : "" }})),
    currentChapter: r.currentChapter ? {{ chapterUid: r.currentChapter.chapterUid ?? null }} : null,
    currentSectionIdx: r.currentSectionIdx || 0
  }};
}})()"#
    )
}

/// Cheap readiness probe, evaluates to the content state string or null.
pub fn content_state_script() -> String {
    format!(
        "(() => {{ const s = window.{STATE_GLOBAL}; \
         return s && s.reader && s.reader.chapterContentState != null \
         ? String(s.reader.chapterContentState) : null; }})()"
    )
}

/// Invoke the exposed decryption routine. Evaluates to null when the
/// routine was never bound on this page.
pub fn decrypt_call_script(request: &DecryptRequest) -> String {
    let uid = serde_json::to_string(&request.chapter_uid).unwrap_or_else(|_| "null".to_string());
    format!(
        "(() => {{ const f = window.{DECRYPT_GLOBAL}; \
         if (typeof f !== 'function') return null; \
         const out = f({}, {}, {}, {}); \
         return out == null ? null : String(out); }})()",
        js_string(&request.ciphertext),
        js_string(&request.book_id),
        uid,
        request.section_idx,
    )
}

pub fn logged_in_script() -> String {
    format!("document.querySelector({}) !== null", js_string(selectors::AVATAR))
}

pub fn horizontal_layout_script() -> String {
    format!(
        "document.querySelector({}) !== null",
        js_string(selectors::HORIZONTAL_TOGGLE)
    )
}

pub fn catalogue_selection_script() -> String {
    format!(
        r#"(() => {{
  const list = document.querySelector({list});
  if (!list) return {{ listPresent: false }};
  const sel = list.querySelector({selected});
  const first = sel ? sel.firstElementChild : null;
  return {{
    listPresent: true,
    selectedText: sel ? sel.textContent : null,
    selectedIsSubsection: !!(first && first.classList.contains({level3})),
    previousSiblingText: sel && sel.previousSibling ? sel.previousSibling.textContent : null
  }};
}})()"#,
        list = js_string(selectors::CATALOGUE_LIST),
        selected = js_string(selectors::CATALOGUE_SELECTED),
        level3 = js_string(selectors::CATALOGUE_LEVEL_3),
    )
}

/// Find the catalogue entry titled `title`, scroll it into view, and tag it
/// with the entry id for `index`. Evaluates to its position or null.
pub fn locate_entry_script(index: usize, title: &str) -> String {
    format!(
        r#"(() => {{
  const list = document.querySelector({list});
  const item = Array.from(list ? list.children : []).find(i => i.textContent === {title});
  if (!item) return null;
  item.scrollIntoView({{ behavior: "smooth" }});
  item.setAttribute("id", {id});
  const rect = item.getBoundingClientRect();
  return {{ x: rect.x, y: rect.y }};
}})()"#,
        list = js_string(selectors::CATALOGUE_LIST),
        title = js_string(title),
        id = js_string(&chapter_entry_id(index)),
    )
}

/// Tag the "start reading" control so it can be clicked by id.
pub fn tag_begin_read_script() -> String {
    format!(
        r#"(() => {{
  const label = {label};
  const nodes = Array.from(document.querySelectorAll("button, a, div, span"));
  const text = n => (n.textContent || "").trim();
  const el = nodes.find(n => text(n) === label && n.children.length === 0)
    || nodes.find(n => text(n) === label);
  if (!el) return false;
  el.setAttribute("id", {id});
  return true;
}})()"#,
        label = js_string(selectors::BEGIN_READ_LABEL),
        id = js_string(begin_read_id()),
    )
}

pub fn random_scroll_script() -> &'static str {
    "(() => { window.scrollTo({ top: Math.floor(Math.random() * window.innerHeight), left: 0, behavior: 'smooth' }); return true; })()"
}

pub fn meta_description_script() -> String {
    format!(
        "(() => {{ const m = document.querySelector({}); return m ? m.getAttribute('content') : null; }})()",
        js_string(selectors::META_DESCRIPTION)
    )
}

/// Placeholder document built from the meta description when the reader
/// store holds no current section.
pub fn placeholder_document(description: &str) -> String {
    format!("<html><body>{description}</body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> ReaderState {
        serde_json::from_value(serde_json::json!({
            "bookId": "b1",
            "bookInfo": { "title": "Book" },
            "chapterInfos": [
                { "level": 1, "title": "Intro" },
                { "level": 2, "title": "" }
            ],
            "chapterContentState": "DONE",
            "chapterContentHtml": [{ "value": "c0" }, { "value": "c1" }],
            "currentChapter": { "chapterUid": 7 },
            "currentSectionIdx": 1
        }))
        .unwrap()
    }

    #[test]
    fn test_chapters_fill_missing_titles() {
        let chapters = sample_state().chapters();
        assert_eq!(chapters[0].title, "Intro");
        assert_eq!(chapters[1].title, "第2章");
        assert_eq!(chapters[1].level, 2);
    }

    #[test]
    fn test_current_section_request() {
        let req = sample_state().current_section_request().unwrap();
        assert_eq!(req.ciphertext, "c1");
        assert_eq!(req.book_id, "b1");
        assert_eq!(req.chapter_uid, serde_json::json!(7));
        assert_eq!(req.section_idx, 1);
    }

    #[test]
    fn test_missing_section_has_no_request() {
        let mut state = sample_state();
        state.current_section_idx = 5;
        assert!(state.current_section_request().is_none());
    }

    #[test]
    fn test_partial_snapshot_deserializes() {
        let state: ReaderState = serde_json::from_str(r#"{"chapterContentState":"PENDING"}"#).unwrap();
        assert!(!state.is_content_ready());
        assert!(state.chapter_infos.is_empty());
    }

    #[test]
    fn test_decrypt_call_escapes_arguments() {
        let req = DecryptRequest {
            ciphertext: "a\"b".into(),
            book_id: "x".into(),
            chapter_uid: serde_json::json!(3),
            section_idx: 0,
        };
        let js = decrypt_call_script(&req);
        assert!(js.contains(r#""a\"b""#));
        assert!(js.contains(decrypt_global()));
    }
}
