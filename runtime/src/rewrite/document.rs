//! State exposure in reader documents.

use regex::Regex;
use scraper::{Html, Selector};
use std::borrow::Cow;
use std::sync::OnceLock;

use super::tree::SyntaxTree;
use super::Edit;
use crate::bridge;
use crate::config::SiteProfile;

/// Rewrite a document body so the host state becomes readable through the
/// exposed state global. Identity for foreign URLs and unexpected markup.
pub fn rewrite_document(site: &SiteProfile, url: &str, body: &str) -> String {
    if !site.is_target_document(url) {
        return body.to_string();
    }
    match expose_state(site, body) {
        Some(rewritten) => {
            tracing::debug!(url, "exposed reader state");
            rewritten
        }
        None => {
            tracing::debug!(url, "no bootstrap script found, document left as is");
            body.to_string()
        }
    }
}

fn expose_state(site: &SiteProfile, body: &str) -> Option<String> {
    let script_text = bootstrap_script(site, body)?;
    let (script_start, raw_text) = locate_script_text(body, &script_text)?;

    let tree = SyntaxTree::parse(raw_text).ok()?;
    let end = tree.first_statement_end()?;
    let statement = bridge::state_exposure_statement(&site.host_state_global);
    let insertion = if end.terminated {
        format!("\n{statement}")
    } else {
        format!(";\n{statement}")
    };
    Edit::insert(script_start + end.offset, insertion).apply(body)
}

/// Text of the nonce-carrying inline script, preferring the one that
/// references the host state. Line endings come back normalised to `\n`.
fn bootstrap_script(site: &SiteProfile, body: &str) -> Option<String> {
    static NONCE_SCRIPT: OnceLock<Selector> = OnceLock::new();
    let selector =
        NONCE_SCRIPT.get_or_init(|| Selector::parse("script[nonce]").expect("valid selector"));
    let fragment = Html::parse_fragment(body);
    let candidates: Vec<String> = fragment
        .select(selector)
        .filter_map(|el| {
            let text = el.first_child()?.value().as_text()?;
            let text: &str = text;
            (!text.trim().is_empty()).then(|| text.to_string())
        })
        .collect();
    candidates
        .iter()
        .find(|text| text.contains(&site.host_state_global))
        .or_else(|| candidates.first())
        .cloned()
}

/// Byte offset and raw source of the inline script whose content is `text`.
/// Script contents are taken between the raw tags, so the offset is exact
/// even when the parser normalised `\r\n` line endings.
fn locate_script_text<'b>(body: &'b str, text: &str) -> Option<(usize, &'b str)> {
    static OPEN_TAG: OnceLock<Regex> = OnceLock::new();
    static CLOSE_TAG: OnceLock<Regex> = OnceLock::new();
    let open = OPEN_TAG.get_or_init(|| Regex::new(r"(?i)<script\b[^>]*>").expect("valid regex"));
    let close = CLOSE_TAG.get_or_init(|| Regex::new(r"(?i)</script").expect("valid regex"));

    let wanted = normalize_newlines(text);
    open.find_iter(body).find_map(|tag| {
        let start = tag.end();
        let end = close.find_at(body, start)?.start();
        let raw = &body[start..end];
        (normalize_newlines(raw) == wanted).then_some((start, raw))
    })
}

fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}
