//! Renderer abstraction.
//!
//! `Renderer` opens pages; `ReaderPage` is everything the engine does with a
//! page of the web reader. The engine never touches chromiumoxide directly,
//! which keeps the acquisition state machine testable against scripted pages.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bridge::{CatalogueSelection, Chapter, DecryptRequest, EntryPosition, ReaderState};

/// A browser engine that opens reader pages.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a blank page with response interception attached.
    async fn new_page(&self) -> Result<Box<dyn ReaderPage>>;
    /// Shut down the browser.
    async fn shutdown(&self) -> Result<()>;
    /// Number of pages opened and not yet closed.
    fn active_pages(&self) -> usize;
}

/// One page of the web reader.
#[async_trait]
pub trait ReaderPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;

    /// Whether the account avatar is shown.
    async fn is_logged_in(&self) -> Result<bool>;
    /// Click the "start reading" control and await the reader. `false` when
    /// the control is missing.
    async fn begin_reading(&self) -> Result<bool>;

    /// Snapshot of the exposed reader store, `None` before it exists.
    async fn read_snapshot(&self) -> Result<Option<ReaderState>>;

    async fn is_horizontal_layout(&self) -> Result<bool>;
    /// Switch back to the vertical layout and await navigation.
    async fn toggle_layout(&self) -> Result<()>;

    async fn catalogue_selection(&self) -> Result<CatalogueSelection>;
    /// Open the catalogue panel. `false` when its control is missing.
    async fn open_catalogue(&self) -> Result<bool>;
    /// Scroll the chapter's catalogue entry into view and tag it.
    async fn locate_entry(&self, chapter: &Chapter) -> Result<Option<EntryPosition>>;
    /// Click the tagged entry and await navigation.
    async fn click_entry(&self, chapter: &Chapter) -> Result<()>;

    /// Poll until the current chapter is decryptable. `false` on timeout.
    async fn wait_content_ready(&self, timeout: Duration) -> Result<bool>;
    async fn scroll_randomly(&self) -> Result<()>;
    /// Call the exposed decryption routine. `None` when it was never bound.
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Option<String>>;
    async fn meta_description(&self) -> Result<Option<String>>;

    async fn cookies(&self) -> Result<Vec<StoredCookie>>;
    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<()>;

    async fn close(&self) -> Result<()>;
    /// Closed by the engine or by a fatal interception error.
    fn is_closed(&self) -> bool;
}

/// A browser cookie as persisted in the session cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}
