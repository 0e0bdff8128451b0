// Copyright 2026 weread-extract contributors
// SPDX-License-Identifier: Apache-2.0

//! Chapter acquisition.
//!
//! One chapter is fetched by walking an explicit state machine over a
//! [`ReaderPage`]:
//!
//! ```text
//! Start ─┬─ output exists ──────────────────────────────────────▶ Skip
//!        └─▶ Delay ─▶ CheckLayout ─┬─▶ ToggleLayout ─┐
//!                                  └─────────────────┴─▶ CheckSelection
//! CheckSelection ─┬─ already selected ─▶ AwaitReady
//!                 └─▶ OpenCatalogue ─▶ LocatePosition ─▶ Navigate ─▶ Delay
//! AwaitReady ─▶ Extract ─▶ Persist ─▶ Done
//! ```
//!
//! Every failure exit closes the page. A stuck reader does not recover by
//! itself, and retrying on it only adds clicks.

use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::{self, CatalogueSelection, Chapter};
use crate::extraction;
use crate::live::lock::LockTimeout;
use crate::renderer::ReaderPage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChapterFailure {
    #[error("catalogue control not found")]
    CatalogueMissing,
    #[error("chapter not found in the catalogue")]
    EntryMissing,
    #[error("content not ready within {0:?}")]
    NotReady(Duration),
    #[error("decrypted content is empty")]
    EmptyContent,
    #[error("foreground lock not acquired within {0:?}")]
    LockTimeout(Duration),
    #[error("page error: {0}")]
    Page(String),
    #[error("failed to write output: {0}")]
    Write(String),
}

impl From<anyhow::Error> for ChapterFailure {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<LockTimeout>() {
            Some(LockTimeout(waited)) => ChapterFailure::LockTimeout(*waited),
            None => ChapterFailure::Page(format!("{e:#}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// The output file already existed.
    Skipped,
    Done(PathBuf),
    Failed(ChapterFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChapterState {
    Start,
    Delay,
    CheckLayout,
    ToggleLayout,
    CheckSelection,
    OpenCatalogue,
    LocatePosition,
    Navigate,
    AwaitReady,
    Extract,
    Persist { html: String },
    Skip,
    Done,
    Failed(ChapterFailure),
}

impl ChapterState {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Delay => "delay",
            Self::CheckLayout => "check-layout",
            Self::ToggleLayout => "toggle-layout",
            Self::CheckSelection => "check-selection",
            Self::OpenCatalogue => "open-catalogue",
            Self::LocatePosition => "locate-position",
            Self::Navigate => "navigate",
            Self::AwaitReady => "await-ready",
            Self::Extract => "extract",
            Self::Persist { .. } => "persist",
            Self::Skip => "skip",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Per-chapter knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterSettings {
    /// Skip chapters whose output file exists.
    pub enable_cache: bool,
    /// Ceiling of the random pause before acting on the page.
    pub delay_ceiling: Duration,
    pub ready_timeout: Duration,
}

/// Whether the catalogue highlight already shows `title`.
type SelectionHeuristic = fn(&CatalogueSelection, &str) -> bool;

/// Tried in order. A missing catalogue list matches nothing.
const SELECTION_HEURISTICS: &[SelectionHeuristic] = &[exact_title, subsection_sibling];

fn exact_title(selection: &CatalogueSelection, title: &str) -> bool {
    selection.selected_text.as_deref() == Some(title)
}

/// Some chapters highlight their first sub-section, the entry right after
/// the chapter's own.
fn subsection_sibling(selection: &CatalogueSelection, title: &str) -> bool {
    selection.selected_is_subsection && selection.previous_sibling_text.as_deref() == Some(title)
}

pub fn selection_matches(selection: &CatalogueSelection, title: &str) -> bool {
    selection.list_present && SELECTION_HEURISTICS.iter().any(|h| h(selection, title))
}

/// Fetches one chapter into its output file.
pub struct ChapterTask<'p> {
    page: &'p dyn ReaderPage,
    chapter: Chapter,
    output: PathBuf,
    settings: ChapterSettings,
    navigated: bool,
}

impl<'p> ChapterTask<'p> {
    pub fn new(
        page: &'p dyn ReaderPage,
        chapter: Chapter,
        output: PathBuf,
        settings: ChapterSettings,
    ) -> Self {
        Self {
            page,
            chapter,
            output,
            settings,
            navigated: false,
        }
    }

    pub async fn run(mut self) -> ChapterOutcome {
        let mut state = ChapterState::Start;
        loop {
            state = match state {
                ChapterState::Skip => return ChapterOutcome::Skipped,
                ChapterState::Done => return ChapterOutcome::Done(self.output),
                ChapterState::Failed(failure) => {
                    tracing::warn!(chapter = %self.chapter.title, "chapter failed: {failure}");
                    if let Err(e) = self.page.close().await {
                        tracing::debug!("closing page: {e:#}");
                    }
                    return ChapterOutcome::Failed(failure);
                }
                other => {
                    tracing::debug!(chapter = %self.chapter.title, state = other.name());
                    match self.step(other).await {
                        Ok(next) => next,
                        Err(failure) => ChapterState::Failed(failure),
                    }
                }
            };
        }
    }

    async fn step(&mut self, state: ChapterState) -> Result<ChapterState, ChapterFailure> {
        let page = self.page;
        let next = match state {
            ChapterState::Start => {
                if self.settings.enable_cache && self.output.exists() {
                    tracing::info!("{} hits cache", self.chapter.title);
                    ChapterState::Skip
                } else {
                    ChapterState::Delay
                }
            }
            ChapterState::Delay => {
                let ceiling = self.settings.delay_ceiling.as_millis() as u64;
                if ceiling > 0 {
                    let millis = rand::thread_rng().gen_range(0..ceiling);
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }
                ChapterState::CheckLayout
            }
            ChapterState::CheckLayout => {
                if page.is_horizontal_layout().await? {
                    ChapterState::ToggleLayout
                } else {
                    ChapterState::CheckSelection
                }
            }
            ChapterState::ToggleLayout => {
                page.toggle_layout().await?;
                ChapterState::CheckSelection
            }
            ChapterState::CheckSelection => {
                if self.navigated {
                    ChapterState::AwaitReady
                } else {
                    let selection = page.catalogue_selection().await?;
                    if selection_matches(&selection, &self.chapter.title) {
                        ChapterState::AwaitReady
                    } else {
                        ChapterState::OpenCatalogue
                    }
                }
            }
            ChapterState::OpenCatalogue => {
                if !page.open_catalogue().await? {
                    return Err(ChapterFailure::CatalogueMissing);
                }
                ChapterState::LocatePosition
            }
            ChapterState::LocatePosition => match page.locate_entry(&self.chapter).await? {
                Some(_) => ChapterState::Navigate,
                None => return Err(ChapterFailure::EntryMissing),
            },
            ChapterState::Navigate => {
                page.click_entry(&self.chapter).await?;
                self.navigated = true;
                ChapterState::Delay
            }
            ChapterState::AwaitReady => {
                if !page.wait_content_ready(self.settings.ready_timeout).await? {
                    return Err(ChapterFailure::NotReady(self.settings.ready_timeout));
                }
                ChapterState::Extract
            }
            ChapterState::Extract => {
                if let Err(e) = page.scroll_randomly().await {
                    tracing::debug!("scroll failed: {e:#}");
                }
                let html = self.current_section_html().await?;
                match html.filter(|h| !h.trim().is_empty()) {
                    Some(html) => ChapterState::Persist { html },
                    None => return Err(ChapterFailure::EmptyContent),
                }
            }
            ChapterState::Persist { html } => {
                let text = extraction::html_to_text(&html);
                extraction::write_chapter(&self.output, &text)
                    .map_err(|e| ChapterFailure::Write(format!("{e:#}")))?;
                ChapterState::Done
            }
            terminal => terminal,
        };
        Ok(next)
    }

    /// Decrypt the current section, or fall back to the meta description
    /// when the store holds no current section.
    async fn current_section_html(&self) -> anyhow::Result<Option<String>> {
        let request = self
            .page
            .read_snapshot()
            .await?
            .and_then(|state| state.current_section_request());
        match request {
            Some(request) => self.page.decrypt(&request).await,
            None => {
                tracing::debug!(chapter = %self.chapter.title, "no current section, using placeholder");
                let description = self.page.meta_description().await?.unwrap_or_default();
                Ok(Some(bridge::placeholder_document(&description)))
            }
        }
    }
}
