//! Book orchestration.
//!
//! A book runs on one page: open the detail page, make sure the session is
//! logged in, enter the reader, read the table of contents, then fetch the
//! selected chapters one after another. Several books run side by side on
//! their own pages.

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::bridge::{Chapter, ReaderState};
use crate::cache::LocalCache;
use crate::config::{BookJob, SiteProfile};
use crate::extraction;
use crate::live::chapter::{ChapterFailure, ChapterOutcome, ChapterSettings, ChapterTask};
use crate::live::selection::resolve_selection;
use crate::renderer::{ReaderPage, Renderer, StoredCookie};

/// Cache key holding the session cookies.
pub const COOKIES_KEY: &str = "cookies";

/// Grace period for the avatar before asking the user to log in.
const LOGIN_PROBE: Duration = Duration::from_secs(4);
const LOGIN_POLL: Duration = Duration::from_secs(1);
const STATE_POLL: Duration = Duration::from_millis(250);

/// Settings shared by every book of a run.
#[derive(Debug, Clone)]
pub struct BookOptions {
    pub chapter: ChapterSettings,
    pub login_wait: Duration,
    pub output_dir: PathBuf,
    /// Session cookie store; `None` disables cookie persistence.
    pub cookies: Option<LocalCache>,
}

/// What happened to one book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookReport {
    pub book_id: String,
    pub title: String,
    pub outcomes: Vec<(Chapter, ChapterOutcome)>,
    pub combined: Option<PathBuf>,
}

impl BookReport {
    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::Done(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ChapterOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ChapterOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Download the selected chapters of one book.
pub async fn download_book(
    renderer: &dyn Renderer,
    site: &SiteProfile,
    job: &BookJob,
    options: &BookOptions,
) -> Result<BookReport> {
    let Some(book_id) = job.id.as_deref() else {
        bail!("book has no id");
    };

    let mut page = open_session(renderer, options).await?;
    let entered = enter_reader(page.as_ref(), site, book_id, options).await;
    let (state, reader_url) = match entered {
        Ok(v) => v,
        Err(e) => {
            close_page(page.as_ref()).await;
            return Err(e.context(format!("book {book_id}")));
        }
    };

    let chapters = state.chapters();
    let title = if state.book_info.title.is_empty() {
        book_id.to_string()
    } else {
        state.book_info.title.clone()
    };
    let selected: Vec<usize> = match &job.chapters {
        Some(requested) => resolve_selection(&chapters, requested),
        None => (0..chapters.len()).collect(),
    };
    tracing::info!(book = %title, chapters = chapters.len(), selected = selected.len(), "reader ready");

    let dir = book_dir(&options.output_dir, &title);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        close_page(page.as_ref()).await;
        return Err(e).with_context(|| format!("failed to create {}", dir.display()));
    }

    let total = selected.len();
    let mut outcomes = Vec::with_capacity(total);
    for (done, &index) in selected.iter().enumerate() {
        let chapter = chapters[index].clone();

        if page.is_closed() {
            // releases the handler of a page closed by an interception failure
            close_page(page.as_ref()).await;
            match reopen_session(renderer, &reader_url, options).await {
                Ok(fresh) => page = fresh,
                Err(e) => {
                    tracing::error!(book = %title, "cannot reopen reader: {e:#}");
                    for &rest in &selected[done..] {
                        let failure = ChapterFailure::Page(format!("{e:#}"));
                        outcomes.push((chapters[rest].clone(), ChapterOutcome::Failed(failure)));
                    }
                    break;
                }
            }
        }

        let output = extraction::chapter_path(&dir, &chapter);
        let outcome = ChapterTask::new(page.as_ref(), chapter.clone(), output, options.chapter)
            .run()
            .await;
        outcomes.push((chapter.clone(), outcome));

        tracing::info!("{} | {} | {}%", title, chapter.title, (done + 1) * 100 / total);
    }

    close_page(page.as_ref()).await;

    let combined = if job.combine {
        let picked: Vec<&Chapter> = selected.iter().map(|&i| &chapters[i]).collect();
        extraction::combine_chapters(&dir, &picked)?
    } else {
        None
    };

    let report = BookReport {
        book_id: book_id.to_string(),
        title,
        outcomes,
        combined,
    };
    tracing::info!(
        book = %report.title,
        done = report.done(),
        skipped = report.skipped(),
        failed = report.failed(),
        "book finished"
    );
    Ok(report)
}

async fn close_page(page: &dyn ReaderPage) {
    if let Err(e) = page.close().await {
        tracing::debug!("closing page: {e:#}");
    }
}

/// Run several books, at most `concurrency` at a time. Results come back
/// in completion order.
pub async fn run_books(
    renderer: &dyn Renderer,
    site: &SiteProfile,
    jobs: &[BookJob],
    options: &BookOptions,
    concurrency: usize,
) -> Vec<Result<BookReport>> {
    stream::iter(jobs)
        .map(|job| async move {
            let result = download_book(renderer, site, job, options).await;
            if let Err(e) = &result {
                tracing::error!("{e:#}");
            }
            result
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// New page with the cached session cookies installed.
async fn open_session(renderer: &dyn Renderer, options: &BookOptions) -> Result<Box<dyn ReaderPage>> {
    let page = renderer.new_page().await?;
    if let Some(cache) = &options.cookies {
        if let Some(cookies) = cache.get::<Vec<StoredCookie>>(COOKIES_KEY) {
            if let Err(e) = page.set_cookies(&cookies).await {
                tracing::warn!("cached cookies rejected: {e:#}");
            }
        }
    }
    Ok(page)
}

async fn reopen_session(
    renderer: &dyn Renderer,
    reader_url: &str,
    options: &BookOptions,
) -> Result<Box<dyn ReaderPage>> {
    tracing::info!("reopening reader at {reader_url}");
    let page = open_session(renderer, options).await?;
    page.goto(reader_url).await?;
    Ok(page)
}

/// Detail page, login, reader. Returns the reader store and the reader URL.
async fn enter_reader(
    page: &dyn ReaderPage,
    site: &SiteProfile,
    book_id: &str,
    options: &BookOptions,
) -> Result<(ReaderState, String)> {
    page.goto(&site.book_detail_url(book_id)).await?;
    ensure_login(page, options).await?;

    if !page.begin_reading().await? {
        bail!("start-reading control not found");
    }
    let state = wait_for_catalogue(page, options.chapter.ready_timeout).await?;
    let reader_url = page.current_url().await?;
    Ok((state, reader_url))
}

async fn ensure_login(page: &dyn ReaderPage, options: &BookOptions) -> Result<()> {
    if poll_login(page, LOGIN_PROBE).await? {
        save_cookies(page, options).await;
        return Ok(());
    }
    tracing::info!(
        "please log in in the browser window (waiting up to {}s)",
        options.login_wait.as_secs()
    );
    if !poll_login(page, options.login_wait).await? {
        bail!("not logged in after {:?}", options.login_wait);
    }
    save_cookies(page, options).await;
    Ok(())
}

async fn poll_login(page: &dyn ReaderPage, within: Duration) -> Result<bool> {
    let deadline = Instant::now() + within;
    loop {
        if page.is_logged_in().await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(LOGIN_POLL.min(within)).await;
    }
}

async fn save_cookies(page: &dyn ReaderPage, options: &BookOptions) {
    let Some(cache) = &options.cookies else {
        return;
    };
    match page.cookies().await {
        Ok(cookies) => {
            cache.set(COOKIES_KEY, cookies);
        }
        Err(e) => tracing::warn!("cannot read session cookies: {e:#}"),
    }
}

/// Poll the exposed store until it lists the chapters.
async fn wait_for_catalogue(page: &dyn ReaderPage, timeout: Duration) -> Result<ReaderState> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(state) = page.read_snapshot().await? {
            if !state.chapter_infos.is_empty() {
                return Ok(state);
            }
        }
        if Instant::now() >= deadline {
            bail!("reader state not exposed within {timeout:?}; is the interception working?");
        }
        tokio::time::sleep(STATE_POLL).await;
    }
}

/// Output directory of a book.
pub fn book_dir(output_dir: &Path, title: &str) -> PathBuf {
    output_dir.join(extraction::sanitize_file_name(title))
}
