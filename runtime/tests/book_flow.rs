//! End-to-end book runs against an in-memory reader.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use weread_extract::bridge::{CatalogueSelection, Chapter, DecryptRequest, EntryPosition, ReaderState};
use weread_extract::cache::{CacheOptions, LocalCache};
use weread_extract::config::{BookJob, SiteProfile};
use weread_extract::live::book::{book_dir, download_book, run_books, BookOptions, COOKIES_KEY};
use weread_extract::live::chapter::{ChapterFailure, ChapterOutcome, ChapterSettings};
use weread_extract::renderer::{ReaderPage, Renderer, StoredCookie};

const TITLES: [&str; 5] = ["第一章", "第二章", "第三章", "第四章", "第五章"];

/// Reader state shared by every page of the fake browser.
struct Reader {
    current: Mutex<usize>,
    /// Titles whose catalogue entry is missing on the next lookup only.
    flaky_entries: Mutex<HashSet<String>>,
    logged_in: AtomicBool,
    opened: AtomicUsize,
    closes: AtomicUsize,
    gotos: Mutex<Vec<String>>,
}

impl Reader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(0),
            flaky_entries: Mutex::new(HashSet::new()),
            logged_in: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            gotos: Mutex::new(Vec::new()),
        })
    }

    fn state(&self) -> ReaderState {
        let current = *self.current.lock().unwrap();
        serde_json::from_value(serde_json::json!({
            "bookId": "b1",
            "bookInfo": { "title": "测试书" },
            "chapterInfos": TITLES.iter().map(|t| serde_json::json!({ "title": t, "level": 1 })).collect::<Vec<_>>(),
            "chapterContentState": "DONE",
            "chapterContentHtml": [{ "value": format!("cipher-{current}") }],
            "currentChapter": { "chapterUid": current + 100 },
            "currentSectionIdx": 0
        }))
        .unwrap()
    }
}

struct FakeRenderer {
    reader: Arc<Reader>,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_page(&self) -> Result<Box<dyn ReaderPage>> {
        self.reader.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            reader: Arc::clone(&self.reader),
            closed: AtomicBool::new(false),
        }))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_pages(&self) -> usize {
        0
    }
}

struct FakePage {
    reader: Arc<Reader>,
    closed: AtomicBool,
}

#[async_trait]
impl ReaderPage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.reader.gotos.lock().unwrap().push(url.to_string());
        Ok(())
    }
    async fn current_url(&self) -> Result<String> {
        Ok("https://weread.qq.com/web/reader/abc".to_string())
    }
    async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.reader.logged_in.load(Ordering::SeqCst))
    }
    async fn begin_reading(&self) -> Result<bool> {
        Ok(true)
    }
    async fn read_snapshot(&self) -> Result<Option<ReaderState>> {
        Ok(Some(self.reader.state()))
    }
    async fn is_horizontal_layout(&self) -> Result<bool> {
        Ok(false)
    }
    async fn toggle_layout(&self) -> Result<()> {
        Ok(())
    }
    async fn catalogue_selection(&self) -> Result<CatalogueSelection> {
        let current = *self.reader.current.lock().unwrap();
        Ok(CatalogueSelection {
            list_present: true,
            selected_text: Some(TITLES[current].to_string()),
            ..Default::default()
        })
    }
    async fn open_catalogue(&self) -> Result<bool> {
        Ok(true)
    }
    async fn locate_entry(&self, chapter: &Chapter) -> Result<Option<EntryPosition>> {
        if self.reader.flaky_entries.lock().unwrap().remove(&chapter.title) {
            return Ok(None);
        }
        Ok(Some(EntryPosition { x: 10.0, y: 40.0 }))
    }
    async fn click_entry(&self, chapter: &Chapter) -> Result<()> {
        *self.reader.current.lock().unwrap() = chapter.index;
        Ok(())
    }
    async fn wait_content_ready(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }
    async fn scroll_randomly(&self) -> Result<()> {
        Ok(())
    }
    async fn decrypt(&self, request: &DecryptRequest) -> Result<Option<String>> {
        let index: usize = request.ciphertext.trim_start_matches("cipher-").parse()?;
        Ok(Some(format!("<html><body><p>{}正文</p></body></html>", TITLES[index])))
    }
    async fn meta_description(&self) -> Result<Option<String>> {
        Ok(None)
    }
    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        Ok(vec![StoredCookie {
            name: "wr_skey".into(),
            value: "s".into(),
            domain: ".weread.qq.com".into(),
            path: "/".into(),
            secure: true,
            http_only: false,
        }])
    }
    async fn set_cookies(&self, _cookies: &[StoredCookie]) -> Result<()> {
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.reader.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn options(output_dir: &std::path::Path, enable_cache: bool) -> BookOptions {
    BookOptions {
        chapter: ChapterSettings {
            enable_cache,
            delay_ceiling: Duration::ZERO,
            ready_timeout: Duration::from_secs(1),
        },
        login_wait: Duration::from_millis(50),
        output_dir: output_dir.to_path_buf(),
        cookies: None,
    }
}

fn job(chapters: Option<Vec<&str>>, combine: bool) -> BookJob {
    BookJob {
        id: Some("b1".to_string()),
        chapters: chapters.map(|c| c.into_iter().map(String::from).collect()),
        combine,
    }
}

#[tokio::test]
async fn test_range_selection_writes_each_chapter() {
    let out = tempfile::tempdir().unwrap();
    let renderer = FakeRenderer { reader: Reader::new() };

    let report = download_book(
        &renderer,
        &SiteProfile::default(),
        &job(Some(vec!["第一章", "...", "第三章"]), false),
        &options(out.path(), false),
    )
    .await
    .unwrap();

    assert_eq!(report.title, "测试书");
    assert_eq!(report.done(), 3);
    let dir = book_dir(out.path(), "测试书");
    for (i, title) in TITLES.iter().take(3).enumerate() {
        let text = std::fs::read_to_string(dir.join(format!("{i}_{title}.txt"))).unwrap();
        assert_eq!(text, format!("{title}正文"));
    }
    assert!(!dir.join("3_第四章.txt").exists());
    assert_eq!(
        renderer.reader.gotos.lock().unwrap().first().map(String::as_str),
        Some("https://weread.qq.com/web/bookDetail/b1")
    );
}

#[tokio::test]
async fn test_cached_chapters_are_skipped() {
    let out = tempfile::tempdir().unwrap();
    let dir = book_dir(out.path(), "测试书");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("1_第二章.txt"), "old").unwrap();
    let renderer = FakeRenderer { reader: Reader::new() };

    let report = download_book(
        &renderer,
        &SiteProfile::default(),
        &job(Some(vec!["第一章", "第二章"]), true),
        &options(out.path(), true),
    )
    .await
    .unwrap();

    assert_eq!(report.skipped(), 1);
    assert_eq!(report.done(), 1);
    assert_eq!(std::fs::read_to_string(dir.join("1_第二章.txt")).unwrap(), "old");

    let combined = report.combined.expect("combined file");
    let text = std::fs::read_to_string(combined).unwrap();
    assert!(text.contains("第一章正文"));
    assert!(text.contains("old"));
}

#[tokio::test]
async fn test_failed_chapter_reopens_page_for_the_next() {
    let out = tempfile::tempdir().unwrap();
    let reader = Reader::new();
    reader.flaky_entries.lock().unwrap().insert("第二章".to_string());
    let renderer = FakeRenderer { reader: Arc::clone(&reader) };

    let report = download_book(
        &renderer,
        &SiteProfile::default(),
        &job(Some(vec!["第二章", "第三章"]), false),
        &options(out.path(), false),
    )
    .await
    .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.done(), 1);
    assert!(matches!(
        &report.outcomes[0].1,
        ChapterOutcome::Failed(ChapterFailure::EntryMissing)
    ));
    assert_eq!(reader.opened.load(Ordering::SeqCst), 2);
    assert_eq!(
        reader.gotos.lock().unwrap().last().map(String::as_str),
        Some("https://weread.qq.com/web/reader/abc")
    );
    assert!(book_dir(out.path(), "测试书").join("2_第三章.txt").exists());
}

#[tokio::test]
async fn test_login_timeout_fails_the_book_and_keeps_others() {
    let out = tempfile::tempdir().unwrap();
    let reader = Reader::new();
    reader.logged_in.store(false, Ordering::SeqCst);
    let renderer = FakeRenderer { reader };

    let results = run_books(
        &renderer,
        &SiteProfile::default(),
        &[job(None, false)],
        &options(out.path(), false),
        2,
    )
    .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

#[tokio::test]
async fn test_session_cookies_are_cached() {
    let out = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = LocalCache::open(cache_dir.path(), "session", CacheOptions::default());
    let mut opts = options(out.path(), false);
    opts.cookies = Some(cache.clone());
    let renderer = FakeRenderer { reader: Reader::new() };

    download_book(&renderer, &SiteProfile::default(), &job(Some(vec!["第五章"]), false), &opts)
        .await
        .unwrap();

    let saved: Vec<StoredCookie> = cache.get(COOKIES_KEY).unwrap();
    assert_eq!(saved[0].name, "wr_skey");
}

#[tokio::test]
async fn test_unwritable_output_dir_closes_the_page() {
    let out = tempfile::tempdir().unwrap();
    let blocker = out.path().join("books");
    std::fs::write(&blocker, "not a directory").unwrap();
    let reader = Reader::new();
    let renderer = FakeRenderer { reader: Arc::clone(&reader) };

    let result = download_book(
        &renderer,
        &SiteProfile::default(),
        &job(Some(vec!["第一章"]), false),
        &options(&blocker, false),
    )
    .await;

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("failed to create"), "{err:#}");
    assert_eq!(reader.opened.load(Ordering::SeqCst), 1);
    assert_eq!(reader.closes.load(Ordering::SeqCst), 1);
}
