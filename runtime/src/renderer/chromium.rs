//! Chromium renderer using chromiumoxide.

use super::{ReaderPage, Renderer, StoredCookie};
use crate::bridge::{
    self, selectors, CatalogueSelection, Chapter, DecryptRequest, EntryPosition, ReaderState,
};
use crate::config::{BrowserSettings, SiteProfile};
use crate::intercept::chromium::{attach, Interception};
use crate::live::lock::ForegroundLock;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long a click waits for the navigation it triggers. Reader route
/// changes do not always produce one.
const NAVIGATION_WAIT: Duration = Duration::from_secs(10);

/// How long to look for the catalogue control.
const CONTROL_WAIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium(configured: Option<&Path>) -> Option<PathBuf> {
    // 1. config file
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("configured browser {} does not exist", path.display());
    }

    // 2. WREX_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("WREX_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.weread-extract/chromium/
    if let Some(home) = dirs::home_dir() {
        let root = home.join(".weread-extract/chromium");
        let candidates = if cfg!(target_os = "macos") {
            vec![
                root.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                root.join("chrome"),
            ]
        } else {
            vec![root.join("chrome-linux64/chrome"), root.join("chrome")]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer. Every page shares one foreground lock.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    site: Arc<SiteProfile>,
    lock: ForegroundLock,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch Chromium. Headful unless `settings.headless`.
    pub async fn launch(
        settings: &BrowserSettings,
        site: Arc<SiteProfile>,
        lock: ForegroundLock,
    ) -> Result<Self> {
        let chrome_path = find_chromium(settings.executable_path.as_deref()).context(
            "Chromium not found. Set browser.executablePath or WREX_CHROMIUM_PATH.",
        )?;
        tracing::info!("launching {}", chrome_path.display());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");
        builder = if settings.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        if let Some(dir) = &settings.user_data_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            builder = builder.user_data_dir(dir);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler: {e}");
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            site,
            lock,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_page(&self) -> Result<Box<dyn ReaderPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        let interception = attach(&page, Arc::clone(&self.site)).await?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumPage {
            page,
            lock: self.lock.clone(),
            interception,
            closed: AtomicBool::new(false),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.context("failed to close browser")?;
        if let Err(e) = browser.wait().await {
            tracing::debug!("browser exit: {e}");
        }
        self.handler.abort();
        Ok(())
    }

    fn active_pages(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// One reader tab.
pub struct ChromiumPage {
    page: Page,
    lock: ForegroundLock,
    interception: Interception,
    closed: AtomicBool,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumPage {
    /// Evaluate a script; `null` and `undefined` come back as `None`.
    async fn eval<T: DeserializeOwned>(&self, script: impl Into<String>) -> Result<Option<T>> {
        let result = self
            .page
            .evaluate(script.into())
            .await
            .context("JS execution failed")?;
        match result.value().filter(|v| !v.is_null()) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .context("failed to convert JS result"),
            None => Ok(None),
        }
    }

    async fn wait_for_navigation(&self) {
        match tokio::time::timeout(NAVIGATION_WAIT, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!("navigation wait failed: {e}"),
            Err(_) => tracing::debug!("no navigation within {NAVIGATION_WAIT:?}"),
        }
    }

    /// Foreground the page, click `selector`, await the navigation, all
    /// under the foreground lock.
    async fn click_and_navigate(&self, selector: &str) -> Result<()> {
        let _guard = self.lock.acquire().await?;
        self.page.bring_to_front().await.context("failed to bring page to front")?;
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("element {selector} not found"))?;
        element.click().await.context("click failed")?;
        self.wait_for_navigation().await;
        Ok(())
    }
}

#[async_trait]
impl ReaderPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigation to {url} failed"))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.eval(bridge::logged_in_script()).await?.unwrap_or(false))
    }

    async fn begin_reading(&self) -> Result<bool> {
        let tagged: bool = self.eval(bridge::tag_begin_read_script()).await?.unwrap_or(false);
        if !tagged {
            return Ok(false);
        }
        self.click_and_navigate(&format!("#{}", bridge::begin_read_id()))
            .await?;
        Ok(true)
    }

    async fn read_snapshot(&self) -> Result<Option<ReaderState>> {
        self.eval(bridge::snapshot_script()).await
    }

    async fn is_horizontal_layout(&self) -> Result<bool> {
        Ok(self.eval(bridge::horizontal_layout_script()).await?.unwrap_or(false))
    }

    async fn toggle_layout(&self) -> Result<()> {
        self.click_and_navigate(selectors::HORIZONTAL_TOGGLE).await
    }

    async fn catalogue_selection(&self) -> Result<CatalogueSelection> {
        Ok(self
            .eval(bridge::catalogue_selection_script())
            .await?
            .unwrap_or_default())
    }

    async fn open_catalogue(&self) -> Result<bool> {
        let deadline = Instant::now() + CONTROL_WAIT;
        let button = loop {
            match self.page.find_element(selectors::CATALOGUE_BUTTON).await {
                Ok(el) => break el,
                Err(_) if Instant::now() < deadline => tokio::time::sleep(POLL_INTERVAL).await,
                Err(_) => return Ok(false),
            }
        };
        let _guard = self.lock.acquire().await?;
        self.page.bring_to_front().await.context("failed to bring page to front")?;
        button.click().await.context("failed to open catalogue")?;
        Ok(true)
    }

    async fn locate_entry(&self, chapter: &Chapter) -> Result<Option<EntryPosition>> {
        let position = self
            .eval(bridge::locate_entry_script(chapter.index, &chapter.title))
            .await?;
        if position.is_some() {
            // let the smooth scroll settle before anything clicks
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(position)
    }

    async fn click_entry(&self, chapter: &Chapter) -> Result<()> {
        self.click_and_navigate(&format!("#{}", bridge::chapter_entry_id(chapter.index)))
            .await
    }

    async fn wait_content_ready(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let state: Option<String> = self.eval(bridge::content_state_script()).await?;
            if state.as_deref() == Some(bridge::CONTENT_READY) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn scroll_randomly(&self) -> Result<()> {
        let _: Option<bool> = self.eval(bridge::random_scroll_script()).await?;
        Ok(())
    }

    async fn decrypt(&self, request: &DecryptRequest) -> Result<Option<String>> {
        self.eval(bridge::decrypt_call_script(request)).await
    }

    async fn meta_description(&self) -> Result<Option<String>> {
        self.eval(bridge::meta_description_script()).await
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let cookies = self.page.get_cookies().await.context("failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<()> {
        let params = cookies
            .iter()
            .map(|c| {
                CookieParam::builder()
                    .name(c.name.clone())
                    .value(c.value.clone())
                    .domain(c.domain.clone())
                    .path(c.path.clone())
                    .secure(c.secure)
                    .http_only(c.http_only)
                    .build()
                    .map_err(|e| anyhow!("invalid cookie {}: {e}", c.name))
            })
            .collect::<Result<Vec<_>>>()?;
        self.page
            .set_cookies(params)
            .await
            .context("failed to install cookies")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.interception.detach();
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        if let Err(e) = self.page.clone().close().await {
            tracing::debug!("page close: {e}");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.interception.has_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, "").unwrap();
        assert_eq!(find_chromium(Some(&fake)), Some(fake));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_page_evaluates_and_closes() {
        let settings = BrowserSettings {
            headless: true,
            user_data_dir: None,
            ..Default::default()
        };
        let renderer = ChromiumRenderer::launch(
            &settings,
            Arc::new(SiteProfile::default()),
            ForegroundLock::default(),
        )
        .await
        .expect("failed to launch");
        let page = renderer.new_page().await.expect("failed to open page");
        assert_eq!(renderer.active_pages(), 1);

        page.goto("data:text/html,<meta name=\"description\" content=\"hello\">")
            .await
            .unwrap();
        assert_eq!(page.meta_description().await.unwrap().as_deref(), Some("hello"));
        assert!(page.read_snapshot().await.unwrap().is_none());

        page.close().await.unwrap();
        assert!(page.is_closed());
        assert_eq!(renderer.active_pages(), 0);
        renderer.shutdown().await.unwrap();
    }
}
