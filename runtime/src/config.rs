//! Configuration loading.
//!
//! The config file is JSON with a strict schema: unknown keys are rejected so
//! that typos surface immediately instead of silently falling back to a
//! default. Every section is optional. A missing file yields the defaults.
//!
//! Resolution order for the file path:
//! 1. `--config` on the command line
//! 2. `WREX_CONFIG` env
//! 3. `config/config.json` relative to the working directory

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location.
const DEFAULT_CONFIG_PATH: &str = "config/config.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Config {
    pub browser: BrowserSettings,
    pub weread: ReadingSettings,
    pub engine: EngineSettings,
    pub site: SiteProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct BrowserSettings {
    /// Browser executable; falls back to `find_chromium()` discovery.
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            user_data_dir: Some(PathBuf::from("data/user-data")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ReadingSettings {
    pub books: Vec<BookJob>,
    /// Skip chapters whose output file already exists.
    pub enable_cache: bool,
}

/// One book to download.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BookJob {
    pub id: Option<String>,
    /// Chapter titles to fetch; `"..."` spans the gap between neighbours.
    /// `None` selects every chapter.
    pub chapters: Option<Vec<String>>,
    #[serde(default)]
    pub combine: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EngineSettings {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Ceiling of the random pause before each chapter.
    pub delay_ceiling_ms: u64,
    pub ready_timeout_ms: u64,
    pub login_wait_ms: u64,
    pub lock_timeout_ms: u64,
    /// Number of books downloaded at the same time.
    pub concurrency: usize,
    pub cookie_max_age_hours: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            delay_ceiling_ms: 3_000,
            ready_timeout_ms: 30_000,
            login_wait_ms: 120_000,
            lock_timeout_ms: 30_000,
            concurrency: 4,
            cookie_max_age_hours: 7 * 24,
        }
    }
}

impl EngineSettings {
    pub fn delay_ceiling(&self) -> Duration {
        Duration::from_millis(self.delay_ceiling_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_millis(self.login_wait_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn cookie_max_age(&self) -> Duration {
        Duration::from_secs(self.cookie_max_age_hours * 3600)
    }

    /// Directory holding cache namespaces.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

/// Everything the engine needs to know about the target site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SiteProfile {
    /// Origin prefix; documents under it are rewritten.
    pub origin: String,
    /// Path segment identifying the site's own script bundles.
    pub vendor_marker: String,
    /// Fetch pattern for utility scripts.
    pub script_pattern: String,
    /// Private global the bootstrap script assigns the initial state to.
    pub host_state_global: String,
    /// Property the decryption routine is stored under.
    pub decryption_property: String,
    /// Method name of the cipher object's decrypt routine.
    pub decrypt_method: String,
    /// Cipher family names that may own the decrypt routine.
    pub cipher_names: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            origin: "https://weread.qq.com/".to_string(),
            vendor_marker: "wrwebnjlogic".to_string(),
            script_pattern: "*/wrwebnjlogic/js/utils*".to_string(),
            host_state_global: "__INITIAL_STATE__".to_string(),
            decryption_property: "decryption".to_string(),
            decrypt_method: "decrypt".to_string(),
            cipher_names: ["AES", "DES", "TripleDES", "RC4", "Rabbit", "SM4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SiteProfile {
    /// Whether a URL is served from the target origin.
    pub fn is_target_document(&self, url: &str) -> bool {
        url.starts_with(&self.origin)
    }

    /// Whether a URL points at a utility bundle: its path must contain the
    /// vendor marker segment and a segment mentioning `utils`.
    pub fn is_utility_script(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return url.contains(&self.vendor_marker) && url.contains("utils");
        };
        let Some(segments) = parsed.path_segments() else {
            return false;
        };
        let segments: Vec<&str> = segments.collect();
        segments.iter().any(|s| *s == self.vendor_marker)
            && segments.iter().any(|s| s.contains("utils"))
    }

    /// Fetch pattern for target documents.
    pub fn document_pattern(&self) -> String {
        format!("{}*", self.origin)
    }

    /// Detail page of a book.
    pub fn book_detail_url(&self, book_id: &str) -> String {
        format!("{}web/bookDetail/{}", self.origin, book_id)
    }
}

/// Resolve the config file path.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(env_path) = std::env::var("WREX_CONFIG") {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

impl Config {
    /// Load the config file, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        if config.engine.concurrency == 0 {
            anyhow::bail!("engine.concurrency must be at least 1");
        }
        Ok(config)
    }
}
