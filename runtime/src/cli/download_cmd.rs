//! `download`: fetch configured books, or one book named on the command line.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheOptions, LocalCache};
use crate::config::{BookJob, Config};
use crate::live::book::{run_books, BookOptions};
use crate::live::chapter::ChapterSettings;
use crate::live::lock::ForegroundLock;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;

/// Cache namespace holding session cookies.
pub const SESSION_NAMESPACE: &str = "session";

/// Command-line overrides of the config file.
#[derive(Debug, Clone, Default)]
pub struct DownloadArgs {
    pub book_id: Option<String>,
    pub chapters: Vec<String>,
    pub combine: bool,
    pub cache: bool,
    pub output: Option<PathBuf>,
    pub headless: bool,
}

/// Books to run: the one from the arguments, else the configured ones.
pub fn select_jobs(config: &Config, args: &DownloadArgs) -> Vec<BookJob> {
    if let Some(id) = &args.book_id {
        return vec![BookJob {
            id: Some(id.clone()),
            chapters: (!args.chapters.is_empty()).then(|| args.chapters.clone()),
            combine: args.combine,
        }];
    }
    config
        .weread
        .books
        .iter()
        .filter(|job| {
            if job.id.is_none() {
                tracing::warn!("skipping configured book without id");
            }
            job.id.is_some()
        })
        .map(|job| BookJob {
            combine: job.combine || args.combine,
            ..job.clone()
        })
        .collect()
}

pub async fn run(mut config: Config, args: DownloadArgs) -> Result<()> {
    if args.cache {
        config.weread.enable_cache = true;
    }
    if let Some(output) = &args.output {
        config.engine.output_dir = output.clone();
    }
    if args.headless {
        config.browser.headless = true;
    }

    let mut jobs = select_jobs(&config, &args);
    if jobs.is_empty() {
        let id = prompt_book_id().await?;
        jobs.push(BookJob {
            id: Some(id),
            chapters: None,
            combine: args.combine,
        });
    }

    let engine = &config.engine;
    let options = BookOptions {
        chapter: ChapterSettings {
            enable_cache: config.weread.enable_cache,
            delay_ceiling: engine.delay_ceiling(),
            ready_timeout: engine.ready_timeout(),
        },
        login_wait: engine.login_wait(),
        output_dir: engine.output_dir.clone(),
        cookies: Some(LocalCache::open(
            &engine.cache_dir(),
            SESSION_NAMESPACE,
            CacheOptions {
                max_age: Some(engine.cookie_max_age()),
            },
        )),
    };

    let site = Arc::new(config.site.clone());
    let renderer = ChromiumRenderer::launch(
        &config.browser,
        Arc::clone(&site),
        ForegroundLock::new(engine.lock_timeout()),
    )
    .await?;

    let results = run_books(&renderer, &site, &jobs, &options, engine.concurrency).await;

    if let Err(e) = renderer.shutdown().await {
        tracing::warn!("browser shutdown: {e:#}");
    }

    let mut failed_books = 0;
    for result in &results {
        match result {
            Ok(report) => println!(
                "{}: {} done, {} cached, {} failed{}",
                report.title,
                report.done(),
                report.skipped(),
                report.failed(),
                report
                    .combined
                    .as_ref()
                    .map(|p| format!(" -> {}", p.display()))
                    .unwrap_or_default()
            ),
            Err(_) => failed_books += 1,
        }
    }
    if failed_books == results.len() {
        bail!("no book could be downloaded");
    }
    Ok(())
}

async fn prompt_book_id() -> Result<String> {
    let id = tokio::task::spawn_blocking(|| -> Result<String> {
        let mut editor = rustyline::DefaultEditor::new().context("cannot open prompt")?;
        let line = editor.readline("Book id: ").context("no book id given")?;
        Ok(line.trim().to_string())
    })
    .await
    .context("prompt task failed")??;
    if id.is_empty() {
        bail!("no book id given");
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        Config::from_json(
            r#"{ "weread": { "books": [
                { "id": "a", "chapters": ["x"] },
                { "chapters": ["y"] },
                { "id": "b", "combine": true }
            ] } }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_argument_book_replaces_configured_books() {
        let args = DownloadArgs {
            book_id: Some("z".into()),
            chapters: vec!["第一章".into(), "...".into()],
            combine: true,
            ..Default::default()
        };
        let jobs = select_jobs(&configured(), &args);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id.as_deref(), Some("z"));
        assert_eq!(jobs[0].chapters.as_ref().unwrap().len(), 2);
        assert!(jobs[0].combine);
    }

    #[test]
    fn test_configured_books_without_id_are_skipped() {
        let jobs = select_jobs(&configured(), &DownloadArgs::default());
        let ids: Vec<_> = jobs.iter().filter_map(|j| j.id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!jobs[0].combine);
        assert!(jobs[1].combine);
    }

    #[test]
    fn test_no_chapter_arguments_selects_all() {
        let args = DownloadArgs {
            book_id: Some("z".into()),
            ..Default::default()
        };
        assert!(select_jobs(&Config::default(), &args)[0].chapters.is_none());
    }
}
