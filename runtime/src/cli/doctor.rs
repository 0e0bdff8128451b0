//! Environment readiness check.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::{self, Config};
use crate::renderer::chromium::find_chromium;

/// Check Chromium, the config file, and the data and output directories.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("weread-extract doctor");
    println!("=====================");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let path = config::resolve_config_path(config_path);
    let config = match Config::load(&path) {
        Ok(config) => {
            if path.exists() {
                println!("[OK] Config parsed: {}", path.display());
            } else {
                println!("[OK] No config at {}, using defaults", path.display());
            }
            Some(config)
        }
        Err(e) => {
            println!("[!!] Config invalid: {e:#}");
            None
        }
    };
    let config = config.unwrap_or_default();

    let chromium = find_chromium(config.browser.executable_path.as_deref());
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!("[!!] Chromium NOT found. Set browser.executablePath or WREX_CHROMIUM_PATH."),
    }

    let dirs_ok = [
        ("Data", config.engine.data_dir.clone()),
        ("Output", config.engine.output_dir.clone()),
    ]
    .into_iter()
    .map(|(label, dir)| check_writable(label, &dir))
    .fold(true, |all, ok| all && ok);

    let books = config.weread.books.iter().filter(|b| b.id.is_some()).count();
    println!("[OK] {books} book(s) configured");

    println!();
    if chromium.is_some() && dirs_ok {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}

fn check_writable(label: &str, dir: &PathBuf) -> bool {
    let probe = dir.join(".wrex-doctor");
    let result = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .and_then(|_| std::fs::remove_file(&probe));
    match result {
        Ok(()) => {
            println!("[OK] {label} directory writable: {}", dir.display());
            true
        }
        Err(e) => {
            println!("[!!] {label} directory not writable: {} ({e})", dir.display());
            false
        }
    }
}
