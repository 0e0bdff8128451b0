//! `rewrite`: run a transform on a saved response body.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::SiteProfile;
use crate::rewrite;

/// Which transform to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Target {
    Document,
    Script,
}

pub async fn run(site: &SiteProfile, target: Target, url: &str, file: &Path) -> Result<()> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let output = match target {
        Target::Document => {
            let out = rewrite::rewrite_document(site, url, &body);
            if out == body {
                eprintln!("[!!] document unchanged");
            }
            out
        }
        Target::Script => {
            let out = rewrite::rewrite_script_detailed(site, url, &body);
            match out.strategy {
                Some(name) => eprintln!("[OK] matched by {name}"),
                None => eprintln!("[!!] no strategy matched"),
            }
            out.body
        }
    };
    print!("{output}");
    Ok(())
}
