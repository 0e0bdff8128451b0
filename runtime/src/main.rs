// Copyright 2026 weread-extract contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use weread_extract::cli;
use weread_extract::cli::download_cmd::DownloadArgs;
use weread_extract::cli::rewrite_cmd::Target;
use weread_extract::config::{self, Config};

#[derive(Parser)]
#[command(
    name = "weread-extract",
    about = "Download WeRead chapters as plain text through an instrumented browser",
    version,
    after_help = "Run 'weread-extract <command> --help' for details on each command.\nRun 'weread-extract' with no command to download the configured books."
)]
struct Cli {
    /// Path to config.json (default: WREX_CONFIG or ./config/config.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a book, or every book in the config
    Download {
        /// Book id from the WeRead detail URL
        book_id: Option<String>,
        /// Chapter title to fetch; "..." between two titles selects the range
        #[arg(long = "chapter", short = 'C')]
        chapters: Vec<String>,
        /// Also write a combined file of the selected chapters
        #[arg(long)]
        combine: bool,
        /// Skip chapters whose output file already exists
        #[arg(long)]
        cache: bool,
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Run Chromium headless
        #[arg(long)]
        headless: bool,
    },
    /// Apply a response transform to a saved body and print the result
    Rewrite {
        /// Which transform to run
        #[arg(value_enum)]
        target: Target,
        /// URL the body was served from
        #[arg(long, default_value = "https://weread.qq.com/web/reader/")]
        url: String,
        /// File holding the response body
        file: PathBuf,
    },
    /// Manage the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Clear one namespace, or all of them
    Clear {
        /// Namespace to clear (e.g. "session")
        namespace: Option<String>,
    },
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<Config> {
    Config::load(&config::resolve_config_path(explicit))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbose, cli.log_json);
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        None => match load_config(config_path) {
            Ok(config) => cli::download_cmd::run(config, DownloadArgs::default()).await,
            Err(e) => Err(e),
        },
        Some(Commands::Download {
            book_id,
            chapters,
            combine,
            cache,
            output,
            headless,
        }) => match load_config(config_path) {
            Ok(config) => {
                let args = DownloadArgs {
                    book_id,
                    chapters,
                    combine,
                    cache,
                    output,
                    headless,
                };
                cli::download_cmd::run(config, args).await
            }
            Err(e) => Err(e),
        },
        Some(Commands::Rewrite { target, url, file }) => match load_config(config_path) {
            Ok(config) => cli::rewrite_cmd::run(&config.site, target, &url, &file).await,
            Err(e) => Err(e),
        },
        Some(Commands::Cache { action }) => match action {
            CacheAction::Clear { namespace } => load_config(config_path).and_then(|config| {
                cli::cache_cmd::run_clear(&config.engine.cache_dir(), namespace.as_deref())
                    .map(|_| ())
            }),
        },
        Some(Commands::Doctor) => cli::doctor::run(config_path).await,
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "weread-extract", &mut std::io::stdout());
            Ok(())
        }
    };

    // 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
