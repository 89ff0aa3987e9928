//! Chapterscope CLI entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use chapterscope::{progress, CancellationToken, ExtractionError, PagePipeline};
use chapterscope_cli::{export, host, load_config};

#[derive(Parser)]
#[command(
    name = "chapterscope",
    about = "Find chapter links, title metadata and ordered page images on reader sites",
    version
)]
struct Cli {
    /// Path to a JSON engine config.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Render pages in headless Chromium instead of parsing fetched HTML.
    #[arg(long, global = true)]
    render: bool,

    /// Document URL to assume for local HTML files.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List chapter links on a title page, oldest first.
    Chapters {
        /// URL or local HTML file.
        target: String,

        /// Print the persisted JSON form instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print title metadata (title, cover, author, status) as JSON.
    Metadata {
        /// URL or local HTML file.
        target: String,
    },

    /// Find a chapter's page images in reading order.
    Pages {
        /// URL or local HTML file.
        target: String,

        /// Download, decode and save the images into this directory.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the effective engine config as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   chapterscope completions bash > ~/.local/share/bash-completion/completions/chapterscope
    ///   chapterscope completions zsh > ~/.zfunc/_chapterscope
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Chapters { target, json } => {
            let doc = host::open(&target, cli.base_url.as_deref(), cli.render, &config).await?;
            let pipeline = PagePipeline::new(config);
            let chapters = pipeline.discover_chapters(doc.as_ref()).await;
            if json {
                println!("{}", chapters.to_json()?);
            } else {
                for ch in chapters.iter() {
                    let date = ch
                        .upload_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:>8}  {:<10}  {:<10}  {}  {}",
                        ch.ordinal,
                        ch.chapter_type.as_str(),
                        date,
                        ch.title,
                        ch.url
                    );
                }
                eprintln!("{} chapters", chapters.len());
            }
        }

        Commands::Metadata { target } => {
            let doc = host::open(&target, cli.base_url.as_deref(), cli.render, &config).await?;
            let pipeline = PagePipeline::new(config);
            match pipeline.extract_metadata(doc.as_ref()).await {
                Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                None => {
                    eprintln!("No metadata found on {target}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Pages { target, out } => {
            let doc = host::open(&target, cli.base_url.as_deref(), cli.render, &config).await?;

            let (tx, mut rx) = progress::channel();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    tracing::debug!(
                        "[{} #{}] {}",
                        event.request_id,
                        event.seq,
                        serde_json::to_string(&event.event).unwrap_or_default()
                    );
                }
            });

            let token = CancellationToken::new();
            let ctrl_c = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, keeping partial results");
                    ctrl_c.cancel();
                }
            });

            let pipeline = PagePipeline::new(config).with_progress(tx);
            let result = match &out {
                Some(_) => pipeline.discover_pages(doc.as_ref(), &token).await,
                None => pipeline.rank_pages(doc.as_ref(), &token).await,
            };
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    eprintln!("Page discovery failed ({:?}): {e}", e.kind());
                    let code = if matches!(e, ExtractionError::Cancelled) { 130 } else { 1 };
                    std::process::exit(code);
                }
            };

            for candidate in outcome.ranked.iter() {
                println!("{}", candidate.url);
            }
            if let Some(dir) = out {
                let saved = export::save_images(&dir, &outcome.images)?;
                eprintln!(
                    "Saved {} of {} images to {}",
                    saved.len(),
                    outcome.ranked.len(),
                    dir.display()
                );
                for (url, reason) in &outcome.skipped {
                    eprintln!("  skipped {url}: {reason}");
                }
            }
            if outcome.cancelled || outcome.timed_out {
                eprintln!("Results are partial");
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "chapterscope", &mut std::io::stdout());
        }
    }

    Ok(())
}
