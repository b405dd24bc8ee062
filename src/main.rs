//! medrag CLI application
//!
//! Command-line interface for the medrag library.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use medrag::utils::{format_file_size, read_file_base64};
use medrag::{Config, RagService, chat_loop};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "medrag")]
#[command(about = "Question answering over medical PDF records with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "MEDRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Index file (SQLite database), overrides the configuration
    #[arg(short, long, global = true, env = "MEDRAG_INDEX")]
    index: Option<PathBuf>,

    /// Directory for extracted images, overrides the configuration
    #[arg(long, global = true)]
    image_dir: Option<PathBuf>,

    /// Print replies as JSON bodies
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, caption and index a PDF, replacing the current document
    Ingest {
        /// PDF file to ingest
        document: PathBuf,

        /// Keep chunks of previously ingested documents
        #[arg(long)]
        keep_existing: bool,
    },

    /// Ask a question about the ingested document
    Ask {
        /// The question; "summarize" asks for a whole-document summary
        #[arg(required = true)]
        question: Vec<String>,
    },

    /// Ask a question about an image, without retrieval
    AskImage {
        /// Image file (PNG or JPEG)
        #[arg(long)]
        image: PathBuf,

        /// The question
        #[arg(required = true)]
        question: Vec<String>,
    },

    /// Caption an image file
    Describe {
        /// Image file (PNG or JPEG)
        image: PathBuf,
    },

    /// Interactive chat with the ingested document
    Chat,

    /// Show index statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(index) = cli.index {
        config.storage.index_path = index;
    }
    if let Some(image_dir) = cli.image_dir {
        config.storage.image_dir = image_dir;
    }
    if let Commands::Ingest {
        keep_existing: true,
        ..
    } = &cli.command
    {
        config.storage.clear_on_ingest = false;
    }

    let index_path = config.storage.index_path.clone();
    let mut service = RagService::from_config(config)
        .with_context(|| format!("failed to open index {}", index_path.display()))?;

    match cli.command {
        Commands::Ingest { document, .. } => {
            if cli.json {
                let reply = service.handle_upload(Some(&document)).await;
                println!("{}", reply.to_json()?);
                return Ok(());
            }

            let spinner = spinner(format!("Processing {}", document.display()));
            let result = service.upload(&document).await;
            spinner.finish_and_clear();
            let stats =
                result.with_context(|| format!("failed to process {}", document.display()))?;

            println!("✅ Ingestion complete!");
            println!("   📄 Pages: {}", stats.pages);
            println!("   🖼️  Images: {} ({} captioned)", stats.images, stats.captions);
            println!(
                "   📊 Chunks: {} text, {} image",
                stats.text_chunks, stats.image_chunks
            );
            println!("   ⏱️  Time: {:.2}s", stats.processing_time);
            println!("   📋 Index: {}", index_path.display());
        }
        Commands::Ask { question } => {
            let question = question.join(" ");
            if cli.json {
                let reply = service.handle_question(Some(&question)).await;
                println!("{}", reply.to_json()?);
                return Ok(());
            }
            let answer = service.ask(&question).await?;
            println!("{}", answer);
        }
        Commands::AskImage { image, question } => {
            let question = question.join(" ");
            let encoded = read_file_base64(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            if cli.json {
                let reply = service
                    .handle_image_question(Some(&question), Some(&encoded))
                    .await;
                println!("{}", reply.to_json()?);
                return Ok(());
            }
            let answer = service.ask_image(&question, &encoded).await?;
            println!("{}", answer);
        }
        Commands::Describe { image } => {
            if cli.json {
                let reply = service.handle_image_upload(Some(&image)).await;
                println!("{}", reply.to_json()?);
                return Ok(());
            }
            let described = service.describe_image_file(&image).await?;
            println!("{}", described.caption);
        }
        Commands::Chat => {
            let stdin = std::io::stdin();
            chat_loop(&service, stdin.lock(), std::io::stdout()).await?;
        }
        Commands::Stats => {
            let stats = service.stats()?;
            if cli.json {
                println!("{}", serde_json::to_string(&stats)?);
                return Ok(());
            }
            if stats.vector_count != stats.content_count {
                bail!(
                    "index is inconsistent: {} vectors but {} contents",
                    stats.vector_count,
                    stats.content_count
                );
            }
            println!("📊 Index Statistics:");
            println!("   Chunks: {}", stats.vector_count);
            println!("   Pages: {}", stats.page_count);
            println!("   Size: {}", format_file_size(stats.file_size_bytes));
            match service.session() {
                Some(session) => println!(
                    "   Document: {} (ingested {})",
                    session.source.display(),
                    session.ingested_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => println!("   Document: none"),
            }
        }
    }

    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
