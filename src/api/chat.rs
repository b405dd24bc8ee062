//! Interactive chat session
//!
//! A line-oriented console over [`RagService`]. Plain lines are questions; a few
//! commands expose search, image questions and index statistics.

use crate::api::service::{RagService, ReplyBody};
use crate::error::Result;
use crate::ml::chat::ChatModel;
use crate::ml::embedding::EmbeddingProvider;
use crate::utils::{format_file_size, read_file_base64};
use std::io::{BufRead, Write};
use std::time::Instant;

const PREVIEW_CHARS: usize = 100;

/// Run the chat loop until `quit`/`exit` or end of input
pub async fn chat_loop<M, E, R, W>(service: &RagService<M, E>, input: R, mut output: W) -> Result<()>
where
    M: ChatModel,
    E: EmbeddingProvider,
    R: BufRead,
    W: Write,
{
    writeln!(output, "💬 Interactive Chat Mode")?;
    match service.session() {
        Some(session) => writeln!(
            output,
            "   Document: {} ({} pages)",
            session.source.display(),
            session.page_count()
        )?,
        None => writeln!(output, "   No document ingested yet")?,
    }
    writeln!(output, "   Type 'help' for commands, 'exit' to quit")?;
    writeln!(output, "{}", "-".repeat(50))?;

    let mut lines = input.lines();
    loop {
        write!(output, "\nYou: ")?;
        output.flush()?;

        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command.to_lowercase(), rest.trim()),
            None => (input.to_lowercase(), ""),
        };

        match command.as_str() {
            "quit" | "exit" | "q" => {
                writeln!(output, "Goodbye!")?;
                break;
            }
            "help" => {
                writeln!(output, "\nCommands:")?;
                writeln!(output, "  search <query>           - Show raw retrieval results")?;
                writeln!(output, "  image <path> <question>  - Ask about an image file")?;
                writeln!(output, "  stats                    - Show index statistics")?;
                writeln!(output, "  help                     - Show this help")?;
                writeln!(output, "  exit/quit                - End session")?;
            }
            "stats" => match service.stats() {
                Ok(stats) => {
                    writeln!(output, "\nIndex Statistics:")?;
                    writeln!(output, "  Vectors: {}", stats.vector_count)?;
                    writeln!(output, "  Contents: {}", stats.content_count)?;
                    writeln!(output, "  Pages: {}", stats.page_count)?;
                    writeln!(output, "  Size: {}", format_file_size(stats.file_size_bytes))?;
                }
                Err(e) => writeln!(output, "❌ Error getting stats: {}", e)?,
            },
            "search" if !rest.is_empty() => {
                let start = Instant::now();
                match service.search(rest).await {
                    Ok(hits) => {
                        writeln!(
                            output,
                            "Found {} results in {:.3}s:\n",
                            hits.len(),
                            start.elapsed().as_secs_f64()
                        )?;
                        for (i, hit) in hits.iter().enumerate() {
                            writeln!(
                                output,
                                "{}. [Score: {:.3}] [page {}] {}",
                                i + 1,
                                hit.score,
                                hit.origin.page(),
                                preview(&hit.content)
                            )?;
                        }
                    }
                    Err(e) => writeln!(output, "❌ Search error: {}", e)?,
                }
            }
            "image" if !rest.is_empty() => {
                let (path, question) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let image = match read_file_base64(path) {
                    Ok(image) => image,
                    Err(e) => {
                        writeln!(output, "❌ Cannot read {}: {}", path, e)?;
                        continue;
                    }
                };
                let start = Instant::now();
                let reply = service
                    .handle_image_question(Some(question), Some(&image))
                    .await;
                print_reply(&mut output, &reply.body, start)?;
            }
            _ => {
                let start = Instant::now();
                let reply = service.handle_question(Some(input)).await;
                print_reply(&mut output, &reply.body, start)?;
            }
        }
    }

    Ok(())
}

fn print_reply<W: Write>(output: &mut W, body: &ReplyBody, start: Instant) -> Result<()> {
    match body {
        ReplyBody::Answer { answer } => {
            writeln!(output, "\nAssistant: {}", answer)?;
            writeln!(output, "[{:.1}s]", start.elapsed().as_secs_f64())?;
        }
        ReplyBody::Error { error } => writeln!(output, "❌ {}", error)?,
        ReplyBody::Message { message } | ReplyBody::Caption { message, .. } => {
            writeln!(output, "{}", message)?
        }
    }
    Ok(())
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
