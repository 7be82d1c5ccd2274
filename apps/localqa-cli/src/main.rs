use std::env;
use std::io::Write as _;
use std::path::Path;

use anyhow::Result;
use localqa_core::config::Config;
use localqa_core::{telemetry, CallOptions, ModelStatus, QAResponse};
use localqa_rag::RagPipeline;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio_util::sync::CancellationToken;

mod args;

use args::{parse_args, Command, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let argv: Vec<String> = env::args().skip(1).collect();
    let command = match parse_args(&argv) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let settings = Config::load()
        .and_then(|config| config.settings())
        .map_err(|e| {
            eprintln!("Error loading config: {e:#}");
            e
        })?;
    let pipeline = RagPipeline::from_settings(settings).await?;

    match command {
        Command::Ingest { dir } => {
            let dir = dir.unwrap_or_else(|| pipeline.settings().data.data_dir.clone());
            ingest(&pipeline, &dir).await?;
        }
        Command::Ask { question, top_k } => {
            let response = pipeline.ask(&question, top_k, &CallOptions::default()).await?;
            print_response(&response);
        }
        Command::Chat { top_k } => chat(&pipeline, top_k).await?,
        Command::Stats => print_stats(&pipeline).await?,
        Command::Delete { source } => {
            let removed = pipeline.delete_source(&source).await?;
            println!("Removed {removed} entries for {source}");
        }
        Command::Health => {
            let report = pipeline.health().await;
            let mark = |status: ModelStatus| {
                if status.is_ready() {
                    format!("✅ {status}")
                } else {
                    format!("❌ {status}")
                }
            };
            println!("Embedding model:  {} ({})", report.embedding_model, mark(report.embedding_status));
            println!("Generation model: {} ({})", report.generation_model, mark(report.generation_status));
            println!("Collection:       {}", report.collection);
            if !report.healthy() {
                std::process::exit(1);
            }
        }
        Command::Help => {}
    }
    Ok(())
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            child.cancel();
        }
    });
    token
}

/// Creates `dir` when it is missing. Returns `true` if it had to be created.
fn ensure_data_dir(dir: &Path) -> std::io::Result<bool> {
    if dir.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(dir)?;
    Ok(true)
}

async fn ingest(pipeline: &RagPipeline, dir: &Path) -> Result<()> {
    if ensure_data_dir(dir)? {
        println!("📁 Created {}", dir.display());
        println!("Add PDF, text or Markdown files there and run `localqa ingest` again.");
        return Ok(());
    }
    println!("Ingesting from {}", dir.display());
    let opts = CallOptions::with_cancel(cancel_on_ctrl_c());
    let report = pipeline.ingest(dir, &opts).await?;

    println!("\n✅ Ingest complete");
    println!("📊 Loaded {} documents into {} chunks", report.loaded_count, report.chunk_count);
    if !report.failures.is_empty() {
        println!("⚠️  {} files failed:", report.failures.len());
        for failure in &report.failures {
            println!("   {}: {}", failure.path.display(), failure.error);
        }
    }
    Ok(())
}

async fn print_stats(pipeline: &RagPipeline) -> Result<()> {
    let stats = pipeline.collection_stats().await?;
    println!("Collection:      {}", stats.collection_name);
    println!("Entries:         {}", stats.entry_count);
    println!("Embedding model: {}", stats.embedding_model);
    match stats.dimension {
        Some(dim) => println!("Dimension:       {dim}"),
        None => println!("Dimension:       (not set until the first ingest)"),
    }
    Ok(())
}

fn print_response(response: &QAResponse) {
    println!("\n{}\n", response.answer);
    if response.sources.is_empty() {
        println!("(no sources)");
    } else {
        println!("Sources:");
        for source in &response.sources {
            println!("  - {source}");
        }
    }
    if let Some(confidence) = response.confidence {
        println!("Best match score: {confidence:.3}");
    }
}

const CHAT_HELP: &str = "Commands: /stats  /clear  /help  /quit";

async fn chat(pipeline: &RagPipeline, top_k: Option<usize>) -> Result<()> {
    println!("Local document QA. Ask a question, or type /help.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{CHAT_HELP}"),
            "/clear" => print!("\x1B[2J\x1B[1;1H"),
            "/stats" => {
                if let Err(e) = print_stats(pipeline).await {
                    eprintln!("Error: {e}");
                }
            }
            question => match pipeline.ask(question, top_k, &CallOptions::default()).await {
                Ok(response) => print_response(&response),
                // A failed question never ends the session.
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_data_dir_is_created_once() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("docs").join("qa");
        assert!(ensure_data_dir(&dir).unwrap());
        assert!(dir.is_dir());
        assert!(!ensure_data_dir(&dir).unwrap());
    }
}
