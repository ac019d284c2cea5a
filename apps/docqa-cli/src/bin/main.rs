use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa_core::Settings;
use docqa_rag::RagService;

#[derive(Parser)]
#[command(name = "docqa", about = "Ask questions about your documents")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a file, or every supported file in a directory
    Ingest { path: Option<PathBuf> },
    /// Copy a file into the documents folder and index it
    Upload { file: PathBuf },
    /// Answer a question from the indexed documents
    Ask { question: String },
    /// Show the chunks that would be used to answer a question
    Retrieve {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Report whether an index is available
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let service = RagService::from_settings(settings)?;
    service.startup().await;

    match cli.command {
        Command::Ingest { path } => {
            let path = path.unwrap_or_else(|| service.settings().documents_path.clone());
            if path.is_dir() {
                let report = service.ingest_directory(&path).await?;
                if !cli.json {
                    for failure in report.failures() {
                        if let Err(message) = &failure.result {
                            eprintln!("skipped {}: {}", failure.path.display(), message);
                        }
                    }
                }
                print_or_json(cli.json, &report, || {
                    format!(
                        "Indexed {} chunks from {} file(s) ({} failed)",
                        report.chunks.len(),
                        report.succeeded(),
                        report.failures().count()
                    )
                })?;
            } else {
                let report = service.ingest_path(&path).await?;
                print_or_json(cli.json, &report, || {
                    format!("{} ({} chunks)", report.message, report.chunks_created)
                })?;
            }
        }
        Command::Upload { file } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string());
            let report = service.upload_document(&bytes, &filename).await?;
            print_or_json(cli.json, &report, || {
                format!("{} ({} chunks)", report.message, report.chunks_created)
            })?;
        }
        Command::Ask { question } => {
            let response = service.ask(&question).await?;
            print_or_json(cli.json, &response, || {
                let mut out = response.answer.clone();
                if !response.sources.is_empty() {
                    out.push_str("\n\nSources:");
                    for (i, s) in response.sources.iter().enumerate() {
                        let source = s.metadata.get("source").and_then(|v| v.as_str()).unwrap_or("?");
                        let page = s.metadata.get("page").map(|p| format!(" p.{p}")).unwrap_or_default();
                        out.push_str(&format!("\n  [{}] {}{} (distance {:.3})", i + 1, source, page, s.score));
                    }
                }
                out
            })?;
            if !response.success {
                std::process::exit(2);
            }
        }
        Command::Retrieve { question, k } => {
            let response = service.retrieve(&question, k).await?;
            print_or_json(cli.json, &response, || {
                let mut out = format!("{} chunk(s) for: {}", response.count, response.question);
                for (i, d) in response.documents.iter().enumerate() {
                    let preview: String = d.content.chars().take(160).collect();
                    out.push_str(&format!("\n\n[{}] distance {:.3}\n{}", i + 1, d.score, preview));
                }
                out
            })?;
        }
        Command::Status => {
            let status = service.status().await;
            print_or_json(cli.json, &status, || {
                format!("{} ({} chunks indexed)", status.message, status.documents_indexed)
            })?;
        }
    }
    Ok(())
}

fn print_or_json<T: serde::Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}
