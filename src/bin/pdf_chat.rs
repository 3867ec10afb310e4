use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rustyrag::config;
use rustyrag::extraction::UploadedDocument;
use rustyrag::logging;
use rustyrag::processing::Answer;
use rustyrag::session::{PipelineServices, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "pdf-chat",
    about = "Ask questions about PDF documents from the terminal"
)]
struct Cli {
    /// PDF files or directories searched recursively for `*.pdf`.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Question to answer non-interactively; may be repeated.
    #[arg(short, long = "question")]
    questions: Vec<String>,
    /// Override the number of chunks retrieved per question.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    top_k: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Invalid configuration")?;
    logging::init_file_tracing();

    let mut services = PipelineServices::from_config(config)
        .context("Failed to initialise model providers")?;
    if let Some(top_k) = cli.top_k {
        services.settings.top_k = usize::try_from(top_k).context("top-k out of range")?;
    }
    let session = Session::new(Arc::new(services));

    let files = collect_pdfs(&cli.paths)?;
    if files.is_empty() {
        bail!("no PDF files found");
    }
    let documents = files
        .iter()
        .map(|path| load_document(path))
        .collect::<Result<Vec<_>>>()?;

    println!("Processing {} document(s)...", documents.len());
    let outcome = session
        .upload(documents)
        .await
        .context("Failed to process documents")?;
    for skipped in &outcome.skipped {
        eprintln!("skipped {}: {}", skipped.filename, skipped.reason);
    }
    println!(
        "Ready: {} document(s), {} page(s), {} chunk(s)",
        outcome.documents.len(),
        outcome.pages,
        outcome.chunks
    );

    if cli.questions.is_empty() {
        chat(&session).await
    } else {
        for question in &cli.questions {
            println!("Q: {question}");
            ask(&session, question).await;
        }
        Ok(())
    }
}

async fn chat(session: &Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            _ => ask(session, question).await,
        }
    }
    Ok(())
}

async fn ask(session: &Session, question: &str) {
    match session.ask(question).await {
        Ok(answer) => print_answer(&answer),
        Err(error) => eprintln!("error ({}): {error}", error.kind()),
    }
}

fn print_answer(answer: &Answer) {
    println!("A: {}", answer.text);
    for source in &answer.sources {
        let preview: String = source.text.chars().take(80).collect();
        println!(
            "   [{}] score={:.3} {}",
            source.index,
            source.score,
            preview.replace('\n', " ")
        );
    }
}

fn collect_pdfs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && has_pdf_extension(entry.path()))
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("{} does not exist", path.display());
        }
    }
    Ok(files)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn load_document(path: &Path) -> Result<UploadedDocument> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedDocument::new(filename, None, bytes))
}
