use anyhow::{Context, Result, bail};
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::RagError;
use crate::config::{API_KEY_ENV, Config, SessionBackend};
use crate::database::sessions::open_session_store;
use crate::database::vector_store::{IndexLoad, VectorIndexStore};
use crate::embeddings::{Embedder, OllamaClient};
use crate::indexer::{BatchReport, FileReport, Indexer};
use crate::rag::AnswerEvent;
use crate::server::{self, AppContext};

/// A line typed into the interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Quit,
    Clear,
    Ingest(PathBuf),
    Question(String),
    Empty,
}

impl ChatInput {
    #[inline]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ChatInput::Empty;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("q") {
            return ChatInput::Quit;
        }
        if line == "/clear" {
            return ChatInput::Clear;
        }
        if let Some(path) = line.strip_prefix("@file") {
            let path = path.trim();
            if !path.is_empty() {
                return ChatInput::Ingest(PathBuf::from(path));
            }
        }
        ChatInput::Question(line.to_string())
    }
}

#[inline]
pub fn load_config(config_dir: &Path) -> Result<Config> {
    let config = Config::load(config_dir)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn open_index(config: &Config) -> Result<Arc<VectorIndexStore>> {
    let embedder: Arc<dyn Embedder> = Arc::new(
        OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?,
    );
    let index = VectorIndexStore::new(&config.storage.vector_db_path, embedder);
    if let IndexLoad::Corrupt { message } = index.load().await? {
        eprintln!(
            "{} vector index at {} is unreadable ({}); starting empty",
            style("⚠").yellow(),
            config.storage.vector_db_path.display(),
            message
        );
    }
    Ok(Arc::new(index))
}

fn progress_bar(verb: &str) -> ProgressBar {
    if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template(&format!("{{spinner}} [{{pos}}] {} {{msg}}", verb))
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    }
}

fn track(bar: &ProgressBar) -> impl FnMut(&FileReport) + Send + '_ {
    move |file| {
        bar.inc(1);
        bar.set_message(file.source.clone());
        if let Some(error) = &file.error {
            bar.suspend(|| eprintln!("{} {}: {}", style("✗").red(), file.source, error));
        }
    }
}

fn print_report(report: &BatchReport) {
    let failed = report.failures().count();
    if report.chunks_added == 0 {
        println!("{}", style(report.summary()).yellow());
    } else {
        println!("{}", style(report.summary()).green());
    }
    if failed > 0 {
        println!("{} files failed to load", failed);
    }
}

/// Resolve the chat model credential, prompting on a terminal
fn api_key_for_chat(config: &Config) -> Result<String> {
    match config.api_key() {
        Ok(key) => Ok(key),
        Err(RagError::ConfigurationMissing(message)) if console::user_attended() => {
            warn!("{}", message);
            let key = dialoguer::Password::new()
                .with_prompt(format!("Enter {}", API_KEY_ENV))
                .interact()
                .context("Failed to read API key")?;
            if key.trim().is_empty() {
                bail!("{} is required", API_KEY_ENV);
            }
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the HTTP API
#[inline]
pub async fn serve(config: Config) -> Result<()> {
    let api_key = config.api_key()?;
    let ctx = AppContext::connect(config, api_key).await?;
    server::serve(Arc::new(ctx)).await
}

/// Handle one chat line; `false` ends the chat.
///
/// A failed request is printed and the chat carries on.
async fn handle_chat_input(ctx: &AppContext, session_id: &str, input: ChatInput) -> bool {
    match input {
        ChatInput::Empty => {}
        ChatInput::Quit => return false,
        ChatInput::Clear => match ctx.orchestrator.clear_session(session_id).await {
            Ok(()) => eprintln!("{}", style("History cleared").green()),
            Err(e) => eprintln!("{} {}", style("Error:").red(), e),
        },
        ChatInput::Ingest(path) => match ctx.indexer.ingest_paths(&[path], |_| {}).await {
            Ok(report) => {
                for failure in report.failures() {
                    eprintln!(
                        "{} {}: {}",
                        style("✗").red(),
                        failure.source,
                        failure.error.as_deref().unwrap_or_default()
                    );
                }
                print_report(&report);
            }
            Err(e) => eprintln!("{} {}", style("Error:").red(), e),
        },
        ChatInput::Question(question) => {
            let mut answer = match ctx.orchestrator.answer(session_id, &question).await {
                Ok(answer) => answer,
                Err(e) => {
                    eprintln!("{} {}", style("Error:").red(), e);
                    return true;
                }
            };

            print!("{} ", style("Assistant:").bold().green());
            while let Some(event) = answer.next().await {
                match event {
                    AnswerEvent::Fragment(text) => {
                        print!("{}", text);
                        std::io::stdout().flush().ok();
                    }
                    AnswerEvent::Completed { .. } => println!(),
                    AnswerEvent::Failed(e) => {
                        println!();
                        eprintln!("{} {}", style("Answer interrupted:").red(), e);
                    }
                }
            }
        }
    }
    true
}

/// Interactive question loop on the terminal
#[inline]
pub async fn chat(config: Config) -> Result<()> {
    let api_key = api_key_for_chat(&config)?;
    let ctx = AppContext::connect(config, api_key).await?;
    let session_id = Uuid::new_v4().to_string();
    info!("Chat session {}", session_id);

    eprintln!("{}", style("💬 RAG Chat").bold().cyan());
    eprintln!(
        "Knowledge base: {} chunks. Type {} to add a document, {} to forget this conversation, {} to quit.",
        style(ctx.index.count().await).cyan(),
        style("@file <path>").cyan(),
        style("/clear").cyan(),
        style("exit").cyan()
    );

    loop {
        let line = tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt("You")
                .allow_empty(true)
                .interact_text()
        })
        .await
        .context("Input task failed")?
        .context("Failed to read input")?;

        if !handle_chat_input(&ctx, &session_id, ChatInput::parse(&line)).await {
            break;
        }
    }

    Ok(())
}

/// Add files or directories to the index
#[inline]
pub async fn ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let index = open_index(config).await?;
    let indexer = Indexer::from_config(config, index)?;

    let bar = progress_bar("Loading");
    let report = indexer.ingest_paths(paths, track(&bar)).await?;
    bar.finish_and_clear();

    print_report(&report);
    Ok(())
}

/// Rebuild the index from the data directory
#[inline]
pub async fn rebuild(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let indexer = Indexer::from_config(config, index)?;

    let bar = progress_bar("Rebuilding");
    let report = indexer.rebuild_from_data_dir(track(&bar)).await?;
    bar.finish_and_clear();

    print_report(&report);
    Ok(())
}

/// Print the nearest chunks for a query
#[inline]
pub async fn search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    let index = open_index(config).await?;
    let k = k.unwrap_or(config.retrieval.k);
    let hits = index.similarity_search(query, k).await?;

    if hits.is_empty() {
        println!("No results. Add documents with 'rag-chat ingest <path>'.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} (distance {:.4})",
            rank + 1,
            style(hit.chunk.source().unwrap_or("unknown source")).cyan(),
            hit.distance
        );
        println!("   {}", hit.chunk.text.replace('\n', "\n   "));
        println!();
    }
    Ok(())
}

/// Report on the index, providers and session storage
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🔍 Vector Index:");
    let index = open_index(config).await?;
    println!("   Path: {}", index.path().display());
    println!("   Chunks: {}", index.count().await);
    match index.dimension().await {
        Some(dimension) => println!("   Dimension: {}", dimension),
        None => println!("   Dimension: not initialized"),
    }

    println!("🤖 Ollama:");
    let ollama = OllamaClient::new(&config.ollama);
    match ollama.map(|client| tokio::task::spawn_blocking(move || client.health_check())) {
        Ok(check) => match check.await.context("Health check task failed")? {
            Ok(()) => println!("   ✅ Connected, model {}", config.ollama.model),
            Err(e) => println!("   ⚠️  Unhealthy: {:#}", e),
        },
        Err(e) => println!("   ❌ Misconfigured: {:#}", e),
    }

    println!("💬 Chat Model:");
    println!("   {} at {}", config.llm.model, config.llm.base_url);
    match config.api_key() {
        Ok(_) => println!("   ✅ {} is set", API_KEY_ENV),
        Err(_) => println!("   ❌ {} is not set", API_KEY_ENV),
    }

    println!("🗂️  Sessions:");
    match config.sessions.backend {
        SessionBackend::Memory => println!("   In memory (not persisted)"),
        SessionBackend::Sqlite => {
            let store = open_session_store(config).await?;
            println!(
                "   SQLite at {} ({} sessions)",
                config.session_database_path().display(),
                store.session_ids().await?.len()
            );
        }
    }

    Ok(())
}
