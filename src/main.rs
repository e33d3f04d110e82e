//! # Research Assistant CLI (`ra`)
//!
//! Ask questions about a directory of research papers. Answers are
//! generated from the passages of your own papers that best match the
//! question, and every answer lists those passages as sources.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ra chat` | Interactive session with history and settings |
//! | `ra ask "<question>"` | Answer one question and exit |
//! | `ra index` | Load the persisted index, or build it from the papers |
//! | `ra rebuild` | Rebuild the index from the papers |
//! | `ra stats` | Show index statistics |
//!
//! ## Examples
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! ra index --config ./config/ra.toml
//! ra ask "What does the Stroop task measure?" --top-k 5
//! ra chat
//! ```

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use research_assistant::chat::Conversation;
use research_assistant::config::{self, Config};
use research_assistant::embedding::{create_embedder, Embedder};
use research_assistant::llm::{create_generator, Generator};
use research_assistant::manager::IndexManager;
use research_assistant::models::QueryParams;
use research_assistant::progress::ProgressMode;
use research_assistant::query::{Answer, QueryService};
use research_assistant::repl;
use research_assistant::store::SqliteIndexStore;

/// Research Assistant: question answering over your research papers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, defaults are used (papers in
/// `./papers`, index in `./storage`). See `config/ra.example.toml`.
#[derive(Parser)]
#[command(
    name = "ra",
    about = "Research Assistant: question answering over your research papers",
    version,
    long_about = "Research Assistant indexes a directory of papers (PDF, DOCX, Markdown, text), \
    retrieves the passages most relevant to a question and asks a language model to answer \
    from them, citing the passages it used."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ra.toml")]
    config: PathBuf,

    /// Index build progress on stderr. Defaults to `human` on a terminal
    /// and `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session.
    ///
    /// Loads (or builds) the index, then reads questions from stdin.
    /// Type `/help` inside the session for commands.
    Chat,

    /// Answer a single question.
    Ask {
        question: String,

        /// Model to answer with (defaults to `llm.default_model`).
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature, 0.0 to 1.0.
        #[arg(long)]
        temperature: Option<f32>,

        /// Number of passages to retrieve, 1 to 10.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the answer only once it is complete.
        #[arg(long)]
        no_stream: bool,

        /// Do not list sources after the answer.
        #[arg(long)]
        no_sources: bool,
    },

    /// Load the persisted index, or build it from the papers directory.
    Index,

    /// Rebuild the index from the papers directory.
    ///
    /// The current index stays in place until the new one is persisted.
    Rebuild,

    /// Show index statistics. Never builds an index.
    Stats {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_minimal(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let manager = Arc::new(build_manager(&cfg, progress)?);

    match cli.command {
        Commands::Chat => {
            let generator: Arc<dyn Generator> = Arc::from(create_generator(&cfg.llm)?);
            let service = QueryService::new(Arc::clone(&manager), generator);
            let mut conversation = Conversation::new(service, &cfg.llm);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            repl::run(&mut conversation, stdin, &mut std::io::stdout()).await?;
        }
        Commands::Ask {
            question,
            model,
            temperature,
            top_k,
            no_stream,
            no_sources,
        } => {
            let mut params = QueryParams::from_config(&cfg.llm);
            if let Some(model) = model {
                params.model = model;
            }
            if let Some(temperature) = temperature {
                params.temperature = temperature;
            }
            if let Some(top_k) = top_k {
                params.top_k = top_k;
            }
            if no_stream {
                params.streaming = false;
            }

            manager.load_or_create().await?;
            let generator: Arc<dyn Generator> = Arc::from(create_generator(&cfg.llm)?);
            let service = QueryService::new(Arc::clone(&manager), generator);
            run_ask(&service, &question, &params, !no_sources).await?;
        }
        Commands::Index => {
            let index = manager.load_or_create().await?;
            println!(
                "Index ready: {} documents, {} chunks ({}).",
                index.document_count(),
                index.chunk_count(),
                cfg.paths.persist_dir.display()
            );
        }
        Commands::Rebuild => {
            let index = manager.rebuild().await?;
            println!(
                "Index rebuilt: {} documents, {} chunks.",
                index.document_count(),
                index.chunk_count()
            );
        }
        Commands::Stats { json } => {
            if manager.stats().persisted {
                if let Err(e) = manager.load_or_create().await {
                    tracing::warn!(error = %e, "persisted index could not be loaded");
                }
            }
            let stats = manager.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", stats.render());
            }
        }
    }

    Ok(())
}

fn build_manager(cfg: &Config, progress: ProgressMode) -> anyhow::Result<IndexManager> {
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    let store = SqliteIndexStore::new(&cfg.paths.persist_dir);
    Ok(IndexManager::new(cfg.clone(), embedder, Box::new(store)).with_progress(progress.reporter()))
}

async fn run_ask(
    service: &QueryService,
    question: &str,
    params: &QueryParams,
    show_sources: bool,
) -> anyhow::Result<()> {
    use futures::StreamExt;

    let result = service.query(question, params).await?;
    let mut stdout = std::io::stdout();
    match result.answer {
        Answer::Complete(text) => writeln!(stdout, "{}", text)?,
        Answer::Streaming(mut fragments) => {
            while let Some(fragment) = fragments.next().await {
                write!(stdout, "{}", fragment?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }
    if show_sources {
        writeln!(stdout)?;
        write!(stdout, "{}", repl::render_sources(&result.sources))?;
    }
    Ok(())
}
