use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docchat_core::providers::openai::DEFAULT_BASE_URL;
use docchat_core::{
    CharacterNgramEmbedder, ChatCoordinator, ChatHistoryStore, ChatOptions, EmbeddingProvider,
    FlowDefinition, FlowRunner, FlowState, FlowStore, IngestionOptions, IngestionPipeline,
    KnowledgeStore, OcrEndpointConfig, OpenAiClient, OpenAiConfig, PgConfig, PgStore,
    RetrievalOptions, Retriever, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "docchat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// PostgreSQL connection string (pgvector required).
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost:5432/docchat")]
    database_url: String,

    /// Maximum pooled database connections.
    #[arg(long, default_value = "20")]
    max_connections: u32,

    /// OpenAI API key. Required for `ask` and for the openai embedder.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = "text-embedding-ada-002")]
    embedding_model: String,

    #[arg(long, env = "OPENAI_CHAT_MODEL", default_value = "gpt-3.5-turbo")]
    chat_model: String,

    /// Embedding vector length; must match the database schema.
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,

    /// Which embedder turns text into vectors.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Multimodal OCR endpoint used when a PDF has no extractable text.
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// OpenAI embeddings API.
    Openai,
    /// Offline hashed character trigrams.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Create the pgvector extension, tables and index.
    InitDb,
    /// Ingest a PDF/CSV file or every such file under a folder.
    Ingest {
        #[arg(long)]
        path: PathBuf,
    },
    /// Show the chunks closest to a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Answer a question from the ingested documents.
    Ask {
        #[arg(long)]
        question: String,
        /// Number of chunks given to the model as context.
        #[arg(long, default_value = "3")]
        context_limit: usize,
        /// Previous exchanges included in the prompt.
        #[arg(long, default_value = "0")]
        history_turns: usize,
    },
    /// Manage ingested documents.
    Documents {
        #[command(subcommand)]
        action: DocumentAction,
    },
    /// Manage the chat history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Manage and run scripted conversation flows.
    Flow {
        #[command(subcommand)]
        action: FlowAction,
    },
}

#[derive(Subcommand)]
enum DocumentAction {
    List,
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
    },
    Clear,
    /// Answer an exchange that was escalated to a human.
    Respond {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        answer: String,
    },
}

#[derive(Subcommand)]
enum FlowAction {
    /// Store a flow definition read from a JSON file.
    Save {
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: PathBuf,
    },
    List,
    /// Run a stored flow interactively, one step per stdin line.
    Run {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        session: Option<String>,
    },
}

impl Cli {
    fn openai_config(&self) -> anyhow::Result<OpenAiConfig> {
        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required for this command")?;

        let mut config = OpenAiConfig::new(api_key)?.with_base_url(&self.openai_base_url)?;
        config.embedding_model = self.embedding_model.clone();
        config.chat_model = self.chat_model.clone();
        config.dimensions = self.dimensions;
        config.timeout = Duration::from_secs(self.timeout_secs);
        Ok(config)
    }

    fn embedder(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        let embedder: Arc<dyn EmbeddingProvider> = match self.embedder {
            EmbedderKind::Openai => Arc::new(OpenAiClient::new(self.openai_config()?)?),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder::new(self.dimensions)),
        };
        Ok(embedder)
    }

    fn ocr(&self) -> Option<OcrEndpointConfig> {
        let mut config =
            OcrEndpointConfig::new(self.ocr_endpoint.as_deref()?, self.ocr_api_key.clone())?;
        config.timeout = Duration::from_secs(self.timeout_secs.max(120));
        Some(config)
    }

    async fn store(&self) -> anyhow::Result<Arc<PgStore>> {
        let config = PgConfig {
            max_connections: self.max_connections,
            ..PgConfig::new(self.database_url.clone())
        };
        let store = PgStore::connect(&config)
            .await
            .context("failed to connect to the database")?;
        Ok(Arc::new(store))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docchat boot"
    );

    let store = cli.store().await?;

    match &cli.command {
        Command::InitDb => {
            store.ensure_schema(cli.dimensions).await?;
            println!("schema ready (vector dimensions = {})", cli.dimensions);
        }
        Command::Ingest { path } => {
            let pipeline =
                IngestionPipeline::new(store.clone(), cli.embedder()?, IngestionOptions::default())?
                    .with_ocr(cli.ocr());
            ingest(&pipeline, path).await?;
        }
        Command::Search { query, limit } => {
            let retriever = Retriever::new(store.clone(), cli.embedder()?, RetrievalOptions::default());
            let hits = retriever.retrieve(query, *limit).await?;
            if hits.is_empty() {
                println!("no chunks found");
            }
            for hit in hits {
                println!(
                    "[{}#{}] distance={:.4} document_id={}",
                    hit.filename, hit.chunk_index, hit.distance, hit.document_id
                );
                println!("  {}", hit.text);
            }
        }
        Command::Ask {
            question,
            context_limit,
            history_turns,
        } => {
            let retriever = Retriever::new(store.clone(), cli.embedder()?, RetrievalOptions::default());
            let completion = OpenAiClient::new(cli.openai_config()?)?;
            let coordinator = ChatCoordinator::new(
                retriever,
                completion,
                store.clone(),
                ChatOptions {
                    context_limit: *context_limit,
                    history_turns: *history_turns,
                },
            );

            let answer = coordinator.ask(question).await?;
            println!("{}", answer.answer);
            println!();
            println!("outcome: {}", answer.outcome);
            if !answer.sources.is_empty() {
                println!("sources: {}", answer.sources.join(", "));
            }
        }
        Command::Documents { action } => match action {
            DocumentAction::List => {
                for document in store.list_documents().await? {
                    println!(
                        "{} {} ({}) chunks={} created_at={}",
                        document.id,
                        document.filename,
                        document.file_type,
                        document.chunk_count,
                        document.created_at.to_rfc3339()
                    );
                }
            }
            DocumentAction::Delete { id } => {
                let filename = store.delete_document(*id).await?;
                println!("deleted {filename}");
            }
        },
        Command::History { action } => match action {
            HistoryAction::List { limit, offset } => {
                for chat in store.list_chats(*limit, *offset).await? {
                    let outcome = chat
                        .outcome
                        .map(|outcome| outcome.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{} [{}] {}", chat.id, outcome, chat.created_at.to_rfc3339());
                    println!("  Q: {}", chat.question);
                    println!("  A: {}", chat.answer);
                }
            }
            HistoryAction::Delete { id } => {
                store.delete_chat(*id).await?;
                println!("deleted chat entry {id}");
            }
            HistoryAction::Clear => {
                let removed = store.clear_chats().await?;
                println!("cleared {removed} chat entries");
            }
            HistoryAction::Respond { id, answer } => {
                store.record_human_response(*id, answer).await?;
                println!("recorded response for {id}");
            }
        },
        Command::Flow { action } => match action {
            FlowAction::Save { name, file } => {
                let raw = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let definition: FlowDefinition = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not a flow definition", file.display()))?;
                let id = store.save_flow(name, &definition).await?;
                println!("saved flow {name} as {id}");
            }
            FlowAction::List => {
                for flow in store.list_flows().await? {
                    println!(
                        "{} {} updated_at={}",
                        flow.id,
                        flow.name,
                        flow.updated_at.to_rfc3339()
                    );
                }
            }
            FlowAction::Run { id, session } => {
                let definition = store.load_flow(*id).await?;
                let session = session
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                run_flow(FlowRunner::new(store.clone()), &definition, &session).await?;
            }
        },
    }

    Ok(())
}

async fn ingest<S, E>(pipeline: &IngestionPipeline<S, E>, path: &Path) -> anyhow::Result<()>
where
    S: KnowledgeStore,
    E: EmbeddingProvider,
{
    if path.is_file() {
        let report = pipeline.ingest_file(path).await?;
        println!(
            "{} ingested as {} with {} chunks",
            path.display(),
            report.document_id,
            report.chunk_count
        );
        return Ok(());
    }

    if !path.is_dir() {
        bail!("{} is neither a file nor a folder", path.display());
    }

    let report = pipeline.ingest_folder_best_effort(path).await?;
    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
    }
    for file in &report.ingested {
        println!(
            "{} ingested as {} with {} chunks",
            file.path.display(),
            file.report.document_id,
            file.report.chunk_count
        );
    }
    println!(
        "{} files ingested, {} skipped at {}",
        report.ingested.len(),
        report.skipped.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn run_flow<F: FlowStore>(
    runner: FlowRunner<F>,
    definition: &FlowDefinition,
    session: &str,
) -> anyhow::Result<()> {
    let mut state = FlowState::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("session {session}; type a message, empty line to quit");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            break;
        }

        let step = runner.run_step(session, definition, &state, &line).await;
        println!("bot: {}", step.response);
        state.variables.extend(step.captured);

        match step.next_step {
            Some(next) if !step.completed => state.current_step = next,
            _ => {
                println!("flow completed");
                break;
            }
        }
    }

    if !state.variables.is_empty() {
        println!("{}", serde_json::to_string_pretty(&state.variables)?);
    }
    Ok(())
}
