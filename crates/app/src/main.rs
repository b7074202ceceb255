use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rag_retrieval_core::clients::dashscope::{DEFAULT_RERANK_ENDPOINT, DEFAULT_RERANK_MODEL};
use rag_retrieval_core::{
    write_chunk_dump, CharacterNgramEmbedder, CorpusIngestor, DashScopeRerankClient,
    EmbeddingClient, FileExtractor, GenerationClient, GenerationError, OpenAiEmbeddingClient,
    OpenAiGenerationClient, ProviderConfig, QueryOutcome, RagConfig, RagPipeline, RerankClient,
    RerankError, ScoredDocument,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v3";
const DEFAULT_GENERATION_MODEL: &str = "qwen-plus";

#[derive(Parser)]
#[command(name = "rag-retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,

    /// Embed with the local character-trigram embedder instead of RAG_EMBEDDING_ENDPOINT.
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,
}

#[derive(Args)]
struct Settings {
    /// Maximum chunk length in characters.
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Texts per embedding request.
    #[arg(long, env = "RAG_EMBEDDING_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Embedding vector dimension.
    #[arg(long, env = "RAG_DIMENSION", default_value_t = 1024)]
    dimension: usize,

    /// Pause between embedding batches, in milliseconds.
    #[arg(long, env = "RAG_EMBEDDING_THROTTLE_MS", default_value_t = 100)]
    throttle_ms: u64,

    /// Candidates fetched from the index.
    #[arg(long, env = "RAG_RETRIEVAL_TOP_K", default_value_t = 5)]
    retrieval_top_k: usize,

    /// Candidates kept after rerank.
    #[arg(long, env = "RAG_RERANK_TOP_K", default_value_t = 5)]
    rerank_top_k: usize,

    /// Passages handed to generation.
    #[arg(long, env = "RAG_CONTEXT_TOP_K", default_value_t = 3)]
    context_top_k: usize,

    /// Extraction workers; defaults to available parallelism.
    #[arg(long, env = "RAG_INGEST_WORKERS")]
    workers: Option<usize>,

    /// Sampling temperature for answer generation.
    #[arg(long, env = "RAG_GENERATION_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Nucleus sampling cutoff for answer generation.
    #[arg(long, env = "RAG_GENERATION_TOP_P", default_value_t = 0.8)]
    top_p: f32,
}

impl Settings {
    fn rag_config(&self) -> RagConfig {
        let defaults = RagConfig::default();
        RagConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embedding_batch_size: self.batch_size,
            dimension: self.dimension,
            retrieval_top_k: self.retrieval_top_k,
            rerank_top_k: self.rerank_top_k,
            context_top_k: self.context_top_k,
            embedding_throttle_ms: self.throttle_ms,
            ingest_workers: self.workers.unwrap_or(defaults.ingest_workers),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extract, normalize and chunk a document folder into a chunk dump.
    Ingest {
        /// Folder searched recursively for .txt, .pdf and .docx files.
        #[arg(long)]
        folder: PathBuf,
        /// Chunk dump to write.
        #[arg(long, default_value = "processed_chunks.txt")]
        output: PathBuf,
    },
    /// Embed chunks and write `<index>.index` / `<index>.data`.
    Index {
        /// Chunk dump produced by `ingest`.
        #[arg(long, default_value = "processed_chunks.txt", conflicts_with = "folder")]
        dump: PathBuf,
        /// Ingest this folder directly instead of reading a dump.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Index base path.
        #[arg(long, default_value = "dist/index")]
        index: PathBuf,
    },
    /// Retrieve and rerank passages for a query.
    Search {
        #[arg(long, default_value = "dist/index")]
        index: PathBuf,
        #[arg(long)]
        query: String,
    },
    /// Retrieve context and generate a grounded answer.
    Ask {
        #[arg(long, default_value = "dist/index")]
        index: PathBuf,
        #[arg(long)]
        query: String,
    },
}

/// Stand-in for a backend with no endpoint configured. Rerank falls back to
/// retrieval order; generation reports the missing setting.
struct Unconfigured {
    variable: &'static str,
}

#[async_trait]
impl RerankClient for Unconfigured {
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
        _top_n: usize,
    ) -> Result<Vec<ScoredDocument>, RerankError> {
        Err(RerankError::BackendResponse {
            backend: "rerank".to_string(),
            details: format!("{} is not set", self.variable),
        })
    }
}

#[async_trait]
impl GenerationClient for Unconfigured {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::BackendResponse {
            backend: "generation".to_string(),
            details: format!("{} is not set", self.variable),
        })
    }
}

type Pipeline = RagPipeline<Box<dyn EmbeddingClient>, Box<dyn RerankClient>, Box<dyn GenerationClient>>;

fn embedder(offline: bool, dimension: usize) -> anyhow::Result<Box<dyn EmbeddingClient>> {
    if offline {
        return Ok(Box::new(CharacterNgramEmbedder::new(dimension)));
    }
    let provider = ProviderConfig::from_env("RAG_EMBEDDING", DEFAULT_EMBEDDING_MODEL)
        .context("RAG_EMBEDDING_ENDPOINT is not set; pass --offline to embed locally")?;
    info!(endpoint = %provider.endpoint, model = %provider.model, "embedding backend");
    Ok(Box::new(OpenAiEmbeddingClient::new(&provider, Some(dimension))?))
}

fn reranker() -> anyhow::Result<Box<dyn RerankClient>> {
    // An API key alone selects the hosted DashScope endpoint.
    let provider = ProviderConfig::from_env("RAG_RERANK", DEFAULT_RERANK_MODEL).or_else(|| {
        std::env::var("RAG_RERANK_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| ProviderConfig {
                endpoint: DEFAULT_RERANK_ENDPOINT.to_string(),
                api_key: Some(api_key.trim().to_string()),
                model: std::env::var("RAG_RERANK_MODEL")
                    .unwrap_or_else(|_| DEFAULT_RERANK_MODEL.to_string()),
            })
    });

    match provider {
        Some(provider) => Ok(Box::new(DashScopeRerankClient::new(&provider)?)),
        None => {
            warn!("no rerank backend configured; results keep retrieval order");
            Ok(Box::new(Unconfigured {
                variable: "RAG_RERANK_API_KEY",
            }))
        }
    }
}

fn generator(settings: &Settings) -> anyhow::Result<Box<dyn GenerationClient>> {
    match ProviderConfig::from_env("RAG_GENERATION", DEFAULT_GENERATION_MODEL) {
        Some(provider) => Ok(Box::new(
            OpenAiGenerationClient::new(&provider)?.with_sampling(settings.temperature, settings.top_p),
        )),
        None => Ok(Box::new(Unconfigured {
            variable: "RAG_GENERATION_ENDPOINT",
        })),
    }
}

fn pipeline(settings: &Settings, offline: bool) -> anyhow::Result<Pipeline> {
    let config = settings.rag_config();
    let embedder = embedder(offline, config.dimension)?;
    Ok(RagPipeline::new(config, embedder, reranker()?, generator(settings)?)?)
}

fn print_outcome(outcome: &QueryOutcome) {
    println!("query: {}", outcome.query);
    println!("stages: {}", render_stages(outcome));
    println!("retrieved: {}", outcome.retrieved.len());
    for (rank, result) in outcome.retrieved.iter().enumerate() {
        println!("[{}] {result}\n", rank + 1);
    }
    if outcome.rerank_applied {
        println!("reranked: {}", outcome.reranked.len());
        for (rank, result) in outcome.reranked.iter().enumerate() {
            println!("[{}] {result}\n", rank + 1);
        }
    } else {
        println!("reranked: none (retrieval order kept)");
    }
}

fn render_stages(outcome: &QueryOutcome) -> String {
    outcome
        .stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn load(settings: &Settings, offline: bool, index: &Path) -> anyhow::Result<Pipeline> {
    let mut pipeline = pipeline(settings, offline)?;
    pipeline
        .load_index(index)
        .with_context(|| format!("loading index {}", index.display()))?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.settings.rag_config();
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "rag-retrieval boot"
    );

    match cli.command {
        Command::Ingest { folder, output } => {
            let ingestor = CorpusIngestor::new(Arc::new(FileExtractor), &config)?;
            let mut stream = ingestor.ingest(&folder)?;
            let texts: Vec<String> = stream.by_ref().map(|chunk| chunk.text).collect();
            let report = stream.finish();

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
            }

            let written = write_chunk_dump(&output, texts.iter().map(String::as_str))?;
            println!(
                "{written} chunks from {} file(s) written to {} ({} skipped)",
                report.processed_files,
                output.display(),
                report.skipped_files.len()
            );
        }
        Command::Index {
            dump,
            folder,
            index,
        } => {
            let mut pipeline = pipeline(&cli.settings, cli.offline)?;
            let summary = match folder {
                Some(folder) => {
                    let ingestor = CorpusIngestor::new(Arc::new(FileExtractor), &config)?;
                    pipeline.ingest_and_index(&ingestor, &folder).await?
                }
                None => pipeline.index_chunk_dump(&dump).await?,
            };
            pipeline.save_index(&index)?;

            println!(
                "{} of {} chunks indexed at {} ({} without embedding)",
                summary.chunks_indexed,
                summary.chunks_total,
                index.display(),
                summary.chunks_without_embedding
            );
        }
        Command::Search { index, query } => {
            let pipeline = load(&cli.settings, cli.offline, &index)?;
            let outcome = pipeline.query(&query).await?;
            print_outcome(&outcome);
        }
        Command::Ask { index, query } => {
            let pipeline = load(&cli.settings, cli.offline, &index)?;
            let grounded = pipeline.answer(&query).await?;
            print_outcome(&grounded.outcome);
            match grounded.answer {
                Some(answer) => println!("answer:\n{answer}"),
                None => println!("answer: no relevant context was retrieved"),
            }
        }
    }

    Ok(())
}
