use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_rag_core::{
    discover_pdf_files, metadata_path_for, EmbedderConfig, EmbedderKind, EmbeddingEngine,
    IndexBuilder, IngestionOptions, LopdfExtractor, OcrBackend, OcrConfig, Retriever,
    DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct EmbedderArgs {
    /// Embedding backend: local (pretrained, in-process), hashing (offline) or http.
    #[arg(long, env = "PDF_RAG_EMBEDDER", default_value = "local")]
    embedder: EmbedderKind,

    /// Base URL of an OpenAI-compatible embeddings server.
    #[arg(long, env = "PDF_RAG_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Pretrained model for the local backend, or the name sent to the embeddings server.
    #[arg(long, env = "PDF_RAG_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Vector width of the hashing and http backends.
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Bearer token for the embeddings server.
    #[arg(long, env = "PDF_RAG_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Directory for downloaded local model weights.
    #[arg(long, env = "PDF_RAG_MODEL_CACHE")]
    model_cache: Option<PathBuf>,
}

impl EmbedderArgs {
    fn config(&self, batch_size: usize) -> EmbedderConfig {
        EmbedderConfig {
            kind: self.embedder,
            model: self.embedding_model.clone(),
            endpoint: self.embedding_endpoint.clone(),
            api_key: self.embedding_api_key.clone(),
            dimensions: self.embedding_dimensions,
            batch_size,
            cache_dir: self.model_cache.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extract every PDF in a folder and write the vector index plus metadata.json.
    Build {
        /// Folder that contains the PDFs (not searched recursively).
        #[arg(long)]
        input: PathBuf,

        /// Output index file; metadata.json is written next to it.
        #[arg(long = "index_path", alias = "index-path")]
        index_path: PathBuf,

        /// Upper bound on chunk length in characters.
        #[arg(long, default_value_t = 1500)]
        max_chars: usize,

        /// Strings embedded per backend call.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// OCR backend for embedded images: tesseract, http or none.
        #[arg(long, default_value = "tesseract")]
        ocr: OcrBackend,

        /// Endpoint of the HTTP OCR service.
        #[arg(long, env = "OCR_ENDPOINT")]
        ocr_endpoint: Option<String>,

        #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
        ocr_api_key: Option<String>,

        /// Rasterization resolution for OCR.
        #[arg(long, default_value_t = 150.0)]
        dpi: f32,

        #[command(flatten)]
        embedder: EmbedderArgs,
    },
    /// Retrieve the chunks closest to a query, one JSON object per line.
    Query {
        #[arg(long = "index_path", alias = "index-path")]
        index_path: PathBuf,

        /// Defaults to metadata.json next to the index.
        #[arg(long)]
        metadata: Option<PathBuf>,

        #[arg(long)]
        query: String,

        #[arg(long, default_value_t = 5)]
        top_k: usize,

        #[command(flatten)]
        embedder: EmbedderArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Build {
            input,
            index_path,
            max_chars,
            batch_size,
            ocr,
            ocr_endpoint,
            ocr_api_key,
            dpi,
            embedder,
        } => {
            let options = IngestionOptions {
                chunk_max_chars: max_chars,
                image_dpi: dpi,
                ..IngestionOptions::default()
            };
            let ocr_config = OcrConfig {
                backend: ocr,
                endpoint: ocr_endpoint,
                api_key: ocr_api_key,
                ..OcrConfig::default()
            };
            let embedder_config = embedder.config(batch_size);

            // Blocking reqwest clients and model sessions must live and die off the async runtime.
            tokio::task::spawn_blocking(move || {
                run_build(input, index_path, options, ocr_config, embedder_config)
            })
            .await
            .context("build task panicked")??;
        }
        Command::Query {
            index_path,
            metadata,
            query,
            top_k,
            embedder,
        } => {
            if !index_path.is_file() {
                bail!("index file not found: {}", index_path.display());
            }
            let metadata_path = metadata.unwrap_or_else(|| metadata_path_for(&index_path));
            let embedder_config = embedder.config(DEFAULT_BATCH_SIZE);

            let lines = tokio::task::spawn_blocking(move || {
                run_query(index_path, metadata_path, query, top_k, embedder_config)
            })
            .await
            .context("query task panicked")??;

            for line in lines {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn run_build(
    input: PathBuf,
    index_path: PathBuf,
    options: IngestionOptions,
    ocr_config: OcrConfig,
    embedder_config: EmbedderConfig,
) -> anyhow::Result<()> {
    let ocr = ocr_config.build().context("configuring OCR")?;
    let extractor = LopdfExtractor::new(&options, ocr);
    let engine = EmbeddingEngine::from_config(&embedder_config).context("configuring embedder")?;

    let files = discover_pdf_files(&input)?;
    if files.is_empty() {
        warn!(input = %input.display(), "no PDF files found, writing an empty index");
    }

    let mut builder = IndexBuilder::new(&extractor, &engine, &options);
    for path in &files {
        println!("Parsing {}", path.display());
        builder.add_document(path);
    }

    println!("Computing embeddings...");
    let chunk_count = builder.chunk_count();
    let report = builder.finish(&index_path)?;
    println!("Embedding dim = {}", report.header.dimensions);

    if !report.skipped_files.is_empty() {
        warn!(count = report.skipped_files.len(), "pdf files skipped");
    }
    if !report.skipped_units.is_empty() {
        warn!(count = report.skipped_units.len(), "content units skipped during extraction");
    }

    println!("Index saved.");
    info!(
        chunks = chunk_count,
        index = %report.index_path.display(),
        metadata = %report.metadata_path.display(),
        build_id = %report.header.build_id,
        "build finished"
    );
    Ok(())
}

fn run_query(
    index_path: PathBuf,
    metadata_path: PathBuf,
    query: String,
    top_k: usize,
    embedder_config: EmbedderConfig,
) -> anyhow::Result<Vec<String>> {
    let engine = EmbeddingEngine::from_config(&embedder_config).context("configuring embedder")?;
    let retriever = Retriever::open(&index_path, &metadata_path, engine)
        .with_context(|| format!("loading {}", index_path.display()))?;

    let hits = retriever.retrieve(&query, top_k)?;
    hits.iter()
        .map(|hit| serde_json::to_string(hit).map_err(anyhow::Error::from))
        .collect()
}
