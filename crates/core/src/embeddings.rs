use crate::error::EmbeddingError;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Output width of `all-MiniLM-L6-v2`, also used by the offline hashing embedder.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_BATCH_SIZE: usize = 64;

pub trait Embedder {
    /// Stable identifier recorded in the index header.
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Deterministic character-trigram embedder. Needs no model weights or network.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    pub dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-trigram-{dimensions}"),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        if chars.len() < 3 {
            let bucket = bucket_for(&chars, vector.len());
            vector[bucket] += 1.0;
        }

        for window in chars.windows(3) {
            let bucket = bucket_for(window, vector.len());
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

fn bucket_for(token: &[char], buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for ch in token {
        let mut encoded = [0u8; 4];
        for byte in ch.encode_utf8(&mut encoded).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
    }
    (hash % buckets as u64) as usize
}

/// Pretrained sentence-embedding model run in-process through ONNX Runtime.
/// Weights are fetched from the Hugging Face hub into `cache_dir` on first use.
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(model: &str, cache_dir: Option<PathBuf>) -> Result<Self, EmbeddingError> {
        let (kind, dimensions) = local_model(model)?;

        let mut options = InitOptions::new(kind).with_show_download_progress(false);
        if let Some(cache_dir) = cache_dir {
            options = options.with_cache_dir(cache_dir);
        }

        let embedding = TextEmbedding::try_new(options)
            .map_err(|error| EmbeddingError::Model(format!("loading {model}: {error}")))?;
        debug!(model, dimensions, "loaded local embedding model");

        Ok(Self {
            model: Mutex::new(embedding),
            model_id: model.to_string(),
            dimensions,
        })
    }
}

/// Maps a sentence-transformers model name to its fastembed variant and width.
fn local_model(name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
    let short = name.trim().trim_start_matches("sentence-transformers/");
    match short.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "all-minilm-l12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
        "baai/bge-small-en-v1.5" | "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        _ => Err(EmbeddingError::InvalidConfig(format!(
            "no local model named '{name}', expected all-MiniLM-L6-v2, all-MiniLM-L12-v2 or bge-small-en-v1.5"
        ))),
    }
}

impl Embedder for LocalEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::Model("embedding model lock poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), Some(texts.len()))
            .map_err(|error| EmbeddingError::Model(error.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint serving a
/// sentence-embedding model (text-embeddings-inference, Ollama, vLLM).
pub struct HttpEmbedder {
    client: Client,
    endpoint: url::Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingError> {
        let base = url::Url::parse(endpoint.trim_end_matches('/'))?;
        let endpoint = if base.path().ends_with("/embeddings") {
            base
        } else {
            url::Url::parse(&format!("{}/v1/embeddings", base.as_str().trim_end_matches('/')))?
        };

        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            dimensions,
            api_key,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: self.endpoint.to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: EmbeddingResponse = response.json()?;
        order_response(payload, texts.len(), self.endpoint.as_str())
    }
}

fn order_response(
    payload: EmbeddingResponse,
    expected: usize,
    backend: &str,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut data = payload.data;
    if data.len() != expected {
        return Err(EmbeddingError::BackendResponse {
            backend: backend.to_string(),
            details: format!("expected {expected} embeddings, got {}", data.len()),
        });
    }

    if data.iter().all(|datum| datum.index.is_some()) {
        data.sort_by_key(|datum| datum.index);
    }

    Ok(data.into_iter().map(|datum| datum.embedding).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// In-process pretrained model, see [`LocalEmbedder`].
    Local,
    Hashing,
    Http,
}

impl std::str::FromStr for EmbedderKind {
    type Err = EmbeddingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(EmbedderKind::Local),
            "hashing" => Ok(EmbedderKind::Hashing),
            "http" => Ok(EmbedderKind::Http),
            other => Err(EmbeddingError::InvalidConfig(format!(
                "unknown embedder '{other}', expected 'local', 'hashing' or 'http'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Width of hashing and http embedders; local models know their own.
    pub dimensions: usize,
    pub batch_size: usize,
    /// Where local model weights are downloaded; fastembed's default when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::Local,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            endpoint: None,
            api_key: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            cache_dir: None,
        }
    }
}

/// Batching front for an [`Embedder`]. Build one per process and reuse it.
pub struct EmbeddingEngine {
    embedder: Box<dyn Embedder + Send + Sync>,
    batch_size: usize,
}

impl EmbeddingEngine {
    pub fn new(embedder: Box<dyn Embedder + Send + Sync>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &EmbedderConfig) -> Result<Self, EmbeddingError> {
        let embedder: Box<dyn Embedder + Send + Sync> = match config.kind {
            EmbedderKind::Local => Box::new(LocalEmbedder::new(&config.model, config.cache_dir.clone())?),
            EmbedderKind::Hashing => Box::new(HashingEmbedder::new(config.dimensions)),
            EmbedderKind::Http => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    EmbeddingError::InvalidConfig("http embedder requires an endpoint".to_string())
                })?;
                Box::new(HttpEmbedder::new(
                    endpoint,
                    config.model.clone(),
                    config.dimensions,
                    config.api_key.clone(),
                )?)
            }
        };

        Ok(Self::new(embedder, config.batch_size))
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embeds `texts` in consecutive batches, returning one vector per input in order.
    pub fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = self.embedder.dimensions();
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let embedded = self.embedder.embed_batch(batch)?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingError::BackendResponse {
                    backend: self.embedder.model_id().to_string(),
                    details: format!(
                        "batch {batch_no} returned {} vectors for {} inputs",
                        embedded.len(),
                        batch.len()
                    ),
                });
            }

            if let Some(bad) = embedded.iter().find(|vector| vector.len() != expected) {
                return Err(EmbeddingError::Dimension {
                    expected,
                    actual: bad.len(),
                });
            }

            debug!(batch = batch_no, size = batch.len(), "embedded batch");
            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.encode(&[text.to_string()])?;
        vectors.pop().ok_or_else(|| EmbeddingError::BackendResponse {
            backend: self.embedder.model_id().to_string(),
            details: "no embedding returned".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: Arc<AtomicUsize>,
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(texts)
        }
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = HashingEmbedder::new(32);
        assert_eq!(embedder.embed("abc").len(), 32);
        assert_eq!(embedder.embed("").len(), 32);
    }

    #[test]
    fn short_text_still_gets_a_signal() {
        let embedder = HashingEmbedder::new(16);
        let vector = embedder.embed("ab");
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batching_does_not_change_embeddings() {
        let texts: Vec<String> = (0..10).map(|i| format!("sentence number {i}")).collect();
        let calls = Arc::new(AtomicUsize::new(0));
        let batched = EmbeddingEngine::new(
            Box::new(CountingEmbedder {
                inner: HashingEmbedder::new(64),
                calls: Arc::clone(&calls),
            }),
            3,
        );
        let single = EmbeddingEngine::new(Box::new(HashingEmbedder::new(64)), 64);

        let left = batched.encode(&texts).expect("batched encode");
        let right = single.encode(&texts).expect("single encode");

        assert_eq!(left, right);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = EmbeddingEngine::new(
            Box::new(CountingEmbedder {
                inner: HashingEmbedder::new(8),
                calls: Arc::clone(&calls),
            }),
            64,
        );

        assert!(engine.encode(&[]).expect("encode").is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn response_is_reordered_by_index() {
        let payload = EmbeddingResponse {
            data: vec![
                EmbeddingDatum {
                    index: Some(1),
                    embedding: vec![2.0],
                },
                EmbeddingDatum {
                    index: Some(0),
                    embedding: vec![1.0],
                },
            ],
        };

        let ordered = order_response(payload, 2, "test").expect("ordered");
        assert_eq!(ordered, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn response_with_wrong_count_is_rejected() {
        let payload = EmbeddingResponse {
            data: vec![EmbeddingDatum {
                index: None,
                embedding: vec![1.0],
            }],
        };

        assert!(order_response(payload, 2, "test").is_err());
    }

    #[test]
    fn http_embedder_appends_embeddings_path() {
        let embedder =
            HttpEmbedder::new("http://localhost:8080/", "all-MiniLM-L6-v2", 384, None).expect("url");
        assert_eq!(embedder.endpoint.as_str(), "http://localhost:8080/v1/embeddings");

        let explicit =
            HttpEmbedder::new("http://localhost:11434/v1/embeddings", "m", 384, None).expect("url");
        assert_eq!(explicit.endpoint.as_str(), "http://localhost:11434/v1/embeddings");
    }

    #[test]
    fn embedder_kind_parses() {
        assert_eq!("HTTP".parse::<EmbedderKind>().ok(), Some(EmbedderKind::Http));
        assert_eq!("local".parse::<EmbedderKind>().ok(), Some(EmbedderKind::Local));
        assert!("onnx".parse::<EmbedderKind>().is_err());
    }

    #[test]
    fn default_config_selects_the_pretrained_model() {
        let config = EmbedderConfig::default();
        assert_eq!(config.kind, EmbedderKind::Local);
        assert_eq!(config.model, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn batch_size_comes_from_the_embedder_config() -> Result<(), EmbeddingError> {
        let config = EmbedderConfig {
            kind: EmbedderKind::Hashing,
            dimensions: 16,
            batch_size: 7,
            ..EmbedderConfig::default()
        };
        let engine = EmbeddingEngine::from_config(&config)?;
        assert_eq!(engine.batch_size(), 7);
        assert_eq!(engine.dimensions(), 16);
        Ok(())
    }

    #[test]
    fn local_model_names_resolve() {
        assert!(matches!(
            local_model("sentence-transformers/all-MiniLM-L6-v2"),
            Ok((EmbeddingModel::AllMiniLML6V2, 384))
        ));
        assert!(matches!(local_model("BAAI/bge-small-en-v1.5"), Ok((_, 384))));
        assert!(matches!(local_model("gpt-2"), Err(EmbeddingError::InvalidConfig(_))));
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2 weights"]
    fn pretrained_model_captures_meaning() -> Result<(), EmbeddingError> {
        let engine = EmbeddingEngine::from_config(&EmbedderConfig::default())?;
        assert_eq!(engine.model_id(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(engine.dimensions(), 384);

        let texts = ["dog", "puppy", "dogma"].map(str::to_string);
        let vectors = engine.encode(&texts)?;
        let cosine = |left: &[f32], right: &[f32]| {
            let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
            let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
            dot / (norm(left) * norm(right))
        };

        assert!(cosine(&vectors[0], &vectors[1]) > cosine(&vectors[0], &vectors[2]));
        Ok(())
    }
}
