use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("table serialization failed: {0}")]
    Table(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<lopdf::Error> for IngestError {
    fn from(error: lopdf::Error) -> Self {
        IngestError::PdfParse(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension {actual} does not match model dimension {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("invalid embedder config: {0}")]
    InvalidConfig(String),

    #[error("embedding model error: {0}")]
    Model(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed index file {path}: {details}")]
    Format { path: String, details: String },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("index and metadata do not match: {0}")]
    Mismatch(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl IndexError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn format(path: &std::path::Path, details: impl Into<String>) -> Self {
        IndexError::Format {
            path: path.display().to_string(),
            details: details.into(),
        }
    }
}
