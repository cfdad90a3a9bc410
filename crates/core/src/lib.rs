pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod images;
pub mod index;
pub mod ingest;
pub mod layout;
pub mod models;
pub mod ocr;
pub mod retriever;
pub mod store;
pub mod tables;

#[cfg(test)]
mod test_support;

pub use chunking::{chunk_text, chunk_units};
pub use embeddings::{
    Embedder, EmbedderConfig, EmbedderKind, EmbeddingEngine, HashingEmbedder, HttpEmbedder,
    LocalEmbedder, DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{EmbeddingError, IndexError, IngestError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use index::{FlatIndex, IndexHeader};
pub use ingest::{build_index, discover_pdf_files, BuildReport, IndexBuilder};
pub use models::{
    Chunk, ContentKind, ContentUnit, ExtractionReport, IngestionOptions, MetadataRecord,
    RetrievalHit, SkippedPdf, SkippedUnit,
};
pub use ocr::{HttpOcr, NoOcr, OcrBackend, OcrConfig, OcrEngine, TesseractOcr};
pub use retriever::Retriever;
pub use store::{metadata_path_for, read_metadata, save_index_pair, METADATA_FILE_NAME};
