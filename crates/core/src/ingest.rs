use crate::chunking::chunk_units;
use crate::embeddings::EmbeddingEngine;
use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::index::{FlatIndex, IndexHeader};
use crate::models::{Chunk, IngestionOptions, MetadataRecord, SkippedPdf, SkippedUnit};
use crate::store::{metadata_path_for, save_index_pair};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// `*.pdf` files directly inside `folder` (not recursive), sorted by path.
pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "input is not a directory: {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "pdf");

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

#[derive(Debug)]
pub struct BuildReport {
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    pub header: IndexHeader,
    pub skipped_files: Vec<SkippedPdf>,
    pub skipped_units: Vec<SkippedUnit>,
}

/// Accumulates chunks document by document, then embeds and persists them.
pub struct IndexBuilder<'a, E: PdfExtractor> {
    extractor: &'a E,
    engine: &'a EmbeddingEngine,
    chunk_max_chars: usize,
    chunks: Vec<Chunk>,
    skipped_files: Vec<SkippedPdf>,
    skipped_units: Vec<SkippedUnit>,
}

impl<'a, E: PdfExtractor> IndexBuilder<'a, E> {
    pub fn new(extractor: &'a E, engine: &'a EmbeddingEngine, options: &IngestionOptions) -> Self {
        Self {
            extractor,
            engine,
            chunk_max_chars: options.chunk_max_chars,
            chunks: Vec::new(),
            skipped_files: Vec::new(),
            skipped_units: Vec::new(),
        }
    }

    /// Extracts and chunks one PDF, returning how many chunks it contributed.
    /// A file that cannot be parsed is recorded as skipped.
    pub fn add_document(&mut self, path: &Path) -> usize {
        match self.extractor.extract(path) {
            Ok(report) => {
                self.skipped_units.extend(report.skipped);
                let chunks = chunk_units(report.units, self.chunk_max_chars);
                let added = chunks.len();
                self.chunks.extend(chunks);
                info!(path = %path.display(), chunks = added, "parsed pdf");
                added
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped pdf");
                self.skipped_files.push(SkippedPdf {
                    path: path.to_path_buf(),
                    reason: error.to_string(),
                });
                0
            }
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Embeds every chunk and writes the index at `index_path` with
    /// `metadata.json` beside it.
    pub fn finish(self, index_path: &Path) -> Result<BuildReport, IngestError> {
        let texts: Vec<String> = self.chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.engine.encode(&texts)?;

        let mut index = FlatIndex::new(self.engine.dimensions(), self.engine.model_id());
        index.add_all(&vectors)?;

        let records: Vec<MetadataRecord> = self
            .chunks
            .into_iter()
            .enumerate()
            .map(|(position, chunk)| MetadataRecord::from_chunk(position as u64, chunk))
            .collect();

        let header = save_index_pair(index_path, &index, &records)?;
        info!(
            index = %index_path.display(),
            vectors = header.count,
            dimensions = header.dimensions,
            "index saved"
        );

        Ok(BuildReport {
            index_path: index_path.to_path_buf(),
            metadata_path: metadata_path_for(index_path),
            header,
            skipped_files: self.skipped_files,
            skipped_units: self.skipped_units,
        })
    }
}

/// Builds an index from every PDF directly inside `input`.
pub fn build_index<E: PdfExtractor>(
    input: &Path,
    index_path: &Path,
    extractor: &E,
    engine: &EmbeddingEngine,
    options: &IngestionOptions,
) -> Result<BuildReport, IngestError> {
    let files = discover_pdf_files(input)?;
    let mut builder = IndexBuilder::new(extractor, engine, options);
    for path in &files {
        builder.add_document(path);
    }
    builder.finish(index_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::extractor::LopdfExtractor;
    use crate::index::FlatIndex;
    use crate::layout::Rect;
    use crate::models::ContentKind;
    use crate::ocr::NoOcr;
    use crate::store::read_metadata;
    use crate::test_support::{write_pdf, FixturePage};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn engine() -> EmbeddingEngine {
        EmbeddingEngine::new(Box::new(HashingEmbedder::new(64)), 4)
    }

    fn extractor() -> LopdfExtractor {
        LopdfExtractor::new(&IngestionOptions::default(), Box::new(NoOcr))
    }

    #[test]
    fn discovery_is_not_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("b.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;
        File::create(nested.join("c.pdf"))?;

        let files = discover_pdf_files(base)?;
        let names: Vec<_> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        Ok(())
    }

    #[test]
    fn missing_input_directory_is_an_error() {
        assert!(discover_pdf_files(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn empty_directory_builds_an_empty_index() -> Result<(), Box<dyn std::error::Error>> {
        let input = tempdir()?;
        let out = tempdir()?;
        let index_path = out.path().join("indexes").join("vectors.index");

        let report = build_index(
            input.path(),
            &index_path,
            &extractor(),
            &engine(),
            &IngestionOptions::default(),
        )?;

        assert_eq!(report.header.count, 0);
        assert_eq!(fs::read_to_string(&report.metadata_path)?, "[]");
        let (index, _) = FlatIndex::load(&index_path)?;
        assert!(index.is_empty());
        Ok(())
    }

    #[test]
    fn metadata_count_matches_chunks_and_vectors() -> Result<(), Box<dyn std::error::Error>> {
        let input = tempdir()?;
        let out = tempdir()?;
        let long_text = "Hydraulic pumps move fluid. ".repeat(10);
        write_pdf(&input.path().join("a.pdf"), &[FixturePage::text("Cats are mammals."), FixturePage::blank()])?;
        write_pdf(
            &input.path().join("b.pdf"),
            &[FixturePage {
                lines: vec![(72.0, 700.0, long_text)],
                images: vec![Rect::new(72.0, 100.0, 144.0, 172.0)],
            }],
        )?;
        fs::write(input.path().join("c.pdf"), b"%PDF-1.4\n%broken")?;

        let options = IngestionOptions {
            chunk_max_chars: 100,
            ..IngestionOptions::default()
        };
        let extractor = extractor();
        let engine = engine();
        let mut builder = IndexBuilder::new(&extractor, &engine, &options);
        let mut added = 0;
        for path in discover_pdf_files(input.path())? {
            added += builder.add_document(&path);
        }
        assert_eq!(added, builder.chunk_count());

        let index_path = out.path().join("vectors.index");
        let report = builder.finish(&index_path)?;
        let (records, _) = read_metadata(&report.metadata_path)?;
        let (index, _) = FlatIndex::load(&index_path)?;

        assert_eq!(records.len(), added);
        assert_eq!(index.len(), added);
        assert_eq!(report.skipped_files.len(), 1);
        assert!(records.iter().enumerate().all(|(position, record)| record.id == position as u64));

        let image = records
            .iter()
            .find(|record| record.kind == ContentKind::Image)
            .ok_or("image record missing")?;
        assert!(image.has_image);
        assert_eq!(image.source, "b.pdf");
        assert!(image.image_payload.as_ref().is_some_and(|png| png.starts_with(b"\x89PNG")));
        assert!(records.iter().filter(|record| record.kind == ContentKind::Text).count() > 2);
        Ok(())
    }
}
