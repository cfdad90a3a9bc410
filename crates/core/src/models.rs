use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use std::path::PathBuf;

/// Placeholder returned in place of chunk text; chunk bodies are not persisted.
pub const SNIPPET_PLACEHOLDER: &str = "[snippet not stored]";

/// Chunk text used for image units whose OCR pass recovered nothing.
pub const IMAGE_PLACEHOLDER: &str = "[image]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Table,
    Image,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Table => "table",
            ContentKind::Image => "image",
        }
    }
}

/// One typed piece of content pulled off a PDF page.
///
/// Built only through [`ContentUnit::text`], [`ContentUnit::table`] and
/// [`ContentUnit::image`], so `image_payload` is present exactly for image units.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    kind: ContentKind,
    text: String,
    image_payload: Option<Vec<u8>>,
    page: u32,
    source: String,
}

impl ContentUnit {
    pub fn text(text: impl Into<String>, page: u32, source: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: text.into(),
            image_payload: None,
            page,
            source: source.into(),
        }
    }

    pub fn table(csv: impl Into<String>, page: u32, source: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Table,
            text: csv.into(),
            image_payload: None,
            page,
            source: source.into(),
        }
    }

    /// `png` is the encoded raster of the image region.
    pub fn image(ocr_text: impl Into<String>, png: Vec<u8>, page: u32, source: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Image,
            text: ocr_text.into(),
            image_payload: Some(png),
            page,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn text_content(&self) -> &str {
        &self.text
    }

    pub fn image_payload(&self) -> Option<&[u8]> {
        self.image_payload.as_deref()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn into_parts(self) -> (ContentKind, String, Option<Vec<u8>>, u32, String) {
        (self.kind, self.text, self.image_payload, self.page, self.source)
    }
}

/// Embeddable text plus the provenance it will carry into the metadata file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub kind: ContentKind,
    pub page: u32,
    pub source: String,
    pub image_payload: Option<Vec<u8>>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub page: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_image: bool,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, rename = "image_b64", skip_serializing_if = "Option::is_none")]
    pub image_payload: Option<Vec<u8>>,
}

impl MetadataRecord {
    pub fn from_chunk(id: u64, chunk: Chunk) -> Self {
        Self {
            id,
            kind: chunk.kind,
            page: chunk.page,
            source: chunk.source,
            has_image: chunk.image_payload.is_some(),
            image_payload: chunk.image_payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub score: f32,
    pub meta: MetadataRecord,
    pub text_snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedUnit {
    pub source: String,
    pub page: u32,
    pub kind: ContentKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub units: Vec<ContentUnit>,
    pub skipped: Vec<SkippedUnit>,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub image_dpi: f32,
    /// Horizontal gap, in multiples of the font size, that separates two table cells.
    pub table_cell_gap: f32,
    pub table_min_rows: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_500,
            image_dpi: 150.0,
            table_cell_gap: 1.5,
            table_min_rows: 2,
        }
    }
}
