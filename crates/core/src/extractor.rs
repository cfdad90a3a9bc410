use crate::error::IngestError;
use crate::images::{decode_image_xobject, encode_png, rasterize};
use crate::layout::{self, inherited_attribute, media_box, resolve, ImagePlacement, Rect};
use crate::models::{ContentKind, ContentUnit, ExtractionReport, IngestionOptions, SkippedUnit};
use crate::ocr::OcrEngine;
use crate::tables::{detect_tables, table_to_csv};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;
use tracing::{debug, warn};

pub trait PdfExtractor {
    /// Extracts every page of `path`. Only a file that cannot be opened as a
    /// PDF is an error; per-unit failures land in [`ExtractionReport::skipped`].
    fn extract(&self, path: &Path) -> Result<ExtractionReport, IngestError>;
}

pub struct LopdfExtractor {
    ocr: Box<dyn OcrEngine + Send + Sync>,
    image_dpi: f32,
    table_cell_gap: f32,
    table_min_rows: usize,
}

impl LopdfExtractor {
    pub fn new(options: &IngestionOptions, ocr: Box<dyn OcrEngine + Send + Sync>) -> Self {
        Self {
            ocr,
            image_dpi: options.image_dpi,
            table_cell_gap: options.table_cell_gap,
            table_min_rows: options.table_min_rows,
        }
    }

    fn extract_page(
        &self,
        document: &Document,
        page: u32,
        page_id: ObjectId,
        source: &str,
        report: &mut ExtractionReport,
    ) {
        match document.extract_text(&[page]) {
            Ok(text) if !text.trim().is_empty() => {
                report.units.push(ContentUnit::text(text, page, source));
            }
            Ok(_) => debug!(source, page, "page has no extractable text"),
            Err(error) => skip(report, source, page, ContentKind::Text, error.to_string()),
        }

        let layout = match layout::page_layout(document, page_id) {
            Ok(layout) => layout,
            Err(error) => {
                let reason = format!("content stream unreadable: {error}");
                skip(report, source, page, ContentKind::Table, reason.clone());
                skip(report, source, page, ContentKind::Image, reason);
                return;
            }
        };

        match detect_tables(&layout.runs, self.table_cell_gap, self.table_min_rows) {
            Ok(tables) => {
                for table in tables {
                    match table_to_csv(&table) {
                        Ok(csv) => report.units.push(ContentUnit::table(csv, page, source)),
                        Err(error) => skip(report, source, page, ContentKind::Table, error.to_string()),
                    }
                }
            }
            Err(error) => skip(report, source, page, ContentKind::Table, error.to_string()),
        }

        if layout.images.is_empty() {
            return;
        }

        let xobjects = match page_xobjects(document, page_id) {
            Ok(xobjects) => xobjects,
            Err(error) => {
                skip(report, source, page, ContentKind::Image, error.to_string());
                return;
            }
        };
        let page_box = media_box(document, page_id);

        for placement in &layout.images {
            match self.extract_image(document, xobjects, placement, page_box, page, source) {
                Ok(Some(unit)) => report.units.push(unit),
                Ok(None) => {}
                Err(error) => skip(
                    report,
                    source,
                    page,
                    ContentKind::Image,
                    format!("{}: {error}", String::from_utf8_lossy(&placement.name)),
                ),
            }
        }
    }

    fn extract_image(
        &self,
        document: &Document,
        xobjects: Option<&Dictionary>,
        placement: &ImagePlacement,
        page_box: Rect,
        page: u32,
        source: &str,
    ) -> Result<Option<ContentUnit>, IngestError> {
        let xobjects = xobjects
            .ok_or_else(|| IngestError::PdfParse("page has no /XObject resources".to_string()))?;
        let stream = resolve(document, xobjects.get(&placement.name)?)?.as_stream()?;

        let is_image = matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image");
        if !is_image {
            return Ok(None);
        }

        let decoded = decode_image_xobject(document, stream)?;
        let raster = rasterize(&decoded, placement.region, page_box, self.image_dpi)?;
        let png = encode_png(&raster)?;

        let text = match self.ocr.recognize(&png) {
            Ok(text) => text,
            Err(error) => {
                warn!(source, page, reason = %error, "ocr failed, keeping image without text");
                String::new()
            }
        };

        Ok(Some(ContentUnit::image(text, png, page, source)))
    }
}

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractionReport, IngestError> {
        let source = source_name(path)?;
        let document = Document::load(path)?;

        let mut report = ExtractionReport::default();
        for (page, page_id) in document.get_pages() {
            self.extract_page(&document, page, page_id, &source, &mut report);
        }

        debug!(
            source = %source,
            units = report.units.len(),
            skipped = report.skipped.len(),
            "extracted document"
        );
        Ok(report)
    }
}

/// File name used as the `source` of every unit.
pub fn source_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(format!("path missing filename: {}", path.display())))
}

fn page_xobjects(document: &Document, page_id: ObjectId) -> Result<Option<&Dictionary>, IngestError> {
    let resources = match inherited_attribute(document, page_id, b"Resources")? {
        Some(resources) => resources.as_dict()?,
        None => return Ok(None),
    };

    match resources.get(b"XObject") {
        Ok(xobjects) => Ok(Some(resolve(document, xobjects)?.as_dict()?)),
        Err(_) => Ok(None),
    }
}

fn skip(report: &mut ExtractionReport, source: &str, page: u32, kind: ContentKind, reason: String) {
    warn!(source, page, kind = kind.as_str(), reason = %reason, "skipped content unit");
    report.skipped.push(SkippedUnit {
        source: source.to_string(),
        page,
        kind,
        reason,
    });
}
