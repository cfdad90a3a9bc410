//! Minimal content-stream interpreter: positioned text runs and image placements.
//!
//! Glyph widths are estimated from the font size, and strings are decoded as
//! PDFDocEncoding or UTF-16BE. That is enough to line text up into rows and
//! columns, not to reproduce the page text exactly.

use crate::error::IngestError;
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

const DEFAULT_FONT_SIZE: f32 = 10.0;
const GLYPH_WIDTH_EM: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let clipped = Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        (clipped.width() > 0.0 && clipped.height() > 0.0).then_some(clipped)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub end_x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub name: Vec<u8>,
    pub region: Rect,
}

#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub runs: Vec<TextRun>,
    pub images: Vec<ImagePlacement>,
}

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(left: &Matrix, right: &Matrix) -> Matrix {
    [
        left[0] * right[0] + left[1] * right[2],
        left[0] * right[1] + left[1] * right[3],
        left[2] * right[0] + left[3] * right[2],
        left[2] * right[1] + left[3] * right[3],
        left[4] * right[0] + left[5] * right[2] + right[4],
        left[4] * right[1] + left[5] * right[3] + right[5],
    ]
}

fn apply(matrix: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (
        matrix[0] * x + matrix[2] * y + matrix[4],
        matrix[1] * x + matrix[3] * y + matrix[5],
    )
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0f32; N];
    for (slot, operand) in out.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(out)
}

/// Decodes a PDF string operand. UTF-16BE with BOM is honoured; anything else
/// is read byte-per-char.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&byte| byte as char).collect()
}

struct TextState {
    ctm: Matrix,
    stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    leading: f32,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: IDENTITY,
            stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            font_size: 0.0,
            leading: 0.0,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn show(&mut self, text: &str, runs: &mut Vec<TextRun>) {
        let font_size = if self.font_size > 0.0 {
            self.font_size
        } else {
            DEFAULT_FONT_SIZE
        };
        let advance = text.chars().count() as f32 * font_size * GLYPH_WIDTH_EM;

        let device = multiply(&self.tm, &self.ctm);
        let (x, y) = apply(&device, 0.0, 0.0);
        let (end_x, _) = apply(&device, advance, 0.0);
        let scale = (device[2] * device[2] + device[3] * device[3]).sqrt();

        if !text.trim().is_empty() {
            runs.push(TextRun {
                x,
                end_x: end_x.max(x),
                y,
                font_size: font_size * if scale > 0.0 { scale } else { 1.0 },
                text: text.to_string(),
            });
        }

        self.kern(advance);
    }

    fn kern(&mut self, advance: f32) {
        self.tm = multiply(&translate(advance, 0.0), &self.tm);
    }
}

/// Interprets decoded content-stream operations.
pub fn interpret(content: &Content) -> PageLayout {
    let mut layout = PageLayout::default();
    let mut state = TextState::new();

    for operation in &content.operations {
        let operands = operation.operands.as_slice();
        match operation.operator.as_str() {
            "q" => state.stack.push(state.ctm),
            "Q" => {
                if let Some(ctm) = state.stack.pop() {
                    state.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(matrix) = numbers::<6>(operands) {
                    state.ctm = multiply(&matrix, &state.ctm);
                }
            }
            "BT" => {
                state.tm = IDENTITY;
                state.tlm = IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size.abs();
                }
            }
            "TL" => {
                if let Some([leading]) = numbers::<1>(operands) {
                    state.leading = leading;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    state.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    state.leading = -ty;
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(matrix) = numbers::<6>(operands) {
                    state.tlm = matrix;
                    state.tm = matrix;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    state.show(&decode_pdf_string(bytes), &mut layout.runs);
                }
            }
            "'" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    state.show(&decode_pdf_string(bytes), &mut layout.runs);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    state.show(&decode_pdf_string(bytes), &mut layout.runs);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => {
                                state.show(&decode_pdf_string(bytes), &mut layout.runs)
                            }
                            other => {
                                if let Some(adjust) = number(other) {
                                    let size = if state.font_size > 0.0 {
                                        state.font_size
                                    } else {
                                        DEFAULT_FONT_SIZE
                                    };
                                    state.kern(-adjust / 1000.0 * size);
                                }
                            }
                        }
                    }
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
                        .map(|(x, y)| apply(&state.ctm, x, y));
                    let xs = corners.map(|corner| corner.0);
                    let ys = corners.map(|corner| corner.1);
                    let fold_min = |values: [f32; 4]| values.into_iter().fold(f32::INFINITY, f32::min);
                    let fold_max =
                        |values: [f32; 4]| values.into_iter().fold(f32::NEG_INFINITY, f32::max);
                    layout.images.push(ImagePlacement {
                        name: name.clone(),
                        region: Rect::new(fold_min(xs), fold_min(ys), fold_max(xs), fold_max(ys)),
                    });
                }
            }
            _ => {}
        }
    }

    layout
}

/// Decodes and interprets the content streams of one page.
pub fn page_layout(document: &Document, page_id: ObjectId) -> Result<PageLayout, IngestError> {
    let bytes = document.get_page_content(page_id)?;
    let content = Content::decode(&bytes)?;
    Ok(interpret(&content))
}

/// Follows an indirect reference, if `object` is one.
pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> Result<&'a Object, IngestError> {
    match object {
        Object::Reference(id) => Ok(document.get_object(*id)?),
        other => Ok(other),
    }
}

/// Looks `key` up on the page dictionary, walking `/Parent` for inherited attributes.
pub fn inherited_attribute<'a>(
    document: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, IngestError> {
    let mut current = document.get_dictionary(page_id)?;
    // Page trees deeper than this are malformed or cyclic.
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return Ok(Some(resolve(document, value)?));
        }
        match current.get(b"Parent") {
            Ok(parent) => current = resolve(document, parent)?.as_dict()?,
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

/// The page's MediaBox, defaulting to US Letter.
pub fn media_box(document: &Document, page_id: ObjectId) -> Rect {
    let letter = Rect::new(0.0, 0.0, 612.0, 792.0);
    match inherited_attribute(document, page_id, b"MediaBox") {
        Ok(Some(Object::Array(values))) if values.len() == 4 => {
            let resolved: Vec<f32> = values
                .iter()
                .filter_map(|value| resolve(document, value).ok().and_then(number))
                .collect();
            if resolved.len() == 4 {
                Rect::new(resolved[0], resolved[1], resolved[2], resolved[3])
            } else {
                letter
            }
        }
        _ => letter,
    }
}
