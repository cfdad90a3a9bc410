//! Builds small PDFs for tests.

use crate::layout::Rect;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;

pub struct FixturePage {
    /// `(x, y, text)` drawn in 12pt Courier.
    pub lines: Vec<(f32, f32, String)>,
    /// Regions painted with a small solid RGB image.
    pub images: Vec<Rect>,
}

impl FixturePage {
    pub fn text(text: &str) -> Self {
        Self {
            lines: vec![(72.0, 720.0, text.to_string())],
            images: Vec::new(),
        }
    }

    pub fn blank() -> Self {
        Self {
            lines: Vec::new(),
            images: Vec::new(),
        }
    }
}

pub fn write_pdf(path: &Path, pages: &[FixturePage]) -> Result<(), Box<dyn std::error::Error>> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut kids = Vec::new();
    for page in pages {
        let mut operations = Vec::new();
        for (x, y, text) in &page.lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![Object::Real((*x).into()), Object::Real((*y).into())]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text.as_str())]));
            operations.push(Operation::new("ET", vec![]));
        }

        let mut xobjects = lopdf::Dictionary::new();
        for (index, region) in page.images.iter().enumerate() {
            let name = format!("Im{index}");
            let image_id = document.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 4,
                    "Height" => 4,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                [90u8, 120, 200].repeat(16),
            ));
            xobjects.set(name.as_bytes().to_vec(), image_id);

            operations.push(Operation::new("q", vec![]));
            operations.push(Operation::new(
                "cm",
                [region.width(), 0.0, 0.0, region.height(), region.x0, region.y0]
                    .into_iter()
                    .map(|value| Object::Real(value.into()))
                    .collect(),
            ));
            operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
            operations.push(Operation::new("Q", vec![]));
        }

        let content = Content { operations };
        let content_id = document.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => xobjects,
            },
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );

    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);
    document.save(path)?;
    Ok(())
}
