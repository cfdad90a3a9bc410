use crate::error::IngestError;
use crate::layout::{resolve, Rect};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Document, Object, Stream};
use std::io::Cursor;

const POINTS_PER_INCH: f32 = 72.0;
const MAX_RASTER_SIDE: u32 = 10_000;

/// Decodes an image XObject into pixels.
///
/// Handles DCT (JPEG), Flate/LZW and unfiltered samples in DeviceGray,
/// DeviceRGB, DeviceCMYK or ICC-based spaces, at 8 bits per component or
/// 1-bit gray. Everything else is reported as unsupported.
pub fn decode_image_xobject(document: &Document, stream: &Stream) -> Result<DynamicImage, IngestError> {
    let filters = stream_filters(document, stream)?;

    if filters.iter().any(|filter| filter == b"DCTDecode") {
        if filters.len() != 1 {
            return Err(IngestError::UnsupportedImage(
                "DCTDecode chained with other filters".to_string(),
            ));
        }
        return Ok(image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)?);
    }

    if let Some(filter) = filters
        .iter()
        .find(|filter| !matches!(filter.as_slice(), b"FlateDecode" | b"LZWDecode"))
    {
        return Err(IngestError::UnsupportedImage(format!(
            "filter {}",
            String::from_utf8_lossy(filter)
        )));
    }

    let samples = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream.decompressed_content()?
    };

    let width = dimension(&stream.dict, b"Width")?;
    let height = dimension(&stream.dict, b"Height")?;
    let image_mask = matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
    let bits = if image_mask {
        1
    } else {
        stream
            .dict
            .get(b"BitsPerComponent")
            .and_then(Object::as_i64)
            .unwrap_or(8)
    };
    let components = if image_mask {
        1
    } else {
        color_components(document, stream)?
    };

    match (bits, components) {
        (8, 1) => GrayImage::from_raw(width, height, take_samples(samples, width, height, 1)?)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| IngestError::UnsupportedImage("gray buffer size".to_string())),
        (8, 3) => RgbImage::from_raw(width, height, take_samples(samples, width, height, 3)?)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| IngestError::UnsupportedImage("rgb buffer size".to_string())),
        (8, 4) => {
            let cmyk = take_samples(samples, width, height, 4)?;
            RgbImage::from_raw(width, height, cmyk_to_rgb(&cmyk))
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| IngestError::UnsupportedImage("cmyk buffer size".to_string()))
        }
        (1, 1) => GrayImage::from_raw(width, height, expand_bits(&samples, width, height)?)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| IngestError::UnsupportedImage("bitmap buffer size".to_string())),
        (bits, components) => Err(IngestError::UnsupportedImage(format!(
            "{bits} bits per component with {components} components"
        ))),
    }
}

/// Crops `image`, which is painted over `region`, to the part inside `page`
/// and resamples it to the region's size at `dpi`.
pub fn rasterize(image: &DynamicImage, region: Rect, page: Rect, dpi: f32) -> Result<DynamicImage, IngestError> {
    let visible = region
        .intersect(&page)
        .ok_or_else(|| IngestError::UnsupportedImage("image region lies outside the page".to_string()))?;

    let (source_w, source_h) = (image.width() as f32, image.height() as f32);
    let crop_x = ((visible.x0 - region.x0) / region.width() * source_w).floor().max(0.0) as u32;
    let crop_y = ((region.y1 - visible.y1) / region.height() * source_h).floor().max(0.0) as u32;
    let crop_w = ((visible.width() / region.width()) * source_w).ceil().max(1.0) as u32;
    let crop_h = ((visible.height() / region.height()) * source_h).ceil().max(1.0) as u32;
    let cropped = image.crop_imm(
        crop_x.min(image.width().saturating_sub(1)),
        crop_y.min(image.height().saturating_sub(1)),
        crop_w,
        crop_h,
    );

    let scale = dpi / POINTS_PER_INCH;
    let target_w = (visible.width() * scale).round().max(1.0) as u32;
    let target_h = (visible.height() * scale).round().max(1.0) as u32;
    if target_w > MAX_RASTER_SIDE || target_h > MAX_RASTER_SIDE {
        return Err(IngestError::UnsupportedImage(format!(
            "raster of {target_w}x{target_h} px is too large"
        )));
    }

    Ok(cropped.resize_exact(target_w, target_h, FilterType::Triangle))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, IngestError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn stream_filters(document: &Document, stream: &Stream) -> Result<Vec<Vec<u8>>, IngestError> {
    let filter = match stream.dict.get(b"Filter") {
        Ok(filter) => resolve(document, filter)?,
        Err(_) => return Ok(Vec::new()),
    };

    match filter {
        Object::Name(name) => Ok(vec![name.clone()]),
        Object::Array(items) => Ok(items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect()),
        _ => Err(IngestError::UnsupportedImage("malformed /Filter".to_string())),
    }
}

fn dimension(dict: &lopdf::Dictionary, key: &[u8]) -> Result<u32, IngestError> {
    let value = dict.get(key).and_then(Object::as_i64)?;
    u32::try_from(value)
        .ok()
        .filter(|value| *value > 0 && *value <= MAX_RASTER_SIDE * 4)
        .ok_or_else(|| {
            IngestError::UnsupportedImage(format!(
                "{} of {value}",
                String::from_utf8_lossy(key)
            ))
        })
}

fn color_components(document: &Document, stream: &Stream) -> Result<u32, IngestError> {
    let space = match stream.dict.get(b"ColorSpace") {
        Ok(space) => resolve(document, space)?,
        Err(_) => return Err(IngestError::UnsupportedImage("missing /ColorSpace".to_string())),
    };

    match space {
        Object::Name(name) => named_components(name),
        Object::Array(items) => match items.first() {
            Some(Object::Name(family)) if family == b"ICCBased" => {
                let profile = items
                    .get(1)
                    .ok_or_else(|| IngestError::UnsupportedImage("ICCBased without profile".to_string()))?;
                let profile = resolve(document, profile)?.as_stream()?;
                let n = profile.dict.get(b"N").and_then(Object::as_i64)?;
                u32::try_from(n)
                    .map_err(|_| IngestError::UnsupportedImage(format!("ICC component count {n}")))
            }
            Some(Object::Name(family)) => named_components(family),
            _ => Err(IngestError::UnsupportedImage("malformed /ColorSpace".to_string())),
        },
        _ => Err(IngestError::UnsupportedImage("malformed /ColorSpace".to_string())),
    }
}

fn named_components(name: &[u8]) -> Result<u32, IngestError> {
    match name {
        b"DeviceGray" | b"CalGray" => Ok(1),
        b"DeviceRGB" | b"CalRGB" => Ok(3),
        b"DeviceCMYK" => Ok(4),
        other => Err(IngestError::UnsupportedImage(format!(
            "color space {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn take_samples(mut samples: Vec<u8>, width: u32, height: u32, components: u32) -> Result<Vec<u8>, IngestError> {
    let needed = width as usize * height as usize * components as usize;
    if samples.len() < needed {
        return Err(IngestError::UnsupportedImage(format!(
            "expected {needed} sample bytes, found {}",
            samples.len()
        )));
    }
    samples.truncate(needed);
    Ok(samples)
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|pixel| {
            let k = pixel[3] as u16;
            let channel = |value: u8| 255u16.saturating_sub((value as u16 + k).min(255)) as u8;
            [channel(pixel[0]), channel(pixel[1]), channel(pixel[2])]
        })
        .collect()
}

/// Unpacks 1-bit rows. A set bit is white, both for gray bitmaps and for
/// stencil masks painted in black.
fn expand_bits(samples: &[u8], width: u32, height: u32) -> Result<Vec<u8>, IngestError> {
    let row_bytes = (width as usize + 7) / 8;
    if samples.len() < row_bytes * height as usize {
        return Err(IngestError::UnsupportedImage("short 1-bit image data".to_string()));
    }

    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for row in samples.chunks_exact(row_bytes).take(height as usize) {
        for x in 0..width as usize {
            let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
            pixels.push(if bit == 1 { 255 } else { 0 });
        }
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn rgb_stream(width: i64, height: i64, pixel: [u8; 3]) -> Stream {
        let samples = pixel.repeat((width * height) as usize);
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            samples,
        )
    }

    #[test]
    fn raw_rgb_samples_decode() -> Result<(), IngestError> {
        let document = Document::with_version("1.5");
        let image = decode_image_xobject(&document, &rgb_stream(4, 2, [200, 10, 10]))?;

        assert_eq!((image.width(), image.height()), (4, 2));
        assert_eq!(image.to_rgb8().get_pixel(3, 1).0, [200, 10, 10]);
        Ok(())
    }

    #[test]
    fn unsupported_filter_is_reported() {
        let document = Document::with_version("1.5");
        let mut stream = rgb_stream(2, 2, [0, 0, 0]);
        stream.dict.set("Filter", "JBIG2Decode");

        assert!(matches!(
            decode_image_xobject(&document, &stream),
            Err(IngestError::UnsupportedImage(_))
        ));
    }

    #[test]
    fn rasterize_scales_to_150_dpi() -> Result<(), IngestError> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        let region = Rect::new(0.0, 0.0, 72.0, 36.0);
        let page = Rect::new(0.0, 0.0, 612.0, 792.0);

        let raster = rasterize(&image, region, page, 150.0)?;

        assert_eq!((raster.width(), raster.height()), (150, 75));
        Ok(())
    }

    #[test]
    fn rasterize_clips_to_page() -> Result<(), IngestError> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(20, 10));
        let region = Rect::new(-72.0, 0.0, 72.0, 72.0);
        let page = Rect::new(0.0, 0.0, 612.0, 792.0);

        let raster = rasterize(&image, region, page, 72.0)?;
        assert_eq!((raster.width(), raster.height()), (72, 72));

        let outside = Rect::new(700.0, 0.0, 800.0, 10.0);
        assert!(rasterize(&image, outside, page, 72.0).is_err());
        Ok(())
    }

    #[test]
    fn png_output_has_signature() -> Result<(), IngestError> {
        let png = encode_png(&DynamicImage::ImageLuma8(GrayImage::new(3, 3)))?;
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        Ok(())
    }

    #[test]
    fn one_bit_rows_are_padded_per_byte() -> Result<(), IngestError> {
        let pixels = expand_bits(&[0b1010_0000, 0b0100_0000], 3, 2)?;
        assert_eq!(pixels, vec![255, 0, 255, 0, 255, 0]);
        Ok(())
    }

    #[test]
    fn only_full_color_space_names_are_accepted() {
        assert!(matches!(named_components(b"DeviceCMYK"), Ok(4)));
        assert!(matches!(named_components(b"CalRGB"), Ok(3)));
        assert!(named_components(b"RGB").is_err());
        assert!(named_components(b"G").is_err());
    }

    #[test]
    fn cmyk_black_is_black() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 255, 0, 0, 0, 0]), vec![0, 0, 0, 255, 255, 255]);
    }
}
