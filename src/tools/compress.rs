//! Compress: shrink a PDF by re-encoding its JPEG images and tidying structure.
//!
//! | Tier     | JPEG images          | Metadata | Structure |
//! |----------|----------------------|----------|-----------|
//! | `low`    | re-encode at q=40    | stripped | optimised |
//! | `medium` | re-encode at q=65    | kept     | optimised |
//! | `high`   | untouched            | kept     | optimised |
//!
//! "Optimised" means: unreferenced objects dropped, empty streams dropped,
//! plain streams Flate-compressed, objects renumbered densely.
//!
//! Only `DCTDecode` images in `DeviceRGB` or `DeviceGray` are re-encoded;
//! other colour spaces would come back from the decoder converted and no
//! longer match their dictionary. A re-encode that comes out larger than the
//! original is discarded.

use super::{load_structural, save_structural};
use crate::config::CompressionQuality;
use crate::error::ToolError;
use crate::intake::StoredInput;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use lopdf::{Document, Object, Stream};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const OUTPUT_NAME: &str = "compressed.pdf";

/// Summary of one compression run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionReport {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub images_reencoded: usize,
}

impl CompressionReport {
    /// Size reduction in percent (negative if the file grew).
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_bytes as f64 / self.original_bytes as f64) * 100.0
    }
}

/// Compress `input` into `<work_dir>/compressed.pdf`.
pub fn compress(
    input: &StoredInput,
    quality: CompressionQuality,
    work_dir: &Path,
) -> Result<(PathBuf, CompressionReport), ToolError> {
    let original_bytes = std::fs::metadata(&input.path)
        .map_err(|e| ToolError::io(&input.path, e))?
        .len();
    let mut doc = load_structural(input)?;

    let images_reencoded = match quality.jpeg_quality() {
        Some(q) => reencode_jpegs(&mut doc, q),
        None => 0,
    };
    if quality.strips_metadata() {
        strip_metadata(&mut doc);
    }

    doc.prune_objects();
    doc.delete_zero_length_streams();
    doc.renumber_objects();
    doc.compress();

    let out = work_dir.join(OUTPUT_NAME);
    save_structural(&mut doc, &out)?;

    let compressed_bytes = std::fs::metadata(&out)
        .map_err(|e| ToolError::io(&out, e))?
        .len();
    let report = CompressionReport {
        original_bytes,
        compressed_bytes,
        images_reencoded,
    };
    info!(
        "Compressed {} → {} bytes ({:.1}% reduction, quality={:?}, {} images re-encoded)",
        original_bytes,
        compressed_bytes,
        report.reduction_percent(),
        quality,
        images_reencoded
    );
    Ok((out, report))
}

/// Re-encode eligible JPEG image streams at `quality`. Returns how many shrank.
fn reencode_jpegs(doc: &mut Document, quality: u8) -> usize {
    let mut replaced = 0;
    for (id, object) in doc.objects.iter_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        let Some(gray) = eligible_jpeg(stream) else {
            continue;
        };
        match reencode(&stream.content, gray, quality) {
            Some(smaller) if smaller.len() < stream.content.len() => {
                debug!(
                    "Image {:?}: {} → {} bytes",
                    id,
                    stream.content.len(),
                    smaller.len()
                );
                stream.set_content(smaller);
                replaced += 1;
            }
            _ => {}
        }
    }
    replaced
}

/// `Some(is_gray)` when the stream is an 8-bit DCT image we can safely redo.
fn eligible_jpeg(stream: &Stream) -> Option<bool> {
    let dict = &stream.dict;
    if dict.get(b"Subtype").and_then(Object::as_name).ok()? != b"Image" {
        return None;
    }
    let is_dct = match dict.get(b"Filter").ok()? {
        Object::Name(name) => name == b"DCTDecode",
        Object::Array(filters) => {
            filters.len() == 1 && matches!(&filters[0], Object::Name(n) if n == b"DCTDecode")
        }
        _ => false,
    };
    if !is_dct || dict.get(b"Decode").is_ok() {
        return None;
    }
    if let Ok(bpc) = dict.get(b"BitsPerComponent").and_then(Object::as_i64) {
        if bpc != 8 {
            return None;
        }
    }
    match dict.get(b"ColorSpace").and_then(Object::as_name).ok()? {
        b"DeviceRGB" => Some(false),
        b"DeviceGray" => Some(true),
        _ => None,
    }
}

fn reencode(jpeg: &[u8], gray: bool, quality: u8) -> Option<Vec<u8>> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).ok()?;
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        if gray {
            encoder.encode_image(&img.to_luma8()).ok()?;
        } else {
            encoder.encode_image(&img.to_rgb8()).ok()?;
        }
    }
    Some(out)
}

/// Drop the document info dictionary and the catalog's XMP stream.
fn strip_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");
    let catalog_id = doc.trailer.get(b"Root").and_then(Object::as_reference);
    if let Ok(id) = catalog_id {
        if let Ok(catalog) = doc.get_object_mut(id).and_then(Object::as_dict_mut) {
            catalog.remove(b"Metadata");
        }
    }
}
