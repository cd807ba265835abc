//! Image set → PDF.
//!
//! Every image becomes one page holding a single JPEG image XObject. Images
//! are first normalised to 8-bit RGB; anything with an alpha channel is
//! composited onto white so transparent regions print as paper, not black.
//!
//! Page geometry depends on [`PageSize`]:
//!
//! * `Fit`: the page is the image, sized at the configured DPI.
//! * `A4` / `Letter`: a landscape canvas at the configured DPI, flipped to
//!   portrait for portrait images. The image is scaled up or down to fill
//!   the box inside a margin of 3 % of the shorter canvas side, then centred.

use super::checkpoint;
use crate::config::PageSize;
use crate::error::ToolError;
use crate::intake::StoredInput;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const OUTPUT_NAME: &str = "converted.pdf";

/// JPEG quality for embedded page images.
const PAGE_JPEG_QUALITY: u8 = 92;

/// Margin around the image on fixed-size canvases, as a fraction of the
/// shorter canvas side.
const MARGIN_RATIO: f64 = 0.03;

/// Convert `inputs` (in order) into `<work_dir>/converted.pdf`.
pub fn images_to_pdf(
    inputs: &[StoredInput],
    page_size: PageSize,
    dpi: u32,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(inputs.len());

    for input in inputs {
        checkpoint(cancel)?;
        let img = decode(input)?;
        let page = layout(flatten_to_rgb(img), page_size, dpi);
        kids.push(add_image_page(&mut doc, pages_id, &page, dpi)?.into());
        debug!(
            "Added '{}' as {}x{} px page",
            input.original_name,
            page.width(),
            page.height()
        );
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => inputs.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    checkpoint(cancel)?;
    let out = work_dir.join(OUTPUT_NAME);
    super::save_structural(&mut doc, &out)?;
    info!("Converted {} images to PDF ({:?})", inputs.len(), page_size);
    Ok(out)
}

fn decode(input: &StoredInput) -> Result<DynamicImage, ToolError> {
    let unreadable = |detail: String| ToolError::UnreadableImage {
        name: input.original_name.clone(),
        detail,
    };
    ImageReader::open(&input.path)
        .map_err(|e| ToolError::io(&input.path, e))?
        .with_guessed_format()
        .map_err(|e| ToolError::io(&input.path, e))?
        .decode()
        .map_err(|e| unreadable(e.to_string()))
}

/// Normalise to RGB8, compositing alpha onto white.
pub fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Canvas size in pixels for a fixed page, oriented to match the image.
pub fn canvas_px(page_size: PageSize, dpi: u32, image_w: u32, image_h: u32) -> Option<(u32, u32)> {
    let (w_mm, h_mm) = page_size.landscape_mm()?;
    let px_per_mm = dpi as f64 / 25.4;
    let to_px = |mm: f64| (mm * px_per_mm) as u32;
    let (w, h) = (to_px(w_mm), to_px(h_mm));
    if image_w < image_h {
        Some((h, w))
    } else {
        Some((w, h))
    }
}

/// Place the image on its page canvas.
pub fn layout(img: RgbImage, page_size: PageSize, dpi: u32) -> RgbImage {
    let Some((cw, ch)) = canvas_px(page_size, dpi, img.width(), img.height()) else {
        return img;
    };

    let margin = (cw.min(ch) as f64 * MARGIN_RATIO) as u32;
    let avail_w = cw.saturating_sub(2 * margin).max(1);
    let avail_h = ch.saturating_sub(2 * margin).max(1);

    let scale = (avail_w as f64 / img.width() as f64).min(avail_h as f64 / img.height() as f64);
    let nw = ((img.width() as f64 * scale) as u32).clamp(1, avail_w);
    let nh = ((img.height() as f64 * scale) as u32).clamp(1, avail_h);
    let fitted = if (nw, nh) != img.dimensions() {
        imageops::resize(&img, nw, nh, FilterType::Lanczos3)
    } else {
        img
    };

    let mut canvas = RgbImage::from_pixel(cw, ch, Rgb([255, 255, 255]));
    let x = (cw - fitted.width()) / 2;
    let y = (ch - fitted.height()) / 2;
    imageops::overlay(&mut canvas, &fitted, x as i64, y as i64);
    canvas
}

fn add_image_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    page: &RgbImage,
    dpi: u32,
) -> Result<lopdf::ObjectId, ToolError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, PAGE_JPEG_QUALITY)
        .encode_image(page)
        .map_err(|e| ToolError::Internal(format!("JPEG encode failed: {e}")))?;

    let mut image_stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => page.width() as i64,
            "Height" => page.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    );
    image_stream.allows_compression = false;
    let image_id = doc.add_object(image_stream);

    let to_pt = |px: u32| px as f32 * 72.0 / dpi as f32;
    let (w_pt, h_pt) = (to_pt(page.width()), to_pt(page.height()));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![w_pt.into(), 0.into(), 0.into(), h_pt.into(), 0.into(), 0.into()],
            ),
            Operation::new("Do", vec!["Im0".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| ToolError::Internal(format!("content stream encode failed: {e}")))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), w_pt.into(), h_pt.into()],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn save_png(dir: &Path, name: &str, img: DynamicImage) -> StoredInput {
        let path = dir.join(name);
        img.save(&path).unwrap();
        StoredInput {
            path,
            original_name: name.to_string(),
        }
    }

    #[test]
    fn transparent_pixels_become_white() {
        let mut rgba = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let rgb = flatten_to_rgb(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(rgb.get_pixel(1, 0).0, [10, 20, 30]);
    }

    #[test]
    fn a4_canvas_follows_orientation() {
        // 297 x 210 mm at 150 DPI, truncated
        assert_eq!(canvas_px(PageSize::A4, 150, 400, 300), Some((1753, 1240)));
        assert_eq!(canvas_px(PageSize::A4, 150, 300, 400), Some((1240, 1753)));
        assert_eq!(canvas_px(PageSize::Letter, 150, 400, 300), Some((1650, 1275)));
        assert_eq!(canvas_px(PageSize::Fit, 150, 300, 400), None);
    }

    #[test]
    fn layout_fits_inside_margin_and_centres() {
        let img = RgbImage::from_pixel(4000, 1000, Rgb([0, 0, 0]));
        let page = layout(img, PageSize::Letter, 150);
        let (cw, ch) = (page.width(), page.height());
        assert!(cw > ch, "wide image keeps landscape canvas");
        let margin = (ch as f64 * MARGIN_RATIO) as u32;
        // left edge inside the margin is white, centre is the image
        assert_eq!(page.get_pixel(margin - 1, ch / 2).0, [255, 255, 255]);
        assert_eq!(page.get_pixel(cw / 2, ch / 2).0, [0, 0, 0]);
        assert_eq!(page.get_pixel(cw / 2, 0).0, [255, 255, 255]);
    }

    #[test]
    fn small_images_are_enlarged_to_the_margin_box() {
        let img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let page = layout(img, PageSize::A4, 150);
        assert_eq!(page.dimensions(), (1753, 1240));

        // margin 37 px, box 1679 x 1166, so the square is 1166 px centred
        let dark: Vec<(u32, u32)> = page
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] < 128)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(dark.len(), 1166 * 1166);
        assert_eq!(dark.first(), Some(&(293, 37)));
        assert_eq!(dark.last(), Some(&(293 + 1165, 37 + 1165)));
    }

    #[test]
    fn builds_one_page_per_image_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = save_png(
            dir.path(),
            "a.png",
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(300, 150, Rgba([255, 0, 0, 128]))),
        );
        let b = save_png(
            dir.path(),
            "b.png",
            DynamicImage::ImageRgb8(RgbImage::from_pixel(150, 300, Rgb([0, 0, 255]))),
        );

        let out = images_to_pdf(&[a, b], PageSize::Fit, 150, dir.path(), &CancellationToken::new()).unwrap();

        let widths = crate::tools::testutil::page_widths(&out);
        // 300 px and 150 px at 150 DPI
        assert_eq!(widths, vec![144, 72]);
    }

    #[test]
    fn undecodable_image_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.png");
        std::fs::write(&path, b"not an image").unwrap();
        let input = StoredInput {
            path,
            original_name: "photo.png".into(),
        };

        let err = images_to_pdf(&[input], PageSize::Fit, 150, dir.path(), &CancellationToken::new()).unwrap_err();

        assert!(matches!(err, ToolError::UnreadableImage { .. }));
        assert_eq!(err.status(), 422);
    }
}
