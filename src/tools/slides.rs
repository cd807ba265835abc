//! PDF → PowerPoint: every page rendered as a picture on its own slide.
//!
//! Slides are 10 × 7.5 in. Each page image is scaled to the largest size that
//! fits the slide with its aspect ratio kept, then centred.
//!
//! The PPTX package is written part by part with the `zip` crate:
//!
//! ```text
//! [Content_Types].xml
//! _rels/.rels
//! ppt/presentation.xml                 + _rels
//! ppt/slideMasters/slideMaster1.xml    + _rels
//! ppt/slideLayouts/slideLayout1.xml    + _rels   (blank layout)
//! ppt/theme/theme1.xml
//! ppt/slides/slide{n}.xml              + _rels
//! ppt/media/image{n}.png
//! ```

use super::{checkpoint, pdfium};
use crate::error::ToolError;
use crate::intake::StoredInput;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const OUTPUT_NAME: &str = "converted.pptx";

/// English Metric Units per inch.
const EMU_PER_INCH: i64 = 914_400;
/// EMU per pixel at 96 DPI.
const EMU_PER_PX: i64 = 9525;
pub const SLIDE_WIDTH_EMU: i64 = 10 * EMU_PER_INCH;
pub const SLIDE_HEIGHT_EMU: i64 = EMU_PER_INCH * 15 / 2;

/// Picture frame on a slide, in EMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub cx: i64,
    pub cy: i64,
}

/// Largest aspect-preserving frame for a `width × height` px image, centred.
pub fn fit_on_slide(width: u32, height: u32) -> Placement {
    let img_w = width.max(1) as i64 * EMU_PER_PX;
    let img_h = height.max(1) as i64 * EMU_PER_PX;
    let ratio = (SLIDE_WIDTH_EMU as f64 / img_w as f64).min(SLIDE_HEIGHT_EMU as f64 / img_h as f64);
    let cx = (img_w as f64 * ratio) as i64;
    let cy = (img_h as f64 * ratio) as i64;
    Placement {
        x: (SLIDE_WIDTH_EMU - cx) / 2,
        y: (SLIDE_HEIGHT_EMU - cy) / 2,
        cx,
        cy,
    }
}

/// Render `input` at `dpi` and write `<work_dir>/converted.pptx`.
pub fn pdf_to_ppt(
    input: &StoredInput,
    dpi: u32,
    max_pixels: u32,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ToolError> {
    let pdfium = pdfium::bind()?;
    let document = pdfium::open(&pdfium, input, None)?;
    let pages = pdfium::render_all(&document, dpi, max_pixels, cancel)?;

    checkpoint(cancel)?;
    let out = work_dir.join(OUTPUT_NAME);
    write_pptx(&pages, &out)?;
    info!(
        "PPTX created from '{}' ({} slides)",
        input.original_name,
        pages.len()
    );
    Ok(out)
}

/// Write one picture slide per image.
pub fn write_pptx(pages: &[DynamicImage], out: &Path) -> Result<(), ToolError> {
    let zip_err = |e: zip::result::ZipError| ToolError::Internal(format!("PPTX write failed: {e}"));

    let file = File::create(out).map_err(|e| ToolError::io(out, e))?;
    let mut zip = ZipWriter::new(file);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let put = |zip: &mut ZipWriter<File>,
               name: &str,
               body: &[u8],
               opts: SimpleFileOptions|
     -> Result<(), ToolError> {
        zip.start_file(name, opts).map_err(zip_err)?;
        zip.write_all(body).map_err(|e| ToolError::io(out, e))
    };

    let n = pages.len();
    put(&mut zip, "[Content_Types].xml", content_types(n).as_bytes(), deflated)?;
    put(&mut zip, "_rels/.rels", ROOT_RELS.as_bytes(), deflated)?;
    put(&mut zip, "ppt/presentation.xml", presentation(n).as_bytes(), deflated)?;
    put(
        &mut zip,
        "ppt/_rels/presentation.xml.rels",
        presentation_rels(n).as_bytes(),
        deflated,
    )?;
    put(&mut zip, "ppt/slideMasters/slideMaster1.xml", SLIDE_MASTER.as_bytes(), deflated)?;
    put(
        &mut zip,
        "ppt/slideMasters/_rels/slideMaster1.xml.rels",
        SLIDE_MASTER_RELS.as_bytes(),
        deflated,
    )?;
    put(&mut zip, "ppt/slideLayouts/slideLayout1.xml", SLIDE_LAYOUT.as_bytes(), deflated)?;
    put(
        &mut zip,
        "ppt/slideLayouts/_rels/slideLayout1.xml.rels",
        SLIDE_LAYOUT_RELS.as_bytes(),
        deflated,
    )?;
    put(&mut zip, "ppt/theme/theme1.xml", THEME.as_bytes(), deflated)?;

    for (idx, page) in pages.iter().enumerate() {
        let no = idx + 1;
        let mut png = Vec::new();
        page.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ToolError::Internal(format!("PNG encode failed for slide {no}: {e}")))?;
        let place = fit_on_slide(page.width(), page.height());
        debug!("Slide {}: {}x{} px at {:?}", no, page.width(), page.height(), place);

        put(&mut zip, &format!("ppt/media/image{no}.png"), &png, stored)?;
        put(&mut zip, &format!("ppt/slides/slide{no}.xml"), slide(no, place).as_bytes(), deflated)?;
        put(
            &mut zip,
            &format!("ppt/slides/_rels/slide{no}.xml.rels"),
            slide_rels(no).as_bytes(),
            deflated,
        )?;
    }

    zip.finish().map_err(zip_err)?;
    Ok(())
}

// ── Package parts ────────────────────────────────────────────────────────────

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const NS_P: &str = "http://schemas.openxmlformats.org/presentationml/2006/main";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

fn content_types(slides: usize) -> String {
    let mut overrides = String::new();
    for no in 1..=slides {
        overrides.push_str(&format!(
            r#"<Override PartName="/ppt/slides/slide{no}.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slide+xml"/>"#
        ));
    }
    format!(
        r#"{XML_DECL}
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/ppt/presentation.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml"/><Override PartName="/ppt/slideMasters/slideMaster1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml"/><Override PartName="/ppt/slideLayouts/slideLayout1.xml" ContentType="application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml"/><Override PartName="/ppt/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/>{overrides}</Types>"#
    )
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="ppt/presentation.xml"/></Relationships>"#;

// rId1 is the master, slides start at rId2; the theme follows the slides.
fn presentation(slides: usize) -> String {
    let ids: String = (1..=slides)
        .map(|no| format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 255 + no, no + 1))
        .collect();
    format!(
        r#"{XML_DECL}
<p:presentation xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" saveSubsetFonts="1"><p:sldMasterIdLst><p:sldMasterId id="2147483648" r:id="rId1"/></p:sldMasterIdLst><p:sldIdLst>{ids}</p:sldIdLst><p:sldSz cx="{SLIDE_WIDTH_EMU}" cy="{SLIDE_HEIGHT_EMU}" type="screen4x3"/><p:notesSz cx="{SLIDE_HEIGHT_EMU}" cy="{SLIDE_WIDTH_EMU}"/></p:presentation>"#
    )
}

fn presentation_rels(slides: usize) -> String {
    let slide_rels: String = (1..=slides)
        .map(|no| {
            format!(
                r#"<Relationship Id="rId{}" Type="{NS_R}/slide" Target="slides/slide{no}.xml"/>"#,
                no + 1
            )
        })
        .collect();
    format!(
        r#"{XML_DECL}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{NS_R}/slideMaster" Target="slideMasters/slideMaster1.xml"/>{slide_rels}<Relationship Id="rId{}" Type="{NS_R}/theme" Target="theme/theme1.xml"/></Relationships>"#,
        slides + 2
    )
}

fn slide(no: usize, place: Placement) -> String {
    let Placement { x, y, cx, cy } = place;
    format!(
        r#"{XML_DECL}
<p:sld xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr><p:pic><p:nvPicPr><p:cNvPr id="2" name="Page {no}"/><p:cNvPicPr><a:picLocks noChangeAspect="1"/></p:cNvPicPr><p:nvPr/></p:nvPicPr><p:blipFill><a:blip r:embed="rId2"/><a:stretch><a:fillRect/></a:stretch></p:blipFill><p:spPr><a:xfrm><a:off x="{x}" y="{y}"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></p:spPr></p:pic></p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>"#
    )
}

fn slide_rels(no: usize) -> String {
    format!(
        r#"{XML_DECL}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{NS_R}/slideLayout" Target="../slideLayouts/slideLayout1.xml"/><Relationship Id="rId2" Type="{NS_R}/image" Target="../media/image{no}.png"/></Relationships>"#
    )
}

const EMPTY_TREE: &str = r#"<p:spTree><p:nvGrpSpPr><p:cNvPr id="1" name=""/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr><p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr></p:spTree>"#;

static SLIDE_MASTER: Lazy<String> = Lazy::new(|| {
    format!(
        r#"{XML_DECL}
<p:sldMaster xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}"><p:cSld><p:bg><p:bgRef idx="1001"><a:schemeClr val="bg1"/></p:bgRef></p:bg>{EMPTY_TREE}</p:cSld><p:clrMap bg1="lt1" tx1="dk1" bg2="lt2" tx2="dk2" accent1="accent1" accent2="accent2" accent3="accent3" accent4="accent4" accent5="accent5" accent6="accent6" hlink="hlink" folHlink="folHlink"/><p:sldLayoutIdLst><p:sldLayoutId id="2147483649" r:id="rId1"/></p:sldLayoutIdLst></p:sldMaster>"#
    )
});

const SLIDE_MASTER_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout" Target="../slideLayouts/slideLayout1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme" Target="../theme/theme1.xml"/></Relationships>"#;

static SLIDE_LAYOUT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"{XML_DECL}
<p:sldLayout xmlns:a="{NS_A}" xmlns:r="{NS_R}" xmlns:p="{NS_P}" type="blank" preserve="1"><p:cSld name="Blank">{EMPTY_TREE}</p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"#
    )
});

const SLIDE_LAYOUT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideMaster" Target="../slideMasters/slideMaster1.xml"/></Relationships>"#;

const THEME: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<a:theme xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" name="Office Theme"><a:themeElements><a:clrScheme name="Office"><a:dk1><a:sysClr val="windowText" lastClr="000000"/></a:dk1><a:lt1><a:sysClr val="window" lastClr="FFFFFF"/></a:lt1><a:dk2><a:srgbClr val="1F497D"/></a:dk2><a:lt2><a:srgbClr val="EEECE1"/></a:lt2><a:accent1><a:srgbClr val="4F81BD"/></a:accent1><a:accent2><a:srgbClr val="C0504D"/></a:accent2><a:accent3><a:srgbClr val="9BBB59"/></a:accent3><a:accent4><a:srgbClr val="8064A2"/></a:accent4><a:accent5><a:srgbClr val="4BACC6"/></a:accent5><a:accent6><a:srgbClr val="F79646"/></a:accent6><a:hlink><a:srgbClr val="0000FF"/></a:hlink><a:folHlink><a:srgbClr val="800080"/></a:folHlink></a:clrScheme><a:fontScheme name="Office"><a:majorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:majorFont><a:minorFont><a:latin typeface="Calibri"/><a:ea typeface=""/><a:cs typeface=""/></a:minorFont></a:fontScheme><a:fmtScheme name="Office"><a:fillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:fillStyleLst><a:lnStyleLst><a:ln w="9525"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="25400"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln><a:ln w="38100"><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:ln></a:lnStyleLst><a:effectStyleLst><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle><a:effectStyle><a:effectLst/></a:effectStyle></a:effectStyleLst><a:bgFillStyleLst><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill><a:solidFill><a:schemeClr val="phClr"/></a:solidFill></a:bgFillStyleLst></a:fmtScheme></a:themeElements><a:objectDefaults/><a:extraClrSchemeLst/></a:theme>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Read;

    #[test]
    fn slide_is_ten_by_seven_and_a_half_inches() {
        assert_eq!(SLIDE_WIDTH_EMU, 9_144_000);
        assert_eq!(SLIDE_HEIGHT_EMU, 6_858_000);
    }

    #[test]
    fn portrait_page_is_centred_horizontally() {
        // US Letter at 200 DPI
        let p = fit_on_slide(1700, 2200);
        assert_eq!(p.y, 0);
        assert_eq!(p.cy, SLIDE_HEIGHT_EMU);
        assert!(p.x > 0);
        assert!((p.x * 2 + p.cx - SLIDE_WIDTH_EMU).abs() <= 1);
        let aspect = p.cx as f64 / p.cy as f64;
        assert!((aspect - 1700.0 / 2200.0).abs() < 1e-3);
    }

    #[test]
    fn wide_page_is_centred_vertically() {
        let p = fit_on_slide(4000, 1000);
        assert_eq!(p.x, 0);
        assert_eq!(p.cx, SLIDE_WIDTH_EMU);
        assert!(p.y > 0);
    }

    #[test]
    fn package_has_one_slide_and_image_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("deck.pptx");
        let pages = vec![
            DynamicImage::ImageRgb8(RgbImage::new(170, 220)),
            DynamicImage::ImageRgb8(RgbImage::new(220, 170)),
        ];

        write_pptx(&pages, &out).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&out).unwrap()).unwrap();
        for name in [
            "[Content_Types].xml",
            "ppt/presentation.xml",
            "ppt/slides/slide1.xml",
            "ppt/slides/slide2.xml",
            "ppt/media/image1.png",
            "ppt/media/image2.png",
            "ppt/theme/theme1.xml",
        ] {
            assert!(archive.by_name(name).is_ok(), "missing {name}");
        }
        assert!(archive.by_name("ppt/slides/slide3.xml").is_err());

        let mut presentation = String::new();
        archive
            .by_name("ppt/presentation.xml")
            .unwrap()
            .read_to_string(&mut presentation)
            .unwrap();
        assert_eq!(presentation.matches("<p:sldId ").count(), 2);
        assert!(presentation.contains(r#"cx="9144000" cy="6858000""#));
    }
}
