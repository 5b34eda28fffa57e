//! Rasterisation: raw document → decoded page images.
//!
//! Three input kinds, one output shape:
//!
//! * raster — direct decode, normalised to RGB8, long side capped
//!   (downscale only, never upscale);
//! * PDF — one image per page via pdfium at the configured DPI;
//! * SVG — rendered at an enlarged scale via usvg/resvg so embedded text
//!   stays legible, then the same long-side cap.
//!
//! All of this is CPU-bound and runs inside `spawn_blocking`: pdfium wraps a
//! C++ library with thread-local state that must not run on Tokio worker
//! threads, and large-image decode stalls them just as badly.

use crate::config::AnalysisConfig;
use crate::error::{AnalyzeError, PageError};
use crate::pipeline::detect::{DocumentKind, RawDocument};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// A single decoded page surface plus its index within the source document.
///
/// Index 0 for raster and SVG inputs; page order for PDFs.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub index: usize,
    pub image: DynamicImage,
}

/// Rasterise a document into its pages.
///
/// Document-level failures (corrupt payload, wrong password) are fatal.
/// Page-level render failures inside a multi-page PDF come back as
/// `Err(PageError)` entries so the remaining pages still go through the
/// pipeline.
pub async fn rasterize(
    doc: &RawDocument,
    config: &AnalysisConfig,
) -> Result<Vec<Result<PageImage, PageError>>, AnalyzeError> {
    let bytes = doc.bytes.clone();
    let kind = doc.kind;
    let max_side = config.max_image_side;
    let dpi = config.pdf_dpi;
    let svg_scale = config.svg_scale;
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || match kind {
        DocumentKind::Raster => decode_raster(&bytes, max_side).map(single_page),
        DocumentKind::Svg => render_svg(&bytes, svg_scale, max_side).map(single_page),
        DocumentKind::Pdf => render_pdf(&bytes, dpi, max_side, password.as_deref()),
    })
    .await
    .map_err(|e| AnalyzeError::Internal(format!("raster task panicked: {e}")))?
}

fn single_page(image: DynamicImage) -> Vec<Result<PageImage, PageError>> {
    vec![Ok(PageImage { index: 0, image })]
}

// ── Raster input ─────────────────────────────────────────────────────────

fn decode_raster(bytes: &[u8], max_side: u32) -> Result<DynamicImage, AnalyzeError> {
    let img = image::load_from_memory(bytes).map_err(|e| AnalyzeError::Decode {
        kind: DocumentKind::Raster,
        detail: e.to_string(),
    })?;
    let img = DynamicImage::ImageRgb8(img.to_rgb8());
    Ok(cap_long_side(img, max_side))
}

/// Downscale so the long side fits `max_side`. Never upscales: interpolation
/// blurs thin connector lines without adding information.
fn cap_long_side(img: DynamicImage, max_side: u32) -> DynamicImage {
    let long = img.width().max(img.height());
    if long <= max_side {
        return img;
    }
    let scale = max_side as f64 / long as f64;
    let w = ((img.width() as f64 * scale).round() as u32).max(1);
    let h = ((img.height() as f64 * scale).round() as u32).max(1);
    debug!(
        "Downscaling {}x{} → {}x{}",
        img.width(),
        img.height(),
        w,
        h
    );
    img.resize_exact(w, h, FilterType::Lanczos3)
}

// ── PDF input ────────────────────────────────────────────────────────────

fn render_pdf(
    bytes: &[u8],
    dpi: u32,
    max_side: u32,
    password: Option<&str>,
) -> Result<Vec<Result<PageImage, PageError>>, AnalyzeError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| {
            let err_str = format!("{e:?}");
            if err_str.to_lowercase().contains("password") {
                if password.is_some() {
                    AnalyzeError::WrongPassword
                } else {
                    AnalyzeError::PasswordRequired
                }
            } else {
                AnalyzeError::Decode {
                    kind: DocumentKind::Pdf,
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let mut results = Vec::with_capacity(total);
    for idx in 0..total {
        results.push(render_pdf_page(&pages, idx, dpi, max_side).map(|image| {
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            PageImage { index: idx, image }
        }));
    }
    Ok(results)
}

fn render_pdf_page(
    pages: &PdfPages<'_>,
    idx: usize,
    dpi: u32,
    max_side: u32,
) -> Result<DynamicImage, PageError> {
    let page = pages.get(idx as u16).map_err(|e| PageError::Decode {
        page: idx,
        detail: format!("{e:?}"),
    })?;

    // Target the configured DPI, but never beyond the long-side cap.
    let long_points = page.width().value.max(page.height().value).max(1.0);
    let target_long = ((long_points * dpi as f32 / 72.0).round() as u32)
        .clamp(1, max_side);

    let render_config = PdfRenderConfig::new()
        .set_target_width(target_long as i32)
        .set_maximum_height(target_long as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| PageError::Decode {
            page: idx,
            detail: format!("{e:?}"),
        })?;

    Ok(DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8()))
}

// ── SVG input ────────────────────────────────────────────────────────────

fn render_svg(bytes: &[u8], scale: f32, max_side: u32) -> Result<DynamicImage, AnalyzeError> {
    let svg_err = |detail: String| AnalyzeError::Decode {
        kind: DocumentKind::Svg,
        detail,
    };

    let mut opt = usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_data(bytes, &opt).map_err(|e| svg_err(e.to_string()))?;

    let size = tree.size();
    let (w, h) = (size.width().max(1.0), size.height().max(1.0));

    // Render enlarged so label text survives, but never beyond the cap the
    // downstream stages expect.
    let long = w.max(h);
    let effective = scale.min(max_side as f32 / long).max(f32::MIN_POSITIVE);
    let width_px = ((w * effective).ceil() as u32).max(1);
    let height_px = ((h * effective).ceil() as u32).max(1);

    let mut pixmap = tiny_skia::Pixmap::new(width_px, height_px)
        .ok_or_else(|| svg_err(format!("cannot allocate {width_px}x{height_px} pixmap")))?;

    // Diagrams are commonly transparent; composite onto white so the model
    // sees what a viewer would.
    pixmap.fill(tiny_skia::Color::WHITE);

    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(effective, effective),
        &mut pixmap.as_mut(),
    );

    // The pixmap is premultiplied RGBA, but over an opaque background alpha
    // is 255 everywhere, so the channels can be taken as-is.
    let rgba = pixmap.data();
    let mut rgb = vec![0u8; (width_px as usize) * (height_px as usize) * 3];
    for (src, dst) in rgba.chunks_exact(4).zip(rgb.chunks_exact_mut(3)) {
        dst.copy_from_slice(&src[..3]);
    }

    let img = RgbImage::from_raw(width_px, height_px, rgb)
        .ok_or_else(|| svg_err("pixel buffer size mismatch".into()))?;

    if width_px.max(height_px) > max_side {
        warn!("SVG render exceeded cap; downscaling");
        return Ok(cap_long_side(DynamicImage::ImageRgb8(img), max_side));
    }
    Ok(DynamicImage::ImageRgb8(img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn page(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([200, 200, 200])))
    }

    #[test]
    fn cap_downscales_preserving_aspect() {
        let out = cap_long_side(page(3000, 1500), 1536);
        assert_eq!(out.width(), 1536);
        assert_eq!(out.height(), 768);
    }

    #[test]
    fn cap_never_upscales() {
        let out = cap_long_side(page(400, 300), 1536);
        assert_eq!((out.width(), out.height()), (400, 300));
    }

    #[test]
    fn decode_raster_normalises_to_rgb() {
        let mut buf = Vec::new();
        page(20, 10)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        let img = decode_raster(&buf, 1536).unwrap();
        assert!(matches!(img, DynamicImage::ImageRgb8(_)));
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[test]
    fn decode_raster_rejects_garbage() {
        let err = decode_raster(b"definitely not an image", 1536).unwrap_err();
        assert!(matches!(
            err,
            AnalyzeError::Decode {
                kind: DocumentKind::Raster,
                ..
            }
        ));
    }

    #[test]
    fn render_svg_applies_scale_factor() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="50"><rect width="100" height="50" fill="black"/></svg>"#;
        let img = render_svg(svg, 2.0, 1536).unwrap();
        assert_eq!((img.width(), img.height()), (200, 100));
    }

    #[test]
    fn render_svg_respects_long_side_cap() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="2000" height="100"><rect width="2000" height="100" fill="black"/></svg>"#;
        let img = render_svg(svg, 2.0, 1000).unwrap();
        assert!(img.width() <= 1000);
    }

    #[test]
    fn render_svg_signals_decode_error_on_malformed_input() {
        let err = render_svg(b"<svg", 2.0, 1536).unwrap_err();
        assert!(matches!(
            err,
            AnalyzeError::Decode {
                kind: DocumentKind::Svg,
                ..
            }
        ));
    }
}
