use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use hayro::{render, Pdf, RenderSettings};
use hayro_interpret::InterpreterSettings;
use image::RgbImage;
use tiny_skia::{Color, FilterQuality, Pixmap, PixmapPaint, Transform};

use crate::error::{panic_message, Error, Result};

/// Largest width or height, in pixels, a rendered page may have.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// A parsed PDF, ready to be rasterized.
pub struct Document {
    pdf: Pdf,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("pages", &self.page_count())
            .finish()
    }
}

impl Document {
    /// Take ownership of `data` and parse it as a PDF.
    pub fn parse(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = Arc::new(data.into());
        let pdf = panic::catch_unwind(AssertUnwindSafe(|| Pdf::new(data)))
            .map_err(|payload| Error::Parse(panic_message(payload)))?
            .map_err(|e| Error::Parse(format!("{:?}", e)))?;

        Ok(Self { pdf })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.pdf.pages().len()
    }

    /// Size of a page in points, with its crop box and rotation applied.
    pub fn page_size(&self, page_index: usize) -> Option<(f32, f32)> {
        self.pdf
            .pages()
            .get(page_index)
            .map(|page| page.render_dimensions())
    }
}

/// One rendered page: an opaque RGB image scaled to the requested width.
#[derive(Clone)]
pub struct RasterImage {
    page_index: usize,
    image: RgbImage,
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("page_index", &self.page_index)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl RasterImage {
    /// Zero-based index of the source page.
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// One-based page number, as used in output file names.
    pub fn ordinal(&self) -> usize {
        self.page_index + 1
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The pixels.
    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Take the pixels.
    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

pub(crate) fn check_width(width: u32) -> Result<()> {
    if width == 0 {
        return Err(Error::invalid("width must be greater than zero"));
    }
    if width > MAX_DIMENSION {
        return Err(Error::invalid(format!(
            "width {} exceeds the maximum of {} pixels",
            width, MAX_DIMENSION
        )));
    }
    Ok(())
}

/// Height that keeps the aspect ratio of a `page_width` x `page_height` page
/// once it is scaled to `width` pixels.
pub fn scaled_height(page_width: f32, page_height: f32, width: u32) -> u32 {
    let height = f64::from(page_height) * f64::from(width) / f64::from(page_width);
    height.round().max(1.0) as u32
}

/// Render every page of `document` at `width` pixels, in page order.
///
/// Stops at the first page that fails.
pub fn rasterize(document: &Document, width: u32) -> Result<Vec<RasterImage>> {
    check_width(width)?;
    (0..document.page_count())
        .map(|page_index| rasterize_page(document, page_index, width))
        .collect()
}

/// Render a single page so that its width is exactly `width` pixels.
pub fn rasterize_page(document: &Document, page_index: usize, width: u32) -> Result<RasterImage> {
    check_width(width)?;

    let pages = document.pdf.pages();
    let page = pages
        .get(page_index)
        .ok_or_else(|| Error::rasterization(page_index, "page does not exist"))?;

    let (page_width, page_height) = page.render_dimensions();
    if !(page_width.is_finite() && page_height.is_finite()) || page_width <= 0.0 || page_height <= 0.0
    {
        return Err(Error::rasterization(
            page_index,
            format!("degenerate page size {}x{}", page_width, page_height),
        ));
    }

    let height = scaled_height(page_width, page_height, width);
    if height > MAX_DIMENSION {
        return Err(Error::rasterization(
            page_index,
            format!(
                "scaled height {} exceeds the maximum of {} pixels",
                height, MAX_DIMENSION
            ),
        ));
    }

    // Never let the engine produce an empty pixmap; the canvas resample
    // below brings the result back to the exact target size.
    let scale = (width as f32 / page_width).max(2.0 / page_width.min(page_height));
    let render_settings = RenderSettings {
        x_scale: scale,
        y_scale: scale,
        ..Default::default()
    };
    let interpreter_settings = InterpreterSettings::default();

    let png = panic::catch_unwind(AssertUnwindSafe(|| {
        render(page, &interpreter_settings, &render_settings).take_png()
    }))
    .map_err(|payload| Error::rasterization(page_index, panic_message(payload)))?;

    let rendered = Pixmap::decode_png(&png)
        .map_err(|e| Error::rasterization(page_index, format!("unreadable render: {}", e)))?;

    let image = flatten(&rendered, width, height)
        .ok_or_else(|| Error::rasterization(page_index, "unable to allocate page canvas"))?;

    Ok(RasterImage { page_index, image })
}

/// Resample `rendered` onto an opaque white `width` x `height` canvas.
fn flatten(rendered: &Pixmap, width: u32, height: u32) -> Option<RgbImage> {
    let mut canvas = Pixmap::new(width, height)?;
    canvas.fill(Color::WHITE);

    let paint = PixmapPaint {
        quality: FilterQuality::Bicubic,
        ..PixmapPaint::default()
    };
    let transform = Transform::from_scale(
        width as f32 / rendered.width() as f32,
        height as f32 / rendered.height() as f32,
    );
    canvas.draw_pixmap(0, 0, rendered.as_ref(), &paint, transform, None);

    // The canvas is opaque, so premultiplied and straight RGB coincide.
    let rgb = canvas
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    RgbImage::from_raw(width, height, rgb)
}
