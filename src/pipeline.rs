use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageError};
use tempdir::TempDir;

use crate::error::{Error, Result};
use crate::rasterizer::{check_width, rasterize_page, Document, RasterImage};

/// Outcome of a conversion: the number of pages written.
pub type ConversionResult = Result<usize>;

/// How page files reach the output directory.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum WriteMode {
    /// Write each page straight to its final path. If a later page fails,
    /// the pages already written stay on disk.
    #[default]
    Direct,
    /// Write every page into a scratch directory next to the output and
    /// move them into place only once all pages succeeded.
    Staged,
}

/// Where and how rendered pages are written.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    name_prefix: String,
    output_directory: PathBuf,
    width: u32,
    write_mode: WriteMode,
}

impl OutputSpec {
    /// Validate the arguments of a conversion.
    ///
    /// `output_directory` is resolved to an absolute path but not created.
    pub fn new(
        name_prefix: impl Into<String>,
        output_directory: impl AsRef<Path>,
        width: u32,
    ) -> Result<Self> {
        let name_prefix = name_prefix.into();
        if name_prefix.is_empty() {
            return Err(Error::invalid("name prefix must not be empty"));
        }
        if name_prefix.contains(['/', '\\', '\0']) {
            return Err(Error::invalid(format!(
                "name prefix {:?} must not contain path separators",
                name_prefix
            )));
        }
        check_width(width)?;

        let output_directory = std::path::absolute(output_directory.as_ref()).map_err(|e| {
            Error::invalid(format!(
                "output directory {:?}: {}",
                output_directory.as_ref(),
                e
            ))
        })?;

        Ok(Self {
            name_prefix,
            output_directory,
            width,
            write_mode: WriteMode::default(),
        })
    }

    /// Choose how pages are written. Defaults to [`WriteMode::Direct`].
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Prefix of every page file name.
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Absolute path of the output directory.
    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Target width of every page, in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The selected write mode.
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Final path of the page with the given one-based ordinal.
    pub fn page_path(&self, ordinal: usize) -> PathBuf {
        self.output_directory
            .join(page_file_name(&self.name_prefix, ordinal))
    }

    /// Create the output directory and its parents. An existing directory is fine.
    pub fn ensure_output_directory(&self) -> Result<()> {
        log::debug!("ensuring output directory {}", self.output_directory.display());
        fs::create_dir_all(&self.output_directory)
            .map_err(|e| Error::io_at("create directory", &self.output_directory, e))
    }
}

/// `{prefix}-{ordinal}.png`, with ordinals starting at 1.
pub fn page_file_name(name_prefix: &str, ordinal: usize) -> String {
    format!("{}-{}.png", name_prefix, ordinal)
}

/// Convert PDF bytes into one PNG per page.
///
/// The bytes are moved into an owned buffer before anything else happens.
/// Nothing is created on disk if they do not parse.
pub fn render_pdf(data: impl Into<Vec<u8>>, spec: &OutputSpec) -> ConversionResult {
    let data = data.into();
    log::debug!("parsing {} bytes of PDF", data.len());
    let document = Document::parse(data)?;
    render_document(&document, spec)
}

/// Rasterize and write every page of an already parsed document.
pub fn render_document(document: &Document, spec: &OutputSpec) -> ConversionResult {
    spec.ensure_output_directory()?;

    let pages = match spec.write_mode {
        WriteMode::Direct => write_pages(document, spec, &spec.output_directory)?,
        WriteMode::Staged => {
            let staging = TempDir::new_in(
                &spec.output_directory,
                &format!(".{}-staging", spec.name_prefix),
            )
            .map_err(|e| Error::io_at("create staging directory in", &spec.output_directory, e))?;

            let pages = write_pages(document, spec, staging.path())?;
            for ordinal in 1..=pages {
                let from = staging.path().join(page_file_name(&spec.name_prefix, ordinal));
                let to = spec.page_path(ordinal);
                fs::rename(&from, &to).map_err(|e| Error::io_at("move page to", &to, e))?;
            }

            let staging_path = staging.path().to_path_buf();
            staging
                .close()
                .map_err(|e| Error::io_at("remove staging directory", &staging_path, e))?;
            pages
        }
    };

    log::info!(
        "wrote {} page(s) named {}-N.png to {} at {}px",
        pages,
        spec.name_prefix,
        spec.output_directory.display(),
        spec.width
    );
    Ok(pages)
}

/// Rasterize pages in order on the calling thread while earlier pages are
/// encoded and written on the rayon pool.
///
/// At most one window of rendered pages is held in memory at a time. Once a
/// page fails, nothing after it is rendered or written, but every page before
/// it still reaches the disk.
fn write_pages(document: &Document, spec: &OutputSpec, dir: &Path) -> Result<usize> {
    let page_count = document.page_count();
    let window = rayon::current_num_threads().max(1);
    // Lowest failed ordinal so far, `usize::MAX` while everything succeeds.
    let first_failure = AtomicUsize::new(usize::MAX);
    let failures: Mutex<Vec<(usize, Error)>> = Mutex::new(Vec::new());

    let mut start = 0;
    while start < page_count && first_failure.load(Ordering::SeqCst) == usize::MAX {
        let end = (start + window).min(page_count);
        rayon::in_place_scope(|scope| {
            for page_index in start..end {
                if first_failure.load(Ordering::SeqCst) != usize::MAX {
                    break;
                }

                let page = match rasterize_page(document, page_index, spec.width) {
                    Ok(page) => page,
                    Err(e) => {
                        log::warn!("{}", e);
                        record(&first_failure, &failures, page_index + 1, e);
                        break;
                    }
                };

                let path = dir.join(page_file_name(&spec.name_prefix, page.ordinal()));
                let first_failure = &first_failure;
                let failures = &failures;
                scope.spawn(move |_| {
                    if first_failure.load(Ordering::SeqCst) < page.ordinal() {
                        return;
                    }
                    if let Err(e) = write_png(&page, &path) {
                        log::warn!("{}", e);
                        record(first_failure, failures, page.ordinal(), e);
                    }
                });
            }
        });
        start = end;
    }

    let failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
    match failures.into_iter().min_by_key(|(ordinal, _)| *ordinal) {
        Some((_, e)) => Err(e),
        None => Ok(page_count),
    }
}

fn record(
    first_failure: &AtomicUsize,
    failures: &Mutex<Vec<(usize, Error)>>,
    ordinal: usize,
    error: Error,
) {
    first_failure.fetch_min(ordinal, Ordering::SeqCst);
    failures
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((ordinal, error));
}

fn write_png(page: &RasterImage, path: &Path) -> Result<()> {
    log::debug!("writing {}", path.display());
    let file = File::create(path).map_err(|e| Error::io_at("create", path, e))?;
    let mut writer = BufWriter::new(file);

    let image = page.as_image();
    PngEncoder::new(&mut writer)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| match e {
            ImageError::IoError(e) => Error::io_at("write", path, e),
            other => Error::rasterization(
                page.page_index(),
                format!("PNG encoding failed: {}", other),
            ),
        })?;

    writer.flush().map_err(|e| Error::io_at("write", path, e))
}
