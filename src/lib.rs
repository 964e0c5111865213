/*!
# Motivation
The purpose of this crate is to turn documents into page images that other programs can show
without knowing anything about PDF or TeX. A host hands over either the raw bytes of a PDF or
the source of a LaTeX document, and gets back a set of PNG files, one per page, all scaled to
the same pixel width. The host can be written in any language that can call C functions:
the crate builds as a `cdylib`/`staticlib` and exports a three-function C ABI (see [`ffi`]).

# Pipelines
- **PDF**: the bytes are copied, parsed with [hayro](https://github.com/LaurenzV/hayro) and
  every page is rasterized so that its width is exactly the requested number of pixels. The
  height follows the page's aspect ratio. See [`render_pdf`].
- **LaTeX**: the source is compiled by an external engine in a scratch directory, then the
  resulting PDF goes through the same path as above. See [`render_latex`].

Pages are written as `{output_directory}/{name_prefix}-{n}.png`, with `n` starting at 1. The
output directory is created (with its parents) if needed. Rendering pages and writing them out
overlap: pages are rasterized in order while earlier ones are encoded on the rayon pool.

# Setup
The PDF path is pure Rust and needs nothing else. For LaTeX you need an engine on your system.
By default `tectonic` is looked up on `PATH`. Two environment variables change that:
- `TEX2IMG_ENGINE`: one of `tectonic`, `pdflatex`, `xelatex` or `lualatex`.
- `TEX2IMG_BIN`: the path of the executable to run.

[`math_pages`] builds a `standalone` document with one page per formula. It loads `fontspec`
and `ctex`, so it needs tectonic or xelatex.

# Errors
Every failure carries one of the codes in [`ErrorCode`] and a message that names the stage that
failed. LaTeX failures carry the compiler's output verbatim. Nothing is retried.

By default, pages written before a failure stay on disk. [`WriteMode::Staged`] writes into a
scratch directory first and only moves pages into place once all of them succeeded.
*/

#![warn(missing_docs)]

mod error;
pub mod ffi;
mod latex;
mod pipeline;
mod rasterizer;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorCode, Result};
pub use latex::{
    math_pages, render_latex, standalone_document, tex_errors, Engine, LatexCompiler, BIN_VAR,
    ENGINE_VAR,
};
pub use pipeline::{
    page_file_name, render_document, render_pdf, ConversionResult, OutputSpec, WriteMode,
};
pub use rasterizer::{rasterize, rasterize_page, scaled_height, Document, RasterImage, MAX_DIMENSION};
