use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tempdir::TempDir;

use crate::error::{Error, Result};
use crate::pipeline::{render_document, ConversionResult, OutputSpec};
use crate::rasterizer::Document;

/// Environment variable naming the engine (`tectonic`, `pdflatex`, ...).
pub const ENGINE_VAR: &str = "TEX2IMG_ENGINE";
/// Environment variable pointing at the compiler executable.
pub const BIN_VAR: &str = "TEX2IMG_BIN";

static TEX_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^! .*$").expect("BUG: invalid TEX_ERROR_RE regex literal"));

const SOURCE_NAME: &str = "document.tex";
const OUTPUT_NAME: &str = "document.pdf";

/// A LaTeX engine that turns source text into a PDF. Each engine is an
/// external program run in a scratch directory.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Engine {
    /// Tectonic, a self-contained XeTeX-based engine.
    #[default]
    Tectonic,
    /// pdfTeX.
    Pdflatex,
    /// XeTeX.
    Xelatex,
    /// LuaTeX.
    Lualatex,
}

impl Engine {
    /// Get the name of the engine.
    pub fn name(&self) -> &'static str {
        match self {
            Engine::Tectonic => "tectonic",
            Engine::Pdflatex => "pdflatex",
            Engine::Xelatex => "xelatex",
            Engine::Lualatex => "lualatex",
        }
    }

    /// Program looked up on `PATH` when no explicit executable is set.
    pub fn default_program(&self) -> &'static str {
        self.name()
    }

    /// Command-line arguments compiling `document.tex` into `out_dir`.
    fn args(&self, out_dir: &Path) -> Vec<OsString> {
        match self {
            Engine::Tectonic => vec![
                "--chatter".into(),
                "minimal".into(),
                "--outdir".into(),
                out_dir.into(),
                SOURCE_NAME.into(),
            ],
            Engine::Pdflatex | Engine::Xelatex | Engine::Lualatex => {
                let mut output_directory = OsString::from("-output-directory=");
                output_directory.push(out_dir);
                vec![
                    "-interaction=nonstopmode".into(),
                    "-halt-on-error".into(),
                    output_directory,
                    SOURCE_NAME.into(),
                ]
            }
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tectonic" => Ok(Engine::Tectonic),
            "pdflatex" => Ok(Engine::Pdflatex),
            "xelatex" => Ok(Engine::Xelatex),
            "lualatex" => Ok(Engine::Lualatex),
            other => Err(Error::invalid(format!("unknown LaTeX engine {:?}", other))),
        }
    }
}

/// How to invoke the external LaTeX compiler.
#[derive(Clone, Debug)]
pub struct LatexCompiler {
    engine: Engine,
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl Default for LatexCompiler {
    fn default() -> Self {
        Self::new(Engine::default())
    }
}

impl LatexCompiler {
    /// Use `engine` with its default program.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            program: PathBuf::from(engine.default_program()),
            leading_args: Vec::new(),
        }
    }

    /// Build a compiler from `TEX2IMG_ENGINE` and `TEX2IMG_BIN`.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var_os(key))
    }

    fn from_vars(var: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let engine = match var(ENGINE_VAR).filter(|value| !value.is_empty()) {
            Some(name) => name
                .to_str()
                .ok_or_else(|| Error::invalid(format!("{} is not valid UTF-8", ENGINE_VAR)))?
                .parse()?,
            None => Engine::default(),
        };

        let compiler = Self::new(engine);
        Ok(match var(BIN_VAR).filter(|value| !value.is_empty()) {
            Some(program) => compiler.with_program(program),
            None => compiler,
        })
    }

    /// Run `program` instead of the engine's default executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments placed before the engine's own, e.g. a wrapper script.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The engine whose command line is used.
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// The executable that will be run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Compile `source` and return the bytes of the resulting PDF.
    ///
    /// The scratch directory holding the source, the PDF and every auxiliary
    /// file is removed before this returns.
    pub fn compile(&self, source: &str) -> Result<Vec<u8>> {
        let dir = TempDir::new("tex2img")
            .map_err(|e| Error::io("failed to create LaTeX working directory", e))?;

        let source_path = dir.path().join(SOURCE_NAME);
        fs::write(&source_path, source).map_err(|e| Error::io_at("write", &source_path, e))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(self.engine.args(dir.path()))
            .current_dir(dir.path())
            .stdin(Stdio::null());

        log::debug!("running {:?}", command);
        let output = command.output().map_err(|e| {
            Error::Compile(format!(
                "failed to run {} ({}): {}",
                self.program.display(),
                self.engine,
                e
            ))
        })?;

        let diagnostic = diagnostic(&output);
        if !output.status.success() {
            for line in tex_errors(&diagnostic) {
                log::warn!("{}", line);
            }
            return Err(Error::Compile(if diagnostic.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                diagnostic
            }));
        }
        if !diagnostic.is_empty() {
            log::debug!("{}", diagnostic);
        }

        let pdf_path = dir.path().join(OUTPUT_NAME);
        let pdf = fs::read(&pdf_path).map_err(|e| {
            Error::Compile(format!(
                "{} produced no PDF output at {}: {}",
                self.program.display(),
                pdf_path.display(),
                e
            ))
        })?;

        if let Err(e) = dir.close() {
            log::warn!("failed to remove LaTeX working directory: {}", e);
        }
        Ok(pdf)
    }
}

/// Captured stdout and stderr of the compiler, verbatim apart from trimming.
fn diagnostic(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim(), stderr.trim()) {
        ("", "") => String::new(),
        (out, "") => out.to_string(),
        ("", err) => err.to_string(),
        (out, err) => format!("{}\n{}", out, err),
    }
}

/// The `! ...` error lines TeX engines print.
pub fn tex_errors(diagnostic: &str) -> Vec<&str> {
    TEX_ERROR_RE
        .find_iter(diagnostic)
        .map(|m| m.as_str().trim_end())
        .collect()
}

/// Compile `source` and write one PNG per resulting page.
///
/// The output directory is created before the compiler runs.
pub fn render_latex(source: &str, spec: &OutputSpec, compiler: &LatexCompiler) -> ConversionResult {
    spec.ensure_output_directory()?;

    log::debug!("compiling {} bytes of LaTeX with {}", source.len(), compiler.engine);
    let pdf = compiler.compile(source)?;
    let document = Document::parse(pdf)?;
    render_document(&document, spec)
}

const PREAMBLE: &str = r"\documentclass[multi={mathpage},border=2pt,varwidth]{standalone}
\usepackage{amsmath,amssymb,amsfonts}
\usepackage{fontspec}
\usepackage{ctex}
\usepackage{xcolor}
\newenvironment{mathpage}{}{}
\begin{document}
";

const POSTAMBLE: &str = r"
\end{document}
";

/// Wrap `body` in a `standalone` document where every `mathpage`
/// environment becomes its own tightly cropped page.
///
/// The preamble loads `fontspec` and `ctex`, so it needs a XeTeX-based engine
/// (tectonic or xelatex).
pub fn standalone_document(body: &str) -> String {
    let mut document = String::with_capacity(PREAMBLE.len() + body.len() + POSTAMBLE.len());
    document.push_str(PREAMBLE);
    document.push_str(body);
    document.push_str(POSTAMBLE);
    document
}

/// A standalone document with one page per formula, in order.
pub fn math_pages<I, S>(formulas: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let body: String = formulas
        .into_iter()
        .map(|formula| format!("\\begin{{mathpage}}\n{}\n\\end{{mathpage}}\n", formula.as_ref()))
        .collect();
    standalone_document(&body)
}
