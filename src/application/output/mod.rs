//! Output writers: turn a [`RenderedDocument`] into file bytes.

mod fonts;
mod layout;
mod pdf;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::render::RenderedDocument;

pub use fonts::{DEFAULT_FAMILY, FontCache};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to load font file `{path}`")]
    FontLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("font `{name}` is not usable: {reason}")]
    InvalidFont { name: String, reason: String },
    #[error("archival output requires an embeddable font for family `{family}`")]
    ArchivalFontUnavailable { family: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Produce PDF/A-2b files. Every font must then be embedded.
    pub archival: bool,
    pub font_dir: Option<PathBuf>,
    pub font_cache_capacity: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            archival: false,
            font_dir: None,
            font_cache_capacity: 16,
        }
    }
}

/// Serialised document bytes plus the metadata stored alongside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOutput {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub size_bytes: u64,
}

impl RenderedOutput {
    fn new(bytes: Vec<u8>, content_type: &'static str) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            bytes,
            content_type,
            size_bytes,
        }
    }
}

/// Synchronous and CPU bound; async callers run it on the blocking pool.
pub trait OutputWriter: Send + Sync {
    fn write(&self, document: &RenderedDocument) -> Result<RenderedOutput, OutputError>;
}

#[derive(Clone)]
pub struct PdfOutputWriter {
    archival: bool,
    fonts: Arc<FontCache>,
}

impl PdfOutputWriter {
    pub fn new(settings: &OutputSettings) -> Self {
        Self {
            archival: settings.archival,
            fonts: Arc::new(FontCache::new(
                settings.font_dir.clone(),
                settings.font_cache_capacity,
            )),
        }
    }

    pub fn is_archival(&self) -> bool {
        self.archival
    }

    /// Write with a fixed creation timestamp. Output is byte-for-byte stable
    /// for equal inputs.
    pub fn write_at(
        &self,
        document: &RenderedDocument,
        created: OffsetDateTime,
    ) -> Result<RenderedOutput, OutputError> {
        let mut fonts = layout::FontSet::new(&self.fonts, self.archival);
        let pages = layout::paginate(document, &mut fonts)?;
        let options = pdf::PdfOptions {
            page_size: layout::page_size(&document.page_settings),
            created,
            archival: self.archival,
        };
        let bytes = pdf::write_pdf(&pages, fonts.faces(), &options);
        debug!(
            target = "application::output",
            pages = pages.len(),
            fonts = fonts.faces().len(),
            bytes = bytes.len(),
            archival = self.archival,
            "pdf written"
        );
        Ok(RenderedOutput::new(bytes, PDF_CONTENT_TYPE))
    }
}

impl OutputWriter for PdfOutputWriter {
    fn write(&self, document: &RenderedDocument) -> Result<RenderedOutput, OutputError> {
        self.write_at(document, OffsetDateTime::now_utc())
    }
}
