//! Error types for the protection pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the protection pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Required asset (input file, watermark image) missing
    #[error("asset not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    /// Source is not a readable, paginated PDF
    #[error("invalid PDF document {}: {source}", .path.display())]
    InvalidDocument {
        path: PathBuf,
        source: lopdf::Error,
    },

    /// Invalid PDF (no pages)
    #[error("PDF has no pages: {}", .0.display())]
    EmptyPdf(PathBuf),

    /// Layout inputs that cannot produce meaningful geometry
    #[error("degenerate layout: {0}")]
    DegenerateLayout(String),

    /// Font error
    #[error("font error: {0}")]
    Font(String),

    /// Page rasterization failed; caller falls back to the un-flattened file
    #[error("rasterization failed: {0}")]
    Rasterization(String),

    /// Encryption/sealing failed
    #[error("sealing failed: {0}")]
    Sealing(String),

    /// A per-page failure, with the index of the page that triggered it
    #[error("page {page}: {source}")]
    Page {
        page: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach a zero-based page index to an error
    pub fn on_page(self, page: usize) -> Self {
        Error::Page {
            page,
            source: Box::new(self),
        }
    }
}
