//! PDF Protection Library
//!
//! A library for batch-protecting PDF documents before they are handed to a
//! recipient. This library provides functionality to:
//! - Stamp every page with image and text watermarks laid out to resist
//!   cropping and removal
//! - Flatten pages to raster images so text and vector content cannot be
//!   extracted or edited
//! - Seal documents with AES-256 encryption using a password derived from the
//!   recipient's name
//! - Run the three stages as a per-file pipeline with guaranteed cleanup of
//!   intermediate files
//!
//! # Example
//!
//! ```no_run
//! use pdf_protect::{FontRegistry, WatermarkConfig, watermark_document};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use std::path::Path;
//!
//! let config = WatermarkConfig::new("logo.png", "CONFIDENTIAL 2026-08-07");
//! let fonts = FontRegistry::new();
//! let mut rng = StdRng::seed_from_u64(0);
//!
//! watermark_document(
//!     Path::new("input.pdf"),
//!     Path::new("stamped.pdf"),
//!     &config,
//!     &fonts,
//!     &mut rng,
//! )
//! .expect("Failed to watermark");
//! ```

pub mod error;
pub mod fonts;
pub mod layout;
pub mod overlay;
pub mod pipeline;
pub mod rasterize;
pub mod seal;
pub mod watermark;

// Re-export commonly used items
pub use error::{Error, Result};
pub use fonts::FontRegistry;
pub use layout::{compute_layout, DrawCommand, WatermarkConfig};
pub use pipeline::{process_batch, process_file, BatchSummary, PipelineOptions};
pub use rasterize::rasterize_document;
pub use seal::{derive_password, seal_document};
pub use watermark::{inspect, watermark_document};
