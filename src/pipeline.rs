//! Staged protection pipeline and batch driver core
//!
//! Each file runs through watermark → flatten → seal, every stage consuming
//! the previous stage's output file. Stage outputs live in uniquely named
//! temp files inside the output directory; their RAII handles delete them on
//! every exit path, so a failure partway through a file never leaks staging
//! artifacts. Only the sealed result keeps a permanent name.
//!
//! The batch driver processes files one at a time and converts per-file
//! errors into reported outcomes; one bad file never aborts the batch.

use std::path::{Path, PathBuf};

use rand::Rng;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::fonts::FontRegistry;
use crate::layout::WatermarkConfig;
use crate::{rasterize, seal, watermark};

/// Everything the pipeline needs to process one batch.
pub struct PipelineOptions {
    pub config: WatermarkConfig,
    /// Recipient the files are personalized for; drives the password and the
    /// output file names.
    pub recipient: String,
    /// Password used when the recipient name yields nothing.
    pub fallback_password: String,
    /// Whether to flatten pages to images after watermarking.
    pub flatten: bool,
    /// Rendering resolution for the flattening stage.
    pub dpi: f32,
    pub output_dir: PathBuf,
}

/// A successfully protected file.
pub struct SealedFile {
    pub output: PathBuf,
    pub password: String,
}

/// Outcome of one input file.
pub struct FileReport {
    pub input: PathBuf,
    pub outcome: Result<SealedFile>,
}

/// Aggregate outcome of a batch run.
pub struct BatchSummary {
    pub reports: Vec<FileReport>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Destination path for a sealed file: `{stem}_{recipient}.pdf`.
pub fn final_output_path(input: &Path, recipient: &str, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tag: String = recipient
        .trim()
        .chars()
        .map(|c| if std::path::is_separator(c) || c.is_control() { '_' } else { c })
        .collect();
    if tag.is_empty() {
        output_dir.join(format!("{stem}_protected.pdf"))
    } else {
        output_dir.join(format!("{stem}_{tag}.pdf"))
    }
}

/// A uniquely named staging file in the output directory. Unique names keep
/// concurrent pipeline runs from trampling each other's intermediates.
fn staging_file(output_dir: &Path, stem: &str, stage: &str) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&format!(".{stem}_{stage}_"))
        .suffix(".pdf")
        .tempfile_in(output_dir)
        .map_err(Error::Io)
}

/// Run the full pipeline for one file.
///
/// A flattening failure is downgraded to a warning and the watermarked file is
/// sealed instead; watermarking and sealing failures are fatal for the file.
pub fn process_file<R: Rng>(
    input: &Path,
    opts: &PipelineOptions,
    fonts: &FontRegistry,
    rng: &mut R,
) -> Result<SealedFile> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    std::fs::create_dir_all(&opts.output_dir)?;

    // Stage 1: watermark. The staging handle deletes the file when this
    // function returns, by any path.
    let stamped = staging_file(&opts.output_dir, &stem, "stamped")?;
    watermark::watermark_document(input, stamped.path(), &opts.config, fonts, rng)?;

    // Stage 2: flatten to images, falling back to the stamped file on error.
    let mut seal_source = stamped.path().to_path_buf();
    let mut _flat_guard: Option<NamedTempFile> = None;
    if opts.flatten {
        let flat = staging_file(&opts.output_dir, &stem, "flat")?;
        match rasterize::rasterize_document(stamped.path(), flat.path(), opts.dpi) {
            Ok(()) => {
                seal_source = flat.path().to_path_buf();
                _flat_guard = Some(flat);
            }
            Err(err) => {
                tracing::warn!(
                    input = %input.display(),
                    error = %err,
                    "flattening failed, sealing the watermarked file instead"
                );
            }
        }
    }

    // Stage 3: seal to the final destination.
    let output = final_output_path(input, &opts.recipient, &opts.output_dir);
    let password = seal::seal_document(&seal_source, &output, &opts.recipient, &opts.fallback_password)?;
    Ok(SealedFile { output, password })
}

/// Process a batch of files sequentially, reporting each outcome.
pub fn process_batch(
    inputs: &[PathBuf],
    opts: &PipelineOptions,
    fonts: &FontRegistry,
) -> BatchSummary {
    let mut rng = rand::thread_rng();
    let mut reports = Vec::with_capacity(inputs.len());
    for input in inputs {
        tracing::info!(file = %input.display(), "processing");
        let outcome = process_file(input, opts, fonts, &mut rng);
        if let Err(err) = &outcome {
            tracing::error!(file = %input.display(), error = %err, "file failed");
        }
        reports.push(FileReport {
            input: input.clone(),
            outcome,
        });
    }
    BatchSummary { reports }
}
