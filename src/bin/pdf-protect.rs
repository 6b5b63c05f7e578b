//! PDF Protect CLI tool
//!
//! A command-line tool for watermarking, flattening and password-sealing PDFs
//! in batch before handing them to a recipient.

use clap::{Parser, Subcommand};
use glob::glob;
use std::path::PathBuf;
use std::process;

use pdf_protect::{
    inspect, pipeline, rasterize, FontRegistry, PipelineOptions, WatermarkConfig,
};

/// PDF Protect - watermark, flatten and password-seal PDFs
#[derive(Parser)]
#[command(name = "pdf-protect")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Protect a set of handouts for one recipient
    pdf-protect protect --recipient \"张三\" --image logo.png -o out/ lectures/*.pdf

    # Watermark a single file without flattening or sealing
    pdf-protect stamp input.pdf -o stamped.pdf --image logo.png --text \"DRAFT\"

    # Show page count and dimensions
    pdf-protect inspect input.pdf")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct WatermarkArgs {
    /// Primary watermark image (PNG with alpha), drawn centered on every page
    #[arg(long)]
    image: PathBuf,

    /// Optional secondary logo, drawn once per page at a random position
    #[arg(long)]
    logo: Option<PathBuf>,

    /// Watermark text; defaults to "<recipient> <current date and time>"
    #[arg(long)]
    text: Option<String>,

    /// Font name for watermark text (falls back to Helvetica if unregistered)
    #[arg(long, default_value = "Helvetica")]
    font_name: String,

    /// TrueType font file to register under --font-name
    #[arg(long)]
    font_file: Option<PathBuf>,

    /// Grid text size in points
    #[arg(long, default_value_t = 24.0)]
    font_size: f64,

    /// Scale applied to the watermark image, in (0, 1]
    #[arg(long, default_value_t = 0.5)]
    image_scale: f64,

    /// Opacity of the image elements, in [0, 1]
    #[arg(long, default_value_t = 0.3)]
    image_opacity: f64,

    /// Opacity of the grid text, in [0, 1]
    #[arg(long, default_value_t = 0.2)]
    text_opacity: f64,

    /// Grid text rotation in degrees
    #[arg(long, default_value_t = 45.0)]
    angle: f64,

    /// Grid rows per page
    #[arg(long, default_value_t = 5)]
    rows: usize,

    /// Grid columns per page (reduced automatically if they would collide)
    #[arg(long, default_value_t = 3)]
    cols: usize,

    /// Draw the watermark underneath the page content instead of on top
    #[arg(long)]
    underlay: bool,

    /// Skip the small scattered marquee text lines
    #[arg(long)]
    no_marquee: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watermark, flatten and seal PDFs for a recipient
    Protect {
        /// Input PDF files (in order). Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output directory for the protected files
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Recipient name; drives the password and the output file names
        #[arg(long)]
        recipient: String,

        /// Password used when the recipient name yields no derivation
        #[arg(long, default_value = "handout")]
        fallback_password: String,

        /// Keep pages as text/vector content instead of flattening to images
        #[arg(long)]
        keep_text: bool,

        /// Rendering resolution for the flattening stage
        #[arg(long, default_value_t = rasterize::DEFAULT_DPI)]
        dpi: f32,

        #[command(flatten)]
        watermark: WatermarkArgs,
    },

    /// Watermark a single PDF without flattening or sealing
    Stamp {
        /// Input PDF file
        input: PathBuf,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        /// Recipient name used in the default watermark text
        #[arg(long, default_value = "")]
        recipient: String,

        #[command(flatten)]
        watermark: WatermarkArgs,
    },

    /// Show page count and page dimensions of a PDF
    Inspect {
        /// PDF file to inspect
        input: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Protect {
            inputs,
            output_dir,
            recipient,
            fallback_password,
            keep_text,
            dpi,
            watermark,
        } => cmd_protect(
            inputs,
            output_dir,
            recipient,
            fallback_password,
            keep_text,
            dpi,
            watermark,
        ),
        Commands::Stamp {
            input,
            output,
            recipient,
            watermark,
        } => cmd_stamp(input, output, recipient, watermark),
        Commands::Inspect { input } => cmd_inspect(input),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = false;
            for entry in glob(&pattern)? {
                match entry {
                    Ok(path) => {
                        paths.push(path);
                        matched = true;
                    }
                    Err(e) => eprintln!("Warning: glob error for {pattern}: {e}"),
                }
            }
            if !matched {
                anyhow::bail!("No files matched pattern: {pattern}");
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    // Sort paths for consistent ordering
    paths.sort();

    Ok(paths)
}

/// Build the watermark config and font registry from CLI arguments.
fn build_watermark(
    args: &WatermarkArgs,
    recipient: &str,
) -> anyhow::Result<(WatermarkConfig, FontRegistry)> {
    let mut fonts = FontRegistry::new();
    if let Some(font_file) = &args.font_file {
        fonts.register(&args.font_name, font_file)?;
    }

    let text = match &args.text {
        Some(text) => text.clone(),
        None => {
            let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M");
            if recipient.trim().is_empty() {
                stamp.to_string()
            } else {
                format!("{recipient} {stamp}")
            }
        }
    };

    let mut config = WatermarkConfig::new(&args.image, text);
    config.logo_path = args.logo.clone();
    config.font_name = args.font_name.clone();
    config.font_size = args.font_size;
    config.image_scale = args.image_scale.clamp(0.01, 1.0);
    config.image_opacity = args.image_opacity.clamp(0.0, 1.0);
    config.text_opacity = args.text_opacity.clamp(0.0, 1.0);
    config.rotation_angle = args.angle;
    config.rows = args.rows.max(1);
    config.cols = args.cols.max(1);
    config.on_top = !args.underlay;
    config.marquee = !args.no_marquee;
    Ok((config, fonts))
}

/// Run the full protection pipeline over a batch of files
fn cmd_protect(
    inputs: Vec<String>,
    output_dir: PathBuf,
    recipient: String,
    fallback_password: String,
    keep_text: bool,
    dpi: f32,
    watermark: WatermarkArgs,
) -> anyhow::Result<()> {
    let inputs = expand_globs(inputs)?;
    for path in &inputs {
        if !path.exists() {
            anyhow::bail!("Input file not found: {}", path.display());
        }
    }
    if recipient.trim().is_empty() {
        anyhow::bail!("--recipient must not be empty");
    }

    let (config, fonts) = build_watermark(&watermark, &recipient)?;
    let opts = PipelineOptions {
        config,
        recipient,
        fallback_password,
        flatten: !keep_text,
        dpi,
        output_dir: output_dir.clone(),
    };

    eprintln!("Protecting {} PDF files...", inputs.len());
    let total = inputs.len();
    let summary = pipeline::process_batch(&inputs, &opts, &fonts);

    for (i, report) in summary.reports.iter().enumerate() {
        let name = report.input.display();
        match &report.outcome {
            Ok(sealed) => eprintln!(
                "  [{}/{}] {} -> {} (password: {})",
                i + 1,
                total,
                name,
                sealed.output.display(),
                sealed.password
            ),
            Err(err) => eprintln!("  [{}/{}] {} FAILED: {}", i + 1, total, name, err),
        }
    }
    eprintln!(
        "Done. {} succeeded, {} failed. Output directory: {}",
        summary.succeeded(),
        summary.failed(),
        output_dir.display()
    );

    if summary.failed() > 0 {
        process::exit(2);
    }
    Ok(())
}

/// Watermark a single file
fn cmd_stamp(
    input: PathBuf,
    output: PathBuf,
    recipient: String,
    watermark: WatermarkArgs,
) -> anyhow::Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    let (config, fonts) = build_watermark(&watermark, &recipient)?;
    let mut rng = rand::thread_rng();

    eprintln!("Watermarking {}...", input.display());
    pdf_protect::watermark_document(&input, &output, &config, &fonts, &mut rng)?;
    eprintln!("Output: {}", output.display());
    Ok(())
}

/// Show information about a PDF
fn cmd_inspect(input: PathBuf) -> anyhow::Result<()> {
    let info = inspect(&input)?;

    println!("File: {}", input.display());
    println!("Pages: {}", info.page_count);
    for (i, (width, height)) in info.page_sizes.iter().enumerate() {
        println!("  Page {}: {:.1} x {:.1} pt", i + 1, width, height);
    }

    Ok(())
}
