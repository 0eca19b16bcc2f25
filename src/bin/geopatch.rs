use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geopatch::core::stitch::fallback_advice;
use geopatch::{MergeMethod, PatchExtractor, PipelineConfig, ScenePipeline, Stitcher};
use log::{debug, error, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "geopatch", version, about = "Prepare raster patches and stitch predictions")]
struct Cli {
    /// Pipeline configuration (YAML); built-in defaults when omitted
    #[arg(long, global = true, env = "GEOPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Acquisition year
    #[arg(long, global = true)]
    year: Option<u32>,

    /// Area-of-interest tag
    #[arg(long, global = true)]
    aoi: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Align, mosaic, stack and tile a scene
    Prepare,

    /// Cut a single raster into patches
    Extract {
        /// Input raster
        input: PathBuf,

        /// Output folder for patches + manifest
        output_dir: PathBuf,

        #[arg(long)]
        patch_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,

        /// Keep truncated patches at the right and bottom edges
        #[arg(long)]
        keep_partial: bool,

        /// 1-based bands to keep, e.g. "1,2,3,4"
        #[arg(long, value_delimiter = ',')]
        bands: Option<Vec<usize>>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Reassemble predicted patches into one mosaic
    Stitch {
        /// Directory of predicted patches; the configured prediction directory by default
        patch_dir: Option<PathBuf>,

        /// Output mosaic; the configured stitched path by default
        output: Option<PathBuf>,

        /// Overlap rule: first, last, min or max
        #[arg(long, value_parser = parse_method)]
        method: Option<MergeMethod>,

        #[arg(long)]
        max_open_files: Option<usize>,

        #[arg(long)]
        chunk_threshold: Option<usize>,

        #[arg(long)]
        chunk_size: Option<usize>,
    },
}

fn parse_method(s: &str) -> Result<MergeMethod, String> {
    match s.to_ascii_lowercase().as_str() {
        "first" => Ok(MergeMethod::First),
        "last" => Ok(MergeMethod::Last),
        "min" => Ok(MergeMethod::Min),
        "max" => Ok(MergeMethod::Max),
        other => Err(format!("unknown merge method '{}'", other)),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(year) = cli.year {
        config.year = year;
    }
    if let Some(aoi) = &cli.aoi {
        config.aoi = aoi.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    debug!("Parsed CLI args: {:?}", cli);
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Prepare => {
            let pipeline = ScenePipeline::new(config)?;
            let scene = pipeline.prepare()?;
            info!(
                "Scene ready: {} ({} patches in {})",
                scene.combined.display(),
                scene.manifest.len(),
                pipeline.config().patch_dir().display()
            );
        }
        Command::Extract {
            input,
            output_dir,
            patch_size,
            overlap,
            keep_partial,
            bands,
            workers,
        } => {
            let mut options = config.patches.clone();
            if let Some(size) = patch_size {
                options.patch_size = size;
            }
            if let Some(overlap) = overlap {
                options.overlap = overlap;
            }
            if keep_partial {
                options.skip_partial = false;
            }
            if bands.is_some() {
                options.bands = bands;
            }
            if workers.is_some() {
                options.workers = workers;
            }
            let manifest = PatchExtractor::new(options).extract(&input, &output_dir)?;
            info!("Wrote {} patches to {}", manifest.len(), output_dir.display());
        }
        Command::Stitch {
            patch_dir,
            output,
            method,
            max_open_files,
            chunk_threshold,
            chunk_size,
        } => {
            if let Some(method) = method {
                config.stitch.method = method;
            }
            if let Some(n) = max_open_files {
                config.stitch.max_open_files = n;
            }
            if let Some(n) = chunk_threshold {
                config.stitch.chunk_threshold = n;
            }
            if let Some(n) = chunk_size {
                config.stitch.chunk_size = n;
            }
            let patch_dir = patch_dir.unwrap_or_else(|| config.prediction_dir());
            let output = output.unwrap_or_else(|| config.stitched_path());

            match Stitcher::new(config.stitch.clone()).stitch(&patch_dir, &output) {
                Ok(report) => info!(
                    "Mosaic saved to {} ({}x{}, {} fragments, {:?})",
                    report.output.display(),
                    report.width,
                    report.height,
                    report.fragments,
                    report.strategy
                ),
                Err(e) => {
                    error!("Failed to stitch patches: {}", e);
                    eprintln!("Consider one of the following alternatives:");
                    for (i, hint) in fallback_advice(&patch_dir, &output).iter().enumerate() {
                        eprintln!("  [{}] {}", i + 1, hint);
                    }
                    bail!("stitching {} failed", patch_dir.display());
                }
            }
        }
    }
    Ok(())
}
