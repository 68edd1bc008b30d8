use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use fabry_core::cube::{Map2, MapElement};
use fabry_core::fsr::ScanDirection;
use fabry_core::io::{read_cube, save_preview, write_cube, write_map};
use fabry_core::pipeline::{PhaseMapPipeline, PipelineConfig, PipelineOutput, PipelineStatus};
use fabry_core::registry::Registry;

use crate::progress::StageProgress;
use crate::summary::{print_config_summary, print_run_summary};

#[derive(Clone, Copy, ValueEnum)]
pub enum PreviewFormat {
    Png,
    Tiff,
}

impl PreviewFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DirectionArg {
    Outward,
    Inward,
}

#[derive(Args)]
pub struct RunArgs {
    /// Input cube file (.fpc)
    pub file: PathBuf,

    /// Pipeline config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output directory for the produced maps
    #[arg(short, long, default_value = "fabry-out")]
    pub output: PathBuf,

    /// Skip the Airy and parabolic fits
    #[arg(long)]
    pub dont_fit: bool,

    /// Stop after unwrapping
    #[arg(long)]
    pub unwrapped_only: bool,

    /// Summed-signal noise threshold
    #[arg(long)]
    pub noise_threshold: Option<f64>,

    /// Gradient percentile used by the ring finder (0-99)
    #[arg(long)]
    pub ring_percentile: Option<u8>,

    /// Comma-separated planes to replace with the fitted Airy model
    #[arg(long)]
    pub channels: Option<String>,

    /// Scan direction when no Airy fit is available
    #[arg(long, value_enum)]
    pub direction: Option<DirectionArg>,

    /// Select an algorithm, as SLOT=NAME (repeatable)
    #[arg(long = "algorithm", value_name = "SLOT=NAME")]
    pub algorithms: Vec<String>,

    /// Also write preview images
    #[arg(long, value_enum)]
    pub preview: Option<PreviewFormat>,

    /// Worker threads for per-pixel stages (defaults to all cores)
    #[arg(long)]
    pub threads: Option<usize>,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = load_config(args)?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure the thread pool")?;
    }

    print_config_summary(&config);

    let cube = read_cube(&args.file)
        .with_context(|| format!("Failed to read cube {}", args.file.display()))?;
    let (planes, rows, cols) = cube.shape();
    println!("  Input {} ({planes} planes, {cols}x{rows})", args.file.display());

    let pipeline = PhaseMapPipeline::new(config)
        .context("Invalid pipeline config")?
        .with_reporter(Arc::new(StageProgress::new()));
    let output = pipeline.run(&cube);

    print_run_summary(&output);
    if output.status == PipelineStatus::InvalidInput {
        bail!("Cube {} could not be processed", args.file.display());
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let written = save_products(&output, &args.output, args.preview)?;
    println!("  {written} products saved to {}", args.output.display());

    Ok(())
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        PipelineConfig::from_toml_str(&contents).context("Invalid pipeline config")?
    } else {
        PipelineConfig::default()
    };

    config.dont_fit |= args.dont_fit;
    config.unwrapped_only |= args.unwrapped_only;
    if args.noise_threshold.is_some() {
        config.noise_threshold = args.noise_threshold;
    }
    if args.ring_percentile.is_some() {
        config.ring_minimal_percentile = args.ring_percentile;
    }
    if let Some(ref channels) = args.channels {
        config.channel_subset = channels
            .split(',')
            .map(|s| s.trim().parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("Invalid channel list '{channels}'"))?;
    }
    if let Some(direction) = args.direction {
        config.scan_direction = Some(match direction {
            DirectionArg::Outward => ScanDirection::Outward,
            DirectionArg::Inward => ScanDirection::Inward,
        });
    }

    if !args.algorithms.is_empty() {
        let mut registry = Registry::new(config.algorithms.clone());
        for entry in &args.algorithms {
            let Some((slot, name)) = entry.split_once('=') else {
                bail!("Expected SLOT=NAME, got '{entry}'");
            };
            registry.select(slot.trim(), name.trim())?;
        }
        config.algorithms = registry.into_selection();
    }

    config.validate()?;
    Ok(config)
}

fn save_map<T: MapElement>(
    map: &Map2<T>,
    dir: &Path,
    name: &str,
    preview: Option<PreviewFormat>,
) -> Result<()> {
    let path = dir.join(format!("{name}.fpc"));
    write_map(&path, map, name).with_context(|| format!("Failed to write {}", path.display()))?;
    if let Some(format) = preview {
        let path = dir.join(format!("{name}.{}", format.extension()));
        save_preview(map, &path).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn save_products(output: &PipelineOutput, dir: &Path, preview: Option<PreviewFormat>) -> Result<usize> {
    let mut written = 0;

    let maps = [
        ("continuum", &output.continuum),
        ("wrapped", &output.wrapped),
        ("border", &output.border),
        ("unwrapped", &output.unwrapped),
        ("calibrated", &output.calibrated),
    ];
    for (name, map) in maps {
        if let Some(map) = map {
            save_map(&**map, dir, name, preview)?;
            written += 1;
        }
    }
    if let Some(noise) = &output.noise {
        save_map(&**noise, dir, "noise", preview)?;
        written += 1;
    }
    if let Some(order) = &output.order {
        save_map(&**order, dir, "order", preview)?;
        written += 1;
    }
    if let Some(parabola) = &output.parabola {
        save_map(&parabola.surface, dir, "paraboloid", preview)?;
        written += 1;
    }
    if let Some(rings) = &output.rings {
        for (i, mask) in rings.masks.iter().enumerate() {
            save_map(mask, dir, &format!("ring{i}"), preview)?;
            written += 1;
        }
    }

    let cubes = [
        ("discontinuum", &output.discontinuum),
        ("substituted", &output.substituted),
    ];
    for (name, cube) in cubes {
        if let Some(cube) = cube {
            let path = dir.join(format!("{name}.fpc"));
            write_cube(&path, cube).with_context(|| format!("Failed to write {}", path.display()))?;
            written += 1;
        }
    }

    Ok(written)
}
