use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fabry_core::io::write_cube;
use fabry_core::synth::{AiryCubeBuilder, DEFAULT_SYNTH_WAVELENGTH};

#[derive(Args)]
pub struct SynthArgs {
    /// Output cube file (.fpc)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Image height in pixels
    #[arg(long, default_value = "256")]
    pub rows: usize,

    /// Image width in pixels
    #[arg(long, default_value = "256")]
    pub cols: usize,

    /// Number of scan channels
    #[arg(long, default_value = "48")]
    pub planes: usize,

    /// Calibration wavelength in Angstrom
    #[arg(long, default_value_t = DEFAULT_SYNTH_WAVELENGTH)]
    pub wavelength: f64,

    /// Etalon finesse
    #[arg(long, default_value = "15")]
    pub finesse: f64,

    /// Ring center column (defaults to the image center)
    #[arg(long)]
    pub center_x: Option<f64>,

    /// Ring center row (defaults to the image center)
    #[arg(long)]
    pub center_y: Option<f64>,

    /// Constant background level
    #[arg(long, default_value = "10")]
    pub continuum: f64,

    /// Peak intensity above the background
    #[arg(long, default_value = "1000")]
    pub intensity: f64,
}

pub fn run(args: &SynthArgs) -> Result<()> {
    let mut builder = AiryCubeBuilder::new(args.rows, args.cols, args.planes)
        .wavelength_angstrom(args.wavelength)
        .finesse(args.finesse)
        .continuum(args.continuum)
        .intensity(args.intensity);
    if args.center_x.is_some() || args.center_y.is_some() {
        let x = args.center_x.unwrap_or((args.cols as f64 - 1.0) / 2.0);
        let y = args.center_y.unwrap_or((args.rows as f64 - 1.0) / 2.0);
        builder = builder.center(x, y);
    }

    let cube = builder.build().context("Failed to generate synthetic cube")?;
    write_cube(&args.output, &cube)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!(
        "Synthetic cube {}x{}x{} saved to {}",
        args.planes,
        args.rows,
        args.cols,
        args.output.display()
    );
    println!("Ring radii (plane 0): {:.1?}", builder.ring_radii(0));

    Ok(())
}
