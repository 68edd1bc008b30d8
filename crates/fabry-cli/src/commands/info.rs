use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fabry_core::io::CubeFile;

#[derive(Args)]
pub struct InfoArgs {
    /// Input cube file (.fpc)
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let file = CubeFile::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let header = &file.header;

    println!("File:        {}", args.file.display());
    println!("Planes:      {}", header.planes);
    println!("Dimensions:  {}x{}", header.cols, header.rows);

    let cube = file.read_cube()?;
    println!("Hash:        {}", cube.hash());
    let summed = cube.summed();
    let (lo, hi) = summed
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo <= hi {
        println!("Summed:      {:.1} .. {:.1}", lo, hi);
    }

    for (key, value) in &header.metadata {
        println!("{:<12} {}", format!("{key}:"), value);
    }

    let total_mb = (header.planes * header.rows * header.cols * 4) as f64 / (1024.0 * 1024.0);
    println!("Data size:   {:.1} MB", total_mb);

    Ok(())
}
