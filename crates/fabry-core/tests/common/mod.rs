use fabry_core::cube::Cube;
use fabry_core::pipeline::PipelineConfig;
use fabry_core::synth::AiryCubeBuilder;
use ndarray::Array3;

/// Central order matching the default calibration constants
/// (`round(791 * 6562.78 / 6598.95) = 787`).
pub const CALIBRATION_CENTRAL_ORDER: f64 = 787.25;

/// Centered synthetic Airy cube whose plane-0 rings have the orders the
/// default calibration settings expect.
pub fn airy_builder(size: usize, planes: usize) -> AiryCubeBuilder {
    AiryCubeBuilder::new(size, size, planes).central_order(CALIBRATION_CENTRAL_ORDER)
}

pub fn airy_cube(size: usize, planes: usize) -> Cube {
    airy_builder(size, planes).build().unwrap()
}

/// Cube whose every pixel holds the same spectrum.
pub fn uniform_spectrum_cube(spectrum: &[f32], rows: usize, cols: usize) -> Cube {
    let data = Array3::from_shape_fn((spectrum.len(), rows, cols), |(p, _, _)| spectrum[p]);
    Cube::new(data).unwrap()
}

/// Cube built from a per-voxel function of `(plane, row, col)`.
pub fn cube_from_fn(planes: usize, rows: usize, cols: usize, f: impl Fn(usize, usize, usize) -> f32) -> Cube {
    Cube::new(Array3::from_shape_fn((planes, rows, cols), |(p, r, c)| f(p, r, c))).unwrap()
}

/// Default instrument constants with both fits disabled.
pub fn no_fit_config() -> PipelineConfig {
    PipelineConfig {
        dont_fit: true,
        ..PipelineConfig::default()
    }
}

/// Unwrapped phase of an outward scan at distance `d` from the axis.
pub fn expected_unwrapped(builder: &AiryCubeBuilder, planes: usize, d: f64) -> f64 {
    let m0 = builder.central_order_of(0);
    let b = builder.params_for_plane(0).b;
    let m = m0 / (1.0 + b * b * d * d).sqrt();
    let p = planes as f64;
    p * (1.0 - m0.fract()) + p * (m0 - m)
}
