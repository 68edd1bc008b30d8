/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Default fraction of the scan used to estimate the continuum.
pub const DEFAULT_CONTINUUM_TO_FSR_RATIO: f64 = 0.125;

/// Default radius (pixels) of the disk painted around each noise pixel.
pub const DEFAULT_NOISE_MASK_RADIUS: usize = 1;

/// Default minimum number of rings the finder must return.
pub const DEFAULT_MIN_RINGS: usize = 1;

/// Default gradient percentile separating ring edges from inter-ring regions.
pub const DEFAULT_RING_MINIMAL_PERCENTILE: u8 = 50;

/// Connected regions smaller than this fraction of the image are discarded.
pub const RING_MIN_REGION_FRACTION: f64 = 0.01;

/// A ring must span at least this fraction of the image on both axes.
pub const RING_MIN_SPAN_FRACTION: f64 = 0.25;

/// Clipped arcs count as rings when the spread of their pixel distances to
/// the center stays below this fraction of the local ring spacing.
pub const RING_ARC_SPREAD_OF_SPACING: f64 = 0.3;

/// Same limit as a fraction of the arc radius, used when fewer than two
/// interior rings fix the spacing.
pub const RING_ARC_MAX_SPREAD: f64 = 0.10;

/// Ring pieces whose mean radii differ by less than this fraction of the
/// local ring spacing are merged into one ring.
pub const RING_MERGE_FRACTION_OF_SPACING: f64 = 0.5;

/// Relative merge distance used when the spacing is unknown.
pub const RING_MERGE_RELATIVE: f64 = 0.05;

/// Radii closer than this relative distance are merged by the FSR mapper.
pub const RING_DEDUP_RELATIVE: f64 = 0.10;

/// Minimum half-thickness (pixels) of the border band used by the FSR mapper.
pub const FSR_MIN_BORDER_THICKNESS: f64 = 10.0;

/// Border band half-thickness as a fraction of the smallest ring spacing.
pub const FSR_BORDER_SPACING_FRACTION: f64 = 0.25;

/// Upper bound of the border band as a fraction of the smallest ring spacing.
/// Above half the spacing the nearest-ring rule becomes ambiguous.
pub const FSR_BORDER_MAX_SPACING_FRACTION: f64 = 0.45;

/// Conversion factor between Gaussian sigma and full width at half height.
pub const FWHH_PER_SIGMA: f64 = 2.35482;

/// Half-width of the Gaussian-fit barycenter window, in FWHH.
pub const GAUSSIAN_WINDOW_FWHH: f64 = 4.0;

/// Default iteration cap for every iterative fitter.
pub const DEFAULT_MAX_FIT_ITERATIONS: usize = 1000;

/// Bound on the pixel/focal ratio during the first Airy fit (relative).
pub const AIRY_B_RELATIVE_BOUND: f64 = 0.10;

/// Bound on the ring center during the first Airy fit (pixels).
pub const AIRY_CENTER_BOUND_PX: f64 = 50.0;

/// Bound on the finesse during the first Airy fit (relative).
pub const AIRY_FINESSE_RELATIVE_BOUND: f64 = 0.10;

/// Monotone gap window for planes after the middle one, in multiples of the channel gap.
pub const AIRY_GAP_STEP_WINDOW: f64 = 10.0;

/// Number of trial gaps per Airy fringe width during the gap grid scan.
pub const AIRY_SCAN_SAMPLES_PER_FRINGE: f64 = 4.0;

/// Upper percentile used to seed the Airy peak intensity.
pub const AIRY_INTENSITY_PERCENTILE: f64 = 99.0;

/// Angstrom to micron.
pub const ANGSTROM_TO_MICRON: f64 = 1e-4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;
