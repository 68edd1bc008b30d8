use std::sync::Arc;
use std::time::Duration;

use crate::calibration::CalibrationReport;
use crate::cube::{Cube, NoiseMask, OrderMap, PlaneMap};
use crate::fit::{AiryFitResult, ParabolicFit};
use crate::rings::{RingCenter, RingGeometry};

/// Pipeline processing stage, used for progress reporting and thread names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Overscan,
    Continuum,
    Discontinuum,
    Barycenter,
    Noise,
    Rings,
    AiryFit,
    BorderMap,
    OrderMap,
    Unwrap,
    ParabolicFit,
    Calibration,
}

impl PipelineStage {
    /// Short lowercase identifier.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Overscan => "overscan",
            Self::Continuum => "continuum",
            Self::Discontinuum => "discontinuum",
            Self::Barycenter => "barycenter",
            Self::Noise => "noise",
            Self::Rings => "rings",
            Self::AiryFit => "airy",
            Self::BorderMap => "border",
            Self::OrderMap => "order",
            Self::Unwrap => "unwrap",
            Self::ParabolicFit => "parabola",
            Self::Calibration => "calibration",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overscan => write!(f, "Trimming overscan"),
            Self::Continuum => write!(f, "Estimating continuum"),
            Self::Discontinuum => write!(f, "Removing continuum"),
            Self::Barycenter => write!(f, "Computing wrapped phase"),
            Self::Noise => write!(f, "Detecting noise"),
            Self::Rings => write!(f, "Finding rings"),
            Self::AiryFit => write!(f, "Fitting Airy model"),
            Self::BorderMap => write!(f, "Mapping ring borders"),
            Self::OrderMap => write!(f, "Building order map"),
            Self::Unwrap => write!(f, "Unwrapping phase"),
            Self::ParabolicFit => write!(f, "Fitting paraboloid"),
            Self::Calibration => write!(f, "Calibrating wavelength"),
        }
    }
}

/// Thread-safe progress reporting for the pipeline.
///
/// Stages may run concurrently, so every callback names its stage. All
/// methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A stage has started. `total_items` is the number of work items, if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// Work items completed within a stage.
    fn advance(&self, _stage: PipelineStage, _items_done: usize) {}

    /// The stage is finished.
    fn finish_stage(&self, _stage: PipelineStage) {}
}

/// No-op progress reporter.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// A degraded condition the pipeline recovered from.
#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// Fewer rings than the fit or `min_rings` needs.
    InsufficientRings { found: usize, required: usize },
    /// No interior ring; the image center stood in.
    CenterFallback,
    /// Detected center too far from the expected one.
    CenterVerificationFailed {
        detected: RingCenter,
        expected: RingCenter,
        error: f64,
        tolerance: f64,
    },
    /// Plane 0 of the Airy fit failed; fitting disabled for this run.
    AiryFitFailed { reason: String },
    /// Later Airy planes that kept their predecessor's parameters.
    AiryPlanesNotConverged { planes: Vec<usize> },
    ParabolicFitSkipped { reason: String },
    /// The order map fell back to all zeros.
    NoRingsForOrderMap,
    /// Calibration copied the unwrapped map unchanged.
    CalibrationPassThrough { reason: String },
    /// A stage returned an error and its product is unset.
    StageFailed { stage: PipelineStage, reason: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientRings { found, required } => {
                write!(f, "insufficient rings: found {found}, need {required}")
            }
            Self::CenterFallback => write!(f, "no interior ring; image center used"),
            Self::CenterVerificationFailed {
                detected,
                expected,
                error,
                tolerance,
            } => write!(
                f,
                "center {detected} is {error:.2} px from {expected} (tolerance {tolerance:.2} px)"
            ),
            Self::AiryFitFailed { reason } => write!(f, "Airy fit failed: {reason}"),
            Self::AiryPlanesNotConverged { planes } => {
                write!(f, "Airy fit kept previous parameters for planes {planes:?}")
            }
            Self::ParabolicFitSkipped { reason } => write!(f, "parabolic fit skipped: {reason}"),
            Self::NoRingsForOrderMap => write!(f, "no ring radii; order map is all zeros"),
            Self::CalibrationPassThrough { reason } => {
                write!(f, "calibration passed the unwrapped map through: {reason}")
            }
            Self::StageFailed { stage, reason } => write!(f, "{} failed: {reason}", stage.slug()),
        }
    }
}

/// How far the run got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Every requested stage ran (possibly degraded; see diagnostics).
    Complete,
    /// Stopped after unwrapping on request.
    UnwrappedOnly,
    /// Stopped after the ring finder.
    CenterVerificationFailed,
    /// The input was not a usable cube; nothing was produced.
    InvalidInput,
    /// A stage without a fallback failed; products up to it are set.
    Failed,
}

/// Every product of one run. Unset products were not reached or not requested.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub status: PipelineStatus,
    pub trimmed: Option<Arc<Cube>>,
    pub continuum: Option<Arc<PlaneMap>>,
    pub discontinuum: Option<Arc<Cube>>,
    pub wrapped: Option<Arc<PlaneMap>>,
    pub noise: Option<Arc<NoiseMask>>,
    pub rings: Option<Arc<RingGeometry>>,
    pub airy: Option<Arc<AiryFitResult>>,
    /// `pixel_size / b` from the Airy fit, in microns.
    pub focal_length_um: Option<f64>,
    /// Trimmed cube with `channel_subset` planes replaced by the Airy model.
    pub substituted: Option<Arc<Cube>>,
    pub border: Option<Arc<PlaneMap>>,
    pub order: Option<Arc<OrderMap>>,
    pub unwrapped: Option<Arc<PlaneMap>>,
    pub parabola: Option<Arc<ParabolicFit>>,
    pub calibrated: Option<Arc<PlaneMap>>,
    pub calibration: Option<CalibrationReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed: Duration,
}

impl PipelineOutput {
    pub fn new(status: PipelineStatus) -> Self {
        Self {
            status,
            trimmed: None,
            continuum: None,
            discontinuum: None,
            wrapped: None,
            noise: None,
            rings: None,
            airy: None,
            focal_length_um: None,
            substituted: None,
            border: None,
            order: None,
            unwrapped: None,
            parabola: None,
            calibrated: None,
            calibration: None,
            diagnostics: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn has_diagnostic(&self, predicate: impl Fn(&Diagnostic) -> bool) -> bool {
        self.diagnostics.iter().any(predicate)
    }

    /// Number of planes of the processed cube (the phase period).
    pub fn planes(&self) -> Option<usize> {
        self.trimmed.as_ref().map(|c| c.planes())
    }
}
