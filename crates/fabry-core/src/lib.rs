pub mod error;
pub mod consts;
pub mod hash;
pub mod cube;
pub mod stats;
pub mod pixels;
pub mod overscan;
pub mod continuum;
pub mod barycenter;
pub mod noise;
pub mod rings;
pub mod fit;
pub mod fsr;
pub mod calibration;
pub mod registry;
pub mod cache;
pub mod synth;
pub mod io;
pub mod pipeline;

pub use cube::{Cube, CubeSource, Map2, NoiseMask, OrderMap, PlaneMap};
pub use error::{FabryError, Result};
pub use pipeline::{PhaseMapPipeline, PipelineConfig, PipelineOutput, PipelineStatus};
