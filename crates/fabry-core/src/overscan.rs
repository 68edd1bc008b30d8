use ndarray::s;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cube::Cube;
use crate::error::{FabryError, Result};

/// Pre-step removing detector overscan before any measurement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Overscan {
    /// Pass the cube through unchanged.
    #[default]
    None,
    /// Drop a fixed number of rows/columns on each side of every plane.
    Trim {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    },
}

impl Overscan {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Trim { .. } => "trim",
        }
    }
}

impl std::fmt::Display for Overscan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Trim {
                top,
                bottom,
                left,
                right,
            } => write!(f, "Trim (t{top} b{bottom} l{left} r{right})"),
        }
    }
}

/// Apply the overscan step. `Overscan::None` returns a clone sharing the hash.
pub fn apply_overscan(cube: &Cube, overscan: &Overscan) -> Result<Cube> {
    match overscan {
        Overscan::None => Ok(cube.clone()),
        Overscan::Trim {
            top,
            bottom,
            left,
            right,
        } => {
            let (_, h, w) = cube.shape();
            if top + bottom >= h || left + right >= w {
                return Err(FabryError::InvalidConfig(format!(
                    "overscan trim ({top}, {bottom}, {left}, {right}) leaves no pixels in a {h}x{w} plane"
                )));
            }
            let trimmed = cube
                .array()
                .slice(s![.., *top..h - bottom, *left..w - right])
                .to_owned();
            debug!(rows = h - top - bottom, cols = w - left - right, "Overscan trimmed");
            let mut out = Cube::new(trimmed)?;
            if let Some(path) = cube.source() {
                out = out.with_source(path);
            }
            for (k, v) in cube.metadata() {
                out = out.with_metadata(k.clone(), v.clone());
            }
            Ok(out)
        }
    }
}
