//! Named algorithm slots and the selection used by the pipeline.

use serde::{Deserialize, Serialize};

use crate::barycenter::BarycenterAlgorithm;
use crate::continuum::ContinuumDetector;
use crate::error::{FabryError, Result};
use crate::fit::AiryFitAlgorithm;
use crate::fsr::FsrMapper;
use crate::noise::NoiseDetector;
use crate::overscan::Overscan;
use crate::rings::RingCenterFinder;

/// A substitutable stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Overscan,
    ContinuumDetector,
    BarycenterAlgorithm,
    NoiseDetector,
    RingCenterFinder,
    AiryFit,
    FsrMapper,
}

impl Slot {
    pub const ALL: [Slot; 7] = [
        Slot::Overscan,
        Slot::ContinuumDetector,
        Slot::BarycenterAlgorithm,
        Slot::NoiseDetector,
        Slot::RingCenterFinder,
        Slot::AiryFit,
        Slot::FsrMapper,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Overscan => "Overscan",
            Self::ContinuumDetector => "Continuum detector",
            Self::BarycenterAlgorithm => "Barycenter algorithm",
            Self::NoiseDetector => "Noise detector",
            Self::RingCenterFinder => "Ring center finder",
            Self::AiryFit => "Airy fit",
            Self::FsrMapper => "FSR mapper",
        }
    }

    /// Names of the implementations registered for this slot.
    pub fn implementations(&self) -> &'static [&'static str] {
        match self {
            Self::Overscan => &["none", "trim"],
            Self::ContinuumDetector => &["lowest-median"],
            Self::BarycenterAlgorithm => &["peak-segment", "gaussian-fit"],
            Self::NoiseDetector => &["summed-threshold"],
            Self::RingCenterFinder => &["edge-regions"],
            Self::AiryFit => &["sequential-planes"],
            Self::FsrMapper => &["nearest-border"],
        }
    }

    /// Resolve a slot key; matching ignores case.
    pub fn from_key(key: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.key().eq_ignore_ascii_case(key.trim()))
            .ok_or_else(|| FabryError::UnknownSlot(key.to_string()))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// The implementation chosen for every slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmSelection {
    pub overscan: Overscan,
    pub continuum: ContinuumDetector,
    pub barycenter: BarycenterAlgorithm,
    pub noise: NoiseDetector,
    pub ring_finder: RingCenterFinder,
    pub airy: AiryFitAlgorithm,
    pub fsr: FsrMapper,
}

impl AlgorithmSelection {
    /// Name of the implementation currently selected for `slot`.
    pub fn selected(&self, slot: Slot) -> &'static str {
        match slot {
            Slot::Overscan => self.overscan.name(),
            Slot::ContinuumDetector => self.continuum.name(),
            Slot::BarycenterAlgorithm => self.barycenter.name(),
            Slot::NoiseDetector => self.noise.name(),
            Slot::RingCenterFinder => self.ring_finder.name(),
            Slot::AiryFit => self.airy.name(),
            Slot::FsrMapper => self.fsr.name(),
        }
    }
}

/// Name-based access to an [`AlgorithmSelection`].
#[derive(Clone, Debug, Default)]
pub struct Registry {
    selection: AlgorithmSelection,
}

impl Registry {
    pub fn new(selection: AlgorithmSelection) -> Self {
        Self { selection }
    }

    /// Every slot with its registered implementation names.
    pub fn slots() -> Vec<(Slot, &'static [&'static str])> {
        Slot::ALL.into_iter().map(|s| (s, s.implementations())).collect()
    }

    /// Select implementation `name` for the slot keyed `slot`.
    ///
    /// Selecting `trim` keeps existing trim margins, or starts from zero margins.
    pub fn select(&mut self, slot: &str, name: &str) -> Result<()> {
        let slot = Slot::from_key(slot)?;
        let unknown = || FabryError::UnknownAlgorithm {
            slot: slot.key().to_string(),
            name: name.to_string(),
        };
        let s = &mut self.selection;
        match (slot, name.trim()) {
            (Slot::Overscan, "none") => s.overscan = Overscan::None,
            (Slot::Overscan, "trim") => {
                if !matches!(s.overscan, Overscan::Trim { .. }) {
                    s.overscan = Overscan::Trim {
                        top: 0,
                        bottom: 0,
                        left: 0,
                        right: 0,
                    };
                }
            }
            (Slot::ContinuumDetector, "lowest-median") => {
                s.continuum = ContinuumDetector::LowestChannelsMedian
            }
            (Slot::BarycenterAlgorithm, "peak-segment") => {
                s.barycenter = BarycenterAlgorithm::PeakSegment
            }
            (Slot::BarycenterAlgorithm, "gaussian-fit") => {
                s.barycenter = BarycenterAlgorithm::GaussianFit
            }
            (Slot::NoiseDetector, "summed-threshold") => s.noise = NoiseDetector::SummedThreshold,
            (Slot::RingCenterFinder, "edge-regions") => s.ring_finder = RingCenterFinder::EdgeRegions,
            (Slot::AiryFit, "sequential-planes") => s.airy = AiryFitAlgorithm::SequentialPlanes,
            (Slot::FsrMapper, "nearest-border") => s.fsr = FsrMapper::NearestBorder,
            _ => return Err(unknown()),
        }
        Ok(())
    }

    pub fn selection(&self) -> &AlgorithmSelection {
        &self.selection
    }

    pub fn into_selection(self) -> AlgorithmSelection {
        self.selection
    }
}
