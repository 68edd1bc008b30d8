//! Concentric ring detection (center, ordered radii and ring masks).

pub mod finder;
pub mod regions;

pub use finder::{find_rings, RingCenter, RingCenterFinder, RingGeometry, RingMask};
pub use regions::{label_regions, Connectivity, Labeling, Region};
