//! Free-spectral-range bookkeeping: ring borders, order map and unwrapping.

pub mod border;
pub mod order;
pub mod unwrap;

pub use border::{border_distance_map, nearest_radius};
pub use order::{border_thickness, dedup_radii, order_map, FsrMapper, OrderMapSettings, ScanDirection};
pub use unwrap::unwrap_phase;
