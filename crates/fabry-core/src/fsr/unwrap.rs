use ndarray::Zip;
use tracing::info;

use crate::cube::{OrderMap, PlaneMap};
use crate::error::{FabryError, Result};

/// `unwrapped = wrapped + period * order`.
pub fn unwrap_phase(wrapped: &PlaneMap, order: &OrderMap, period: f64) -> Result<PlaneMap> {
    if wrapped.dim() != order.dim() {
        return Err(FabryError::DimensionMismatch {
            expected: wrapped.dim(),
            found: order.dim(),
        });
    }
    let mut out = wrapped.array().to_owned();
    Zip::from(&mut out)
        .and(&order.array())
        .par_for_each(|v, &n| *v += period * n as f64);
    info!(period, max_order = order.max_order(), "Phase unwrapped");
    Ok(PlaneMap::new(out))
}
