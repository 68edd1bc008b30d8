//! Bounded least squares on `tiny_solver`'s Levenberg-Marquardt optimizer.
//!
//! Every fit has one parameter block. The optimizer works on a shifted and
//! scaled copy of it, `params = origin + scale * x` starting from `x = 0`,
//! so parameters of very different magnitude (a pixel/focal ratio near 1e-3
//! next to a gap of hundreds of microns) are conditioned alike. Parameters
//! whose bounds coincide are fixed in the problem.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tiny_solver::factors::na;
use tiny_solver::Optimizer;

/// Key of the single parameter block.
const PARAMS: &str = "params";

/// Residuals that can be evaluated over any real scalar, including the dual
/// numbers `tiny_solver` differentiates with.
pub trait ResidualModel: Send + Sync + 'static {
    fn num_params(&self) -> usize;

    fn num_residuals(&self) -> usize;

    fn residuals<T: na::RealField>(&self, params: &[T]) -> Vec<T>;
}

/// Box constraints. Equal bounds fix a parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn set(&mut self, j: usize, lower: f64, upper: f64) {
        let (lo, hi) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        self.lower[j] = lo;
        self.upper[j] = hi;
    }

    pub fn fix(&mut self, j: usize, value: f64) {
        self.lower[j] = value;
        self.upper[j] = value;
    }

    pub fn is_fixed(&self, j: usize) -> bool {
        self.lower[j] == self.upper[j]
    }

    pub fn clamp(&self, params: &mut [f64]) {
        for (j, p) in params.iter_mut().enumerate() {
            *p = p.clamp(self.lower[j], self.upper[j]);
        }
    }
}

/// Result of a bounded fit.
#[derive(Clone, Debug)]
pub struct FitOutcome {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
}

/// Adapts a [`ResidualModel`] to the optimizer's factor interface.
struct ScaledFactor<M> {
    model: Arc<M>,
    origin: Vec<f64>,
    scale: Vec<f64>,
}

impl<M> Clone for ScaledFactor<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            origin: self.origin.clone(),
            scale: self.scale.clone(),
        }
    }
}

impl<M> fmt::Debug for ScaledFactor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaledFactor")
            .field("origin", &self.origin)
            .field("scale", &self.scale)
            .finish()
    }
}

impl<T: na::RealField, M: ResidualModel> tiny_solver::factors::Factor<T> for ScaledFactor<M> {
    fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
        let x = &params[0];
        let p: Vec<T> = self
            .origin
            .iter()
            .zip(&self.scale)
            .enumerate()
            .map(|(j, (&origin, &scale))| {
                na::convert::<f64, T>(origin) + na::convert::<f64, T>(scale) * x[j].clone()
            })
            .collect();
        na::DVector::<T>::from_vec(self.model.residuals(&p))
    }
}

/// Sum of squared residuals of `model` at `params`.
pub fn total_cost<M: ResidualModel>(model: &M, params: &[f64]) -> f64 {
    model.residuals(params).iter().map(|r| r * r).sum()
}

/// Minimise the squared residuals of `model` from `start` inside `bounds`.
///
/// `scale` holds a typical step for each parameter. Returns `None` when the
/// optimizer gives up or lands on a non-finite point.
pub fn solve_bounded<M: ResidualModel>(
    model: Arc<M>,
    start: &[f64],
    scale: &[f64],
    bounds: &Bounds,
    max_iterations: usize,
) -> Option<FitOutcome> {
    let n = model.num_params();
    if start.len() != n || scale.len() != n || bounds.lower.len() != n || model.num_residuals() == 0 {
        return None;
    }
    let mut origin = start.to_vec();
    bounds.clamp(&mut origin);
    let scale: Vec<f64> = scale
        .iter()
        .map(|&s| if s.is_finite() && s != 0.0 { s.abs() } else { 1.0 })
        .collect();

    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(
        model.num_residuals(),
        &[PARAMS],
        Box::new(ScaledFactor {
            model: Arc::clone(&model),
            origin: origin.clone(),
            scale: scale.clone(),
        }),
        None,
    );
    for j in 0..n {
        if bounds.is_fixed(j) {
            problem.fix_variable(PARAMS, j);
        } else if bounds.lower[j].is_finite() || bounds.upper[j].is_finite() {
            problem.set_variable_bounds(
                PARAMS,
                j,
                (bounds.lower[j] - origin[j]) / scale[j],
                (bounds.upper[j] - origin[j]) / scale[j],
            );
        }
    }

    let mut initial_values = HashMap::<String, na::DVector<f64>>::new();
    initial_values.insert(PARAMS.to_string(), na::DVector::<f64>::zeros(n));

    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let options = tiny_solver::OptimizerOptions {
        max_iteration: max_iterations.max(1),
        verbosity_level: 0,
        ..Default::default()
    };
    let result = optimizer.optimize(&problem, &initial_values, Some(options))?;
    let x = result.get(PARAMS)?;
    if x.len() != n {
        return None;
    }

    let mut params: Vec<f64> = (0..n).map(|j| origin[j] + scale[j] * x[j]).collect();
    bounds.clamp(&mut params);
    if !params.iter().all(|v| v.is_finite()) {
        return None;
    }
    let cost = total_cost(model.as_ref(), &params);
    cost.is_finite().then_some(FitOutcome { params, cost })
}
