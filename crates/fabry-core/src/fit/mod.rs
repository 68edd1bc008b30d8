pub mod airy;
pub mod parabola;
pub mod queue;
pub mod solver;

pub use airy::{fit_airy, AiryFitAlgorithm, AiryFitResult, AiryParams, AirySettings};
pub use parabola::{fit_paraboloid, ParabolaCoefficients, ParabolicFit};
pub use queue::{FitTicket, FitterQueue};
pub use solver::{solve_bounded, Bounds, FitOutcome, ResidualModel};
