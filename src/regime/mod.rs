// Market regime detection module
pub mod algorithms;
pub mod gaussian;
pub mod hmm;
pub mod state;

pub use gaussian::Gaussian;
pub use hmm::{FitSummary, GaussianHmm, HmmConfig, HmmParams};
pub use state::ModelState;
