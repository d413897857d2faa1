//! Scaled forward and forward-backward recursions for a 3-state Gaussian HMM
//!
//! Emission densities are evaluated in log space and shifted by their
//! per-step maximum before exponentiation, and forward variables are
//! renormalised at every step, so neither very peaked nor very flat
//! emissions overflow or underflow.

use super::gaussian::Gaussian;
use crate::error::RegimeError;
use crate::models::NUM_REGIMES;
use crate::Result;

pub type StateVector = [f64; NUM_REGIMES];
pub type TransitionMatrix = [[f64; NUM_REGIMES]; NUM_REGIMES];

/// Emission likelihoods rescaled per time step
struct ScaledEmissions {
    /// exp(log b_j(x_t) - offset_t)
    probs: Vec<StateVector>,
    /// max_j log b_j(x_t)
    offsets: Vec<f64>,
}

fn scaled_emissions(observations: &[f64], emissions: &[Gaussian; NUM_REGIMES]) -> Result<ScaledEmissions> {
    let mut probs = Vec::with_capacity(observations.len());
    let mut offsets = Vec::with_capacity(observations.len());

    for (t, &x) in observations.iter().enumerate() {
        let mut log_b = [0.0; NUM_REGIMES];
        for (j, emission) in emissions.iter().enumerate() {
            log_b[j] = emission.log_pdf(x);
        }

        let offset = log_b.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !offset.is_finite() {
            return Err(RegimeError::Fitting(format!(
                "emission likelihood is not finite at step {} (x = {})",
                t, x
            )));
        }

        let mut b = [0.0; NUM_REGIMES];
        for j in 0..NUM_REGIMES {
            b[j] = (log_b[j] - offset).exp();
        }
        probs.push(b);
        offsets.push(offset);
    }

    Ok(ScaledEmissions { probs, offsets })
}

/// Output of the forward recursion
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// Filtered state probabilities P(s_t | x_1..x_t), each row sums to 1
    pub alpha: Vec<StateVector>,
    /// Per-step normalisers of the shifted forward variables
    pub scale: Vec<f64>,
    pub log_likelihood: f64,
}

impl ForwardPass {
    /// Filtered distribution at the final step
    pub fn last(&self) -> Option<&StateVector> {
        self.alpha.last()
    }
}

/// Forward algorithm with per-step normalisation
pub fn forward(
    observations: &[f64],
    initial: &StateVector,
    transition: &TransitionMatrix,
    emissions: &[Gaussian; NUM_REGIMES],
) -> Result<ForwardPass> {
    let emission = scaled_emissions(observations, emissions)?;
    forward_scaled(&emission, initial, transition)
}

fn forward_scaled(
    emission: &ScaledEmissions,
    initial: &StateVector,
    transition: &TransitionMatrix,
) -> Result<ForwardPass> {
    let t_len = emission.probs.len();
    let mut alpha = Vec::with_capacity(t_len);
    let mut scale = Vec::with_capacity(t_len);
    let mut log_likelihood = 0.0;

    for t in 0..t_len {
        let mut a = [0.0; NUM_REGIMES];
        for j in 0..NUM_REGIMES {
            let prior = if t == 0 {
                initial[j]
            } else {
                let prev: &StateVector = &alpha[t - 1];
                (0..NUM_REGIMES).map(|i| prev[i] * transition[i][j]).sum::<f64>()
            };
            a[j] = prior * emission.probs[t][j];
        }

        let c: f64 = a.iter().sum();
        if !(c > 0.0) || !c.is_finite() {
            return Err(RegimeError::Fitting(format!(
                "forward recursion degenerated at step {}",
                t
            )));
        }
        for v in a.iter_mut() {
            *v /= c;
        }

        log_likelihood += c.ln() + emission.offsets[t];
        alpha.push(a);
        scale.push(c);
    }

    Ok(ForwardPass {
        alpha,
        scale,
        log_likelihood,
    })
}

/// Sufficient statistics of one E-step
#[derive(Debug, Clone)]
pub struct Expectation {
    /// Smoothed state posteriors P(s_t | x_1..x_T)
    pub gamma: Vec<StateVector>,
    /// Expected transition counts summed over time
    pub xi_sum: TransitionMatrix,
    pub log_likelihood: f64,
}

/// Forward-backward pass computing state occupancies and transition counts
pub fn forward_backward(
    observations: &[f64],
    initial: &StateVector,
    transition: &TransitionMatrix,
    emissions: &[Gaussian; NUM_REGIMES],
) -> Result<Expectation> {
    let emission = scaled_emissions(observations, emissions)?;
    let fwd = forward_scaled(&emission, initial, transition)?;
    let t_len = observations.len();

    // Backward pass, scaled with the forward normalisers
    let mut beta = vec![[1.0; NUM_REGIMES]; t_len];
    for t in (0..t_len.saturating_sub(1)).rev() {
        for i in 0..NUM_REGIMES {
            let mut sum = 0.0;
            for j in 0..NUM_REGIMES {
                sum += transition[i][j] * emission.probs[t + 1][j] * beta[t + 1][j];
            }
            beta[t][i] = sum / fwd.scale[t + 1];
        }
    }

    let mut gamma = Vec::with_capacity(t_len);
    for t in 0..t_len {
        let mut g = [0.0; NUM_REGIMES];
        for j in 0..NUM_REGIMES {
            g[j] = fwd.alpha[t][j] * beta[t][j];
        }
        let sum: f64 = g.iter().sum();
        if !(sum > 0.0) || !sum.is_finite() {
            return Err(RegimeError::Fitting(format!(
                "state posterior degenerated at step {}",
                t
            )));
        }
        for v in g.iter_mut() {
            *v /= sum;
        }
        gamma.push(g);
    }

    let mut xi_sum = [[0.0; NUM_REGIMES]; NUM_REGIMES];
    for t in 0..t_len.saturating_sub(1) {
        for i in 0..NUM_REGIMES {
            for j in 0..NUM_REGIMES {
                xi_sum[i][j] += fwd.alpha[t][i]
                    * transition[i][j]
                    * emission.probs[t + 1][j]
                    * beta[t + 1][j]
                    / fwd.scale[t + 1];
            }
        }
    }

    Ok(Expectation {
        gamma,
        xi_sum,
        log_likelihood: fwd.log_likelihood,
    })
}
