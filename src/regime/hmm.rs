//! Three-state Gaussian Hidden Markov Model over log-returns
//!
//! Parameters are estimated with Baum-Welch (EM). After every successful fit
//! the states are permuted into the canonical `[bull, bear, sideways]` order:
//! - Bull: highest emission mean
//! - Bear: lowest emission mean
//! - Sideways: the remaining (middle) mean
//!
//! Equal means are ordered by their pre-permutation state index, so the
//! assignment is deterministic for a given input and seed.
//!
//! A pair of states is then merged into one regime when the fit gains almost
//! nothing from telling them apart over time: making the choice between the
//! two independent of the previous state costs less than `merge_tolerance`
//! nats per observation. Data from one stationary regime therefore reports a
//! single regime instead of spreading belief over overlapping states. Merged
//! groups are labelled by drift (mean over standard deviation) against
//! `drift_threshold`.
use super::algorithms::{forward, forward_backward, Expectation, StateVector, TransitionMatrix};
use super::gaussian::Gaussian;
use crate::error::RegimeError;
use crate::indicators::{mean, std_dev};
use crate::models::{BeliefVector, Regime, NUM_REGIMES};
use crate::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Smallest probability kept in the transition matrix and initial distribution
const PROBABILITY_FLOOR: f64 = 1e-8;

/// Fitting and inference settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HmmConfig {
    /// EM iteration cap per attempt
    pub max_iter: usize,
    /// Log-likelihood gain below which EM is considered converged
    pub tol: f64,
    /// Minimum observations per state; fit needs 3x this many
    pub min_obs_per_state: usize,
    /// Minimum inference window length
    pub min_window: usize,
    /// Absolute lower bound on emission variances
    pub variance_floor: f64,
    /// Lower bound on emission variances relative to the sample variance
    pub relative_variance_floor: f64,
    /// Expected observations a state must keep to count as alive
    pub min_state_occupancy: f64,
    /// Re-initialisations tried after a degenerate attempt
    pub n_restarts: usize,
    pub seed: u64,
    /// Largest log-likelihood loss per observation at which two states merge
    pub merge_tolerance: f64,
    /// |mean| / std above which a merged regime counts as trending
    pub drift_threshold: f64,
}

impl Default for HmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-4,
            min_obs_per_state: 10,
            min_window: 5,
            variance_floor: 1e-10,
            relative_variance_floor: 1e-3,
            min_state_occupancy: 1.0,
            n_restarts: 5,
            seed: 42,
            merge_tolerance: 0.02,
            drift_threshold: 0.1,
        }
    }
}

impl HmmConfig {
    /// Minimum feature series length accepted by `fit`
    pub fn min_fit_observations(&self) -> usize {
        NUM_REGIMES * self.min_obs_per_state.max(1)
    }
}

/// Fitted model parameters in canonical state order
///
/// `labels[k]` is the regime state `k` reports to. Without merging this is
/// `[Bull, Bear, Sideways]`; merged states share a label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HmmParams {
    pub initial: StateVector,
    pub transition: TransitionMatrix,
    pub emissions: [Gaussian; NUM_REGIMES],
    pub labels: [Regime; NUM_REGIMES],
}

impl HmmParams {
    /// Emission of the state in the canonical slot of `regime`
    pub fn emission(&self, regime: Regime) -> &Gaussian {
        &self.emissions[regime.index()]
    }

    /// Number of distinct regimes the states report to
    pub fn regime_count(&self) -> usize {
        Regime::ALL
            .iter()
            .filter(|r| self.labels.contains(*r))
            .count()
    }

    /// Reorder states as `[highest mean, lowest mean, middle mean]`
    fn into_canonical(self) -> Self {
        let mut order: Vec<usize> = (0..NUM_REGIMES).collect();
        order.sort_by(|&a, &b| {
            self.emissions[b]
                .mean
                .total_cmp(&self.emissions[a].mean)
                .then(a.cmp(&b))
        });
        let perm = [order[0], order[2], order[1]];

        let mut initial = [0.0; NUM_REGIMES];
        let mut transition = [[0.0; NUM_REGIMES]; NUM_REGIMES];
        let mut emissions = self.emissions;
        for (i, &src_i) in perm.iter().enumerate() {
            initial[i] = self.initial[src_i];
            emissions[i] = self.emissions[src_i];
            for (j, &src_j) in perm.iter().enumerate() {
                transition[i][j] = self.transition[src_i][src_j];
            }
        }

        Self {
            initial,
            transition,
            emissions,
            labels: Regime::ALL,
        }
    }
}

/// Outcome of a successful `fit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    pub n_observations: usize,
    pub iterations: usize,
    pub log_likelihood: f64,
    /// False when the iteration cap was reached first
    pub converged: bool,
    /// Attempts discarded as degenerate before this one
    pub restarts: usize,
    /// Distinct regimes left after merging states
    pub regimes: usize,
}

/// Gaussian HMM with exactly three regimes
#[derive(Debug, Clone)]
pub struct GaussianHmm {
    config: HmmConfig,
    params: Option<HmmParams>,
    summary: Option<FitSummary>,
}

impl Default for GaussianHmm {
    fn default() -> Self {
        Self::new(HmmConfig::default())
    }
}

impl GaussianHmm {
    pub fn new(config: HmmConfig) -> Self {
        Self {
            config,
            params: None,
            summary: None,
        }
    }

    pub fn config(&self) -> &HmmConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    pub fn params(&self) -> Option<&HmmParams> {
        self.params.as_ref()
    }

    pub fn summary(&self) -> Option<&FitSummary> {
        self.summary.as_ref()
    }

    /// Estimate parameters from a log-return series
    ///
    /// On failure the previously fitted parameters (if any) are left untouched.
    pub fn fit(&mut self, features: &[f64]) -> Result<FitSummary> {
        let required = self.config.min_fit_observations();
        if features.is_empty() {
            return Err(RegimeError::Fitting("feature series is empty".to_string()));
        }
        if features.len() < required {
            return Err(RegimeError::Fitting(format!(
                "need at least {} observations to fit {} regimes, got {}",
                required,
                NUM_REGIMES,
                features.len()
            )));
        }
        if let Some(bad) = features.iter().find(|x| !x.is_finite()) {
            return Err(RegimeError::Fitting(format!(
                "feature series contains a non-finite value: {}",
                bad
            )));
        }

        let sample_std = std_dev(features);
        if sample_std < 1e-12 {
            return Err(RegimeError::Fitting(
                "feature series is constant; regimes are not identifiable".to_string(),
            ));
        }
        let variance_floor = self
            .config
            .variance_floor
            .max(self.config.relative_variance_floor * sample_std * sample_std);

        let mut last_error = None;
        for attempt in 0..=self.config.n_restarts {
            let init = self.initial_params(features, attempt, variance_floor);

            match self.run_em(features, init, variance_floor) {
                Ok((params, iterations, converged)) => {
                    let mut params = params.into_canonical();
                    let expectation = forward_backward(
                        features,
                        &params.initial,
                        &params.transition,
                        &params.emissions,
                    )?;
                    let log_likelihood = expectation.log_likelihood;
                    let occupancy = state_occupancy(&expectation);

                    let groups = self.group_states(features, &params, &occupancy, log_likelihood);
                    params.labels = self.label_groups(&params, &occupancy, &groups);

                    let summary = FitSummary {
                        n_observations: features.len(),
                        iterations,
                        log_likelihood,
                        converged,
                        restarts: attempt,
                        regimes: params.regime_count(),
                    };

                    tracing::debug!(
                        "HMM fit: {} obs, {} iterations, ll={:.4}, converged={}, restarts={}, labels={:?}",
                        summary.n_observations,
                        summary.iterations,
                        summary.log_likelihood,
                        summary.converged,
                        summary.restarts,
                        params.labels
                    );
                    if !converged {
                        tracing::debug!(
                            "HMM stopped at the iteration cap ({}) before reaching tol {}",
                            self.config.max_iter,
                            self.config.tol
                        );
                    }

                    self.params = Some(params);
                    self.summary = Some(summary.clone());
                    return Ok(summary);
                }
                Err(e) => {
                    tracing::debug!("HMM attempt {} discarded: {}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        Err(RegimeError::Fitting(format!(
            "no stable solution after {} attempts (last: {})",
            self.config.n_restarts + 1,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }

    /// Filtered regime probabilities at the last observation of `window`
    ///
    /// The forward filter starts from a uniform prior because the window
    /// begins at an arbitrary point of the chain. State probabilities are
    /// summed into the regime each state reports to.
    pub fn predict_proba(&self, window: &[f64]) -> Result<BeliefVector> {
        let params = self.params.as_ref().ok_or(RegimeError::NotFitted)?;

        if window.len() < self.config.min_window {
            return Err(RegimeError::insufficient(
                "regime inference window",
                self.config.min_window,
                window.len(),
            ));
        }
        if let Some(bad) = window.iter().find(|x| !x.is_finite()) {
            return Err(RegimeError::InvalidInput(format!(
                "inference window contains a non-finite value: {}",
                bad
            )));
        }

        let prior = [1.0 / NUM_REGIMES as f64; NUM_REGIMES];
        let pass = forward(window, &prior, &params.transition, &params.emissions)?;
        let last = pass
            .last()
            .ok_or_else(|| RegimeError::insufficient("regime inference window", 1, 0))?;

        let mut weights = [0.0; NUM_REGIMES];
        for (state, p) in last.iter().enumerate() {
            weights[params.labels[state].index()] += p;
        }
        BeliefVector::from_weights(weights)
    }

    /// Log-likelihood of a series under the fitted parameters
    pub fn score(&self, features: &[f64]) -> Result<f64> {
        let params = self.params.as_ref().ok_or(RegimeError::NotFitted)?;
        if features.is_empty() {
            return Err(RegimeError::insufficient("likelihood evaluation", 1, 0));
        }
        Ok(forward(features, &params.initial, &params.transition, &params.emissions)?.log_likelihood)
    }

    /// Quantile-bin initialisation; restarts jitter the bin statistics
    fn initial_params(&self, features: &[f64], attempt: usize, variance_floor: f64) -> HmmParams {
        let mut sorted = features.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let overall_std = std_dev(features);
        let chunk = sorted.len() / NUM_REGIMES;
        let mut emissions = [Gaussian::new(0.0, 1.0); NUM_REGIMES];
        for (k, emission) in emissions.iter_mut().enumerate() {
            let start = k * chunk;
            let end = if k == NUM_REGIMES - 1 {
                sorted.len()
            } else {
                (k + 1) * chunk
            };
            let bin = &sorted[start..end];
            let sd = std_dev(bin);
            *emission = Gaussian::new(mean(bin), (sd * sd).max(variance_floor));
        }

        if attempt > 0 {
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(attempt as u64));
            for emission in emissions.iter_mut() {
                emission.mean += rng.gen_range(-0.5..0.5) * overall_std;
                emission.variance =
                    (overall_std * overall_std * rng.gen_range(0.25..1.0)).max(variance_floor);
            }
        }

        let off_diagonal = 0.1 / (NUM_REGIMES - 1) as f64;
        let mut transition = [[off_diagonal; NUM_REGIMES]; NUM_REGIMES];
        for (i, row) in transition.iter_mut().enumerate() {
            row[i] = 0.9;
        }

        HmmParams {
            initial: [1.0 / NUM_REGIMES as f64; NUM_REGIMES],
            transition,
            emissions,
            labels: Regime::ALL,
        }
    }

    /// Union states whose temporal distinction is not worth `merge_tolerance`
    ///
    /// Returns a group id per state.
    fn group_states(
        &self,
        features: &[f64],
        params: &HmmParams,
        occupancy: &StateVector,
        log_likelihood: f64,
    ) -> [usize; NUM_REGIMES] {
        let tolerance = self.config.merge_tolerance * features.len() as f64;
        let mut groups = [0, 1, 2];

        for i in 0..NUM_REGIMES {
            for j in (i + 1)..NUM_REGIMES {
                let loss = match lumped_log_likelihood(features, params, occupancy, i, j) {
                    Ok(lumped) => log_likelihood - lumped,
                    Err(_) => continue,
                };
                tracing::trace!("Merging states {} and {} costs {:.4} nats", i, j, loss);

                if loss <= tolerance {
                    let (keep, absorbed) = (groups[i], groups[j]);
                    for g in groups.iter_mut() {
                        if *g == absorbed {
                            *g = keep;
                        }
                    }
                }
            }
        }

        groups
    }

    /// Regime label of every state given its group
    fn label_groups(
        &self,
        params: &HmmParams,
        occupancy: &StateVector,
        groups: &[usize; NUM_REGIMES],
    ) -> [Regime; NUM_REGIMES] {
        let mut ids = groups.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() == NUM_REGIMES {
            return Regime::ALL;
        }

        // Moment-matched mean and std of each group, highest mean first
        let mut stats: Vec<(usize, f64, f64)> = ids
            .iter()
            .map(|&id| {
                let members: Vec<usize> = (0..NUM_REGIMES).filter(|&k| groups[k] == id).collect();
                let weight: f64 = members.iter().map(|&k| occupancy[k]).sum();
                let mean = members
                    .iter()
                    .map(|&k| occupancy[k] * params.emissions[k].mean)
                    .sum::<f64>()
                    / weight;
                let second_moment = members
                    .iter()
                    .map(|&k| {
                        let e = &params.emissions[k];
                        occupancy[k] * (e.variance + e.mean * e.mean)
                    })
                    .sum::<f64>()
                    / weight;
                (id, mean, (second_moment - mean * mean).max(0.0).sqrt())
            })
            .collect();
        stats.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let threshold = self.config.drift_threshold;
        let drift = |mean: f64, std: f64| {
            if std <= 0.0 || (mean / std).abs() < threshold {
                Regime::Sideways
            } else if mean > 0.0 {
                Regime::Bull
            } else {
                Regime::Bear
            }
        };

        let assigned: Vec<(usize, Regime)> = match stats.as_slice() {
            [(id, mean, std)] => vec![(*id, drift(*mean, *std))],
            [(high, high_mean, high_std), (low, low_mean, low_std)] => {
                let pair = match (drift(*high_mean, *high_std), drift(*low_mean, *low_std)) {
                    (Regime::Bull, Regime::Bear) => (Regime::Bull, Regime::Bear),
                    (_, Regime::Bear) => (Regime::Sideways, Regime::Bear),
                    _ => (Regime::Bull, Regime::Sideways),
                };
                vec![(*high, pair.0), (*low, pair.1)]
            }
            _ => return Regime::ALL,
        };

        let mut labels = Regime::ALL;
        for (k, label) in labels.iter_mut().enumerate() {
            if let Some((_, regime)) = assigned.iter().find(|(id, _)| *id == groups[k]) {
                *label = *regime;
            }
        }
        labels
    }

    /// Baum-Welch iterations from one starting point
    fn run_em(
        &self,
        features: &[f64],
        mut params: HmmParams,
        variance_floor: f64,
    ) -> Result<(HmmParams, usize, bool)> {
        let mut prev_ll = f64::NEG_INFINITY;

        for iter in 1..=self.config.max_iter {
            let expectation =
                forward_backward(features, &params.initial, &params.transition, &params.emissions)?;
            let ll = expectation.log_likelihood;

            if !ll.is_finite() {
                return Err(RegimeError::Fitting(format!(
                    "log-likelihood is not finite at iteration {}",
                    iter
                )));
            }
            // EM never decreases the likelihood beyond rounding and flooring noise
            if ll < prev_ll - 1e-6 * prev_ll.abs().max(1.0) {
                return Err(RegimeError::Fitting(format!(
                    "log-likelihood decreased at iteration {} ({:.6} -> {:.6})",
                    iter, prev_ll, ll
                )));
            }

            params = self.maximization(features, &expectation, &params, variance_floor)?;

            if iter % 25 == 0 {
                tracing::trace!("EM iteration {}: log-likelihood = {:.6}", iter, ll);
            }

            if (ll - prev_ll).abs() < self.config.tol {
                return Ok((params, iter, true));
            }
            prev_ll = ll;
        }

        Ok((params, self.config.max_iter, false))
    }

    fn maximization(
        &self,
        features: &[f64],
        expectation: &Expectation,
        previous: &HmmParams,
        variance_floor: f64,
    ) -> Result<HmmParams> {
        let gamma = &expectation.gamma;

        let mut emissions = previous.emissions;
        for (j, emission) in emissions.iter_mut().enumerate() {
            let weights: Vec<f64> = gamma.iter().map(|g| g[j]).collect();
            let occupancy: f64 = weights.iter().sum();
            if occupancy < self.config.min_state_occupancy {
                return Err(RegimeError::Fitting(format!(
                    "regime {} collapsed (expected occupancy {:.3})",
                    j, occupancy
                )));
            }
            *emission = Gaussian::from_weighted(features, &weights, variance_floor).ok_or_else(
                || RegimeError::Fitting(format!("regime {} has no posterior weight", j)),
            )?;
        }

        let mut transition = previous.transition;
        for (i, row) in transition.iter_mut().enumerate() {
            let counts = expectation.xi_sum[i];
            let total: f64 = counts.iter().sum();
            if total > 0.0 && total.is_finite() {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = counts[j] / total;
                }
            }
            normalize_with_floor(row);
        }

        let mut initial = gamma[0];
        normalize_with_floor(&mut initial);

        Ok(HmmParams {
            initial,
            transition,
            emissions,
            labels: previous.labels,
        })
    }
}

/// Expected number of observations spent in each state
fn state_occupancy(expectation: &Expectation) -> StateVector {
    let mut occupancy = [0.0; NUM_REGIMES];
    for g in &expectation.gamma {
        for (o, p) in occupancy.iter_mut().zip(g) {
            *o += p;
        }
    }
    occupancy
}

/// Log-likelihood when the choice between states `i` and `j` ignores the past
///
/// Every transition into the pair is split by the pair's relative occupancy.
fn lumped_log_likelihood(
    features: &[f64],
    params: &HmmParams,
    occupancy: &StateVector,
    i: usize,
    j: usize,
) -> Result<f64> {
    let total = occupancy[i] + occupancy[j];
    if !(total > 0.0) {
        return Err(RegimeError::Fitting(format!(
            "states {} and {} have no occupancy",
            i, j
        )));
    }
    let (wi, wj) = (occupancy[i] / total, occupancy[j] / total);
    let lump = |probs: &mut StateVector| {
        let mass = probs[i] + probs[j];
        probs[i] = mass * wi;
        probs[j] = mass * wj;
    };

    let mut initial = params.initial;
    lump(&mut initial);
    let mut transition = params.transition;
    for row in transition.iter_mut() {
        lump(row);
    }

    Ok(forward(features, &initial, &transition, &params.emissions)?.log_likelihood)
}

fn normalize_with_floor(probs: &mut StateVector) {
    for p in probs.iter_mut() {
        if !p.is_finite() || *p < PROBABILITY_FLOOR {
            *p = PROBABILITY_FLOOR;
        }
    }
    let sum: f64 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{Segment, SyntheticDataGenerator};
    use crate::models::log_returns;

    fn three_regime_returns(seed: u64) -> Vec<f64> {
        let mut gen = SyntheticDataGenerator::new(seed);
        let points = gen.generate_segments(&[
            Segment::bull(100),
            Segment::bear(100),
            Segment::sideways(100),
        ]);
        let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
        log_returns(&prices)
    }

    fn assert_valid_params(params: &HmmParams) {
        let initial_sum: f64 = params.initial.iter().sum();
        assert!((initial_sum - 1.0).abs() < 1e-9);
        for row in &params.transition {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "row sums to {}", sum);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
        for emission in &params.emissions {
            assert!(emission.variance > 0.0);
            assert!(emission.mean.is_finite());
        }
    }

    #[test]
    fn test_fit_rejects_empty_input() {
        let mut hmm = GaussianHmm::default();
        let result = hmm.fit(&[]);
        assert!(matches!(result, Err(RegimeError::Fitting(_))));
        assert!(!hmm.is_fitted());
    }

    #[test]
    fn test_fit_rejects_short_input() {
        let mut hmm = GaussianHmm::default();
        let result = hmm.fit(&[0.01, -0.01, 0.0, 0.02]);
        assert!(matches!(result, Err(RegimeError::Fitting(_))));
        assert!(result.unwrap_err().to_string().contains("at least 30"));
    }

    #[test]
    fn test_fit_rejects_constant_input() {
        let mut hmm = GaussianHmm::default();
        let result = hmm.fit(&[0.001; 100]);
        assert!(matches!(result, Err(RegimeError::Fitting(_))));
    }

    #[test]
    fn test_fit_rejects_non_finite_input() {
        let mut features = three_regime_returns(1);
        features[10] = f64::NAN;
        let mut hmm = GaussianHmm::default();
        assert!(hmm.fit(&features).is_err());
    }

    #[test]
    fn test_predict_before_fit() {
        let hmm = GaussianHmm::default();
        let result = hmm.predict_proba(&[0.0; 30]);
        assert!(matches!(result, Err(RegimeError::NotFitted)));
    }

    #[test]
    fn test_predict_window_too_short() {
        let mut hmm = GaussianHmm::default();
        hmm.fit(&three_regime_returns(3)).unwrap();

        let result = hmm.predict_proba(&[0.0; 3]);
        assert!(matches!(
            result,
            Err(RegimeError::InsufficientData { required: 5, available: 3, .. })
        ));
    }

    #[test]
    fn test_fit_produces_valid_canonical_params() {
        let mut hmm = GaussianHmm::default();
        let summary = hmm.fit(&three_regime_returns(7)).unwrap();
        let params = hmm.params().unwrap();

        assert_valid_params(params);
        assert!(summary.log_likelihood.is_finite());
        assert_eq!(summary.n_observations, 300);

        let bull = params.emission(Regime::Bull).mean;
        let bear = params.emission(Regime::Bear).mean;
        let sideways = params.emission(Regime::Sideways).mean;
        assert!(bull > sideways && sideways > bear);
        assert!(bull > 0.002, "bull mean {}", bull);
        assert!(bear < -0.002, "bear mean {}", bear);
    }

    #[test]
    fn test_regimes_are_sticky() {
        let mut hmm = GaussianHmm::default();
        hmm.fit(&three_regime_returns(11)).unwrap();
        let params = hmm.params().unwrap();

        for i in 0..NUM_REGIMES {
            assert!(params.transition[i][i] > 0.8, "self-transition {}", params.transition[i][i]);
        }
    }

    #[test]
    fn test_refit_is_deterministic() {
        let features = three_regime_returns(5);

        let mut first = GaussianHmm::default();
        let mut second = GaussianHmm::default();
        first.fit(&features).unwrap();
        second.fit(&features).unwrap();

        assert_eq!(first.params(), second.params());
    }

    #[test]
    fn test_predict_proba_is_distribution_and_idempotent() {
        let features = three_regime_returns(9);
        let mut hmm = GaussianHmm::default();
        hmm.fit(&features).unwrap();

        for end in [40, 120, 200, 300] {
            let window = &features[end - 30..end];
            let belief = hmm.predict_proba(window).unwrap();
            let sum: f64 = belief.as_slice().iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(belief.as_slice().iter().all(|p| (0.0..=1.0).contains(p)));

            let again = hmm.predict_proba(window).unwrap();
            assert_eq!(belief, again);
        }
    }

    #[test]
    fn test_repeated_zero_returns_do_not_produce_nan() {
        // Long flat stretches pin one state on exactly zero returns
        let mut features = three_regime_returns(13);
        for x in features.iter_mut().skip(200) {
            *x = 0.0;
        }

        let mut hmm = GaussianHmm::default();
        hmm.fit(&features).unwrap();
        assert_valid_params(hmm.params().unwrap());

        let belief = hmm.predict_proba(&features[250..]).unwrap();
        assert!(belief.as_slice().iter().all(|p| p.is_finite()));
        assert_eq!(belief.dominant().0, Regime::Sideways);
    }

    #[test]
    fn test_failed_fit_keeps_previous_model() {
        let mut hmm = GaussianHmm::default();
        hmm.fit(&three_regime_returns(17)).unwrap();
        let before = hmm.params().cloned();

        assert!(hmm.fit(&[0.0; 5]).is_err());
        assert_eq!(hmm.params().cloned(), before);
    }

    #[test]
    fn test_score_requires_fit() {
        let hmm = GaussianHmm::default();
        assert!(matches!(hmm.score(&[0.0]), Err(RegimeError::NotFitted)));
    }

    #[test]
    fn test_score_prefers_training_distribution() {
        let features = three_regime_returns(19);
        let mut hmm = GaussianHmm::default();
        hmm.fit(&features).unwrap();

        let in_sample = hmm.score(&features[..50]).unwrap();
        let wild: Vec<f64> = (0..50).map(|i| if i % 2 == 0 { 0.2 } else { -0.2 }).collect();
        let out_of_sample = hmm.score(&wild).unwrap();
        assert!(in_sample > out_of_sample);
    }

    #[test]
    fn test_distinct_regimes_keep_their_own_labels() {
        let mut hmm = GaussianHmm::default();
        let summary = hmm.fit(&three_regime_returns(23)).unwrap();

        assert_eq!(summary.regimes, 3);
        assert_eq!(hmm.params().unwrap().labels, Regime::ALL);
    }

    #[test]
    fn test_single_regime_fit_reports_one_regime() {
        for (segment, expected) in [
            (Segment::bull(400), Some(Regime::Bull)),
            (Segment::bear(400), Some(Regime::Bear)),
            (Segment::sideways(400), None),
        ] {
            for seed in 0..5 {
                let points = SyntheticDataGenerator::new(seed).generate_segments(&[segment]);
                let prices: Vec<f64> = points.iter().map(|p| p.price).collect();
                let features = log_returns(&prices);

                let mut hmm = GaussianHmm::default();
                let summary = hmm.fit(&features).unwrap();
                assert_eq!(summary.regimes, 1, "{:?} seed {}", segment, seed);

                let belief = hmm.predict_proba(&features[features.len() - 30..]).unwrap();
                let (regime, p) = belief.dominant();
                assert!(p >= 0.9, "{:?} seed {}: {}", segment, seed, p);
                // Merged states pool all of their mass
                assert!((p - 1.0).abs() < 1e-9);
                if let Some(expected) = expected {
                    assert_eq!(regime, expected, "seed {}", seed);
                }
            }
        }
    }

    fn params_with_means(means: [f64; NUM_REGIMES], variance: f64) -> HmmParams {
        HmmParams {
            initial: [1.0 / 3.0; NUM_REGIMES],
            transition: [[0.9, 0.05, 0.05], [0.05, 0.9, 0.05], [0.05, 0.05, 0.9]],
            emissions: means.map(|m| Gaussian::new(m, variance)),
            labels: Regime::ALL,
        }
    }

    #[test]
    fn test_merged_groups_are_labelled_by_drift() {
        let hmm = GaussianHmm::default();
        let occupancy = [100.0, 100.0, 100.0];

        // One group drifting up
        let params = params_with_means([0.006, 0.004, 0.005], 1e-5);
        assert_eq!(hmm.label_groups(&params, &occupancy, &[0, 0, 0]), [Regime::Bull; 3]);

        // One group with no meaningful drift
        let params = params_with_means([0.0002, -0.0002, 0.0], 1e-4);
        assert_eq!(
            hmm.label_groups(&params, &occupancy, &[0, 0, 0]),
            [Regime::Sideways; 3]
        );

        // Trending group above a flat one
        let params = params_with_means([0.006, 0.0, 0.004], 1e-6);
        assert_eq!(
            hmm.label_groups(&params, &occupancy, &[0, 1, 0]),
            [Regime::Bull, Regime::Sideways, Regime::Bull]
        );

        // Flat group above a falling one
        let params = params_with_means([0.0, -0.006, -0.004], 1e-6);
        assert_eq!(
            hmm.label_groups(&params, &occupancy, &[0, 1, 1]),
            [Regime::Sideways, Regime::Bear, Regime::Bear]
        );
    }

    #[test]
    fn test_canonical_order_breaks_ties_by_index() {
        let params = HmmParams {
            initial: [0.2, 0.3, 0.5],
            transition: [[0.8, 0.1, 0.1], [0.2, 0.7, 0.1], [0.3, 0.3, 0.4]],
            emissions: [
                Gaussian::new(0.0, 1.0),
                Gaussian::new(0.0, 2.0),
                Gaussian::new(0.0, 3.0),
            ],
            labels: Regime::ALL,
        };
        let canonical = params.into_canonical();

        // Order by index: 0 -> bull, 2 -> bear, 1 -> sideways
        assert_eq!(canonical.emissions[0].variance, 1.0);
        assert_eq!(canonical.emissions[1].variance, 3.0);
        assert_eq!(canonical.emissions[2].variance, 2.0);
        assert_eq!(canonical.initial, [0.2, 0.5, 0.3]);
        assert_eq!(canonical.transition[1], [0.3, 0.4, 0.3]);
    }
}
