use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// Lower bound applied elementwise to the running variance.
pub const VARIANCE_FLOOR: f32 = 1e-2;

/// Whether states go through the running normalizer before reaching the policy.
///
/// `Enabled` is the V2 flavour of the algorithm and the default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    #[default]
    Enabled,
    Disabled,
}

/// Running per-dimension statistics of the observed states.
///
/// Keeps every state component on a comparable scale so the linear policy
/// doesn't favour the dimensions with the largest magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    count: Array1<f32>,
    mean: Array1<f32>,
    mean_diff: Array1<f32>,
    var: Array1<f32>,
}

impl Normalizer {
    /// Creates a new `Normalizer` with all of its statistics set to zero.
    ///
    /// # Arguments
    /// * `state_dim` - The dimensionality of the states to observe.
    ///
    /// # Returns
    /// A new `Normalizer` instance.
    pub fn new(state_dim: usize) -> Self {
        let zeros = Array1::zeros(state_dim);

        Self {
            count: zeros.clone(),
            mean: zeros.clone(),
            mean_diff: zeros.clone(),
            var: zeros,
        }
    }

    /// Folds `state` into the running statistics using Welford's online update.
    ///
    /// # Arguments
    /// * `state` - The observed state.
    ///
    /// # Returns
    /// An error if the state's length doesn't match the normalizer's dimensionality.
    pub fn observe(&mut self, state: ArrayView1<f32>) -> Result<()> {
        self.check_dim(state.len())?;

        Zip::from(&mut self.count)
            .and(&mut self.mean)
            .and(&mut self.mean_diff)
            .and(&mut self.var)
            .and(&state)
            .for_each(|n, mean, mean_diff, var, &x| {
                *n += 1.0;
                let prev_mean = *mean;
                *mean += (x - prev_mean) / *n;
                *mean_diff += (x - prev_mean) * (x - *mean);
                *var = (*mean_diff / *n).max(VARIANCE_FLOOR);
            });

        Ok(())
    }

    /// Centers and scales `state` with the current statistics.
    ///
    /// Must be called after observing the same state so the latest sample is accounted for.
    ///
    /// # Arguments
    /// * `state` - The state to normalize.
    ///
    /// # Returns
    /// The normalized state or an error if the state's length doesn't match.
    pub fn normalize(&self, state: ArrayView1<f32>) -> Result<Array1<f32>> {
        self.check_dim(state.len())?;

        let mut normalized = &state - &self.mean;
        normalized.zip_mut_with(&self.var, |x, &var| *x /= var.sqrt());
        Ok(normalized)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> ArrayView1<'_, f32> {
        self.count.view()
    }

    pub fn mean(&self) -> ArrayView1<'_, f32> {
        self.mean.view()
    }

    pub fn var(&self) -> ArrayView1<'_, f32> {
        self.var.view()
    }

    fn check_dim(&self, got: usize) -> Result<()> {
        if got != self.dim() {
            return Err(MlErr::SizeMismatch {
                what: "state",
                got,
                expected: self.dim(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use ndarray_rand::{RandomExt, rand_distr::Normal};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn repeated_value_has_floored_variance() {
        let mut normalizer = Normalizer::new(2);
        let state = array![3.5, -1.0];

        for _ in 0..10 {
            normalizer.observe(state.view()).unwrap();
        }

        assert_eq!(normalizer.mean(), state.view());
        assert_eq!(normalizer.var(), array![VARIANCE_FLOOR, VARIANCE_FLOOR].view());
        assert_eq!(normalizer.count(), array![10.0, 10.0].view());
    }

    #[test]
    fn first_observation_normalizes_to_zero() {
        let mut normalizer = Normalizer::new(3);
        let state = array![1.0, 2.0, 3.0];

        normalizer.observe(state.view()).unwrap();
        let normalized = normalizer.normalize(state.view()).unwrap();

        assert_eq!(normalized, array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn tracks_mean_and_population_variance() {
        let mut normalizer = Normalizer::new(1);
        for x in [2.0, 4.0, 6.0, 8.0] {
            normalizer.observe(array![x].view()).unwrap();
        }

        assert!((normalizer.mean()[0] - 5.0).abs() < 1e-6);
        assert!((normalizer.var()[0] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn normalized_samples_are_standardized() {
        const SAMPLES: usize = 20_000;

        let mut rng = StdRng::seed_from_u64(7);
        let distribution = Normal::new(3.0f32, 2.0).unwrap();
        let states = Array1::random_using(SAMPLES, distribution, &mut rng);

        let mut normalizer = Normalizer::new(1);
        for &x in &states {
            normalizer.observe(array![x].view()).unwrap();
        }

        let normalized: Vec<f32> = states
            .iter()
            .map(|&x| normalizer.normalize(array![x].view()).unwrap()[0])
            .collect();

        let n = normalized.len() as f32;
        let mean = normalized.iter().sum::<f32>() / n;
        let var = normalized.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;

        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
    }

    #[test]
    fn rejects_states_of_the_wrong_length() {
        let mut normalizer = Normalizer::new(2);

        let err = normalizer.observe(array![1.0].view()).unwrap_err();
        assert!(matches!(
            err,
            MlErr::SizeMismatch {
                got: 1,
                expected: 2,
                ..
            }
        ));
        assert!(normalizer.normalize(array![1.0, 2.0, 3.0].view()).is_err());
    }
}
