use std::sync::Arc;

use ndarray::Array2;

/// The outcome of exploring one perturbation in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutResult {
    pub positive: f32,
    pub negative: f32,
    pub delta: Arc<Array2<f32>>,
}

impl RolloutResult {
    /// The ranking key, the best of both directions.
    pub fn score(&self) -> f32 {
        self.positive.max(self.negative)
    }
}

/// Population standard deviation over every reward of the iteration.
///
/// # Arguments
/// * `positive` - The rewards of the `+` rollouts.
/// * `negative` - The rewards of the `-` rollouts.
///
/// # Returns
/// The standard deviation or zero if there are no rewards.
pub fn reward_std(positive: &[f32], negative: &[f32]) -> f32 {
    let n = (positive.len() + negative.len()) as f32;
    if n == 0.0 {
        return 0.0;
    }

    let rewards = || positive.iter().chain(negative);
    let mean = rewards().sum::<f32>() / n;
    let var = rewards().map(|r| (r - mean).powi(2)).sum::<f32>() / n;
    var.sqrt()
}

/// Orders the delta indices by `max(r_pos, r_neg)`, best first.
///
/// The score of each delta is computed from its own index, equal scores
/// keep the lower delta index first.
///
/// # Arguments
/// * `positive` - The rewards of the `+` rollouts, indexed by delta.
/// * `negative` - The rewards of the `-` rollouts, indexed by delta.
///
/// # Returns
/// The delta indices from best to worst.
pub fn rank(positive: &[f32], negative: &[f32]) -> Vec<usize> {
    let scores: Vec<(usize, f32)> = positive
        .iter()
        .zip(negative)
        .map(|(r_pos, r_neg)| r_pos.max(*r_neg))
        .enumerate()
        .collect();

    let mut order = scores;
    order.sort_by(|(a, score_a), (b, score_b)| score_b.total_cmp(score_a).then(a.cmp(b)));
    order.into_iter().map(|(k, _)| k).collect()
}

/// Keeps the `k` best rollouts of the iteration.
///
/// # Arguments
/// * `positive` - The rewards of the `+` rollouts, indexed by delta.
/// * `negative` - The rewards of the `-` rollouts, indexed by delta.
/// * `deltas` - The sampled perturbations.
/// * `k` - The amount of rollouts to keep.
///
/// # Returns
/// At most `k` rollouts ordered from best to worst.
pub fn select_best(
    positive: &[f32],
    negative: &[f32],
    deltas: &[Arc<Array2<f32>>],
    k: usize,
) -> Vec<RolloutResult> {
    rank(positive, negative)
        .into_iter()
        .take(k)
        .map(|i| RolloutResult {
            positive: positive[i],
            negative: negative[i],
            delta: Arc::clone(&deltas[i]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn deltas(n: usize) -> Vec<Arc<Array2<f32>>> {
        (0..n).map(|i| Arc::new(array![[i as f32]])).collect()
    }

    #[test]
    fn ranks_by_best_direction() {
        let positive = [0.1, 5.0, -2.0, 1.0];
        let negative = [3.0, 0.0, -1.0, 0.5];

        assert_eq!(rank(&positive, &negative), vec![1, 0, 3, 2]);
    }

    #[test]
    fn equal_scores_keep_index_order() {
        let positive = [1.0, 2.0, 1.0, 2.0];
        let negative = [0.0, 0.0, 0.5, 1.0];

        assert_eq!(rank(&positive, &negative), vec![1, 3, 0, 2]);
    }

    #[test]
    fn selection_does_not_depend_on_input_order() {
        let positive = [0.3, -0.2, 0.9, 0.1, 0.5];
        let negative = [0.0, 0.7, -0.4, 0.2, 0.6];
        let deltas = deltas(5);

        let permutation = [4, 2, 0, 3, 1];
        let shuffled_pos: Vec<f32> = permutation.iter().map(|&i| positive[i]).collect();
        let shuffled_neg: Vec<f32> = permutation.iter().map(|&i| negative[i]).collect();
        let shuffled_deltas: Vec<_> = permutation.iter().map(|&i| deltas[i].clone()).collect();

        let key = |r: &RolloutResult| (r.delta[[0, 0]] as usize, r.positive.to_bits());
        let mut a: Vec<_> = select_best(&positive, &negative, &deltas, 3)
            .iter()
            .map(key)
            .collect();
        let mut b: Vec<_> = select_best(&shuffled_pos, &shuffled_neg, &shuffled_deltas, 3)
            .iter()
            .map(key)
            .collect();
        a.sort();
        b.sort();

        assert_eq!(a, b);
        assert_eq!(a.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn selects_at_most_k() {
        let selected = select_best(&[1.0, 2.0], &[0.0, 0.0], &deltas(2), 5);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].score(), 2.0);
    }

    #[test]
    fn std_dev_over_all_rewards() {
        let std = reward_std(&[1.0, 3.0], &[1.0, 3.0]);
        assert!((std - 1.0).abs() < 1e-6);
        assert_eq!(reward_std(&[2.0, 2.0], &[2.0, 2.0]), 0.0);
        assert_eq!(reward_std(&[], &[]), 0.0);
    }
}
