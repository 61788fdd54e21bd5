use crate::mcts::tree_policy::{argmax, TreePolicy};
use crate::mcts::NodeStats;
use rand::rngs::SmallRng;
use rand::Rng;

/// Preference-based selection: children are compared pairwise on their recent rewards, the
/// win rates are fitted to Bradley-Terry strengths and a child is sampled with probability
/// proportional to its strength.
///
/// Only the order of rewards matters, never their scale. Unvisited children come first.
#[derive(Debug, Clone)]
pub struct BradleyTerry {
    /// Minorization-maximization iterations per selection.
    pub iterations: usize,
    /// Pseudo-wins of every child against a unit strength opponent.
    pub prior: f64,
}

impl Default for BradleyTerry {
    fn default() -> Self {
        BradleyTerry {
            iterations: 10,
            prior: 0.5,
        }
    }
}

// Probability that a reward drawn from `a` beats one drawn from `b`, ties counting half.
fn win_rate(a: &NodeStats, b: &NodeStats) -> f64 {
    let (ra, rb) = (a.recent(), b.recent());
    match (ra.is_empty(), rb.is_empty()) {
        (true, true) => 0.5,
        (true, false) => 0.0,
        (false, true) => 1.0,
        (false, false) => {
            let mut wins = 0.0;
            for x in ra {
                for y in rb {
                    if x > y {
                        wins += 1.0;
                    } else if x == y {
                        wins += 0.5;
                    }
                }
            }
            wins / (ra.len() * rb.len()) as f64
        }
    }
}

impl BradleyTerry {
    pub fn strengths(&self, children: &[&NodeStats]) -> Vec<f64> {
        let k = children.len();
        let mut wins = vec![self.prior; k];
        for i in 0..k {
            for j in 0..k {
                if i != j {
                    wins[i] += win_rate(children[i], children[j]);
                }
            }
        }
        let mut p = vec![1.0; k];
        for _ in 0..self.iterations {
            let mut next: Vec<f64> = (0..k)
                .map(|i| {
                    let games: f64 = (0..k).filter(|&j| j != i).map(|j| 1.0 / (p[i] + p[j])).sum::<f64>()
                        + 2.0 * self.prior / (p[i] + 1.0);
                    wins[i] / games
                })
                .collect();
            let total: f64 = next.iter().sum();
            if total > 0.0 {
                next.iter_mut().for_each(|x| *x *= k as f64 / total);
            }
            p = next;
        }
        p
    }
}

impl TreePolicy for BradleyTerry {
    fn select(&self, _: usize, _: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize {
        if children.iter().any(|c| c.visits() == 0) {
            return argmax(
                children.iter().map(|c| if c.visits() == 0 { 1.0 } else { 0.0 }),
                rng,
            );
        }
        let p = self.strengths(children);
        let total: f64 = p.iter().sum();
        let mut x = rng.gen::<f64>() * total;
        for (i, s) in p.iter().enumerate() {
            if x < *s {
                return i;
            }
            x -= s;
        }
        children.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn stats(rewards: &[f64]) -> NodeStats {
        let mut s = NodeStats::default();
        for r in rewards {
            s.record(*r);
        }
        s
    }

    #[test]
    fn win_rates() {
        let a = stats(&[1.0, 2.0]);
        let b = stats(&[2.0]);
        assert_eq!(win_rate(&a, &b), 0.25);
        assert_eq!(win_rate(&b, &a), 0.75);
        assert_eq!(win_rate(&a, &NodeStats::default()), 1.0);
    }

    #[test]
    fn strengths_follow_the_order_not_the_scale() {
        let bt = BradleyTerry::default();
        let low = stats(&[-1000.0]);
        let mid = stats(&[0.0]);
        let high = stats(&[0.001]);
        let p = bt.strengths(&[&mid, &high, &low]);
        assert!(p[1] > p[0] && p[0] > p[2]);
        let q = bt.strengths(&[&stats(&[-1.0]), &stats(&[5.0]), &stats(&[-2.0])]);
        for (x, y) in p.iter().zip(q.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn sampling_prefers_the_strongest() {
        let mut rng = SmallRng::seed_from_u64(0);
        let bt = BradleyTerry::default();
        let fresh = NodeStats::default();
        let good = stats(&[1.0; 5]);
        let bad = stats(&[0.0; 5]);
        assert_eq!(bt.select(0, &fresh, &[&good, &fresh], &mut rng), 1);
        let picks = (0..300)
            .filter(|_| bt.select(0, &fresh, &[&bad, &good], &mut rng) == 1)
            .count();
        assert!(picks > 180);
        assert!(picks < 300);
    }
}
