use crate::mcts::tree_policy::{argmax, exploitation, TreePolicy};
use crate::mcts::NodeStats;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Gamma, Normal};

/// Thompson sampling from a normal-gamma posterior over the mean and precision of the
/// rewards below each child.
///
/// A child is valued by a draw `mu - risk * sigma` from its posterior, so a positive `risk`
/// prefers children with less spread.
#[derive(Debug, Clone)]
pub struct NormalGammaThompson {
    pub prior_mean: f64,
    /// Pseudo-observations backing `prior_mean`.
    pub prior_count: f64,
    pub prior_shape: f64,
    pub prior_rate: f64,
    pub risk: f64,
}

impl Default for NormalGammaThompson {
    fn default() -> Self {
        NormalGammaThompson {
            prior_mean: 0.0,
            prior_count: 1.0,
            prior_shape: 1.0,
            prior_rate: 1.0,
            risk: 0.0,
        }
    }
}

impl NormalGammaThompson {
    pub fn with_risk(risk: f64) -> Self {
        NormalGammaThompson {
            risk,
            ..NormalGammaThompson::default()
        }
    }

    /// Posterior `(mean, count, shape, rate)` after the samples in `stats`.
    pub fn posterior(&self, stats: &NodeStats) -> (f64, f64, f64, f64) {
        let n = stats.samples() as f64;
        if stats.samples() == 0 {
            return (self.prior_mean, self.prior_count, self.prior_shape, self.prior_rate);
        }
        let mean = stats.mean();
        let count = self.prior_count + n;
        let posterior_mean = (self.prior_count * self.prior_mean + n * mean) / count;
        let shape = self.prior_shape + n / 2.0;
        let rate = self.prior_rate
            + stats.m2() / 2.0
            + self.prior_count * n * (mean - self.prior_mean).powi(2) / (2.0 * count);
        (posterior_mean, count, shape, rate)
    }

    fn draw(&self, parent: &NodeStats, stats: &NodeStats, rng: &mut SmallRng) -> f64 {
        // visited, but never rewarded
        if stats.samples() == 0 && stats.visits() > 0 {
            return exploitation(parent, stats);
        }
        let (mean, count, shape, rate) = self.posterior(stats);
        let precision = match Gamma::new(shape, 1.0 / rate) {
            Ok(g) => g.sample(rng).max(f64::MIN_POSITIVE),
            Err(_) => return mean,
        };
        let sigma = (1.0 / precision).sqrt();
        match Normal::new(mean, sigma / count.sqrt()) {
            Ok(d) => d.sample(rng) - self.risk * sigma,
            Err(_) => mean,
        }
    }
}

impl TreePolicy for NormalGammaThompson {
    fn select(&self, _: usize, parent: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize {
        let draws: Vec<f64> = children.iter().map(|c| self.draw(parent, c, rng)).collect();
        argmax(draws, rng)
    }
}
