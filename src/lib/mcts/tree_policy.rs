use crate::mcts::NodeStats;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::Rng;

/// Chooses among the known children of a node during the descent of a rollout.
///
/// Rewards are always to be maximized. `begin_rollout` returns an arm that is handed back to
/// every other call of the same rollout; policies that do not need one return 0.
pub trait TreePolicy: Send + Sync {
    fn begin_rollout(&self, _rng: &mut SmallRng) -> usize {
        0
    }

    /// Index into `children` of the child to descend into. Only called with at least two
    /// children.
    fn select(&self, arm: usize, parent: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize;

    /// Updates the statistics of a node on the path of a finished rollout.
    fn backup(&self, _arm: usize, stats: &mut NodeStats, reward: Option<f64>) {
        match reward {
            Some(r) => stats.record(r),
            None => stats.record_visit(),
        }
    }

    fn end_rollout(&self, _arm: usize, _reward: Option<f64>) {}
}

impl<T: TreePolicy + ?Sized> TreePolicy for Box<T> {
    fn begin_rollout(&self, rng: &mut SmallRng) -> usize {
        (**self).begin_rollout(rng)
    }

    fn select(&self, arm: usize, parent: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize {
        (**self).select(arm, parent, children, rng)
    }

    fn backup(&self, arm: usize, stats: &mut NodeStats, reward: Option<f64>) {
        (**self).backup(arm, stats, reward)
    }

    fn end_rollout(&self, arm: usize, reward: Option<f64>) {
        (**self).end_rollout(arm, reward)
    }
}

// The index of the largest value, breaking ties uniformly at random.
pub(crate) fn argmax<I: IntoIterator<Item = f64>>(values: I, rng: &mut SmallRng) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    // This is the number of values equal to the best so far
    let mut equivalence_count = 0;
    for (i, v) in values.into_iter().enumerate() {
        if equivalence_count == 0 || v > best_value {
            best = i;
            best_value = v;
            equivalence_count = 1;
        } else if v == best_value {
            equivalence_count += 1;
            if rng.gen_range(0..equivalence_count) == 0 {
                best = i;
            }
        }
    }
    best
}

fn exploration(parent: &NodeStats, child: &NodeStats) -> f64 {
    let n = parent.visits().max(1) as f64;
    (n.ln() / child.visits() as f64).sqrt()
}

/// The reward a child is credited with. A child whose rollouts were never rewarded counts as
/// the worst reward seen below its parent, 0 if there is none, so exploration can still
/// bring it back.
pub(crate) fn exploitation(parent: &NodeStats, child: &NodeStats) -> f64 {
    if child.samples() > 0 {
        child.mean()
    } else {
        parent.worst().unwrap_or(0.0)
    }
}

/// UCT: mean reward plus `c * sqrt(ln N / n)`. Unvisited children come first.
pub struct Ucb1 {
    exploration_constant: f64,
}

impl Ucb1 {
    pub fn new(c: f64) -> Self {
        assert!(c >= 0.0);
        Ucb1 {
            exploration_constant: c,
        }
    }
}

impl Default for Ucb1 {
    fn default() -> Self {
        Ucb1::new(std::f64::consts::SQRT_2)
    }
}

impl TreePolicy for Ucb1 {
    fn select(&self, _: usize, parent: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize {
        argmax(
            children.iter().map(|c| {
                if c.visits() == 0 {
                    f64::INFINITY
                } else {
                    exploitation(parent, c) + self.exploration_constant * exploration(parent, c)
                }
            }),
            rng,
        )
    }
}

/// A UCB bound around the mean-variance utility `mean - risk_aversion * std_dev`.
pub struct RiskSensitive {
    exploration_constant: f64,
    risk_aversion: f64,
}

impl RiskSensitive {
    pub fn new(c: f64, risk_aversion: f64) -> Self {
        assert!(c >= 0.0);
        RiskSensitive {
            exploration_constant: c,
            risk_aversion,
        }
    }
}

impl TreePolicy for RiskSensitive {
    fn select(&self, _: usize, parent: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize {
        argmax(
            children.iter().map(|c| {
                if c.visits() == 0 {
                    f64::INFINITY
                } else {
                    exploitation(parent, c) - self.risk_aversion * c.std_dev()
                        + self.exploration_constant * exploration(parent, c)
                }
            }),
            rng,
        )
    }
}

/// Runs each rollout with one of its members, chosen by a UCB1 bandit over the rewards the
/// members obtained so far.
///
/// Members share the node statistics, so they should differ in selection only. Members are
/// always called with arm 0.
pub struct Ensemble {
    members: Vec<Box<dyn TreePolicy>>,
    exploration_constant: f64,
    arms: Mutex<Vec<NodeStats>>,
}

impl Ensemble {
    pub fn new(members: Vec<Box<dyn TreePolicy>>) -> Self {
        assert!(!members.is_empty());
        let arms = Mutex::new(vec![NodeStats::default(); members.len()]);
        Ensemble {
            members,
            exploration_constant: std::f64::consts::SQRT_2,
            arms,
        }
    }

    pub fn with_exploration(mut self, c: f64) -> Self {
        self.exploration_constant = c;
        self
    }

    /// How many rollouts each member ran.
    pub fn usage(&self) -> Vec<u32> {
        self.arms.lock().iter().map(|a| a.visits()).collect()
    }
}

impl TreePolicy for Ensemble {
    fn begin_rollout(&self, rng: &mut SmallRng) -> usize {
        let arms = self.arms.lock();
        let total_visits: u32 = arms.iter().map(|a| a.visits()).sum();
        let n = (total_visits.max(1) as f64).ln();
        let c = self.exploration_constant;
        let worst = arms.iter().filter_map(NodeStats::worst).fold(f64::INFINITY, f64::min);
        let worst = if worst.is_finite() { worst } else { 0.0 };
        argmax(
            arms.iter().map(|a| {
                if a.visits() == 0 {
                    f64::INFINITY
                } else if a.samples() == 0 {
                    worst + c * (n / a.visits() as f64).sqrt()
                } else {
                    a.mean() + c * (n / a.visits() as f64).sqrt()
                }
            }),
            rng,
        )
    }

    fn select(&self, arm: usize, parent: &NodeStats, children: &[&NodeStats], rng: &mut SmallRng) -> usize {
        self.members[arm].select(0, parent, children, rng)
    }

    fn backup(&self, arm: usize, stats: &mut NodeStats, reward: Option<f64>) {
        self.members[arm].backup(0, stats, reward)
    }

    fn end_rollout(&self, arm: usize, reward: Option<f64>) {
        self.members[arm].end_rollout(0, reward);
        let mut arms = self.arms.lock();
        match reward {
            Some(r) => arms[arm].record(r),
            None => arms[arm].record_visit(),
        }
    }
}
