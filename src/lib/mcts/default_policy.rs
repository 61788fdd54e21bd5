use crate::path::Path;
use crate::problem::Successor;
use rand::rngs::SmallRng;
use rand::Rng;

/// Picks the successor to follow once a rollout has left the known part of the tree.
pub trait DefaultPolicy<S, A>: Send + Sync {
    /// Index into the non-empty `successors` of the last node of `path`.
    fn choose(&self, path: &Path<S, A>, successors: &[Successor<S, A>], rng: &mut SmallRng) -> usize;
}

pub struct UniformRandom;

impl<S, A> DefaultPolicy<S, A> for UniformRandom {
    fn choose(&self, _: &Path<S, A>, successors: &[Successor<S, A>], rng: &mut SmallRng) -> usize {
        rng.gen_range(0..successors.len())
    }
}

/// Always follows the first successor, which makes playouts deterministic.
pub struct FirstSuccessor;

impl<S, A> DefaultPolicy<S, A> for FirstSuccessor {
    fn choose(&self, _: &Path<S, A>, _: &[Successor<S, A>], _: &mut SmallRng) -> usize {
        0
    }
}
