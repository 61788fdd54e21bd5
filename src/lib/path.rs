use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A root-to-head sequence of states with the actions between them.
///
/// Paths are persistent: [`Path::extend`] returns a new path that shares every state of
/// `self`, so a search tree of paths costs one allocation per node.
pub struct Path<S, A> {
    head: Arc<Segment<S, A>>,
}

struct Segment<S, A> {
    state: S,
    arc: Option<(A, Path<S, A>)>,
    cost: f64,
    len: usize,
}

impl<S, A> Clone for Path<S, A> {
    fn clone(&self) -> Self {
        Path {
            head: self.head.clone(),
        }
    }
}

impl<S, A> Path<S, A> {
    pub fn root(state: S) -> Self {
        Path {
            head: Arc::new(Segment {
                state,
                arc: None,
                cost: 0.0,
                len: 1,
            }),
        }
    }

    pub fn extend(&self, action: A, state: S, cost: f64) -> Self {
        Path {
            head: Arc::new(Segment {
                state,
                cost: self.head.cost + cost,
                len: self.head.len + 1,
                arc: Some((action, self.clone())),
            }),
        }
    }

    pub fn head(&self) -> &S {
        &self.head.state
    }

    pub fn parent(&self) -> Option<&Path<S, A>> {
        self.head.arc.as_ref().map(|(_, p)| p)
    }

    pub fn last_action(&self) -> Option<&A> {
        self.head.arc.as_ref().map(|(a, _)| a)
    }

    /// Number of states on the path.
    pub fn len(&self) -> usize {
        self.head.len
    }

    /// Number of actions on the path.
    pub fn depth(&self) -> usize {
        self.head.len - 1
    }

    pub fn cost(&self) -> f64 {
        self.head.cost
    }

    pub fn is_root(&self) -> bool {
        self.head.arc.is_none()
    }

    pub fn root_state(&self) -> &S {
        let mut p = self;
        while let Some(parent) = p.parent() {
            p = parent;
        }
        p.head()
    }

    /// Iterates from the head back to the root.
    pub fn iter_back(&self) -> impl Iterator<Item = &Path<S, A>> {
        std::iter::successors(Some(self), |p| p.parent())
    }

    /// True if both paths are the same allocation, not merely equal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.head, &other.head)
    }
}

impl<S: Clone, A: Clone> Path<S, A> {
    pub fn states(&self) -> Vec<S> {
        let mut v: Vec<S> = self.iter_back().map(|p| p.head().clone()).collect();
        v.reverse();
        v
    }

    pub fn actions(&self) -> Vec<A> {
        let mut v: Vec<A> = self.iter_back().filter_map(|p| p.last_action().cloned()).collect();
        v.reverse();
        v
    }
}

impl<S: PartialEq, A> Path<S, A> {
    pub fn contains(&self, state: &S) -> bool {
        self.iter_back().any(|p| p.head() == state)
    }
}

impl<S: PartialEq, A: PartialEq> PartialEq for Path<S, A> {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter_back().zip(other.iter_back()).all(|(a, b)| {
            a.ptr_eq(b)
                || (a.head() == b.head() && a.last_action() == b.last_action() && a.cost() == b.cost())
        })
    }
}

// Unlinks the chain iteratively, so dropping a path of depth 10^6 does not recurse.
impl<S, A> Drop for Segment<S, A> {
    fn drop(&mut self) {
        let mut next = self.arc.take();
        while let Some((_, path)) = next {
            match Arc::try_unwrap(path.head) {
                Ok(mut segment) => next = segment.arc.take(),
                Err(_) => break,
            }
        }
    }
}

impl<S: Debug, A: Debug> Debug for Path<S, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut segments: Vec<&Path<S, A>> = self.iter_back().collect();
        segments.reverse();
        write!(f, "[")?;
        for (i, p) in segments.iter().enumerate() {
            if let Some(a) = p.last_action() {
                write!(f, " -{:?}-> ", a)?;
            } else if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", p.head())?;
        }
        write!(f, "] (cost {})", self.cost())
    }
}

impl<S: Display, A> Display for Path<S, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.head())
    }
}
