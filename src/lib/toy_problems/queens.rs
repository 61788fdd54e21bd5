use crate::error::ProblemError;
use crate::lifecycle::Context;
use crate::path::Path;
use crate::problem::{Evaluation, GoalTester, GraphGenerator, PathEvaluator, SearchProblem, Successor};
use colored::Colorize;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Queens placed row by row; `queens[r]` is the column of the queen in row `r`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Board {
    n: usize,
    queens: Vec<usize>,
}

impl Board {
    pub fn new(n: usize) -> Self {
        assert!(n > 0);
        Board { n, queens: vec![] }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn queens(&self) -> &[usize] {
        &self.queens
    }

    pub fn place(&self, col: usize) -> Board {
        debug_assert!(col < self.n && !self.is_full());
        let mut queens = self.queens.clone();
        queens.push(col);
        Board { n: self.n, queens }
    }

    pub fn is_full(&self) -> bool {
        self.queens.len() == self.n
    }

    pub fn is_attacked(&self, row: usize, col: usize) -> bool {
        self.queens.iter().enumerate().any(|(r, &c)| {
            c == col || (r as isize - row as isize).abs() == (c as isize - col as isize).abs()
        })
    }

    /// Cells of the still empty rows that some queen attacks.
    pub fn attacked_cells(&self) -> usize {
        (self.queens.len()..self.n)
            .map(|row| (0..self.n).filter(|&col| self.is_attacked(row, col)).count())
            .sum()
    }

    /// Pairs of queens attacking each other.
    pub fn conflicts(&self) -> usize {
        let mut count = 0;
        for (r1, &c1) in self.queens.iter().enumerate() {
            for (r2, &c2) in self.queens.iter().enumerate().skip(r1 + 1) {
                if c1 == c2 || r2 - r1 == (c1 as isize - c2 as isize).abs() as usize {
                    count += 1;
                }
            }
        }
        count
    }
}

impl Display for Board {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for row in 0..self.n {
            for col in 0..self.n {
                let cell = match self.queens.get(row) {
                    Some(&c) if c == col => "Q".green().bold(),
                    Some(_) => ".".normal(),
                    None if self.is_attacked(row, col) => "x".red(),
                    None => ".".normal(),
                };
                write!(f, "{} ", cell)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Roots hold one queen in the first row; every expansion fills the next row.
pub struct Queens {
    n: usize,
    delay: Option<Duration>,
}

impl Queens {
    pub fn new(n: usize) -> Self {
        Queens { n, delay: None }
    }

    /// Sleeps `delay` on the context before every successor generation.
    pub fn slowed(n: usize, delay: Duration) -> Self {
        Queens {
            n,
            delay: Some(delay),
        }
    }
}

impl GraphGenerator<Board, usize> for Queens {
    fn roots(&self) -> Vec<Board> {
        let empty = Board::new(self.n);
        (0..self.n).map(|c| empty.place(c)).collect()
    }

    fn successors(&self, board: &Board, ctx: &Context) -> Result<Vec<Successor<Board, usize>>, ProblemError> {
        if let Some(d) = self.delay {
            ctx.sleep(d)?;
        }
        if board.is_full() {
            return Ok(vec![]);
        }
        Ok((0..self.n)
            .map(|col| Successor::new(col, board.place(col)))
            .collect())
    }
}

pub struct BoardFilled;

impl GoalTester<Board, usize> for BoardFilled {
    fn is_goal(&self, path: &Path<Board, usize>) -> bool {
        path.head().is_full()
    }
}

/// A board is a solution when its conflict count is zero.
pub struct NoConflicts;

impl GoalTester<Board, usize> for NoConflicts {
    fn is_goal(&self, path: &Path<Board, usize>) -> bool {
        path.head().is_full() && path.head().conflicts() == 0
    }
}

pub struct AttackedCells;

impl PathEvaluator<Board, usize> for AttackedCells {
    fn evaluate(&self, path: &Path<Board, usize>, _: &Context) -> Evaluation {
        Ok(Some(path.head().attacked_cells() as f64))
    }
}

pub struct Conflicts;

impl PathEvaluator<Board, usize> for Conflicts {
    fn evaluate(&self, path: &Path<Board, usize>, _: &Context) -> Evaluation {
        Ok(Some(path.head().conflicts() as f64))
    }
}

/// Delays another evaluator; the delay is interruptible.
pub struct Slowed<E> {
    pub inner: E,
    pub delay: Duration,
}

impl<S, A, E: PathEvaluator<S, A>> PathEvaluator<S, A> for Slowed<E> {
    fn evaluate(&self, path: &Path<S, A>, ctx: &Context) -> Evaluation {
        ctx.sleep(self.delay)?;
        self.inner.evaluate(path, ctx)
    }
}

pub fn queens(n: usize, evaluator: impl PathEvaluator<Board, usize> + 'static) -> SearchProblem<Board, usize> {
    SearchProblem::new(Queens::new(n), BoardFilled, evaluator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting() {
        let b = Board::new(4).place(1).place(3);
        // row 2: cols 1 and 3 by column, col 2 by diagonal
        assert!(b.is_attacked(2, 2));
        assert!(!b.is_attacked(2, 0));
        assert_eq!(b.attacked_cells(), 3 + 2);
        assert_eq!(b.conflicts(), 0);
        assert_eq!(b.place(0).place(2).conflicts(), 0);
        assert_eq!(Board::new(3).place(0).place(1).conflicts(), 1);
        assert_eq!(Board::new(3).place(0).place(1).place(2).attacked_cells(), 0);
        println!("{}", b);
    }

    #[test]
    fn generator() {
        let q = Queens::new(3);
        assert_eq!(q.roots().len(), 3);
        let ctx = Context::new();
        let s = q.successors(&q.roots()[0], &ctx).unwrap();
        assert_eq!(s.iter().map(|s| s.action).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(q.successors(&s[0].state.place(0), &ctx).unwrap().is_empty());
    }
}
