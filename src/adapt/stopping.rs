use super::config::{AdaptivityConfig, MarkingStrategy};
use super::error_calc::ErrorTable;

use std::cmp::Ordering;

/// Decides which elements are refined during an adaptivity step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoppingCriterion {
    pub strategy: MarkingStrategy,
    /// fraction in `(0, 1]`, or an error bound for [MarkingStrategy::Absolute]
    pub threshold: f64,
    /// relative tolerance under which two errors are considered equal
    pub tie_tolerance: f64,
}

impl StoppingCriterion {
    pub fn new(strategy: MarkingStrategy, threshold: f64) -> Self {
        Self {
            strategy,
            threshold,
            tie_tolerance: 1e-10,
        }
    }

    pub fn from_config(config: &AdaptivityConfig) -> Self {
        Self {
            strategy: config.marking,
            threshold: config.threshold,
            tie_tolerance: config.tie_tolerance,
        }
    }

    fn ties(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.tie_tolerance * f64::max(a.abs(), b.abs())
    }

    /// IDs of the elements to refine, largest errors first (equal errors in ascending id order)
    ///
    /// Elements whose errors tie with the last marked element are marked along with it, so
    /// symmetric meshes are refined symmetrically. Elements without error are never marked.
    ///
    /// ```
    /// use hp_adapt::adapt::{ErrorTable, StoppingCriterion};
    /// use hp_adapt::adapt::config::MarkingStrategy;
    ///
    /// let table = ErrorTable::from_errors(vec![(0, 10.0), (1, 10.0), (2, 1.0)]);
    /// let criterion = StoppingCriterion::new(MarkingStrategy::Cumulative, 0.5);
    /// assert_eq!(criterion.mark_elements(&table), vec![0, 1]);
    /// ```
    pub fn mark_elements(&self, table: &ErrorTable) -> Vec<usize> {
        let mut sorted: Vec<(usize, f64)> = table
            .elem_errors()
            .iter()
            .copied()
            .filter(|(_, e)| *e > 0.0)
            .collect();
        sorted.sort_by(|(id_a, e_a), (id_b, e_b)| {
            e_b.partial_cmp(e_a)
                .unwrap_or(Ordering::Equal)
                .then(id_a.cmp(id_b))
        });

        let Some(&(_, max_error)) = sorted.first() else {
            return Vec::new();
        };

        match self.strategy {
            MarkingStrategy::Cumulative => {
                let sum: f64 = sorted.iter().map(|(_, e)| e).sum();
                let target = self.threshold * sum - 1e-12 * sum;

                let mut marked = Vec::new();
                let mut cumulative = 0.0;
                let mut boundary: Option<f64> = None;

                for (id, e) in sorted {
                    match boundary {
                        Some(last) if !self.ties(e, last) => break,
                        _ => (),
                    }

                    marked.push(id);
                    cumulative += e;
                    if boundary.is_none() && cumulative >= target {
                        boundary = Some(e);
                    }
                }

                marked
            }
            MarkingStrategy::RelativeToMax => {
                let limit = self.threshold * max_error;
                sorted
                    .into_iter()
                    .take_while(|(_, e)| *e >= limit || self.ties(*e, limit))
                    .map(|(id, _)| id)
                    .collect()
            }
            MarkingStrategy::Absolute => sorted
                .into_iter()
                .take_while(|(_, e)| *e > self.threshold)
                .map(|(id, _)| id)
                .collect(),
        }
    }
}
