use super::candidates::{enumerate_candidates, local_basis_size, RefinementCandidate};
use super::config::{AdaptivityConfig, CandList, CandidateErrorModel, NormKind};
use super::{AdaptiveSpace, ElemInfo};
use crate::basis::{project, LocalBasis, ProjectionError};
use crate::domain::cell::Cell;
use crate::domain::mesh::p_refinement::PolyOrders;
use crate::integration::GlqTable;
use crate::solution::Solution;

use log::trace;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectError {
    #[error("No refinement candidate is applicable to Elem {0}")]
    NoCandidatesApplicable(usize),
    #[error("Elem {0} has no reference Cells to project onto")]
    MissingReferenceCells(usize),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// The winning candidate of an element
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub elem_id: usize,
    /// the chosen candidate with its local DOFs, predicted error and score filled in
    pub candidate: RefinementCandidate,
    /// number of candidates that were scored
    pub num_scored: usize,
}

/// Picks the candidate with the best error reduction per added Degree of Freedom
#[derive(Clone, Debug)]
pub struct RefinementSelector {
    pub cand_list: CandList,
    pub conv_exp: f64,
    pub max_order: u8,
    pub mesh_regularity: i32,
    pub model: CandidateErrorModel,
    pub norm: NormKind,
    pub tie_tolerance: f64,
    pub quad_extra: usize,
    table: Arc<GlqTable>,
}

impl RefinementSelector {
    pub fn new(config: &AdaptivityConfig) -> Self {
        let max_points = config.max_order as usize
            + config.reference_order_increase as usize
            + 2
            + config.quad_extra;

        Self {
            cand_list: config.cand_list,
            conv_exp: config.conv_exp,
            max_order: config.max_order,
            mesh_regularity: config.mesh_regularity,
            model: config.candidate_error,
            norm: config.norm,
            tie_tolerance: config.tie_tolerance,
            quad_extra: config.quad_extra,
            table: Arc::new(GlqTable::new(max_points)),
        }
    }

    /// The candidates of an element which are admissible in `space` and add Degrees of Freedom
    ///
    /// Each candidate has its local DOFs filled in. Candidates which lower a child order below the
    /// element's must also not reduce the global number of DOFs.
    pub fn candidates<S: AdaptiveSpace>(&self, elem: &ElemInfo, space: &S) -> Vec<RefinementCandidate> {
        let current_dofs = local_basis_size(elem.shape, &elem.orders);
        let lowers_an_order = |candidate: &RefinementCandidate| {
            candidate
                .child_orders
                .iter()
                .any(|o| o.ni < elem.orders.ni || o.nj < elem.orders.nj)
        };

        enumerate_candidates(self.cand_list, elem, self.max_order)
            .into_iter()
            .filter(|candidate| match candidate.split {
                Some(refinement) => {
                    candidate.child_cells(&elem.cell).is_some()
                        && space.split_admissible(elem.id, refinement, self.mesh_regularity)
                }
                None => true,
            })
            .filter_map(|mut candidate| {
                let dofs = candidate.local_dofs(elem.shape);
                if dofs > current_dofs {
                    candidate.dofs = Some(dofs);
                    Some(candidate)
                } else {
                    None
                }
            })
            .filter(|candidate| {
                !lowers_an_order(candidate)
                    || matches!(space.dof_change(elem.id, candidate), Ok(change) if change >= 0)
            })
            .collect()
    }

    /// Choose the refinement of `elem` with the highest score
    ///
    /// `reference_cells` are the footprints (and orders) of the element's active descendants in the
    /// reference Space; they are only used by the projection model. `elem_error` is the element's
    /// entry in the current error table.
    ///
    /// Scores are `(ln e_0 - ln e_c) / (d_c - d_0)^conv_exp`. Ties within the relative tie tolerance
    /// go to the candidate adding fewer DOFs, then to the first enumerated candidate.
    pub fn select_refinement<S: AdaptiveSpace>(
        &self,
        elem: &ElemInfo,
        coarse_space: &S,
        reference_cells: &[(Cell, PolyOrders)],
        reference_solutions: &[Arc<dyn Solution>],
        elem_error: f64,
    ) -> Result<Selection, SelectError> {
        let candidates = self.candidates(elem, coarse_space);
        if candidates.is_empty() {
            return Err(SelectError::NoCandidatesApplicable(elem.id));
        }

        let d_0 = local_basis_size(elem.shape, &elem.orders);
        let e_0 = match self.model {
            CandidateErrorModel::Analytic => elem_error,
            CandidateErrorModel::Projection => self.projection_error(
                elem.id,
                &[(elem.cell, elem.orders)],
                reference_cells,
                reference_solutions,
            )?,
        };

        let mut best: Option<RefinementCandidate> = None;
        let num_scored = candidates.len();

        for mut candidate in candidates {
            let d_c = candidate.dofs.unwrap_or(d_0);
            let e_c = match self.model {
                CandidateErrorModel::Analytic => {
                    e_0 * (d_c as f64 / d_0 as f64).powf(-self.conv_exp)
                }
                CandidateErrorModel::Projection => {
                    let children: Vec<(Cell, PolyOrders)> = candidate
                        .child_cells(&elem.cell)
                        .ok_or(SelectError::NoCandidatesApplicable(elem.id))?
                        .into_iter()
                        .zip(candidate.child_orders.iter().copied())
                        .collect();
                    self.projection_error(elem.id, &children, reference_cells, reference_solutions)?
                }
            };

            let score = (log_floor(e_0) - log_floor(e_c)) / ((d_c - d_0) as f64).powf(self.conv_exp);
            trace!(
                "Elem {}: candidate {:?} {:?} -> dofs {}, error {:.4e}, score {:.6e}",
                elem.id,
                candidate.split,
                candidate.child_orders.as_slice(),
                d_c,
                e_c,
                score
            );

            candidate.error = Some(e_c);
            candidate.score = Some(score);

            let replace = match &best {
                None => true,
                Some(current) => self.beats(&candidate, current, d_0),
            };
            if replace {
                best = Some(candidate);
            }
        }

        best.map(|candidate| Selection {
            elem_id: elem.id,
            candidate,
            num_scored,
        })
        .ok_or(SelectError::NoCandidatesApplicable(elem.id))
    }

    /// Whether `challenger` should replace `incumbent` (which was enumerated earlier)
    fn beats(&self, challenger: &RefinementCandidate, incumbent: &RefinementCandidate, d_0: usize) -> bool {
        let (a, b) = (
            challenger.score.unwrap_or(f64::NEG_INFINITY),
            incumbent.score.unwrap_or(f64::NEG_INFINITY),
        );
        let scale = f64::max(a.abs(), b.abs());

        if (a - b).abs() <= self.tie_tolerance * scale {
            let increase = |c: &RefinementCandidate| c.dofs.unwrap_or(d_0) - d_0;
            increase(challenger).cmp(&increase(incumbent)) == Ordering::Less
        } else {
            a > b
        }
    }

    /// Error of the local projection of the reference solutions onto the piecewise polynomials
    /// given by `children`, with components combined as a root sum of squares
    fn projection_error(
        &self,
        elem_id: usize,
        children: &[(Cell, PolyOrders)],
        reference_cells: &[(Cell, PolyOrders)],
        reference_solutions: &[Arc<dyn Solution>],
    ) -> Result<f64, SelectError> {
        if reference_cells.is_empty() {
            return Err(SelectError::MissingReferenceCells(elem_id));
        }

        let mut err_squared = 0.0;
        for (child, orders) in children {
            let (regions, ref_order) = reference_cells.iter().fold(
                (Vec::new(), 0),
                |(mut regions, max_order), (cell, ref_orders)| {
                    if let Some(overlap) = child.intersection(cell) {
                        regions.push(overlap);
                        (regions, u8::max(max_order, ref_orders.max_order()))
                    } else {
                        (regions, max_order)
                    }
                },
            );
            let n_points = u8::max(ref_order, orders.max_order()) as usize + 2 + self.quad_extra;

            for reference in reference_solutions {
                let (_, child_err) = project(
                    reference.as_ref(),
                    LocalBasis::new(*child, *orders),
                    &regions,
                    self.norm,
                    &self.table,
                    n_points,
                )?;
                err_squared += child_err;
            }
        }

        Ok(err_squared.sqrt())
    }
}

/// `ln(e)`, with errors of zero treated as the smallest positive number
fn log_floor(e: f64) -> f64 {
    e.max(f64::MIN_POSITIVE).ln()
}
