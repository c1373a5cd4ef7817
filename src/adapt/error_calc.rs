use super::config::{AdaptivityConfig, ComponentCombination, ErrorMode, NormKind};
use super::AdaptiveSpace;
use crate::basis::norm_integrand;
use crate::domain::cell::Cell;
use crate::domain::mesh::p_refinement::PolyOrders;
use crate::integration::GlqTable;
use crate::solution::Solution;

use log::{debug, warn};
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;

/// Relative tolerance on the measure covered by an element's reference Cells
const COVERAGE_TOL: f64 = 1e-10;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErrorCalcError {
    #[error("Got {coarse} coarse solutions but {reference} reference solutions!")]
    ComponentCountMismatch { coarse: usize, reference: usize },
    #[error("At least one solution component is needed to estimate errors!")]
    NoComponents,
    #[error("The reference Space does not match the coarse Space: {0}")]
    MeshMismatch(String),
}

/// Per-element error contributions along with the total error
///
/// The element errors are absolute and satisfy `Σ e_i² = total_absolute²`. The reported total is
/// either absolute or a percentage of the reference solution's norm, depending on the [ErrorMode].
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorTable {
    elem_errors: Vec<(usize, f64)>,
    total_absolute: f64,
    reference_norm: f64,
    mode: ErrorMode,
}

impl ErrorTable {
    /// An absolute-mode table built from precomputed element errors
    ///
    /// ```
    /// use hp_adapt::adapt::ErrorTable;
    ///
    /// let table = ErrorTable::from_errors(vec![(0, 3.0), (4, 4.0)]);
    /// assert_eq!(table.total(), 5.0);
    /// assert_eq!(table.error_of(4), Some(4.0));
    /// ```
    pub fn from_errors(elem_errors: Vec<(usize, f64)>) -> Self {
        let total_absolute = elem_errors.iter().map(|(_, e)| e * e).sum::<f64>().sqrt();
        Self {
            elem_errors,
            total_absolute,
            reference_norm: 0.0,
            mode: ErrorMode::Absolute,
        }
    }

    /// Element ids and their (absolute) errors in ascending id order
    pub fn elem_errors(&self) -> &[(usize, f64)] {
        &self.elem_errors
    }

    pub fn error_of(&self, elem_id: usize) -> Option<f64> {
        self.elem_errors
            .binary_search_by_key(&elem_id, |(id, _)| *id)
            .ok()
            .map(|idx| self.elem_errors[idx].1)
    }

    pub fn len(&self) -> usize {
        self.elem_errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elem_errors.is_empty()
    }

    /// `sqrt(Σ e_i²)`
    pub fn total_absolute(&self) -> f64 {
        self.total_absolute
    }

    /// Norm of the reference solution over the whole Domain
    pub fn reference_norm(&self) -> f64 {
        self.reference_norm
    }

    pub fn mode(&self) -> ErrorMode {
        self.mode
    }

    /// The total error as reported in the table's [ErrorMode] (a percentage in relative mode)
    pub fn total(&self) -> f64 {
        match self.mode {
            ErrorMode::Absolute => self.total_absolute,
            ErrorMode::RelativeErrorToGlobalNorm => 100.0 * self.total_absolute / self.reference_norm,
        }
    }
}

/// Computes [ErrorTable]s from a coarse/reference pair of Spaces and their solutions
#[derive(Clone, Copy, Debug)]
pub struct ErrorCalculator {
    pub norm: NormKind,
    pub combination: ComponentCombination,
    /// extra Gauss points (per direction) on top of `max order + 2`
    pub quad_extra: usize,
}

impl Default for ErrorCalculator {
    fn default() -> Self {
        Self {
            norm: NormKind::H1,
            combination: ComponentCombination::RootSumOfSquares,
            quad_extra: 3,
        }
    }
}

struct ElemCells {
    id: usize,
    orders: PolyOrders,
    cells: Vec<(Cell, PolyOrders)>,
}

impl ErrorCalculator {
    pub fn from_config(config: &AdaptivityConfig) -> Self {
        Self {
            norm: config.norm,
            combination: config.combination,
            quad_extra: config.quad_extra,
        }
    }

    fn num_points(&self, coarse: &PolyOrders, reference: &PolyOrders) -> usize {
        coarse.max_order().max(reference.max_order()) as usize + 2 + self.quad_extra
    }

    /// Estimate the error of every active coarse element as the norm of `reference - coarse` over it
    ///
    /// Integrals are evaluated over the active reference descendants of each coarse element, so the
    /// reference solution is only ever sampled where it is smooth.
    pub fn calculate_errors<S: AdaptiveSpace>(
        &self,
        coarse_space: &S,
        reference_space: &S,
        coarse_solutions: &[Arc<dyn Solution>],
        reference_solutions: &[Arc<dyn Solution>],
        normalize_by_reference: bool,
    ) -> Result<ErrorTable, ErrorCalcError> {
        if coarse_solutions.len() != reference_solutions.len() {
            return Err(ErrorCalcError::ComponentCountMismatch {
                coarse: coarse_solutions.len(),
                reference: reference_solutions.len(),
            });
        }
        if coarse_solutions.is_empty() {
            return Err(ErrorCalcError::NoComponents);
        }

        let coarse_active = coarse_space.active_elems();
        let num_reference_active = reference_space.active_elems().len();
        if num_reference_active < coarse_active.len() {
            return Err(ErrorCalcError::MeshMismatch(format!(
                "{} active reference elements for {} active coarse elements",
                num_reference_active,
                coarse_active.len()
            )));
        }

        let elems = coarse_active
            .into_iter()
            .map(|elem_id| {
                let info = coarse_space.elem_info(elem_id).ok_or_else(|| {
                    ErrorCalcError::MeshMismatch(format!("Elem {} is not active", elem_id))
                })?;
                let cells = match reference_space.reference_cells(elem_id) {
                    Some(cells) if !cells.is_empty() => cells,
                    _ => {
                        return Err(ErrorCalcError::MeshMismatch(format!(
                            "Elem {} has no active descendants in the reference Space",
                            elem_id
                        )))
                    }
                };

                if let Some((outside, _)) = cells.iter().find(|(cell, _)| !info.cell.covers(cell)) {
                    return Err(ErrorCalcError::MeshMismatch(format!(
                        "reference Cell {:?} lies outside of Elem {} ({:?})",
                        outside, elem_id, info.cell
                    )));
                }
                let covered: f64 = cells.iter().map(|(cell, _)| cell.measure()).sum();
                if (covered - info.cell.measure()).abs() > COVERAGE_TOL * info.cell.measure() {
                    return Err(ErrorCalcError::MeshMismatch(format!(
                        "reference Cells cover {:e} of Elem {} with measure {:e}",
                        covered,
                        elem_id,
                        info.cell.measure()
                    )));
                }

                Ok(ElemCells {
                    id: elem_id,
                    orders: info.orders,
                    cells,
                })
            })
            .collect::<Result<Vec<ElemCells>, ErrorCalcError>>()?;

        let num_covered: usize = elems.iter().map(|elem| elem.cells.len()).sum();
        if num_covered != num_reference_active {
            return Err(ErrorCalcError::MeshMismatch(format!(
                "{} of {} active reference elements lie within the coarse elements",
                num_covered, num_reference_active
            )));
        }

        let max_points = elems
            .iter()
            .flat_map(|elem| {
                elem.cells
                    .iter()
                    .map(move |(_, orders)| self.num_points(&elem.orders, orders))
            })
            .max()
            .unwrap_or(1);
        let table = GlqTable::new(max_points);

        let contributions: Vec<(usize, f64, f64)> = elems
            .par_iter()
            .map(|elem| {
                let (err, ref_norm_sq) =
                    self.elem_error(elem, coarse_solutions, reference_solutions, &table);
                (elem.id, err, ref_norm_sq)
            })
            .collect();

        let reference_norm = contributions
            .iter()
            .map(|(_, _, ref_norm_sq)| ref_norm_sq)
            .sum::<f64>()
            .sqrt();
        let elem_errors: Vec<(usize, f64)> = contributions
            .into_iter()
            .map(|(id, err, _)| (id, err))
            .collect();
        let total_absolute = elem_errors.iter().map(|(_, e)| e * e).sum::<f64>().sqrt();

        let mode = if !normalize_by_reference {
            ErrorMode::Absolute
        } else if reference_norm > 0.0 {
            ErrorMode::RelativeErrorToGlobalNorm
        } else {
            warn!("The reference solution has a norm of zero; reporting the absolute error instead");
            ErrorMode::Absolute
        };

        debug!(
            "Error estimate over {} elements: {:.6e} (reference norm {:.6e})",
            elem_errors.len(),
            total_absolute,
            reference_norm
        );

        Ok(ErrorTable {
            elem_errors,
            total_absolute,
            reference_norm,
            mode,
        })
    }

    /// Error of one coarse element (components combined) and the squared norm of the reference solution over it
    fn elem_error(
        &self,
        elem: &ElemCells,
        coarse_solutions: &[Arc<dyn Solution>],
        reference_solutions: &[Arc<dyn Solution>],
        table: &GlqTable,
    ) -> (f64, f64) {
        let mut component_errors = vec![0.0; coarse_solutions.len()];
        let mut ref_norm_sq = 0.0;

        for (cell, orders) in elem.cells.iter() {
            for (p, w) in cell.quadrature(table, self.num_points(&elem.orders, orders)) {
                for (component_error, (coarse, reference)) in component_errors
                    .iter_mut()
                    .zip(coarse_solutions.iter().zip(reference_solutions.iter()))
                {
                    let ref_val = reference.value(&p);
                    let ref_grad = reference.gradient(&p);
                    let diff_val = ref_val - coarse.value(&p);
                    let diff_grad = ref_grad - coarse.gradient(&p);

                    *component_error += w * norm_integrand(self.norm, diff_val, &diff_grad);
                    ref_norm_sq += w * norm_integrand(self.norm, ref_val, &ref_grad);
                }
            }
        }

        let err = match self.combination {
            ComponentCombination::RootSumOfSquares => {
                component_errors.iter().map(|e| e.max(0.0)).sum::<f64>().sqrt()
            }
            ComponentCombination::Sum => component_errors.iter().map(|e| e.max(0.0).sqrt()).sum(),
        };

        (err, ref_norm_sq.max(0.0))
    }
}

/// [ErrorCalculator::calculate_errors] with the default norm (H1), combination and quadrature
pub fn calculate_errors<S: AdaptiveSpace>(
    coarse_space: &S,
    reference_space: &S,
    coarse_solutions: &[Arc<dyn Solution>],
    reference_solutions: &[Arc<dyn Solution>],
    normalize_by_reference: bool,
) -> Result<ErrorTable, ErrorCalcError> {
    ErrorCalculator::default().calculate_errors(
        coarse_space,
        reference_space,
        coarse_solutions,
        reference_solutions,
        normalize_by_reference,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::line::LineDomain;
    use crate::domain::mesh::{space::Point, space::V2D, Mesh};
    use crate::domain::Domain;
    use crate::solution::ExactSolution;

    fn field(f: fn(&Point) -> f64, df: fn(&Point) -> V2D) -> Arc<dyn Solution> {
        Arc::new(ExactSolution::new(f, df))
    }

    fn zero() -> Arc<dyn Solution> {
        field(|_| 0.0, |_| V2D::zero())
    }

    fn linear() -> Arc<dyn Solution> {
        field(|p| p.x, |_| V2D::from([1.0, 0.0]))
    }

    #[test]
    fn identical_solutions_have_no_error() {
        let coarse = LineDomain::uniform(0.0, 1.0, 3, 2).unwrap();
        let reference = coarse.reference_space(true, 1).unwrap();
        let u = field(|p| p.x.sin(), |p| V2D::from([p.x.cos(), 0.0]));

        let table =
            calculate_errors(&coarse, &reference, &[u.clone()], &[u], true).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.total(), 0.0);
        assert!(table.elem_errors().iter().all(|(_, e)| *e == 0.0));
        assert_eq!(table.mode(), ErrorMode::RelativeErrorToGlobalNorm);
    }

    #[test]
    fn linear_field_against_zero() {
        let coarse = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
        let reference = coarse.reference_space(true, 1).unwrap();

        let calc = ErrorCalculator {
            norm: NormKind::L2,
            ..Default::default()
        };
        let table = calc
            .calculate_errors(&coarse, &reference, &[zero()], &[linear()], false)
            .unwrap();

        // ∫_0^0.5 x² dx = 1/24 and ∫_0.5^1 x² dx = 7/24
        assert!((table.error_of(0).unwrap() - (1.0_f64 / 24.0).sqrt()).abs() < 1e-12);
        assert!((table.error_of(1).unwrap() - (7.0_f64 / 24.0).sqrt()).abs() < 1e-12);
        assert!((table.total() - (1.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((table.reference_norm() - (1.0_f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn relative_error_is_a_percentage() {
        let coarse = Domain::from_mesh(Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 2, 2).unwrap());
        let reference = coarse.reference_space(true, 1).unwrap();
        let half: Arc<dyn Solution> = field(|p| p.x / 2.0, |_| V2D::from([0.5, 0.0]));

        let table = calculate_errors(&coarse, &reference, &[half], &[linear()], true).unwrap();
        assert_eq!(table.len(), 4);
        assert!((table.total() - 50.0).abs() < 1e-10);
        assert!((table.total_absolute() - table.reference_norm() / 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_reference_norm_falls_back_to_absolute() {
        let coarse = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
        let reference = coarse.reference_space(false, 1).unwrap();

        let table = calculate_errors(&coarse, &reference, &[linear()], &[zero()], true).unwrap();
        assert_eq!(table.mode(), ErrorMode::Absolute);
        assert!(table.total().is_finite());
        assert!(table.total() > 0.0);
    }

    #[test]
    fn component_combinations() {
        let coarse = LineDomain::uniform(0.0, 1.0, 1, 1).unwrap();
        let reference = coarse.reference_space(true, 0).unwrap();
        let one: Arc<dyn Solution> = field(|_| 1.0, |_| V2D::zero());

        let mut calc = ErrorCalculator {
            norm: NormKind::L2,
            ..Default::default()
        };
        let rss = calc
            .calculate_errors(&coarse, &reference, &[zero(), zero()], &[one.clone(), one.clone()], false)
            .unwrap();
        assert!((rss.total() - 2.0_f64.sqrt()).abs() < 1e-12);

        calc.combination = ComponentCombination::Sum;
        let sum = calc
            .calculate_errors(&coarse, &reference, &[zero(), zero()], &[one.clone(), one], false)
            .unwrap();
        assert!((sum.total() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn structural_errors() {
        let coarse = LineDomain::uniform(0.0, 1.0, 4, 1).unwrap();
        let reference = coarse.reference_space(true, 0).unwrap();

        assert_eq!(
            calculate_errors(&coarse, &reference, &[zero()], &[zero(), zero()], true).unwrap_err(),
            ErrorCalcError::ComponentCountMismatch {
                coarse: 1,
                reference: 2
            }
        );
        assert_eq!(
            calculate_errors(&coarse, &reference, &[], &[], true).unwrap_err(),
            ErrorCalcError::NoComponents
        );

        let smaller = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
        assert!(matches!(
            calculate_errors(&coarse, &smaller, &[zero()], &[zero()], true),
            Err(ErrorCalcError::MeshMismatch(_))
        ));

        // same number of elements but the ids of the refined coarse Space are unknown to the reference
        let mut refined = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
        refined.h_refine(0).unwrap();
        let other = LineDomain::uniform(0.0, 1.0, 3, 1).unwrap();
        assert!(matches!(
            calculate_errors(&refined, &other, &[zero()], &[zero()], true),
            Err(ErrorCalcError::MeshMismatch(_))
        ));
    }

    #[test]
    fn reference_cells_must_tile_the_coarse_elems() {
        let coarse = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
        let mismatched = |reference: &LineDomain| {
            matches!(
                calculate_errors(&coarse, reference, &[zero()], &[zero()], true),
                Err(ErrorCalcError::MeshMismatch(_))
            )
        };

        // disjoint
        assert!(mismatched(&LineDomain::uniform(5.0, 6.0, 2, 1).unwrap()));
        // inside, but not covering
        assert!(mismatched(&LineDomain::uniform(0.0, 0.8, 2, 1).unwrap()));
        // an active reference element outside of every coarse element
        assert!(mismatched(&LineDomain::uniform(0.0, 1.5, 3, 1).unwrap()));
        // the coarse Space is a valid reference for itself
        assert!(calculate_errors(&coarse, &coarse, &[zero()], &[zero()], true).is_ok());

        let square = Domain::from_mesh(Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 2, 2).unwrap());
        let larger = Domain::from_mesh(Mesh::rectangle([0.0, 2.0], [0.0, 2.0], 2, 2).unwrap());
        assert!(matches!(
            calculate_errors(&square, &larger, &[zero()], &[zero()], true),
            Err(ErrorCalcError::MeshMismatch(_))
        ));
    }
}
