use crate::adapt::config::NormKind;
use crate::domain::cell::Cell;
use crate::domain::mesh::{
    p_refinement::PolyOrders,
    space::{Point, V2D},
};
use crate::integration::GlqTable;
use crate::solution::Solution;

use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;
use thiserror::Error;

/// Legendre polynomials `P_0..=P_n` and their first derivatives at `t`
///
/// ```
/// use hp_adapt::basis::legendre;
///
/// let p = legendre(3, 0.5);
/// assert!((p[2].0 - (3.0 * 0.25 - 1.0) / 2.0).abs() < 1e-14);
/// assert!((p[3].1 - (15.0 * 0.25 - 3.0) / 2.0).abs() < 1e-14);
/// ```
pub fn legendre(n: u8, t: f64) -> SmallVec<[(f64, f64); 12]> {
    let mut values: SmallVec<[(f64, f64); 12]> = SmallVec::with_capacity(n as usize + 1);
    values.push((1.0, 0.0));
    if n >= 1 {
        values.push((t, 1.0));
    }

    for k in 1..n as usize {
        let kf = k as f64;
        let (p_k, d_k) = values[k];
        let (p_km1, d_km1) = values[k - 1];

        let p_kp1 = ((2.0 * kf + 1.0) * t * p_k - kf * p_km1) / (kf + 1.0);
        let d_kp1 = d_km1 + (2.0 * kf + 1.0) * p_k;
        values.push((p_kp1, d_kp1));
    }

    values
}

/// Tensor-product Legendre basis over a [Cell]
///
/// Intervals use `P_i(u)` for `i ∈ [0, ni]`; Rects use `P_i(u) P_j(v)` for `i ∈ [0, ni]`, `j ∈ [0, nj]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalBasis {
    pub cell: Cell,
    pub orders: PolyOrders,
}

impl LocalBasis {
    pub fn new(cell: Cell, orders: PolyOrders) -> Self {
        Self { cell, orders }
    }

    /// Number of basis functions
    pub fn size(&self) -> usize {
        match self.cell {
            Cell::Interval { .. } => self.orders.interval_size(),
            Cell::Rect { .. } => self.orders.quad_size(),
        }
    }

    /// Values and real-space gradients of every basis function at a point
    pub fn sample(&self, p: &Point) -> Vec<(f64, V2D)> {
        let [u, v] = self.cell.to_reference(p);
        let [du_dx, dv_dy] = self.cell.inverse_jacobian();

        match self.cell {
            Cell::Interval { .. } => legendre(self.orders.ni, u)
                .iter()
                .map(|(p_i, d_i)| (*p_i, V2D::from([d_i * du_dx, 0.0])))
                .collect(),
            Cell::Rect { .. } => {
                let lu = legendre(self.orders.ni, u);
                let lv = legendre(self.orders.nj, v);
                self.orders
                    .permutations()
                    .map(|[i, j]| {
                        let (p_i, d_i) = lu[i as usize];
                        let (p_j, d_j) = lv[j as usize];
                        (
                            p_i * p_j,
                            V2D::from([d_i * p_j * du_dx, p_i * d_j * dv_dy]),
                        )
                    })
                    .collect()
            }
        }
    }
}

/// A polynomial over a single [Cell], expressed in a [LocalBasis]
#[derive(Clone, Debug)]
pub struct LocalPolynomial {
    pub basis: LocalBasis,
    pub coefficients: Vec<f64>,
}

impl LocalPolynomial {
    pub fn zero(basis: LocalBasis) -> Self {
        Self {
            coefficients: vec![0.0; basis.size()],
            basis,
        }
    }

    pub fn cell(&self) -> &Cell {
        &self.basis.cell
    }

    pub fn value_and_gradient(&self, p: &Point) -> (f64, V2D) {
        self.basis
            .sample(p)
            .iter()
            .zip(self.coefficients.iter())
            .fold((0.0, V2D::zero()), |(val, grad), ((phi, dphi), c)| {
                (val + phi * c, grad + *dphi * *c)
            })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("Local projection onto {0} with orders {1} is singular!")]
    Singular(Cell, PolyOrders),
    #[error("Local projection needs at least one integration region inside {0}!")]
    NoRegions(Cell),
}

/// Weight of the gradient terms of an inner product (the value terms always have weight 1)
fn gradient_weight(norm: NormKind) -> f64 {
    match norm {
        NormKind::L2 => 0.0,
        NormKind::H1Seminorm | NormKind::H1 => 1.0,
    }
}

/// Integrand of the squared norm of a function with value `val` and gradient `grad`
pub fn norm_integrand(norm: NormKind, val: f64, grad: &V2D) -> f64 {
    match norm {
        NormKind::L2 => val * val,
        NormKind::H1Seminorm => grad.norm_squared(),
        NormKind::H1 => val * val + grad.norm_squared(),
    }
}

/// Project a [Solution] onto the polynomials of `basis`
///
/// The projection is computed in the L2 inner product, or the full H1 inner product for
/// H1-type norms (the seminorm alone does not fix constants). Integrals are taken over `regions`,
/// Cells covering the basis Cell inside which the target is smooth, using `n_points` Gauss points
/// per direction.
///
/// Returns the projection along with its squared error measured in `norm`.
pub fn project(
    target: &dyn Solution,
    basis: LocalBasis,
    regions: &[Cell],
    norm: NormKind,
    table: &GlqTable,
    n_points: usize,
) -> Result<(LocalPolynomial, f64), ProjectionError> {
    if regions.is_empty() {
        return Err(ProjectionError::NoRegions(basis.cell));
    }

    let size = basis.size();
    let grad_w = gradient_weight(norm);

    let mut gram = DMatrix::<f64>::zeros(size, size);
    let mut rhs = DVector::<f64>::zeros(size);
    let mut samples = Vec::new();

    for region in regions {
        for (p, w) in region.quadrature(table, n_points) {
            let phis = basis.sample(&p);
            let f = target.value(&p);
            let df = target.gradient(&p);

            for (a, (phi_a, dphi_a)) in phis.iter().enumerate() {
                rhs[a] += w * (f * phi_a + grad_w * df.dot_with(dphi_a));
                for (b, (phi_b, dphi_b)) in phis.iter().enumerate().skip(a) {
                    let entry = w * (phi_a * phi_b + grad_w * dphi_a.dot_with(dphi_b));
                    gram[(a, b)] += entry;
                    if a != b {
                        gram[(b, a)] += entry;
                    }
                }
            }

            samples.push((w, f, df, phis));
        }
    }

    let coefficients = match gram.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs),
        None => gram
            .lu()
            .solve(&rhs)
            .ok_or(ProjectionError::Singular(basis.cell, basis.orders))?,
    };

    let err_squared = samples
        .iter()
        .map(|(w, f, df, phis)| {
            let (val, grad) = phis
                .iter()
                .zip(coefficients.iter())
                .fold((0.0, V2D::zero()), |(val, grad), ((phi, dphi), c)| {
                    (val + phi * c, grad + *dphi * *c)
                });
            w * norm_integrand(norm, f - val, &(*df - grad))
        })
        .sum::<f64>();

    Ok((
        LocalPolynomial {
            basis,
            coefficients: coefficients.iter().copied().collect(),
        },
        err_squared.max(0.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::ExactSolution;

    #[test]
    fn legendre_orthogonality() {
        let table = GlqTable::new(10);
        let (points, weights) = table.rule(10);
        for m in 0..6 {
            for n in 0..6 {
                let integral: f64 = points
                    .iter()
                    .zip(weights.iter())
                    .map(|(t, w)| {
                        let l = legendre(6, *t);
                        l[m].0 * l[n].0 * w
                    })
                    .sum();
                let expected = if m == n { 2.0 / (2.0 * m as f64 + 1.0) } else { 0.0 };
                assert!((integral - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn basis_gradients_are_scaled() {
        let basis = LocalBasis::new(
            Cell::Rect {
                x: [0.0, 4.0],
                y: [0.0, 1.0],
            },
            PolyOrders::from(1, 1),
        );
        assert_eq!(basis.size(), 4);

        // P_1(u) P_0(v) = u = x / 2 - 1
        let samples = basis.sample(&Point::new(1.0, 0.5));
        let (val, grad) = samples[2];
        assert!((val + 0.5).abs() < 1e-14);
        assert!((grad.x() - 0.5).abs() < 1e-14);
        assert!(grad.y().abs() < 1e-14);
    }

    #[test]
    fn polynomials_are_reproduced() {
        let table = GlqTable::new(10);
        let target = ExactSolution::new(
            |p: &Point| p.x * p.x * p.y + 2.0,
            |p: &Point| V2D::from([2.0 * p.x * p.y, p.x * p.x]),
        );
        let cell = Cell::Rect {
            x: [1.0, 2.0],
            y: [0.0, 0.5],
        };

        for norm in [NormKind::L2, NormKind::H1Seminorm, NormKind::H1] {
            let (poly, err) = project(
                &target,
                LocalBasis::new(cell, PolyOrders::from(2, 1)),
                &[cell],
                norm,
                &table,
                5,
            )
            .unwrap();
            assert!(err < 1e-20);

            let (val, _) = poly.value_and_gradient(&Point::new(1.5, 0.25));
            assert!((val - (1.5 * 1.5 * 0.25 + 2.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn projection_error_decreases_with_order() {
        let table = GlqTable::new(12);
        let target = ExactSolution::new(|p: &Point| p.x.sin(), |p: &Point| V2D::from([p.x.cos(), 0.0]));
        let cell = Cell::Interval { x: [0.0, 2.0] };

        let errors: Vec<f64> = (1..5)
            .map(|p| {
                project(
                    &target,
                    LocalBasis::new(cell, PolyOrders::from(p, 0)),
                    &[cell],
                    NormKind::H1,
                    &table,
                    10,
                )
                .unwrap()
                .1
            })
            .collect();

        assert!(errors.windows(2).all(|pair| pair[1] < pair[0]));
    }

    #[test]
    fn empty_regions() {
        let table = GlqTable::new(2);
        let target = ExactSolution::new(|_: &Point| 1.0, |_: &Point| V2D::zero());
        let cell = Cell::Interval { x: [0.0, 1.0] };
        assert_eq!(
            project(&target, LocalBasis::new(cell, PolyOrders::iso(1)), &[], NormKind::L2, &table, 2)
                .unwrap_err(),
            ProjectionError::NoRegions(cell)
        );
    }
}
