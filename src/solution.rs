use crate::adapt::{config::NormKind, AdaptiveSpace};
use crate::basis::{project, LocalBasis, LocalPolynomial, ProjectionError};
use crate::domain::cell::{ElemShape, CONTAINMENT_TOL};
use crate::domain::mesh::space::{Point, V2D};
use crate::integration::GlqTable;

use rayon::prelude::*;

/// A scalar field which can be sampled anywhere inside its Domain
///
/// Reference solutions are produced by an external solver; coarse solutions are either supplied by
/// the same solver or obtained by local projection ([PiecewisePolynomial]).
pub trait Solution: Send + Sync {
    fn value(&self, p: &Point) -> f64;
    fn gradient(&self, p: &Point) -> V2D;
}

type ValueFn = dyn Fn(&Point) -> f64 + Send + Sync;
type GradientFn = dyn Fn(&Point) -> V2D + Send + Sync;

/// A [Solution] defined by closures (exact solutions and manufactured test fields)
pub struct ExactSolution {
    value: Box<ValueFn>,
    gradient: Box<GradientFn>,
}

impl ExactSolution {
    pub fn new<F, G>(value: F, gradient: G) -> Self
    where
        F: Fn(&Point) -> f64 + Send + Sync + 'static,
        G: Fn(&Point) -> V2D + Send + Sync + 'static,
    {
        Self {
            value: Box::new(value),
            gradient: Box::new(gradient),
        }
    }
}

impl Solution for ExactSolution {
    fn value(&self, p: &Point) -> f64 {
        (self.value)(p)
    }

    fn gradient(&self, p: &Point) -> V2D {
        (self.gradient)(p)
    }
}

impl std::fmt::Debug for ExactSolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExactSolution")
    }
}

/// A discontinuous piecewise polynomial field: one [LocalPolynomial] per Cell
///
/// Points outside every Cell evaluate to zero. On shared boundaries the first containing piece wins.
#[derive(Clone, Debug, Default)]
pub struct PiecewisePolynomial {
    pieces: Vec<LocalPolynomial>,
    index: PieceIndex,
}

impl PiecewisePolynomial {
    pub fn new(pieces: Vec<LocalPolynomial>) -> Self {
        let index = PieceIndex::new(&pieces);
        Self { pieces, index }
    }

    pub fn pieces(&self) -> &[LocalPolynomial] {
        &self.pieces
    }

    /// Project `target` onto the polynomials of every active element of `space`, one element at a time
    ///
    /// The integrals over each element are split along its active descendants in `reference`, where
    /// `target` (typically the reference solution) is smooth.
    pub fn project_onto<S: AdaptiveSpace>(
        space: &S,
        reference: &S,
        target: &dyn Solution,
        norm: NormKind,
        quad_extra: usize,
    ) -> Result<Self, ProjectionError> {
        let elems: Vec<_> = space
            .active_elems()
            .into_iter()
            .filter_map(|elem_id| space.elem_info(elem_id))
            .map(|elem| {
                let regions = reference.reference_cells(elem.id).unwrap_or_default();
                let ref_order = regions
                    .iter()
                    .map(|(_, orders)| orders.max_order())
                    .max()
                    .unwrap_or(0);
                let n_points = elem.orders.max_order().max(ref_order) as usize + 2 + quad_extra;
                (elem, regions, n_points)
            })
            .collect();

        let table = GlqTable::new(elems.iter().map(|(_, _, n)| *n).max().unwrap_or(1));

        let pieces = elems
            .par_iter()
            .map(|(elem, regions, n_points)| {
                let cells: Vec<_> = regions.iter().map(|(cell, _)| *cell).collect();
                project(
                    target,
                    LocalBasis::new(elem.cell, elem.orders),
                    &cells,
                    norm,
                    &table,
                    *n_points,
                )
                .map(|(piece, _)| piece)
            })
            .collect::<Result<Vec<_>, ProjectionError>>()?;

        Ok(Self::new(pieces))
    }

    fn piece_at(&self, p: &Point) -> Option<&LocalPolynomial> {
        self.index
            .candidates(p)
            .iter()
            .map(|i| &self.pieces[*i])
            .find(|piece| piece.cell().contains(p))
    }
}

/// A uniform grid of buckets over the bounding box of the pieces
///
/// Every bucket lists (in ascending order) the pieces whose slightly enlarged Cell overlaps it.
#[derive(Clone, Debug, Default)]
struct PieceIndex {
    origin: [f64; 2],
    step: [f64; 2],
    dims: [usize; 2],
    buckets: Vec<Vec<usize>>,
}

impl PieceIndex {
    fn new(pieces: &[LocalPolynomial]) -> Self {
        if pieces.is_empty() {
            return Self::default();
        }

        let bounds: Vec<[[f64; 2]; 2]> = pieces.iter().map(|piece| piece.cell().bounds()).collect();
        let planar = pieces.iter().any(|piece| piece.cell().shape() == ElemShape::Quad);
        let per_axis = if planar {
            (pieces.len() as f64).sqrt().ceil() as usize
        } else {
            pieces.len()
        };

        let mut index = Self::default();
        for axis in 0..2 {
            let lo = bounds.iter().map(|b| b[axis][0]).fold(f64::INFINITY, f64::min);
            let hi = bounds.iter().map(|b| b[axis][1]).fold(f64::NEG_INFINITY, f64::max);
            let dims = if hi > lo { per_axis.max(1) } else { 1 };

            index.origin[axis] = lo;
            index.dims[axis] = dims;
            index.step[axis] = if hi > lo { (hi - lo) / dims as f64 } else { 1.0 };
        }

        index.buckets = vec![Vec::new(); index.dims[0] * index.dims[1]];
        for (piece_id, [x, y]) in bounds.iter().enumerate() {
            let [i0, i1] = index.bucket_span(0, *x);
            let [j0, j1] = index.bucket_span(1, *y);
            for j in j0..=j1 {
                for i in i0..=i1 {
                    index.buckets[j * index.dims[0] + i].push(piece_id);
                }
            }
        }
        index
    }

    fn bucket(&self, axis: usize, v: f64) -> usize {
        let k = ((v - self.origin[axis]) / self.step[axis]).floor();
        if k > 0.0 {
            (k as usize).min(self.dims[axis] - 1)
        } else {
            0
        }
    }

    /// Buckets overlapped by a range, enlarged beyond the tolerance of [Cell::contains]
    fn bucket_span(&self, axis: usize, [min, max]: [f64; 2]) -> [usize; 2] {
        let tol = 2.0 * CONTAINMENT_TOL * f64::max(1.0, (max - min).abs());
        [self.bucket(axis, min - tol), self.bucket(axis, max + tol)]
    }

    fn candidates(&self, p: &Point) -> &[usize] {
        if self.buckets.is_empty() {
            return &[];
        }
        let i = self.bucket(0, p.x);
        let j = self.bucket(1, p.y);
        &self.buckets[j * self.dims[0] + i]
    }
}

impl Solution for PiecewisePolynomial {
    fn value(&self, p: &Point) -> f64 {
        self.piece_at(p)
            .map_or(0.0, |piece| piece.value_and_gradient(p).0)
    }

    fn gradient(&self, p: &Point) -> V2D {
        self.piece_at(p)
            .map_or(V2D::zero(), |piece| piece.value_and_gradient(p).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::LocalBasis;
    use crate::domain::cell::Cell;
    use crate::domain::mesh::p_refinement::PolyOrders;

    #[test]
    fn exact_solution_closures() {
        let u = ExactSolution::new(|p: &Point| p.x * p.y, |p: &Point| V2D::from([p.y, p.x]));
        let p = Point::new(2.0, 3.0);
        assert_eq!(u.value(&p), 6.0);
        assert_eq!(u.gradient(&p), V2D::from([3.0, 2.0]));
    }

    #[test]
    fn projection_onto_a_line() {
        use crate::domain::line::LineDomain;

        let coarse = LineDomain::uniform(0.0, 1.0, 2, 2).unwrap();
        let reference = coarse.reference_space(true, 1).unwrap();
        let u = ExactSolution::new(|p: &Point| p.x * p.x, |p: &Point| V2D::from([2.0 * p.x, 0.0]));

        let projection =
            PiecewisePolynomial::project_onto(&coarse, &reference, &u, NormKind::H1, 3).unwrap();
        assert_eq!(projection.pieces().len(), 2);
        for x in [0.1, 0.3, 0.6, 0.95] {
            let p = Point::on_line(x);
            assert!((projection.value(&p) - x * x).abs() < 1e-12);
            assert!((projection.gradient(&p).x() - 2.0 * x).abs() < 1e-12);
        }

        // linears cannot represent the parabola
        let linear = LineDomain::uniform(0.0, 1.0, 2, 1).unwrap();
        let projection =
            PiecewisePolynomial::project_onto(&linear, &reference, &u, NormKind::L2, 3).unwrap();
        assert!((projection.value(&Point::on_line(0.25)) - 0.0625).abs() > 1e-3);
    }

    #[test]
    fn piecewise_lookup() {
        let left = LocalPolynomial {
            basis: LocalBasis::new(Cell::Interval { x: [0.0, 1.0] }, PolyOrders::from(0, 0)),
            coefficients: vec![1.0],
        };
        let right = LocalPolynomial {
            basis: LocalBasis::new(Cell::Interval { x: [1.0, 2.0] }, PolyOrders::from(1, 0)),
            coefficients: vec![0.0, 2.0],
        };
        let field = PiecewisePolynomial::new(vec![left, right]);

        assert_eq!(field.value(&Point::on_line(0.5)), 1.0);
        // P_1 on [1, 2] at x = 1.75 is u = 0.5
        assert!((field.value(&Point::on_line(1.75)) - 1.0).abs() < 1e-14);
        assert!((field.gradient(&Point::on_line(1.75)).x() - 4.0).abs() < 1e-14);
        assert_eq!(field.value(&Point::on_line(3.0)), 0.0);
    }

    #[test]
    fn indexed_lookup_matches_a_scan() {
        let constant = |cell: Cell, value: f64| LocalPolynomial {
            basis: LocalBasis::new(cell, PolyOrders::from(0, 0)),
            coefficients: vec![value],
        };
        // a graded 7 x 5 grid with one tiny column
        let xs = [0.0, 0.001, 0.002, 0.5, 1.0, 2.0, 3.0, 7.0];
        let ys = [-1.0, 0.0, 0.25, 0.5, 2.0, 3.0];
        let mut pieces = Vec::new();
        for j in 0..5 {
            for i in 0..7 {
                let cell = Cell::Rect {
                    x: [xs[i], xs[i + 1]],
                    y: [ys[j], ys[j + 1]],
                };
                pieces.push(constant(cell, (j * 7 + i) as f64));
            }
        }
        let field = PiecewisePolynomial::new(pieces.clone());

        let scan = |p: &Point| {
            pieces
                .iter()
                .find(|piece| piece.cell().contains(p))
                .map_or(0.0, |piece| piece.coefficients[0])
        };
        for x in xs.iter().chain([0.0015, 0.7, 5.5, -0.5, 8.0].iter()) {
            for y in ys.iter().chain([0.1, 1.0, 2.9, 4.0].iter()) {
                let p = Point::new(*x, *y);
                assert_eq!(field.value(&p), scan(&p), "at ({}, {})", x, y);
            }
        }
        assert_eq!(field.value(&Point::new(0.0015, 0.1)), 8.0);
        assert_eq!(PiecewisePolynomial::default().value(&Point::new(0.0, 0.0)), 0.0);
    }
}
