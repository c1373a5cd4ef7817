use super::mesh::h_refinement::HRef;
use super::mesh::space::Point;
use crate::integration::GlqTable;
use smallvec::{smallvec, SmallVec};
use std::fmt;

/// Tolerance used when deciding whether a point lies inside a Cell
pub(crate) const CONTAINMENT_TOL: f64 = 1e-12;

/// Geometric shape of an active element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElemShape {
    Interval,
    Quad,
}

/// The real-space footprint of an element
///
/// Cells are axis-aligned, so the mapping to the reference domain `[-1, 1]^d` is affine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cell {
    Interval { x: [f64; 2] },
    Rect { x: [f64; 2], y: [f64; 2] },
}

impl Cell {
    pub fn shape(&self) -> ElemShape {
        match self {
            Self::Interval { .. } => ElemShape::Interval,
            Self::Rect { .. } => ElemShape::Quad,
        }
    }

    /// Length or area
    pub fn measure(&self) -> f64 {
        match self {
            Self::Interval { x } => x[1] - x[0],
            Self::Rect { x, y } => (x[1] - x[0]) * (y[1] - y[0]),
        }
    }

    /// `[x_range, y_range]`; Intervals lie on `y = 0`
    pub fn bounds(&self) -> [[f64; 2]; 2] {
        match self {
            Self::Interval { x } => [*x, [0.0, 0.0]],
            Self::Rect { x, y } => [*x, *y],
        }
    }

    pub fn center(&self) -> Point {
        match self {
            Self::Interval { x } => Point::on_line((x[0] + x[1]) / 2.0),
            Self::Rect { x, y } => Point::new((x[0] + x[1]) / 2.0, (y[0] + y[1]) / 2.0),
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        let within = |[min, max]: [f64; 2], v: f64| {
            let tol = CONTAINMENT_TOL * f64::max(1.0, (max - min).abs());
            v >= min - tol && v <= max + tol
        };

        match self {
            Self::Interval { x } => within(*x, p.x),
            Self::Rect { x, y } => within(*x, p.x) && within(*y, p.y),
        }
    }

    /// Whether `other` lies within this Cell (up to round-off)
    pub fn covers(&self, other: &Self) -> bool {
        let within = |[min, max]: [f64; 2], [o_min, o_max]: [f64; 2]| {
            let tol = CONTAINMENT_TOL * f64::max(1.0, (max - min).abs());
            o_min >= min - tol && o_max <= max + tol
        };

        match (self, other) {
            (Self::Interval { x }, Self::Interval { x: ox }) => within(*x, *ox),
            (Self::Rect { x, y }, Self::Rect { x: ox, y: oy }) => within(*x, *ox) && within(*y, *oy),
            _ => false,
        }
    }

    /// The Cells produced by an h-Refinement (ordered like the child `Elem`s of that refinement)
    ///
    /// Intervals are bisected by `HRef::T` and do not support anisotropic refinements (`None`)
    pub fn children(&self, refinement: HRef) -> Option<SmallVec<[Cell; 4]>> {
        match (self, refinement) {
            (Self::Interval { x }, HRef::T) => {
                let [l, r] = halves(*x);
                Some(smallvec![Self::Interval { x: l }, Self::Interval { x: r }])
            }
            (Self::Interval { .. }, _) => None,
            (Self::Rect { x, y }, HRef::T) => {
                let [w, e] = halves(*x);
                let [s, n] = halves(*y);
                Some(smallvec![
                    Self::Rect { x: w, y: s },
                    Self::Rect { x: e, y: s },
                    Self::Rect { x: w, y: n },
                    Self::Rect { x: e, y: n },
                ])
            }
            (Self::Rect { x, y }, HRef::U) => {
                let [w, e] = halves(*x);
                Some(smallvec![Self::Rect { x: w, y: *y }, Self::Rect { x: e, y: *y }])
            }
            (Self::Rect { x, y }, HRef::V) => {
                let [s, n] = halves(*y);
                Some(smallvec![Self::Rect { x: *x, y: s }, Self::Rect { x: *x, y: n }])
            }
        }
    }

    /// Overlap between two Cells of the same shape (`None` if they only share a boundary or are disjoint)
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let overlap = |a: [f64; 2], b: [f64; 2]| {
            let range = [f64::max(a[0], b[0]), f64::min(a[1], b[1])];
            let tol = CONTAINMENT_TOL * f64::max(1.0, (a[1] - a[0]).abs());
            if range[1] - range[0] > tol {
                Some(range)
            } else {
                None
            }
        };

        match (self, other) {
            (Self::Interval { x: xa }, Self::Interval { x: xb }) => {
                Some(Self::Interval { x: overlap(*xa, *xb)? })
            }
            (Self::Rect { x: xa, y: ya }, Self::Rect { x: xb, y: yb }) => Some(Self::Rect {
                x: overlap(*xa, *xb)?,
                y: overlap(*ya, *yb)?,
            }),
            _ => None,
        }
    }

    /// Map a point in real space into the reference domain of this Cell
    pub fn to_reference(&self, p: &Point) -> [f64; 2] {
        match self {
            Self::Interval { x } => [to_unit(*x, p.x), 0.0],
            Self::Rect { x, y } => [to_unit(*x, p.x), to_unit(*y, p.y)],
        }
    }

    /// Derivatives of the reference coordinates with respect to the real coordinates `[du/dx, dv/dy]`
    pub fn inverse_jacobian(&self) -> [f64; 2] {
        match self {
            Self::Interval { x } => [2.0 / (x[1] - x[0]), 0.0],
            Self::Rect { x, y } => [2.0 / (x[1] - x[0]), 2.0 / (y[1] - y[0])],
        }
    }

    /// Gauss-Legendre points and weights (scaled by the Jacobian) over this Cell using `n` points per direction
    pub fn quadrature(&self, table: &GlqTable, n: usize) -> Vec<(Point, f64)> {
        let (points, weights) = table.rule(n);

        match self {
            Self::Interval { x } => {
                let scale = (x[1] - x[0]) / 2.0;
                points
                    .iter()
                    .zip(weights.iter())
                    .map(|(u, w)| (Point::on_line(from_unit(*x, *u)), w * scale))
                    .collect()
            }
            Self::Rect { x, y } => {
                let scale = (x[1] - x[0]) * (y[1] - y[0]) / 4.0;
                points
                    .iter()
                    .zip(weights.iter())
                    .flat_map(|(u, wu)| {
                        points.iter().zip(weights.iter()).map(move |(v, wv)| {
                            (
                                Point::new(from_unit(*x, *u), from_unit(*y, *v)),
                                wu * wv * scale,
                            )
                        })
                    })
                    .collect()
            }
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Interval { x } => write!(f, "[{:.5}, {:.5}]", x[0], x[1]),
            Self::Rect { x, y } => write!(
                f,
                "[{:.5}, {:.5}] x [{:.5}, {:.5}]",
                x[0], x[1], y[0], y[1]
            ),
        }
    }
}

fn halves([min, max]: [f64; 2]) -> [[f64; 2]; 2] {
    let mid = (min + max) / 2.0;
    [[min, mid], [mid, max]]
}

fn to_unit([min, max]: [f64; 2], v: f64) -> f64 {
    2.0 * (v - min) / (max - min) - 1.0
}

fn from_unit([min, max]: [f64; 2], u: f64) -> f64 {
    (u + 1.0) * (max - min) / 2.0 + min
}
