use nalgebra::{DMatrix, SymmetricEigen};
use std::cmp::Ordering;

/// Upper bound on the number of Gauss-Legendre points per direction that a [GlqTable] will compute
pub const MAX_GLQ_POINTS: usize = 64;

/// Get a set of n Gauss-Legendre-Quadrature Integration points and weights over `(-1, 1)`
///
/// ```
/// use hp_adapt::integration::gauss_quadrature_points;
///
/// let (points, weights) = gauss_quadrature_points(10);
/// assert_eq!(points.len(), 10);
/// assert!(points.iter().sum::<f64>().abs() < 1e-12);
/// assert!((weights.iter().sum::<f64>() - 2.0).abs() < 1e-12);
/// ```
// https://en.wikipedia.org/wiki/Gaussian_quadrature#Gauss%E2%80%93Legendre_quadrature
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    xw.drain(0..).unzip()
}

/// Scale a set of Gauss-Legendre-Quadrature Integration points to fall within a specific range
///
/// ```
/// use hp_adapt::integration::*;
/// let (points, _) = gauss_quadrature_points(10);
///
/// let (scale, points_scaled) = scale_gauss_quad_points(&points, -0.75, 0.25);
///
/// assert!(points_scaled.iter().all(|p| *p > -0.75 && *p < 0.25));
/// assert!((0.5 - scale).abs() < 1e-12);
/// ```
pub fn scale_gauss_quad_points(points: &[f64], min: f64, max: f64) -> (f64, Vec<f64>) {
    let scale_factor = (max - min) / 2.0;
    let offset = (max + min) / 2.0;

    (
        scale_factor,
        points
            .iter()
            .map(|x| x * scale_factor + offset)
            .collect::<Vec<f64>>(),
    )
}

/// Precomputed Gauss-Legendre rules with `1..=max_points` points
///
/// The eigen-decomposition behind each rule is relatively expensive, so rules are computed once and
/// shared (immutably) between worker threads.
#[derive(Debug, Clone)]
pub struct GlqTable {
    rules: Vec<(Vec<f64>, Vec<f64>)>,
}

impl GlqTable {
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.clamp(1, MAX_GLQ_POINTS);
        Self {
            rules: (1..=max_points).map(gauss_quadrature_points).collect(),
        }
    }

    pub fn max_points(&self) -> usize {
        self.rules.len()
    }

    /// Points and weights of the `n`-point rule (clamped to the size of the table)
    pub fn rule(&self, n: usize) -> (&[f64], &[f64]) {
        let (points, weights) = &self.rules[n.clamp(1, self.rules.len()) - 1];
        (points, weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_are_exact_to_degree() {
        let table = GlqTable::new(8);
        for n in 1..=8 {
            let (points, weights) = table.rule(n);
            assert_eq!(points.len(), n);

            // exact for polynomials of degree 2n - 1
            let degree = 2 * n as i32 - 2;
            let integral: f64 = points
                .iter()
                .zip(weights.iter())
                .map(|(x, w)| x.powi(degree) * w)
                .sum();
            assert!((integral - 2.0 / (degree as f64 + 1.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn rules_are_clamped() {
        let table = GlqTable::new(3);
        assert_eq!(table.rule(10).0.len(), 3);
        assert_eq!(table.rule(0).0.len(), 1);
    }
}
