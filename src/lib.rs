/// Error estimation, candidate selection and the hp-adaptivity loop
pub mod adapt;
/// Legendre bases and local projections
pub mod basis;
/// One and two dimensional hp-FEM Spaces
pub mod domain;
/// Gauss-Legendre quadrature
pub mod integration;
/// Fields sampled by the error estimator
pub mod solution;

pub use adapt::{
    AdaptError, AdaptiveSpace, AdaptivityConfig, AdaptivityDriver, AdaptivityState, ElemInfo,
    ErrorTable, ReferenceSolver, Termination, UnrefMethod,
};
pub use domain::{line::LineDomain, mesh::Mesh, Domain};
pub use solution::{ExactSolution, PiecewisePolynomial, Solution};
