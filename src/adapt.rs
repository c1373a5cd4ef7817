/// Refinement candidates and the families that enumerate them
pub mod candidates;
/// Tunables of the adaptivity loop
pub mod config;
/// The adaptivity loop
pub mod driver;
/// Element-wise error estimation against a reference solution
pub mod error_calc;
/// Two-column convergence logs
pub mod graph;
/// Choice of the best refinement for a marked element
pub mod selector;
/// Choice of which elements to refine
pub mod stopping;
/// Adaptive control of time step sizes
pub mod time_step;

use crate::domain::cell::{Cell, ElemShape};
use crate::domain::mesh::{h_refinement::HRef, p_refinement::PolyOrders, MeshError};
use candidates::RefinementCandidate;
use error_calc::ErrorCalcError;
use selector::SelectError;

use std::fmt;
use thiserror::Error;

pub use config::{AdaptivityConfig, UnrefMethod};
pub use driver::{AdaptivityDriver, AdaptivityState, IterationRecord, ReferenceSolver, Termination};
pub use error_calc::{calculate_errors, ErrorTable};
pub use selector::{RefinementSelector, Selection};
pub use stopping::StoppingCriterion;

/// A view of one active element of an [AdaptiveSpace]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElemInfo {
    pub id: usize,
    pub shape: ElemShape,
    pub orders: PolyOrders,
    pub cell: Cell,
    /// number of h-refinements separating the element from its initial ancestor
    pub h_level: u8,
}

/// A Finite Element Space whose elements can be refined hp-adaptively
///
/// Element ids must be stable: an element keeps its id through refinements, and the reference Space
/// keeps the ids of the Space it was derived from, so every coarse element can be mapped onto its
/// active descendants in the reference Space.
pub trait AdaptiveSpace: Clone + Send + Sync {
    /// Number of Degrees of Freedom
    fn num_dofs(&self) -> usize;

    /// IDs of the elements without children, in ascending order
    fn active_elems(&self) -> Vec<usize>;

    /// Information about an active element (`None` if the element does not exist or has children)
    fn elem_info(&self, elem_id: usize) -> Option<ElemInfo>;

    /// A globally refined copy of this Space: every element is split once (if `split`) and every
    /// order is raised by `order_increase`
    fn reference_space(&self, split: bool, order_increase: u8) -> Result<Self, MeshError>;

    /// Footprints and orders of the active descendants of an element (the element itself if it is active)
    fn reference_cells(&self, elem_id: usize) -> Option<Vec<(Cell, PolyOrders)>>;

    /// Whether an active element can be split by `refinement` without violating the minimum element
    /// size, or a hanging node level above `mesh_regularity` (when it is non-negative)
    fn split_admissible(&self, elem_id: usize, refinement: HRef, mesh_regularity: i32) -> bool;

    /// Apply one refinement per listed element
    fn apply_refinements(
        &mut self,
        refinements: &[(usize, RefinementCandidate)],
    ) -> Result<(), MeshError>;

    /// Change of the global number of Degrees of Freedom if `candidate` were applied to `elem_id` alone
    ///
    /// Lowered child orders also lower the order of shared edges, so the global change can be
    /// negative even when the local basis grows.
    fn dof_change(&self, elem_id: usize, candidate: &RefinementCandidate) -> Result<isize, MeshError> {
        let mut refined = self.clone();
        refined.apply_refinements(&[(elem_id, candidate.clone())])?;
        Ok(refined.num_dofs() as isize - self.num_dofs() as isize)
    }

    /// Coarsen the whole Space according to `method`; orders are reset to (or floored at) `init_order`
    fn unrefine(&mut self, method: UnrefMethod, init_order: u8) -> Result<(), MeshError>;
}

/// Phases of one pass of the adaptivity loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    BuildingReference,
    SolvingReference,
    EstimatingError,
    CheckingStop,
    Refining,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::BuildingReference => "building the reference Space",
            Self::SolvingReference => "solving on the reference Space",
            Self::EstimatingError => "estimating the error",
            Self::CheckingStop => "checking the stopping criteria",
            Self::Refining => "refining",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Fatal errors of the adaptivity loop
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("Step {iteration}: the solver failed: {source}")]
    Solver {
        iteration: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Step {iteration}: mesh error while {phase}: {source}")]
    Mesh {
        iteration: usize,
        phase: Phase,
        #[source]
        source: MeshError,
    },
    #[error("Step {iteration}: {source}")]
    ErrorCalc {
        iteration: usize,
        #[source]
        source: ErrorCalcError,
    },
    #[error("Step {iteration}: unable to select a refinement: {source}")]
    Select {
        iteration: usize,
        #[source]
        source: SelectError,
    },
    #[error("Step {iteration}: none of the {marked} marked elements can be refined")]
    Stagnation { iteration: usize, marked: usize },
    #[error("Step {iteration}: unable to write convergence graph: {source}")]
    Io {
        iteration: usize,
        #[source]
        source: std::io::Error,
    },
}

impl AdaptError {
    /// The step during which the error occurred
    pub fn iteration(&self) -> usize {
        match self {
            Self::Solver { iteration, .. }
            | Self::Mesh { iteration, .. }
            | Self::ErrorCalc { iteration, .. }
            | Self::Select { iteration, .. }
            | Self::Stagnation { iteration, .. }
            | Self::Io { iteration, .. } => *iteration,
        }
    }

    /// The phase of the loop that failed
    pub fn phase(&self) -> Phase {
        match self {
            Self::Solver { .. } => Phase::SolvingReference,
            Self::Mesh { phase, .. } => *phase,
            Self::ErrorCalc { .. } => Phase::EstimatingError,
            Self::Select { .. } | Self::Stagnation { .. } => Phase::Refining,
            Self::Io { .. } => Phase::CheckingStop,
        }
    }
}
