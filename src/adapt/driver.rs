use super::config::{AdaptivityConfig, ConfigError};
use super::error_calc::{ErrorCalculator, ErrorTable};
use super::graph::ConvergenceGraph;
use super::selector::{RefinementSelector, SelectError};
use super::stopping::StoppingCriterion;
use super::{AdaptError, AdaptiveSpace, Phase};
use crate::domain::mesh::MeshError;
use crate::solution::{PiecewisePolynomial, Solution};

use log::{debug, info, warn};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error type returned by [ReferenceSolver]s
pub type SolverError = Box<dyn std::error::Error + Send + Sync>;

/// The external solver driven by the adaptivity loop
pub trait ReferenceSolver<S: AdaptiveSpace> {
    /// Solve the problem on the reference Space, returning one solution per component
    fn solve(&mut self, reference_space: &S) -> Result<Vec<Arc<dyn Solution>>, SolverError>;

    /// Solutions on the coarse Space, one per component
    ///
    /// Defaults to the element-wise projection of the reference solutions onto the coarse Space.
    fn coarse_solutions(
        &mut self,
        coarse_space: &S,
        reference_space: &S,
        reference_solutions: &[Arc<dyn Solution>],
        config: &AdaptivityConfig,
    ) -> Result<Vec<Arc<dyn Solution>>, SolverError> {
        reference_solutions
            .iter()
            .map(|reference| {
                let projection = PiecewisePolynomial::project_onto(
                    coarse_space,
                    reference_space,
                    reference.as_ref(),
                    config.norm,
                    config.quad_extra,
                )?;
                Ok(Arc::new(projection) as Arc<dyn Solution>)
            })
            .collect()
    }
}

impl<S, F> ReferenceSolver<S> for F
where
    S: AdaptiveSpace,
    F: FnMut(&S) -> Result<Vec<Arc<dyn Solution>>, SolverError>,
{
    fn solve(&mut self, reference_space: &S) -> Result<Vec<Arc<dyn Solution>>, SolverError> {
        self(reference_space)
    }
}

/// Why the adaptivity loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// the error estimate dropped below `err_stop` (or nothing was left to mark)
    Converged,
    /// the coarse Space reached `ndof_stop` Degrees of Freedom
    DofBudgetExhausted,
    /// `max_iterations` steps were taken
    IterationLimit,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            Self::Converged => "converged",
            Self::DofBudgetExhausted => "DOF budget exhausted",
            Self::IterationLimit => "iteration limit reached",
        };
        f.write_str(reason)
    }
}

/// Summary of one adaptivity step
#[derive(Clone, Debug, PartialEq)]
pub struct IterationRecord {
    /// 1-based step number
    pub iteration: usize,
    pub ndof_coarse: usize,
    pub ndof_reference: usize,
    /// error estimate in the table's mode (percent in relative mode)
    pub err_est: f64,
    /// error of the coarse solutions against the exact solutions, if they were provided
    pub err_exact: Option<f64>,
    pub marked: usize,
    pub refined: usize,
    /// marked elements for which no candidate was applicable
    pub skipped: usize,
    /// time spent in the loop up to the end of the step's error estimation
    pub elapsed: Duration,
}

/// Everything the adaptivity loop carries from one step to the next
#[derive(Clone)]
pub struct AdaptivityState<S: AdaptiveSpace> {
    /// the current coarse Space
    pub space: S,
    /// number of completed steps
    pub iteration: usize,
    pub elapsed: Duration,
    pub history: Vec<IterationRecord>,
    pub phase: Phase,
    pub termination: Option<Termination>,
    /// the reference Space and solutions of the latest step
    pub reference: Option<(S, Vec<Arc<dyn Solution>>)>,
    pub dof_graph: ConvergenceGraph,
    pub cpu_graph: ConvergenceGraph,
}

impl<S: AdaptiveSpace> AdaptivityState<S> {
    pub fn new(space: S) -> Self {
        Self {
            space,
            iteration: 0,
            elapsed: Duration::ZERO,
            history: Vec::new(),
            phase: Phase::BuildingReference,
            termination: None,
            reference: None,
            dof_graph: ConvergenceGraph::new(
                "Error convergence",
                "Degrees of Freedom",
                "Error estimate",
            ),
            cpu_graph: ConvergenceGraph::new("Error convergence", "CPU time [s]", "Error estimate"),
        }
    }

    pub fn last_record(&self) -> Option<&IterationRecord> {
        self.history.last()
    }
}

impl<S: AdaptiveSpace> fmt::Debug for AdaptivityState<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AdaptivityState")
            .field("iteration", &self.iteration)
            .field("ndof", &self.space.num_dofs())
            .field("phase", &self.phase)
            .field("termination", &self.termination)
            .field("history", &self.history)
            .finish()
    }
}

/// Runs the adaptivity loop: build the reference Space, solve, estimate errors, check the
/// stopping criteria, mark, select and refine
pub struct AdaptivityDriver {
    config: AdaptivityConfig,
    error_calc: ErrorCalculator,
    selector: RefinementSelector,
    stopping: StoppingCriterion,
    exact_solutions: Vec<Arc<dyn Solution>>,
}

impl AdaptivityDriver {
    pub fn new(config: AdaptivityConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            error_calc: ErrorCalculator::from_config(&config),
            selector: RefinementSelector::new(&config),
            stopping: StoppingCriterion::from_config(&config),
            exact_solutions: Vec::new(),
            config,
        })
    }

    /// Track the error of the coarse solutions against known exact solutions (one per component)
    pub fn with_exact_solutions(mut self, exact_solutions: Vec<Arc<dyn Solution>>) -> Self {
        self.exact_solutions = exact_solutions;
        self
    }

    pub fn config(&self) -> &AdaptivityConfig {
        &self.config
    }

    /// Adapt `space` until one of the stopping criteria is met
    pub fn run<S, R>(&self, space: S, solver: &mut R) -> Result<AdaptivityState<S>, AdaptError>
    where
        S: AdaptiveSpace,
        R: ReferenceSolver<S>,
    {
        let mut state = AdaptivityState::new(space);
        loop {
            if let Some(termination) = self.step(&mut state, solver)? {
                info!(
                    "Adaptivity finished after {} steps ({}): {} DOFs",
                    state.iteration,
                    termination,
                    state.space.num_dofs()
                );
                return Ok(state);
            }
        }
    }

    /// Run one adaptivity step, returning the reason for stopping if the loop is done
    pub fn step<S, R>(
        &self,
        state: &mut AdaptivityState<S>,
        solver: &mut R,
    ) -> Result<Option<Termination>, AdaptError>
    where
        S: AdaptiveSpace,
        R: ReferenceSolver<S>,
    {
        if let Some(termination) = state.termination {
            return Ok(Some(termination));
        }

        let iteration = state.iteration + 1;
        let started = Instant::now();
        let ndof_coarse = state.space.num_dofs();
        info!("---- Adaptivity step {} ({} DOFs)", iteration, ndof_coarse);

        // reference Space
        state.phase = Phase::BuildingReference;
        let reference_space = state
            .space
            .reference_space(self.config.reference_split, self.config.reference_order_increase)
            .map_err(|source| AdaptError::Mesh {
                iteration,
                phase: Phase::BuildingReference,
                source,
            })?;
        let ndof_reference = reference_space.num_dofs();

        // solutions
        state.phase = Phase::SolvingReference;
        info!("Solving on the reference mesh ({} DOFs)", ndof_reference);
        let reference_solutions = solver
            .solve(&reference_space)
            .map_err(|source| AdaptError::Solver { iteration, source })?;
        let coarse_solutions = solver
            .coarse_solutions(&state.space, &reference_space, &reference_solutions, &self.config)
            .map_err(|source| AdaptError::Solver { iteration, source })?;

        // error estimate
        state.phase = Phase::EstimatingError;
        let table = self
            .error_calc
            .calculate_errors(
                &state.space,
                &reference_space,
                &coarse_solutions,
                &reference_solutions,
                self.config.normalize_by_reference(),
            )
            .map_err(|source| AdaptError::ErrorCalc { iteration, source })?;
        let err_exact = self.exact_error(iteration, state, &reference_space, &coarse_solutions)?;

        state.elapsed += started.elapsed();
        info!(
            "ndof_coarse: {}, ndof_fine: {}, err_est: {:.6e}{}",
            ndof_coarse,
            ndof_reference,
            table.total(),
            err_exact.map_or(String::new(), |e| format!(", err_exact: {:.6e}", e))
        );

        let mut record = IterationRecord {
            iteration,
            ndof_coarse,
            ndof_reference,
            err_est: table.total(),
            err_exact,
            marked: 0,
            refined: 0,
            skipped: 0,
            elapsed: state.elapsed,
        };
        self.update_graphs(iteration, state, &record)?;

        // stopping criteria
        state.phase = Phase::CheckingStop;
        let termination = if table.total() < self.config.err_stop {
            Some(Termination::Converged)
        } else if ndof_coarse >= self.config.ndof_stop {
            Some(Termination::DofBudgetExhausted)
        } else if iteration >= self.config.max_iterations {
            Some(Termination::IterationLimit)
        } else {
            None
        };

        let termination = match termination {
            Some(termination) => Some(termination),
            None => {
                state.phase = Phase::Refining;
                self.refine(iteration, state, &reference_space, &reference_solutions, &table, &mut record)?
            }
        };

        state.iteration = iteration;
        state.history.push(record);
        state.reference = Some((reference_space, reference_solutions));
        if termination.is_some() {
            state.phase = Phase::Done;
            state.termination = termination;
        } else {
            state.phase = Phase::BuildingReference;
        }

        Ok(termination)
    }

    fn exact_error<S: AdaptiveSpace>(
        &self,
        iteration: usize,
        state: &AdaptivityState<S>,
        reference_space: &S,
        coarse_solutions: &[Arc<dyn Solution>],
    ) -> Result<Option<f64>, AdaptError> {
        if self.exact_solutions.is_empty() {
            return Ok(None);
        }

        self.error_calc
            .calculate_errors(
                &state.space,
                reference_space,
                coarse_solutions,
                &self.exact_solutions,
                self.config.normalize_by_reference(),
            )
            .map(|table| Some(table.total()))
            .map_err(|source| AdaptError::ErrorCalc { iteration, source })
    }

    fn update_graphs<S: AdaptiveSpace>(
        &self,
        iteration: usize,
        state: &mut AdaptivityState<S>,
        record: &IterationRecord,
    ) -> Result<(), AdaptError> {
        state
            .dof_graph
            .add_value(record.ndof_coarse as f64, record.err_est);
        state
            .cpu_graph
            .add_value(record.elapsed.as_secs_f64(), record.err_est);

        let io_err = |source| AdaptError::Io { iteration, source };
        if let Some(path) = &self.config.graph_dof_path {
            state.dof_graph.save(path).map_err(io_err)?;
        }
        if let Some(path) = &self.config.graph_cpu_path {
            state.cpu_graph.save(path).map_err(io_err)?;
        }
        Ok(())
    }

    /// Periodic global derefinement of time dependent problems, to be called before adapting the
    /// Space of time step `time_step` (1-based)
    ///
    /// Every `unref_freq` steps (never on the first step) the Space is coarsened according to
    /// `unref_method`. Returns whether the Space was changed.
    pub fn derefine<S: AdaptiveSpace>(&self, space: &mut S, time_step: usize) -> Result<bool, MeshError> {
        let freq = self.config.unref_freq;
        if time_step <= 1 || freq == 0 || time_step % freq != 0 {
            return Ok(false);
        }

        let ndof_before = space.num_dofs();
        space.unrefine(self.config.unref_method, self.config.init_order)?;
        info!(
            "Global mesh derefinement at time step {} ({:?}): {} -> {} DOFs",
            time_step,
            self.config.unref_method,
            ndof_before,
            space.num_dofs()
        );
        Ok(true)
    }

    /// Mark elements, select a refinement for each of them and apply the refinements
    fn refine<S: AdaptiveSpace>(
        &self,
        iteration: usize,
        state: &mut AdaptivityState<S>,
        reference_space: &S,
        reference_solutions: &[Arc<dyn Solution>],
        table: &ErrorTable,
        record: &mut IterationRecord,
    ) -> Result<Option<Termination>, AdaptError> {
        let marked = self.stopping.mark_elements(table);
        record.marked = marked.len();
        if marked.is_empty() {
            debug!("No element was marked; nothing to refine");
            return Ok(Some(Termination::Converged));
        }

        let space = &state.space;
        let selections: Vec<_> = marked
            .par_iter()
            .map(|elem_id| {
                let elem = space
                    .elem_info(*elem_id)
                    .ok_or(SelectError::NoCandidatesApplicable(*elem_id))?;
                let cells = reference_space
                    .reference_cells(*elem_id)
                    .ok_or(SelectError::MissingReferenceCells(*elem_id))?;
                self.selector.select_refinement(
                    &elem,
                    space,
                    &cells,
                    reference_solutions,
                    table.error_of(*elem_id).unwrap_or(0.0),
                )
            })
            .collect();

        let mut refinements = Vec::with_capacity(selections.len());
        for selection in selections {
            match selection {
                Ok(selection) => {
                    debug!(
                        "Elem {}: split {:?}, orders {:?} (score {:.4e}, {} candidates)",
                        selection.elem_id,
                        selection.candidate.split,
                        selection.candidate.child_orders.as_slice(),
                        selection.candidate.score.unwrap_or(0.0),
                        selection.num_scored
                    );
                    refinements.push((selection.elem_id, selection.candidate));
                }
                Err(SelectError::NoCandidatesApplicable(elem_id)) => {
                    warn!("No refinement candidate is applicable to Elem {}; skipping it", elem_id);
                    record.skipped += 1;
                }
                Err(source) => return Err(AdaptError::Select { iteration, source }),
            }
        }

        if refinements.is_empty() {
            return Err(AdaptError::Stagnation {
                iteration,
                marked: marked.len(),
            });
        }

        record.refined = refinements.len();
        state
            .space
            .apply_refinements(&refinements)
            .map_err(|source| AdaptError::Mesh {
                iteration,
                phase: Phase::Refining,
                source,
            })?;

        info!(
            "Refined {} of {} marked elements ({} DOFs)",
            refinements.len(),
            marked.len(),
            state.space.num_dofs()
        );

        Ok(None)
    }
}
