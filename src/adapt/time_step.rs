use log::info;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TimeStepError<E: std::error::Error + 'static> {
    #[error("Temporal error {rel_err:.4}% still above the upper limit after {retries} retries (tau = {tau:e})")]
    RetriesExhausted { retries: usize, tau: f64, rel_err: f64 },
    #[error("Invalid time step size: {0}")]
    InvalidStep(f64),
    #[error(transparent)]
    Attempt(E),
}

/// What to do after a time step with a given temporal error
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepDecision {
    /// keep the step; continue with `next_tau`
    Accept { next_tau: f64 },
    /// discard the step and repeat it with `tau`
    Retry { tau: f64 },
}

/// An accepted time step
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutcome<T> {
    pub value: T,
    /// step size of the accepted attempt
    pub tau: f64,
    /// suggested size of the next step
    pub next_tau: f64,
    pub rel_err: f64,
    pub retries: usize,
}

/// Adjusts time step sizes from relative temporal error estimates (in percent)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeStepController {
    /// errors above this reject the step
    pub tol_upper: f64,
    /// errors below this grow the next step
    pub tol_lower: f64,
    pub inc_ratio: f64,
    pub dec_ratio: f64,
    pub max_retries: usize,
}

impl Default for TimeStepController {
    fn default() -> Self {
        Self {
            tol_upper: 1.0,
            tol_lower: 0.5,
            inc_ratio: 1.1,
            dec_ratio: 0.8,
            max_retries: 10,
        }
    }
}

impl TimeStepController {
    pub fn evaluate(&self, rel_err: f64, tau: f64) -> StepDecision {
        if rel_err > self.tol_upper {
            info!(
                "rel_err_time {:.4}% is above upper limit {}%; decreasing tau from {:e} to {:e}",
                rel_err,
                self.tol_upper,
                tau,
                tau * self.dec_ratio
            );
            StepDecision::Retry {
                tau: tau * self.dec_ratio,
            }
        } else if rel_err < self.tol_lower {
            info!(
                "rel_err_time {:.4}% is below lower limit {}%; increasing tau from {:e} to {:e}",
                rel_err,
                self.tol_lower,
                tau,
                tau * self.inc_ratio
            );
            StepDecision::Accept {
                next_tau: tau * self.inc_ratio,
            }
        } else {
            StepDecision::Accept { next_tau: tau }
        }
    }

    /// Run one time step through `attempt` until its temporal error is acceptable
    ///
    /// `attempt` receives the step size and returns its result along with the relative temporal
    /// error (in percent). Rejected attempts are repeated with smaller steps, at most `max_retries` times.
    ///
    /// ```
    /// use hp_adapt::adapt::time_step::TimeStepController;
    ///
    /// let controller = TimeStepController::default();
    /// // the error grows with the square of the step size
    /// let outcome = controller
    ///     .run_step(1.0, |tau| Ok::<_, std::fmt::Error>((tau, 2.0 * tau * tau)))
    ///     .unwrap();
    /// assert_eq!(outcome.retries, 2);
    /// assert!((outcome.tau - 0.64).abs() < 1e-12);
    /// ```
    pub fn run_step<T, E, F>(&self, tau: f64, mut attempt: F) -> Result<StepOutcome<T>, TimeStepError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(f64) -> Result<(T, f64), E>,
    {
        if !(tau.is_finite() && tau > 0.0) {
            return Err(TimeStepError::InvalidStep(tau));
        }

        let mut tau = tau;
        let mut retries = 0;
        loop {
            let (value, rel_err) = attempt(tau).map_err(TimeStepError::Attempt)?;
            match self.evaluate(rel_err, tau) {
                StepDecision::Accept { next_tau } => {
                    return Ok(StepOutcome {
                        value,
                        tau,
                        next_tau,
                        rel_err,
                        retries,
                    })
                }
                StepDecision::Retry { tau: smaller } => {
                    if retries == self.max_retries {
                        return Err(TimeStepError::RetriesExhausted {
                            retries,
                            tau,
                            rel_err,
                        });
                    }
                    retries += 1;
                    tau = smaller;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, PartialEq)]
    struct Diverged;

    impl fmt::Display for Diverged {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("diverged")
        }
    }

    impl std::error::Error for Diverged {}

    #[test]
    fn decisions() {
        let controller = TimeStepController::default();
        assert_eq!(controller.evaluate(2.0, 1.0), StepDecision::Retry { tau: 0.8 });
        assert_eq!(
            controller.evaluate(0.1, 1.0),
            StepDecision::Accept { next_tau: 1.1 }
        );
        assert_eq!(
            controller.evaluate(0.75, 1.0),
            StepDecision::Accept { next_tau: 1.0 }
        );
    }

    #[test]
    fn small_errors_grow_the_step() {
        let controller = TimeStepController::default();
        let outcome = controller
            .run_step(0.5, |tau| Ok::<_, Diverged>(((), tau * 0.1)))
            .unwrap();
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.tau, 0.5);
        assert!((outcome.next_tau - 0.55).abs() < 1e-15);
    }

    #[test]
    fn retries_are_bounded() {
        let controller = TimeStepController {
            max_retries: 3,
            ..Default::default()
        };
        let mut attempts = 0;
        let err = controller
            .run_step(1.0, |_| {
                attempts += 1;
                Ok::<_, Diverged>(((), 5.0))
            })
            .unwrap_err();

        assert_eq!(attempts, 4);
        assert!(matches!(err, TimeStepError::RetriesExhausted { retries: 3, .. }));
    }

    #[test]
    fn attempt_failures_propagate() {
        let controller = TimeStepController::default();
        assert_eq!(
            controller
                .run_step(1.0, |_| Err::<((), f64), _>(Diverged))
                .unwrap_err(),
            TimeStepError::Attempt(Diverged)
        );
        assert_eq!(
            controller
                .run_step(0.0, |tau| Ok::<_, Diverged>(((), tau)))
                .unwrap_err(),
            TimeStepError::InvalidStep(0.0)
        );
    }
}
