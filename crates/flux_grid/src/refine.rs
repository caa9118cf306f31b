//! Step-doubling driver shared by the shooting, contour and marching loops.

use crate::error::{GridError, Result};
use log::{debug, trace, warn};

/// Parameters of one doubling loop.
///
/// An attempt is repeated with twice the steps while its error is still
/// shrinking or above `tolerance`, and never once the error is at or below
/// `floor`. A non-finite error counts as unconverged.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Refinement {
    pub stage: &'static str,
    pub first_steps: usize,
    pub max_steps: usize,
    pub tolerance: f64,
    pub floor: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Refined<T> {
    pub value: T,
    pub steps: usize,
    pub error: f64,
}

impl Refinement {
    /// `attempt(steps, previous)` returns a new estimate and its error; the
    /// previous estimate is `None` on the first call. The better of the last
    /// two estimates is returned.
    pub fn run<T>(
        &self,
        mut attempt: impl FnMut(usize, Option<&T>) -> Result<(T, f64)>,
    ) -> Result<Refined<T>> {
        let mut eps = 1e10;
        let mut eps_old = 2e10;
        let mut current: Option<(T, usize)> = None;
        let mut previous: Option<(T, usize)> = None;
        let mut steps = self.first_steps.max(1);

        while (eps < eps_old || eps > self.tolerance) && eps > self.floor {
            if steps > self.max_steps {
                if !eps.is_finite() {
                    return Err(GridError::NonFinite { stage: self.stage });
                }
                if eps <= self.tolerance && current.is_some() {
                    warn!(
                        "{}: stopped at the step ceiling with error {:e}",
                        self.stage, eps
                    );
                    break;
                }
                return Err(GridError::NotConverged {
                    stage: self.stage,
                    steps: steps / 2,
                    error: eps,
                });
            }
            let (value, error) = attempt(steps, current.as_ref().map(|(value, _)| value))?;
            trace!("{}: error {:e} with {} steps", self.stage, error, steps);
            eps_old = eps;
            // a coarse attempt may blow up; keep refining
            eps = if error.is_finite() { error } else { f64::INFINITY };
            previous = current.replace((value, steps));
            steps = steps.saturating_mul(2);
        }

        let (value, steps, error) = match (current, previous) {
            (Some(_), Some((value, steps))) if eps > eps_old => (value, steps, eps_old),
            (Some((value, steps)), _) => (value, steps, eps),
            (None, _) => {
                return Err(GridError::NotConverged {
                    stage: self.stage,
                    steps: 0,
                    error: eps,
                })
            }
        };
        debug!("{}: error {:e} with {} steps", self.stage, error, steps);
        Ok(Refined {
            value,
            steps,
            error,
        })
    }
}
