//! Tolerances, step ceilings and integrator choice for the grid builders.
//!
//! Every doubling loop in the crate stops when its error estimate is below a
//! tolerance and no longer shrinking, or when it drops under an absolute
//! floor. The ceilings bound the number of integration steps a loop may try
//! before it reports [`GridError::NotConverged`].

use crate::error::{GridError, Result};
use crate::solvers::StepperKind;
use serde::{Deserialize, Serialize};

pub const SHOOTING_BASE_STEPS: usize = 50;
pub const SHOOTING_TOLERANCE: f64 = 1e-7;
pub const SHOOTING_FLOOR: f64 = 1e-14;
pub const MAX_SHOOTING_STEPS: usize = 1 << 20;

pub const CONTOUR_TOLERANCE: f64 = 1e-7;
pub const CONTOUR_FLOOR: f64 = 1e-14;
pub const MAX_CONTOUR_STEPS: usize = 1 << 16;

pub const MARCH_TOLERANCE: f64 = 1e-6;
pub const MARCH_FLOOR: f64 = 1e-13;
pub const MAX_MARCH_STEPS: usize = 1 << 16;

pub const PSI_MARCH_TOLERANCE: f64 = 1e-8;
pub const PSI_MARCH_FLOOR: f64 = 1e-14;
pub const MAX_PSI_MARCH_STEPS: usize = 1 << 12;

pub const INVERSE_PERIODICITY_STEPS: usize = 500;

pub const QUADRATURE_MIN_ORDER: usize = 8;
pub const QUADRATURE_MAX_ORDER: usize = 20;
pub const QUADRATURE_FLOOR: f64 = 1e-15;

pub const MAX_DERIVATIVE_HALVINGS: usize = 40;
pub const MAX_SEED_NUDGES: usize = 8;
pub const CRITICAL_GRADIENT: f64 = 1e-10;
pub const MAX_NEWTON_ITERATIONS: usize = 50;

/// Contour parameter length of one poloidal turn.
pub const HEIGHT: f64 = std::f64::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSettings {
    pub stepper: StepperKind,
    pub shooting_base_steps: usize,
    pub shooting_tolerance: f64,
    pub shooting_floor: f64,
    pub max_shooting_steps: usize,
    pub contour_tolerance: f64,
    pub contour_floor: f64,
    pub max_contour_steps: usize,
    pub march_tolerance: f64,
    pub march_floor: f64,
    pub max_march_steps: usize,
    pub psi_march_tolerance: f64,
    pub psi_march_floor: f64,
    pub max_psi_march_steps: usize,
    pub inverse_periodicity_steps: usize,
    pub quadrature_min_order: usize,
    pub quadrature_max_order: usize,
    pub quadrature_floor: f64,
    pub max_derivative_halvings: usize,
    pub max_seed_nudges: usize,
    pub critical_gradient: f64,
    /// Newton iterations spent looking for a critical point of ψ.
    pub max_newton_iterations: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            stepper: StepperKind::default(),
            shooting_base_steps: SHOOTING_BASE_STEPS,
            shooting_tolerance: SHOOTING_TOLERANCE,
            shooting_floor: SHOOTING_FLOOR,
            max_shooting_steps: MAX_SHOOTING_STEPS,
            contour_tolerance: CONTOUR_TOLERANCE,
            contour_floor: CONTOUR_FLOOR,
            max_contour_steps: MAX_CONTOUR_STEPS,
            march_tolerance: MARCH_TOLERANCE,
            march_floor: MARCH_FLOOR,
            max_march_steps: MAX_MARCH_STEPS,
            psi_march_tolerance: PSI_MARCH_TOLERANCE,
            psi_march_floor: PSI_MARCH_FLOOR,
            max_psi_march_steps: MAX_PSI_MARCH_STEPS,
            inverse_periodicity_steps: INVERSE_PERIODICITY_STEPS,
            quadrature_min_order: QUADRATURE_MIN_ORDER,
            quadrature_max_order: QUADRATURE_MAX_ORDER,
            quadrature_floor: QUADRATURE_FLOOR,
            max_derivative_halvings: MAX_DERIVATIVE_HALVINGS,
            max_seed_nudges: MAX_SEED_NUDGES,
            critical_gradient: CRITICAL_GRADIENT,
            max_newton_iterations: MAX_NEWTON_ITERATIONS,
        }
    }
}

impl GridSettings {
    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("shooting_tolerance", self.shooting_tolerance, self.shooting_floor),
            ("contour_tolerance", self.contour_tolerance, self.contour_floor),
            ("march_tolerance", self.march_tolerance, self.march_floor),
            ("psi_march_tolerance", self.psi_march_tolerance, self.psi_march_floor),
        ];
        for (name, tolerance, floor) in tolerances {
            if !(tolerance > 0.0 && floor > 0.0) {
                return Err(invalid(format!("{name} and its floor must be positive")));
            }
            if floor > tolerance {
                return Err(invalid(format!("{name} must not be below its floor")));
            }
        }
        if self.shooting_base_steps == 0 {
            return Err(invalid("shooting_base_steps must be at least 1".into()));
        }
        let ceilings = [
            ("max_shooting_steps", self.max_shooting_steps),
            ("max_contour_steps", self.max_contour_steps),
            ("max_march_steps", self.max_march_steps),
            ("max_psi_march_steps", self.max_psi_march_steps),
            ("inverse_periodicity_steps", self.inverse_periodicity_steps),
        ];
        for (name, value) in ceilings {
            if value == 0 {
                return Err(invalid(format!("{name} must be at least 1")));
            }
        }
        if self.max_shooting_steps < 2 * self.shooting_base_steps {
            return Err(invalid(
                "max_shooting_steps must allow at least one shooting attempt".into(),
            ));
        }
        if self.quadrature_min_order == 0
            || self.quadrature_min_order >= self.quadrature_max_order
        {
            return Err(invalid(
                "quadrature orders must satisfy 0 < min < max".into(),
            ));
        }
        if !(self.quadrature_floor > 0.0 && self.critical_gradient >= 0.0) {
            return Err(invalid(
                "quadrature_floor must be positive and critical_gradient non-negative".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> GridError {
    GridError::InvalidSettings { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        GridSettings::default()
            .validate()
            .expect("default settings should be valid");
    }

    #[test]
    fn rejects_floor_above_tolerance() {
        let settings = GridSettings {
            march_floor: 1e-3,
            ..GridSettings::default()
        };
        let err = settings.validate().expect_err("expected invalid settings");
        assert!(format!("{err}").contains("march_tolerance"));
    }

    #[test]
    fn rejects_zero_ceiling() {
        let settings = GridSettings {
            max_contour_steps: 0,
            ..GridSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(GridError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn rejects_inverted_quadrature_orders() {
        let settings = GridSettings {
            quadrature_min_order: 20,
            quadrature_max_order: 8,
            ..GridSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
