//! Points along a single flux surface at prescribed contour coordinates.

use crate::error::{GridError, Result};
use crate::fields::ensure_regular;
use crate::flows::{Adaption, ContourFlow, RibeiroContourFlow};
use crate::refine::Refinement;
use crate::settings::GridSettings;
use crate::shooting::SeedHint;
use crate::solvers::integrate_through;
use crate::traits::{DynamicalSystem, FluxFunction, MonitorTensor};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Rejects empty, non-finite or decreasing sample sequences.
pub fn validate_samples(name: &str, samples: &[f64]) -> Result<()> {
    if samples.is_empty() {
        return Err(GridError::InvalidSamples {
            reason: format!("{name} has no samples"),
        });
    }
    if let Some(index) = samples.iter().position(|v| !v.is_finite()) {
        return Err(GridError::InvalidSamples {
            reason: format!("{name}[{index}] is not finite"),
        });
    }
    if let Some(index) = samples.windows(2).position(|w| w[1] < w[0]) {
        return Err(GridError::InvalidSamples {
            reason: format!("{name} decreases at index {}", index + 1),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub r: Vec<f64>,
    pub z: Vec<f64>,
}

/// A Ribeiro contour together with ∇y at every sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RibeiroContour {
    pub r: Vec<f64>,
    pub z: Vec<f64>,
    pub y_r: Vec<f64>,
    pub y_z: Vec<f64>,
}

fn contour_refinement(settings: &GridSettings) -> Refinement {
    Refinement {
        stage: "contour",
        first_steps: 1,
        max_steps: settings.max_contour_steps,
        tolerance: settings.contour_tolerance,
        floor: settings.contour_floor,
    }
}

/// Samples `system` at every η and lays the state components out
/// component-major, so `[R₀.., Z₀.., ..]`.
fn sweep(
    system: &dyn DynamicalSystem<f64>,
    settings: &GridSettings,
    begin: &[f64],
    eta: &[f64],
    steps: usize,
) -> DVector<f64> {
    let n = eta.len();
    let states = integrate_through(system, settings.stepper, begin, 0.0, eta, steps);
    DVector::from_fn(begin.len() * n, |index, _| states[index % n][index / n])
}

/// ‖Δ(R,Z)‖₂ / ‖(R,Z)‖₂ over the first `2n` entries.
fn relative_change(current: &DVector<f64>, previous: Option<&DVector<f64>>, n: usize) -> f64 {
    let points = current.rows(0, 2 * n);
    let change = match previous {
        Some(previous) => (points - previous.rows(0, 2 * n)).norm(),
        None => points.norm(),
    };
    change / points.norm()
}

fn trace(
    system: &dyn DynamicalSystem<f64>,
    settings: &GridSettings,
    begin: &[f64],
    eta: &[f64],
) -> Result<DVector<f64>> {
    validate_samples("eta", eta)?;
    let n = eta.len();
    let refined = contour_refinement(settings).run(|steps, previous: Option<&DVector<f64>>| {
        let current = sweep(system, settings, begin, eta, steps);
        let eps = relative_change(&current, previous, n);
        Ok((current, eps))
    })?;
    if refined.value.iter().any(|v| !v.is_finite()) {
        return Err(GridError::NonFinite { stage: "contour" });
    }
    Ok(refined.value)
}

fn component(values: &DVector<f64>, index: usize, n: usize) -> Vec<f64> {
    values.rows(index * n, n).iter().copied().collect()
}

/// Follows the surface through `start` so that one turn spans 2π in y.
/// `f` is that surface's periodicity constant for the same adaption.
pub fn trace_contour(
    psi: &dyn FluxFunction,
    chi: &dyn MonitorTensor,
    adaption: Adaption,
    eta: &[f64],
    start: SeedHint,
    f: f64,
    settings: &GridSettings,
) -> Result<Contour> {
    ensure_regular(psi, start.r, start.z, settings.critical_gradient)?;
    let flow = ContourFlow::new(psi, chi, adaption, f);
    let values = trace(&flow, settings, &[start.r, start.z], eta)?;
    let n = eta.len();
    Ok(Contour {
        r: component(&values, 0, n),
        z: component(&values, 1, n),
    })
}

pub fn trace_ribeiro_contour(
    psi: &dyn FluxFunction,
    eta: &[f64],
    start: SeedHint,
    f: f64,
    f_prime: f64,
    settings: &GridSettings,
) -> Result<RibeiroContour> {
    ensure_regular(psi, start.r, start.z, settings.critical_gradient)?;
    let flow = RibeiroContourFlow::new(psi, f, f_prime);
    let (y_r, y_z) = flow.initial_gradient(start.r, start.z);
    let values = trace(&flow, settings, &[start.r, start.z, y_r, y_z], eta)?;
    let n = eta.len();
    Ok(RibeiroContour {
        r: component(&values, 0, n),
        z: component(&values, 1, n),
        y_r: component(&values, 2, n),
        y_z: component(&values, 3, n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{CircularFlux, IdentityMonitor};
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    const R0: f64 = 3.0;

    fn angles() -> Vec<f64> {
        (0..8).map(|k| k as f64 * PI / 4.0).collect()
    }

    #[test]
    fn rejects_bad_samples() {
        assert!(validate_samples("eta", &[]).is_err());
        assert!(validate_samples("eta", &[0.0, f64::NAN]).is_err());
        let err = validate_samples("eta", &[0.0, 1.0, 0.5]).expect_err("decreasing samples");
        assert!(format!("{err}").contains("index 2"));
        validate_samples("eta", &[0.0, 0.0, 1.0]).expect("repeated samples are allowed");
    }

    #[test]
    fn orthogonal_contour_reproduces_circle() {
        let psi = CircularFlux { r0: R0, z0: 0.0 };
        let radius = 0.5;
        let f = 1.0 / (2.0 * radius * radius);
        let eta = angles();
        let contour = trace_contour(
            &psi,
            &IdentityMonitor,
            Adaption::Orthogonal,
            &eta,
            SeedHint::new(R0 + radius, 0.0),
            f,
            &GridSettings::default(),
        )
        .expect("contour should converge");
        for (k, &y) in eta.iter().enumerate() {
            assert_abs_diff_eq!(contour.r[k], R0 + radius * y.cos(), epsilon = 1e-6);
            assert_abs_diff_eq!(contour.z[k], radius * y.sin(), epsilon = 1e-6);
        }
    }

    #[test]
    fn equal_arc_contour_reproduces_circle() {
        let psi = CircularFlux { r0: R0, z0: 0.0 };
        let radius: f64 = 0.8;
        let f = 1.0 / radius;
        let eta = angles();
        let contour = trace_contour(
            &psi,
            &IdentityMonitor,
            Adaption::EqualArc,
            &eta,
            SeedHint::new(R0 + radius, 0.0),
            f,
            &GridSettings::default(),
        )
        .expect("contour should converge");
        for (k, &y) in eta.iter().enumerate() {
            assert_abs_diff_eq!(contour.r[k], R0 + radius * y.cos(), epsilon = 1e-6);
            assert_abs_diff_eq!(contour.z[k], radius * y.sin(), epsilon = 1e-6);
        }
    }

    #[test]
    fn ribeiro_contour_carries_angle_gradient() {
        let psi = CircularFlux { r0: R0, z0: 0.0 };
        let radius: f64 = 0.6;
        let psi_value = radius * radius;
        let f = 1.0 / (2.0 * psi_value);
        let f_prime = -1.0 / (2.0 * psi_value * psi_value);
        let eta = angles();
        let contour = trace_ribeiro_contour(
            &psi,
            &eta,
            SeedHint::new(R0 + radius, 0.0),
            f,
            f_prime,
            &GridSettings::default(),
        )
        .expect("contour should converge");
        for (k, &y) in eta.iter().enumerate() {
            assert_abs_diff_eq!(contour.r[k], R0 + radius * y.cos(), epsilon = 1e-6);
            assert_abs_diff_eq!(contour.z[k], radius * y.sin(), epsilon = 1e-6);
            assert_abs_diff_eq!(contour.y_r[k], -y.sin() / radius, epsilon = 1e-6);
            assert_abs_diff_eq!(contour.y_z[k], y.cos() / radius, epsilon = 1e-6);
        }
    }

    #[test]
    fn contour_through_critical_point_is_rejected() {
        let psi = CircularFlux { r0: R0, z0: 0.0 };
        let result = trace_contour(
            &psi,
            &IdentityMonitor,
            Adaption::Orthogonal,
            &angles(),
            SeedHint::new(R0, 0.0),
            1.0,
            &GridSettings::default(),
        );
        assert!(matches!(result, Err(GridError::CriticalPoint { r, z }) if r == R0 && z == 0.0));
    }

    #[test]
    fn single_sample_at_origin_is_start() {
        let psi = CircularFlux { r0: R0, z0: 0.0 };
        let contour = trace_contour(
            &psi,
            &IdentityMonitor,
            Adaption::Orthogonal,
            &[0.0],
            SeedHint::new(R0 + 0.5, 0.0),
            2.0,
            &GridSettings::default(),
        )
        .expect("trivial contour");
        assert_eq!(contour.r, vec![R0 + 0.5]);
        assert_eq!(contour.z, vec![0.0]);
    }
}
