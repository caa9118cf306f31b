//! Shooting solver for the periodicity constant f(ψ) of a flux surface.
//!
//! A surface is located by integrating the gradient flow from a known point
//! to the target ψ, then f(ψ) = 2π / T follows from one closed turn of the
//! closure flow. Both integrations double their step count until the answer
//! stops improving.
//!
//! The point where the last search ended is the natural starting point of
//! the next one. That warm start is an explicit [`SeedHint`] owned by the
//! caller, so a shooter can be shared between independent queries.

use crate::error::{GridError, Result};
use crate::fields::is_critical;
use crate::flows::{Adaption, ClosureFlow, GradientFlow};
use crate::refine::Refinement;
use crate::settings::{GridSettings, HEIGHT};
use crate::solvers::integrate;
use crate::traits::{DynamicalSystem, FluxFunction, MonitorTensor};
use gauss_quad::GaussLegendre;
use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// A point in the poloidal plane used to start the next surface search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedHint {
    pub r: f64,
    pub z: f64,
}

impl SeedHint {
    pub fn new(r: f64, z: f64) -> Self {
        Self { r, z }
    }
}

/// f(ψ) and the point on the surface where its contour coordinate is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfacePeriodicity {
    pub f: f64,
    pub r: f64,
    pub z: f64,
}

pub struct FluxSurfaceShooter<'a> {
    psi: &'a dyn FluxFunction,
    chi: &'a dyn MonitorTensor,
    center: (f64, f64),
    origin: SeedHint,
    adaption: Adaption,
    settings: GridSettings,
}

impl<'a> FluxSurfaceShooter<'a> {
    /// `seed` must lie inside the first flux surface. If ψ is critical there
    /// the shooting origin is moved outward in R, one unit at a time.
    pub fn new(
        psi: &'a dyn FluxFunction,
        chi: &'a dyn MonitorTensor,
        seed: SeedHint,
        adaption: Adaption,
        settings: GridSettings,
    ) -> Result<Self> {
        settings.validate()?;
        if !(seed.r.is_finite() && seed.z.is_finite()) {
            return Err(GridError::NonFinite { stage: "seed point" });
        }
        let mut origin = seed;
        let mut nudges = 0;
        while is_critical(psi, origin.r, origin.z, settings.critical_gradient) {
            if nudges == settings.max_seed_nudges {
                return Err(GridError::CriticalPoint {
                    r: seed.r,
                    z: seed.z,
                });
            }
            origin.r += 1.0;
            nudges += 1;
        }
        if nudges > 0 {
            warn!(
                "seed ({}, {}) is a critical point of psi; shooting from ({}, {})",
                seed.r, seed.z, origin.r, origin.z
            );
        }
        Ok(Self {
            psi,
            chi,
            center: (seed.r, seed.z),
            origin,
            adaption,
            settings,
        })
    }

    /// Starting point for the first search.
    pub fn seed(&self) -> SeedHint {
        self.origin
    }

    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    fn shooting(&self, stage: &'static str) -> Refinement {
        Refinement {
            stage,
            first_steps: 2 * self.settings.shooting_base_steps,
            max_steps: self.settings.max_shooting_steps,
            tolerance: self.settings.shooting_tolerance,
            floor: self.settings.shooting_floor,
        }
    }

    /// Finds the point of the target surface on the gradient line through
    /// `hint` and moves `hint` there.
    pub fn find_initial(&self, psi: f64, hint: &mut SeedHint) -> Result<SeedHint> {
        let start = DVector::from_vec(vec![hint.r, hint.z]);
        let psi_start = self.psi.value(hint.r, hint.z);
        let flow = GradientFlow::new(self.psi, self.chi);
        let stepper = self.settings.stepper;

        let search = self.shooting("surface search");
        let refined = search.run(|steps, previous: Option<&DVector<f64>>| {
            let end = integrate(&flow, stepper, start.as_slice(), psi_start, psi, steps);
            let end = DVector::from_vec(end);
            let eps = (&end - previous.unwrap_or(&start)).norm();
            Ok((end, eps))
        })?;

        let point = SeedHint::new(refined.value[0], refined.value[1]);
        if !(point.r.is_finite() && point.z.is_finite()) {
            return Err(GridError::NonFinite {
                stage: "surface search",
            });
        }
        *hint = point;
        Ok(point)
    }

    /// Computes f(ψ) together with the surface point it was measured from.
    pub fn construct_f(&self, psi: f64, hint: &mut SeedHint) -> Result<SurfacePeriodicity> {
        let point = self.find_initial(psi, hint)?;
        let begin = DVector::from_vec(vec![point.r, point.z, 0.0]);
        let flow = ClosureFlow::new(self.psi, self.chi, self.center, self.adaption);
        let stepper = self.settings.stepper;

        let closure = self.shooting("periodicity");
        let refined = closure.run(|steps, _previous: Option<&DVector<f64>>| {
            let end = DVector::from_vec(integrate(&flow, stepper, begin.as_slice(), 0.0, HEIGHT, steps));
            // closure mismatch in (R, Z)
            let eps = (end.rows(0, 2) - begin.rows(0, 2)).norm();
            Ok((end, eps))
        })?;

        let period = refined.value[2];
        if !period.is_finite() || period == 0.0 {
            return Err(GridError::NonFinite {
                stage: "periodicity",
            });
        }
        Ok(SurfacePeriodicity {
            f: HEIGHT / period,
            r: point.r,
            z: point.z,
        })
    }

    pub fn f(&self, psi: f64, hint: &mut SeedHint) -> Result<f64> {
        Ok(self.construct_f(psi, hint)?.f)
    }

    /// T / 2π = 1 / f(ψ) from a fixed number of closure steps.
    pub fn inverse_periodicity(&self, psi: f64, hint: &mut SeedHint) -> Result<f64> {
        let point = self.find_initial(psi, hint)?;
        let flow = ClosureFlow::new(self.psi, self.chi, self.center, self.adaption);
        let end = integrate(
            &flow,
            self.settings.stepper,
            &[point.r, point.z, 0.0],
            0.0,
            HEIGHT,
            self.settings.inverse_periodicity_steps,
        );
        let inverse = end[2] / HEIGHT;
        if !inverse.is_finite() {
            return Err(GridError::NonFinite {
                stage: "inverse periodicity",
            });
        }
        Ok(inverse)
    }

    /// ∫_{ψ₀}^{ψ₁} f(ψ) dψ with Gauss-Legendre rules of increasing order.
    pub fn find_x1(&self, psi_0: f64, psi_1: f64, hint: &mut SeedHint) -> Result<f64> {
        let mut order = self.settings.quadrature_min_order;
        let mut x1 = 0.0;
        let mut x1_old = 0.0;
        let mut eps = 1e10;
        let mut eps_old = 2e10;

        while eps < eps_old && order < self.settings.quadrature_max_order && eps > self.settings.quadrature_floor {
            eps_old = eps;
            x1_old = x1;
            order += 1;

            let rule = GaussLegendre::new(order)
                .map_err(|err| GridError::Quadrature(format!("{err:?}")))?;
            let shared_hint = RefCell::new(*hint);
            let failure = RefCell::new(None);
            x1 = rule.integrate(psi_0, psi_1, |psi| {
                match self.construct_f(psi, &mut shared_hint.borrow_mut()) {
                    Ok(surface) => surface.f,
                    Err(err) => {
                        failure.borrow_mut().get_or_insert(err);
                        f64::NAN
                    }
                }
            });
            if let Some(err) = failure.into_inner() {
                return Err(err);
            }
            *hint = shared_hint.into_inner();

            eps = ((x1 - x1_old) / x1).abs();
            debug!("x1 = {} rel. error {:e} with {} polynomials", x1, eps, order);
        }

        Ok(if eps < eps_old { x1 } else { x1_old })
    }

    /// f'(ψ) by centered differences, halving the spacing with a 4th order
    /// stencil until the estimate stops improving.
    pub fn f_prime(&self, psi: f64, hint: &mut SeedHint) -> Result<f64> {
        let mut delta = if psi != 0.0 { psi.abs() / 100.0 } else { 1e-2 };
        let mut samples = [0.0; 4];
        samples[1] = self.f(psi - delta, hint)?;
        samples[2] = self.f(psi + delta, hint)?;
        let mut fprime = 0.5 * (samples[2] - samples[1]) / delta;
        let mut fprime_old = fprime;
        let mut eps = 1e10;
        let mut eps_old = 2e10;
        let mut halvings = 0;

        while eps < eps_old {
            if halvings == self.settings.max_derivative_halvings {
                warn!("f'({}) still improving after {} halvings", psi, halvings);
                return Ok(fprime);
            }
            halvings += 1;
            delta /= 2.0;
            fprime_old = fprime;
            eps_old = eps;
            samples[0] = samples[1];
            samples[3] = samples[2];
            samples[1] = self.f(psi - delta, hint)?;
            samples[2] = self.f(psi + delta, hint)?;
            fprime = (samples[0] / 12.0 - 2.0 / 3.0 * samples[1] + 2.0 / 3.0 * samples[2]
                - samples[3] / 12.0)
                / delta;
            eps = ((fprime - fprime_old) / fprime).abs();
        }
        debug!("f'({}) = {} after {} halvings", psi, fprime_old, halvings);
        Ok(fprime_old)
    }
}

/// dψ/dx = ±1/f(ψ), oriented so that x grows from ψ₀ toward ψ₁.
///
/// Evaluations warm start from the previous one through an interior hint.
/// A failed evaluation yields NaN and is kept for [`Self::take_failure`].
pub struct InverseFluxFlow<'s, 'a> {
    shooter: &'s FluxSurfaceShooter<'a>,
    orientation: f64,
    hint: RefCell<SeedHint>,
    failure: RefCell<Option<GridError>>,
}

impl<'s, 'a> InverseFluxFlow<'s, 'a> {
    pub fn new(shooter: &'s FluxSurfaceShooter<'a>, hint: SeedHint, orientation: f64) -> Self {
        Self {
            shooter,
            orientation,
            hint: RefCell::new(hint),
            failure: RefCell::new(None),
        }
    }

    pub fn evaluate(&self, psi: f64) -> Result<f64> {
        let inverse = self
            .shooter
            .inverse_periodicity(psi, &mut self.hint.borrow_mut())?;
        Ok(self.orientation * inverse.abs())
    }

    pub fn take_failure(&self) -> Result<()> {
        match self.failure.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl DynamicalSystem<f64> for InverseFluxFlow<'_, '_> {
    fn dimension(&self) -> usize {
        1
    }

    fn apply(&self, _x: f64, state: &[f64], out: &mut [f64]) {
        out[0] = match self.evaluate(state[0]) {
            Ok(value) => value,
            Err(err) => {
                self.failure.borrow_mut().get_or_insert(err);
                f64::NAN
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{CircularFlux, EllipticFlux, IdentityMonitor};
    use crate::solvers::StepperKind;

    const R0: f64 = 3.0;

    fn circle() -> CircularFlux {
        CircularFlux { r0: R0, z0: 0.0 }
    }

    fn shooter<'a>(psi: &'a dyn FluxFunction, adaption: Adaption) -> FluxSurfaceShooter<'a> {
        FluxSurfaceShooter::new(
            psi,
            &IdentityMonitor,
            SeedHint::new(R0 + 0.2, 0.0),
            adaption,
            GridSettings::default(),
        )
        .expect("shooter should build")
    }

    #[test]
    fn find_initial_lands_on_target_surface() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let mut hint = shooter.seed();
        let point = shooter.find_initial(0.5, &mut hint).expect("search should converge");
        assert!((psi.value(point.r, point.z) - 0.5).abs() < 1e-10);
        assert!(point.z.abs() < 1e-14);
        assert_eq!(hint, point);
    }

    #[test]
    fn orthogonal_periodicity_on_circles() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let mut hint = shooter.seed();
        for target in [0.1, 0.4, 0.9] {
            let f = shooter.f(target, &mut hint).expect("f should converge");
            let exact = 1.0 / (2.0 * target);
            assert!(((f - exact) / exact).abs() < 1e-7, "psi {target}: {f} vs {exact}");
        }
    }

    #[test]
    fn equal_arc_periodicity_on_circles() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::EqualArc);
        let mut hint = shooter.seed();
        for target in [0.1, 0.5] {
            let f = shooter.f(target, &mut hint).expect("f should converge");
            let exact = 1.0 / target.sqrt();
            assert!(((f - exact) / exact).abs() < 1e-7, "psi {target}: {f} vs {exact}");
        }
    }

    #[test]
    fn orthogonal_periodicity_on_ellipses() {
        let psi = EllipticFlux::new(R0, 0.0, 1.5).expect("valid elongation");
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let mut hint = shooter.seed();
        for target in [0.2, 0.5] {
            let f = shooter.f(target, &mut hint).expect("f should converge");
            let exact = psi.periodicity(target);
            assert!(((f - exact) / exact).abs() < 1e-7, "psi {target}: {f} vs {exact}");
        }
    }

    #[test]
    fn warm_start_does_not_change_result() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let mut cold = shooter.seed();
        let mut warm = shooter.seed();
        shooter.f(0.8, &mut warm).expect("f should converge");
        let a = shooter.f(0.3, &mut cold).expect("f should converge");
        let b = shooter.f(0.3, &mut warm).expect("f should converge");
        assert!(((a - b) / a).abs() < 1e-9);
    }

    #[test]
    fn nudges_seed_off_critical_point() {
        let psi = circle();
        let shooter = FluxSurfaceShooter::new(
            &psi,
            &IdentityMonitor,
            SeedHint::new(R0, 0.0),
            Adaption::Orthogonal,
            GridSettings::default(),
        )
        .expect("nudged seed should be accepted");
        assert_eq!(shooter.seed(), SeedHint::new(R0 + 1.0, 0.0));
        let mut hint = shooter.seed();
        let f = shooter.f(0.25, &mut hint).expect("f should converge");
        assert!((f - 2.0).abs() < 1e-7);
    }

    struct Flat;

    impl FluxFunction for Flat {
        fn value(&self, _r: f64, _z: f64) -> f64 {
            1.0
        }
        fn dfx(&self, _r: f64, _z: f64) -> f64 {
            0.0
        }
        fn dfy(&self, _r: f64, _z: f64) -> f64 {
            0.0
        }
        fn dfxx(&self, _r: f64, _z: f64) -> f64 {
            0.0
        }
        fn dfxy(&self, _r: f64, _z: f64) -> f64 {
            0.0
        }
        fn dfyy(&self, _r: f64, _z: f64) -> f64 {
            0.0
        }
    }

    #[test]
    fn rejects_seed_that_stays_critical() {
        let result = FluxSurfaceShooter::new(
            &Flat,
            &IdentityMonitor,
            SeedHint::new(1.0, 2.0),
            Adaption::Orthogonal,
            GridSettings::default(),
        );
        assert!(matches!(
            result,
            Err(GridError::CriticalPoint { r, z }) if r == 1.0 && z == 2.0
        ));
    }

    #[test]
    fn x1_integrates_periodicity() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let mut hint = shooter.seed();
        let x1 = shooter.find_x1(0.1, 1.0, &mut hint).expect("quadrature should converge");
        let exact = 0.5 * 10.0f64.ln();
        assert!(((x1 - exact) / exact).abs() < 1e-7, "{x1} vs {exact}");

        let mut hint = shooter.seed();
        let reversed = shooter.find_x1(1.0, 0.1, &mut hint).expect("quadrature should converge");
        assert!(((reversed + exact) / exact).abs() < 1e-7);
    }

    #[test]
    fn f_prime_matches_analytic_derivative() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let mut hint = shooter.seed();
        let target = 0.5;
        let fp = shooter.f_prime(target, &mut hint).expect("derivative should converge");
        let exact = -1.0 / (2.0 * target * target);
        assert!(((fp - exact) / exact).abs() < 1e-5, "{fp} vs {exact}");
    }

    #[test]
    fn fixed_step_inverse_periodicity_is_accurate_for_both_steppers() {
        let psi = circle();
        for stepper in [StepperKind::Tsit5, StepperKind::Rk4] {
            let settings = GridSettings {
                stepper,
                ..GridSettings::default()
            };
            let shooter = FluxSurfaceShooter::new(
                &psi,
                &IdentityMonitor,
                SeedHint::new(R0 + 0.2, 0.0),
                Adaption::Orthogonal,
                settings,
            )
            .expect("shooter should build");
            let mut hint = shooter.seed();
            let inverse = shooter
                .inverse_periodicity(0.3, &mut hint)
                .expect("inverse periodicity should evaluate");
            assert!((inverse - 0.6).abs() < 1e-9, "{stepper:?}: {inverse}");
            let f = shooter.f(0.7, &mut hint).expect("f should converge");
            assert!((f - 1.0 / 1.4).abs() < 1e-9, "{stepper:?}: {f}");
        }
    }

    #[test]
    fn inverse_flux_flow_is_oriented() {
        let psi = circle();
        let shooter = shooter(&psi, Adaption::Orthogonal);
        let outward = InverseFluxFlow::new(&shooter, shooter.seed(), 1.0);
        let inward = InverseFluxFlow::new(&shooter, shooter.seed(), -1.0);
        let mut out = [0.0];
        outward.apply(0.0, &[0.3], &mut out);
        assert!((out[0] - 0.6).abs() < 1e-9);
        inward.apply(0.0, &[0.3], &mut out);
        assert!((out[0] + 0.6).abs() < 1e-9);
        outward.take_failure().expect("no failure recorded");
    }
}
