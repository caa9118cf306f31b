//! Analytic flux functions, monitor tensors and the pointwise quantities the
//! generators derive from them.

use crate::error::{GridError, Result};
use crate::traits::{FluxFunction, MonitorTensor};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// ψ = (R - R₀)² + (Z - Z₀)²; every flux surface is a circle about (R₀, Z₀).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircularFlux {
    pub r0: f64,
    pub z0: f64,
}

impl FluxFunction for CircularFlux {
    fn value(&self, r: f64, z: f64) -> f64 {
        (r - self.r0).powi(2) + (z - self.z0).powi(2)
    }
    fn dfx(&self, r: f64, _z: f64) -> f64 {
        2.0 * (r - self.r0)
    }
    fn dfy(&self, _r: f64, z: f64) -> f64 {
        2.0 * (z - self.z0)
    }
    fn dfxx(&self, _r: f64, _z: f64) -> f64 {
        2.0
    }
    fn dfxy(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
    fn dfyy(&self, _r: f64, _z: f64) -> f64 {
        2.0
    }
}

/// ψ = (R - R₀)² + (Z - Z₀)²/κ²; flux surfaces are ellipses elongated by κ.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipticFlux {
    pub r0: f64,
    pub z0: f64,
    pub kappa: f64,
}

impl EllipticFlux {
    pub fn new(r0: f64, z0: f64, kappa: f64) -> Result<Self> {
        if !(kappa.is_finite() && kappa > 0.0) {
            return Err(GridError::InvalidSettings {
                reason: format!("elongation must be positive, got {kappa}"),
            });
        }
        Ok(Self { r0, z0, kappa })
    }

    /// Closed-form f(ψ) for the orthogonal (χ = 1) closure.
    pub fn periodicity(&self, psi: f64) -> f64 {
        1.0 / (psi * (self.kappa + 1.0 / self.kappa))
    }
}

impl FluxFunction for EllipticFlux {
    fn value(&self, r: f64, z: f64) -> f64 {
        (r - self.r0).powi(2) + ((z - self.z0) / self.kappa).powi(2)
    }
    fn dfx(&self, r: f64, _z: f64) -> f64 {
        2.0 * (r - self.r0)
    }
    fn dfy(&self, _r: f64, z: f64) -> f64 {
        2.0 * (z - self.z0) / (self.kappa * self.kappa)
    }
    fn dfxx(&self, _r: f64, _z: f64) -> f64 {
        2.0
    }
    fn dfxy(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
    fn dfyy(&self, _r: f64, _z: f64) -> f64 {
        2.0 / (self.kappa * self.kappa)
    }
}

/// χ = 1, the purely orthogonal case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityMonitor;

impl MonitorTensor for IdentityMonitor {
    fn xx(&self, _r: f64, _z: f64) -> f64 {
        1.0
    }
    fn xy(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
    fn yy(&self, _r: f64, _z: f64) -> f64 {
        1.0
    }
    fn div_x(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
    fn div_y(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
}

/// Spatially constant, symmetric positive definite monitor tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantMonitor {
    xx: f64,
    xy: f64,
    yy: f64,
}

impl ConstantMonitor {
    pub fn new(xx: f64, xy: f64, yy: f64) -> Result<Self> {
        let det = xx * yy - xy * xy;
        if !(xx > 0.0 && det > 0.0) || !(xx.is_finite() && xy.is_finite() && yy.is_finite()) {
            return Err(GridError::InvalidSettings {
                reason: format!("monitor tensor [{xx}, {xy}; {xy}, {yy}] is not positive definite"),
            });
        }
        Ok(Self { xx, xy, yy })
    }
}

impl MonitorTensor for ConstantMonitor {
    fn xx(&self, _r: f64, _z: f64) -> f64 {
        self.xx
    }
    fn xy(&self, _r: f64, _z: f64) -> f64 {
        self.xy
    }
    fn yy(&self, _r: f64, _z: f64) -> f64 {
        self.yy
    }
    fn div_x(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
    fn div_y(&self, _r: f64, _z: f64) -> f64 {
        0.0
    }
}

/// ∇ψ, χ and the derived χ∇ψ and p = ∇ψ·χ∇ψ at one point.
#[derive(Debug, Clone, Copy)]
pub struct FluxGradient {
    pub grad: Vector2<f64>,
    pub chi: Matrix2<f64>,
    pub flux: Vector2<f64>,
    pub p: f64,
}

impl FluxGradient {
    pub fn at(psi: &dyn FluxFunction, chi: &dyn MonitorTensor, r: f64, z: f64) -> Self {
        let grad = Vector2::new(psi.dfx(r, z), psi.dfy(r, z));
        let xy = chi.xy(r, z);
        let chi = Matrix2::new(chi.xx(r, z), xy, xy, chi.yy(r, z));
        let flux = chi * grad;
        let p = grad.dot(&flux);
        Self {
            grad,
            chi,
            flux,
            p,
        }
    }

    pub fn psi_r(&self) -> f64 {
        self.grad.x
    }

    pub fn psi_z(&self) -> f64 {
        self.grad.y
    }
}

/// ∇·(χ∇ψ) = χ:∇∇ψ + (∇·χ)·∇ψ.
pub fn laplace_chi_psi(psi: &dyn FluxFunction, chi: &dyn MonitorTensor, r: f64, z: f64) -> f64 {
    psi.dfxx(r, z) * chi.xx(r, z)
        + 2.0 * psi.dfxy(r, z) * chi.xy(r, z)
        + psi.dfyy(r, z) * chi.yy(r, z)
        + chi.div_x(r, z) * psi.dfx(r, z)
        + chi.div_y(r, z) * psi.dfy(r, z)
}

pub fn is_critical(psi: &dyn FluxFunction, r: f64, z: f64, threshold: f64) -> bool {
    psi.dfx(r, z).abs() <= threshold && psi.dfy(r, z).abs() <= threshold
}

/// Rejects a point where ∇ψ vanishes, since no flux surface passes through it.
pub fn ensure_regular(psi: &dyn FluxFunction, r: f64, z: f64, threshold: f64) -> Result<()> {
    if is_critical(psi, r, z, threshold) {
        return Err(GridError::CriticalPoint { r, z });
    }
    Ok(())
}

/// Newton iteration on ∇ψ = 0 from (`r`, `z`). Returns the point once
/// |∇ψ| drops to `threshold`, or `None` if the Hessian is singular or the
/// iteration leaves the finite plane within `max_iterations`.
pub fn find_critical_point(
    psi: &dyn FluxFunction,
    r: f64,
    z: f64,
    threshold: f64,
    max_iterations: usize,
) -> Option<Vector2<f64>> {
    let mut point = Vector2::new(r, z);
    for _ in 0..=max_iterations {
        let (r, z) = (point.x, point.y);
        let grad = Vector2::new(psi.dfx(r, z), psi.dfy(r, z));
        if !grad.norm().is_finite() {
            return None;
        }
        if grad.norm() <= threshold {
            return Some(point);
        }
        let xy = psi.dfxy(r, z);
        let hessian = Matrix2::new(psi.dfxx(r, z), xy, xy, psi.dfyy(r, z));
        point -= hessian.lu().solve(&grad)?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_flux_gradient_matches_value() {
        let psi = CircularFlux { r0: 3.0, z0: 0.5 };
        let (r, z, h) = (3.4, 0.2, 1e-6);
        let dr = (psi.value(r + h, z) - psi.value(r - h, z)) / (2.0 * h);
        let dz = (psi.value(r, z + h) - psi.value(r, z - h)) / (2.0 * h);
        assert!((dr - psi.dfx(r, z)).abs() < 1e-8);
        assert!((dz - psi.dfy(r, z)).abs() < 1e-8);
    }

    #[test]
    fn elliptic_flux_rejects_bad_elongation() {
        assert!(EllipticFlux::new(1.0, 0.0, 0.0).is_err());
        assert!(EllipticFlux::new(1.0, 0.0, -2.0).is_err());
        assert!(EllipticFlux::new(1.0, 0.0, 1.5).is_ok());
    }

    #[test]
    fn flux_gradient_with_identity_is_squared_norm() {
        let psi = CircularFlux { r0: 1.0, z0: 0.0 };
        let info = FluxGradient::at(&psi, &IdentityMonitor, 1.3, 0.4);
        assert!((info.p - (0.6f64.powi(2) + 0.8f64.powi(2))).abs() < 1e-14);
        assert_eq!(info.flux, info.grad);
    }

    #[test]
    fn flux_gradient_applies_monitor() {
        let psi = CircularFlux { r0: 0.0, z0: 0.0 };
        let chi = ConstantMonitor::new(2.0, 0.5, 1.0).expect("valid monitor");
        let info = FluxGradient::at(&psi, &chi, 1.0, 1.0);
        // grad = (2, 2), chi*grad = (5, 3)
        assert!((info.flux.x - 5.0).abs() < 1e-14);
        assert!((info.flux.y - 3.0).abs() < 1e-14);
        assert!((info.p - 16.0).abs() < 1e-14);
    }

    #[test]
    fn constant_monitor_must_be_positive_definite() {
        assert!(ConstantMonitor::new(1.0, 2.0, 1.0).is_err());
        assert!(ConstantMonitor::new(-1.0, 0.0, -1.0).is_err());
    }

    #[test]
    fn laplacian_of_circular_flux() {
        let psi = CircularFlux { r0: 1.0, z0: 0.0 };
        assert_eq!(laplace_chi_psi(&psi, &IdentityMonitor, 0.2, 0.7), 4.0);
        let chi = ConstantMonitor::new(2.0, 0.3, 0.5).expect("valid monitor");
        assert!((laplace_chi_psi(&psi, &chi, 0.2, 0.7) - 5.0).abs() < 1e-14);
    }

    #[test]
    fn detects_critical_point() {
        let psi = CircularFlux { r0: 2.0, z0: 0.0 };
        assert!(is_critical(&psi, 2.0, 0.0, 1e-10));
        assert!(!is_critical(&psi, 2.1, 0.0, 1e-10));
    }

    #[test]
    fn regular_point_check_reports_location() {
        let psi = CircularFlux { r0: 2.0, z0: 0.0 };
        ensure_regular(&psi, 2.1, 0.0, 1e-10).expect("off-axis point is regular");
        assert_eq!(
            ensure_regular(&psi, 2.0, 0.0, 1e-10),
            Err(GridError::CriticalPoint { r: 2.0, z: 0.0 })
        );
    }

    #[test]
    fn newton_finds_magnetic_axis() {
        let psi = EllipticFlux::new(3.0, 0.5, 1.7).expect("valid elongation");
        let axis = find_critical_point(&psi, 3.4, -0.2, 1e-12, 50).expect("axis should be found");
        assert!((axis.x - 3.0).abs() < 1e-12);
        assert!((axis.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn newton_gives_up_on_flat_hessian() {
        struct Plane;
        impl FluxFunction for Plane {
            fn value(&self, r: f64, _z: f64) -> f64 {
                r
            }
            fn dfx(&self, _r: f64, _z: f64) -> f64 {
                1.0
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
        assert!(find_critical_point(&Plane, 1.0, 0.0, 1e-10, 50).is_none());
    }
}
