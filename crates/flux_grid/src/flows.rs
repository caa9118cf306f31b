//! Field-line flows in the poloidal plane.
//!
//! Each flow is an ODE right-hand side over a small state vector:
//!
//! | flow | state | independent variable |
//! |------|-------|----------------------|
//! | [`GradientFlow`] | (R, Z) | ψ |
//! | [`ClosureFlow`] | (R, Z, T) | angle θ about a reference point |
//! | [`ContourFlow`] | (R, Z) | contour coordinate y |
//! | [`RibeiroContourFlow`] | (R, Z, y_R, y_Z) | contour coordinate y |

use crate::fields::FluxGradient;
use crate::traits::{DynamicalSystem, FluxFunction, MonitorTensor};
use serde::{Deserialize, Serialize};

/// Parameterisation of the first flux surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adaption {
    /// y advances with p = ∇ψ·χ∇ψ along the contour.
    Orthogonal,
    /// y advances with √p, i.e. with arclength in the χ metric.
    EqualArc,
}

impl Adaption {
    fn weight(self, p: f64) -> f64 {
        match self {
            Adaption::Orthogonal => p,
            Adaption::EqualArc => p.sqrt(),
        }
    }
}

/// dR/dψ = χ∇ψ / p: moves across flux surfaces so that ψ grows at unit rate.
pub struct GradientFlow<'a> {
    psi: &'a dyn FluxFunction,
    chi: &'a dyn MonitorTensor,
}

impl<'a> GradientFlow<'a> {
    pub fn new(psi: &'a dyn FluxFunction, chi: &'a dyn MonitorTensor) -> Self {
        Self { psi, chi }
    }
}

impl DynamicalSystem<f64> for GradientFlow<'_> {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _psi: f64, x: &[f64], out: &mut [f64]) {
        let g = FluxGradient::at(self.psi, self.chi, x[0], x[1]);
        out[0] = g.flux.x / g.p;
        out[1] = g.flux.y / g.p;
    }
}

/// Follows a flux surface with the poloidal angle about `center` as the
/// independent variable, accumulating the contour "time" T in the third
/// component. One full turn in θ gives T and hence f = 2π / T.
pub struct ClosureFlow<'a> {
    psi: &'a dyn FluxFunction,
    chi: &'a dyn MonitorTensor,
    center: (f64, f64),
    adaption: Adaption,
}

impl<'a> ClosureFlow<'a> {
    pub fn new(
        psi: &'a dyn FluxFunction,
        chi: &'a dyn MonitorTensor,
        center: (f64, f64),
        adaption: Adaption,
    ) -> Self {
        Self {
            psi,
            chi,
            center,
            adaption,
        }
    }
}

impl DynamicalSystem<f64> for ClosureFlow<'_> {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _theta: f64, x: &[f64], out: &mut [f64]) {
        let g = FluxGradient::at(self.psi, self.chi, x[0], x[1]);
        let (dr, dz) = (x[0] - self.center.0, x[1] - self.center.1);
        let r2 = dr * dr + dz * dz;
        // dθ/dt along (-ψ_Z, ψ_R)
        let field_t = (g.psi_z() * dz + g.psi_r() * dr) / r2;
        out[0] = -g.psi_z() / field_t;
        out[1] = g.psi_r() / field_t;
        out[2] = self.adaption.weight(g.p) / field_t;
    }
}

/// Traces a flux surface in the contour coordinate y of a surface with
/// periodicity constant `f`, so that one turn takes exactly 2π.
pub struct ContourFlow<'a> {
    psi: &'a dyn FluxFunction,
    chi: &'a dyn MonitorTensor,
    adaption: Adaption,
    f: f64,
}

impl<'a> ContourFlow<'a> {
    pub fn new(
        psi: &'a dyn FluxFunction,
        chi: &'a dyn MonitorTensor,
        adaption: Adaption,
        f: f64,
    ) -> Self {
        Self {
            psi,
            chi,
            adaption,
            f,
        }
    }
}

impl DynamicalSystem<f64> for ContourFlow<'_> {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _y: f64, x: &[f64], out: &mut [f64]) {
        let g = FluxGradient::at(self.psi, self.chi, x[0], x[1]);
        let scale = self.f * self.adaption.weight(g.p);
        out[0] = -g.psi_z() / scale;
        out[1] = g.psi_r() / scale;
    }
}

/// Contour flow of the Ribeiro coordinates that also transports ∇y along the
/// surface. With g = f |∇ψ|² and v = (-ψ_Z, ψ_R), v·∇y = g holds everywhere,
/// so differentiating it gives the transport of (y_R, y_Z).
pub struct RibeiroContourFlow<'a> {
    psi: &'a dyn FluxFunction,
    f: f64,
    f_prime: f64,
}

impl<'a> RibeiroContourFlow<'a> {
    pub fn new(psi: &'a dyn FluxFunction, f: f64, f_prime: f64) -> Self {
        Self { psi, f, f_prime }
    }

    /// ∇y on the y = 0 line, which runs along ∇ψ.
    pub fn initial_gradient(&self, r: f64, z: f64) -> (f64, f64) {
        (-self.f * self.psi.dfy(r, z), self.f * self.psi.dfx(r, z))
    }
}

impl DynamicalSystem<f64> for RibeiroContourFlow<'_> {
    fn dimension(&self) -> usize {
        4
    }

    fn apply(&self, _y: f64, x: &[f64], out: &mut [f64]) {
        let (r, z, y_r, y_z) = (x[0], x[1], x[2], x[3]);
        let psi_r = self.psi.dfx(r, z);
        let psi_z = self.psi.dfy(r, z);
        let psi_rr = self.psi.dfxx(r, z);
        let psi_rz = self.psi.dfxy(r, z);
        let psi_zz = self.psi.dfyy(r, z);
        let p = psi_r * psi_r + psi_z * psi_z;
        let g = self.f * p;
        let g_r = self.f_prime * psi_r * p + 2.0 * self.f * (psi_r * psi_rr + psi_z * psi_rz);
        let g_z = self.f_prime * psi_z * p + 2.0 * self.f * (psi_r * psi_rz + psi_z * psi_zz);
        out[0] = -psi_z / g;
        out[1] = psi_r / g;
        out[2] = (g_r + psi_rz * y_r - psi_rr * y_z) / g;
        out[3] = (g_z + psi_zz * y_r - psi_rz * y_z) / g;
    }
}
