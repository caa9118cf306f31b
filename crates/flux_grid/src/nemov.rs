//! Cross-surface field of the orthogonal generators.
//!
//! A whole angular column of points is advanced across flux surfaces at once.
//! The state is `[R₀..R_{n-1}, Z₀..Z_{n-1}, h₀..h_{n-1}]` where h is the scale
//! factor |∇y|⁻¹ relative to the first surface.

use crate::fields::{laplace_chi_psi, FluxGradient};
use crate::flows::Adaption;
use crate::traits::{DynamicalSystem, FluxFunction, MonitorTensor};

pub struct CrossSurfaceField<'a> {
    psi: &'a dyn FluxFunction,
    chi: &'a dyn MonitorTensor,
    f0: f64,
    adaption: Adaption,
    ny: usize,
}

impl<'a> CrossSurfaceField<'a> {
    pub fn new(
        psi: &'a dyn FluxFunction,
        chi: &'a dyn MonitorTensor,
        f0: f64,
        adaption: Adaption,
        ny: usize,
    ) -> Self {
        Self {
            psi,
            chi,
            f0,
            adaption,
            ny,
        }
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn psi(&self) -> &'a dyn FluxFunction {
        self.psi
    }

    /// h on the first surface at every point of the column.
    pub fn initial_h(&self, r: &[f64], z: &[f64]) -> Vec<f64> {
        r.iter()
            .zip(z)
            .map(|(&r, &z)| match self.adaption {
                Adaption::Orthogonal => self.f0,
                Adaption::EqualArc => {
                    self.f0 / FluxGradient::at(self.psi, self.chi, r, z).p.sqrt()
                }
            })
            .collect()
    }
}

impl DynamicalSystem<f64> for CrossSurfaceField<'_> {
    fn dimension(&self) -> usize {
        3 * self.ny
    }

    fn apply(&self, _x: f64, state: &[f64], out: &mut [f64]) {
        let n = self.ny;
        let (r, rest) = state.split_at(n);
        let (z, h) = rest.split_at(n);
        for i in 0..n {
            let g = FluxGradient::at(self.psi, self.chi, r[i], z[i]);
            let scale = g.p * self.f0;
            out[i] = g.flux.x / scale;
            out[n + i] = g.flux.y / scale;
            out[2 * n + i] = -h[i] * laplace_chi_psi(self.psi, self.chi, r[i], z[i]) / scale;
        }
    }
}
