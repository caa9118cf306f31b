//! Grid generators between two flux surfaces.
//!
//! A generator maps a rectangle [0, width) × [0, 2π) of computational
//! coordinates (ζ, η) onto the region between ψ₀ and ψ₁. The first radial
//! coordinate line is the ψ₀ surface, traced from the seed's gradient line.
//!
//! Two families are provided:
//!
//! * [`SimpleOrthogonal`] marches a whole angular column across the surfaces
//!   with [`CrossSurfaceField`]. The ψ₀ surface is parameterised either
//!   conformally ([`Adaption::Orthogonal`]) or by equal arclength
//!   ([`Adaption::EqualArc`]).
//! * [`Ribeiro`] first marches ψ(x) with dψ/dx = 1/f(ψ) and then traces every
//!   surface independently, so x spaces the surfaces by ∫f dψ.

use crate::contour::{trace_contour, trace_ribeiro_contour, validate_samples};
use crate::error::{GridError, Result};
use crate::fields::{find_critical_point, FluxGradient, IdentityMonitor};
use crate::flows::Adaption;
use crate::march::{construct_rz, sample_psi};
use crate::nemov::CrossSurfaceField;
use crate::settings::{GridSettings, HEIGHT};
use crate::shooting::{FluxSurfaceShooter, InverseFluxFlow, SeedHint};
use crate::traits::{FluxFunction, MonitorTensor};
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorKind {
    Orthogonal,
    EqualArc,
    Ribeiro,
}

/// Coordinates and coordinate gradients on the (ζ, η) tensor grid.
///
/// Every array has `nx * ny` entries; the point of radial sample `i` and
/// angular sample `j` is at `j * nx + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedGrid {
    pub nx: usize,
    pub ny: usize,
    pub r: Vec<f64>,
    pub z: Vec<f64>,
    pub zeta_r: Vec<f64>,
    pub zeta_z: Vec<f64>,
    pub eta_r: Vec<f64>,
    pub eta_z: Vec<f64>,
    /// Scale factor of the orthogonal family.
    pub h: Option<Vec<f64>>,
    /// dψ/dx at every radial sample of a Ribeiro grid.
    pub fx: Option<Vec<f64>>,
}

impl GeneratedGrid {
    pub fn index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rejects ψ₀ == ψ₁ and non-finite bounds.
pub fn check_interval(psi_0: f64, psi_1: f64) -> Result<()> {
    if !(psi_0.is_finite() && psi_1.is_finite()) || psi_0 == psi_1 {
        return Err(GridError::DegenerateInterval { psi: psi_0 });
    }
    Ok(())
}

/// Rejects an interval whose closed ψ range contains a critical point of ψ
/// reachable by Newton iteration from the seed, such as the magnetic axis.
pub fn check_domain(
    psi: &dyn FluxFunction,
    psi_0: f64,
    psi_1: f64,
    seed: SeedHint,
    settings: &GridSettings,
) -> Result<()> {
    let Some(point) = find_critical_point(
        psi,
        seed.r,
        seed.z,
        settings.critical_gradient,
        settings.max_newton_iterations,
    ) else {
        return Ok(());
    };
    let value = psi.value(point.x, point.y);
    if psi_0.min(psi_1) <= value && value <= psi_0.max(psi_1) {
        return Err(GridError::CriticalPoint {
            r: point.x,
            z: point.y,
        });
    }
    debug!(
        "critical point ({}, {}) with psi = {} lies outside the grid",
        point.x, point.y, value
    );
    Ok(())
}

/// Cell-centred samples: `n` points, one in the middle of each of `n` equal
/// cells of [x0, x1].
pub fn uniform_samples(x0: f64, x1: f64, n: usize) -> Vec<f64> {
    let dx = (x1 - x0) / n as f64;
    (0..n).map(|k| x0 + dx * (k as f64 + 0.5)).collect()
}

fn orientation(psi_0: f64, psi_1: f64) -> f64 {
    if psi_1 < psi_0 {
        -1.0
    } else {
        1.0
    }
}

/// Orthogonal grid with f₀-scaled radial coordinate x = f₀ (ψ - ψ₀).
pub struct SimpleOrthogonal<'a> {
    psi: &'a dyn FluxFunction,
    chi: &'a dyn MonitorTensor,
    monitored: bool,
    adaption: Adaption,
    settings: GridSettings,
    f0: f64,
    width: f64,
    start: SeedHint,
}

impl<'a> SimpleOrthogonal<'a> {
    /// Without a monitor tensor the grid is orthogonal in the Euclidean sense.
    pub fn new(
        psi: &'a dyn FluxFunction,
        chi: Option<&'a dyn MonitorTensor>,
        psi_0: f64,
        psi_1: f64,
        seed: SeedHint,
        adaption: Adaption,
        settings: GridSettings,
    ) -> Result<Self> {
        check_interval(psi_0, psi_1)?;
        let monitored = chi.is_some();
        let chi = chi.unwrap_or(&IdentityMonitor);
        let shooter = FluxSurfaceShooter::new(psi, chi, seed, adaption, settings)?;
        check_domain(psi, psi_0, psi_1, seed, &settings)?;
        let mut hint = shooter.seed();
        let surface = shooter.construct_f(psi_0, &mut hint)?;
        let f0 = surface.f.abs() * orientation(psi_0, psi_1);
        let width = f0 * (psi_1 - psi_0);
        info!("f0 = {} and width = {} for {:?} grid", f0, width, adaption);
        Ok(Self {
            psi,
            chi,
            monitored,
            adaption,
            settings,
            f0,
            width,
            start: SeedHint::new(surface.r, surface.z),
        })
    }

    pub fn f0(&self) -> f64 {
        self.f0
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        HEIGHT
    }

    pub fn is_orthogonal(&self) -> bool {
        !self.monitored
    }

    pub fn generate(&self, zeta: &[f64], eta: &[f64]) -> Result<GeneratedGrid> {
        validate_samples("zeta", zeta)?;
        validate_samples("eta", eta)?;
        let first = trace_contour(
            self.psi,
            self.chi,
            self.adaption,
            eta,
            self.start,
            self.f0,
            &self.settings,
        )?;
        let field = CrossSurfaceField::new(self.psi, self.chi, self.f0, self.adaption, eta.len());
        let marched = construct_rz(&field, 0.0, zeta, &first.r, &first.z, &self.settings)?;

        let size = marched.r.len();
        let mut grid = GeneratedGrid {
            nx: marched.nx,
            ny: marched.ny,
            zeta_r: vec![0.0; size],
            zeta_z: vec![0.0; size],
            eta_r: vec![0.0; size],
            eta_z: vec![0.0; size],
            r: marched.r,
            z: marched.z,
            h: None,
            fx: None,
        };
        for idx in 0..size {
            let g = FluxGradient::at(self.psi, self.chi, grid.r[idx], grid.z[idx]);
            let h = marched.h[idx];
            grid.zeta_r[idx] = self.f0 * g.psi_r();
            grid.zeta_z[idx] = self.f0 * g.psi_z();
            grid.eta_r[idx] = -h * g.flux.y;
            grid.eta_z[idx] = h * g.flux.x;
        }
        grid.h = Some(marched.h);
        debug!("generated {} x {} orthogonal grid", grid.nx, grid.ny);
        Ok(grid)
    }
}

/// Ribeiro grid: x = ∫f dψ, and every surface is traced on its own.
pub struct Ribeiro<'a> {
    psi: &'a dyn FluxFunction,
    shooter: FluxSurfaceShooter<'a>,
    psi_0: f64,
    psi_1: f64,
    width: f64,
    start: SeedHint,
}

impl<'a> Ribeiro<'a> {
    pub fn new(
        psi: &'a dyn FluxFunction,
        psi_0: f64,
        psi_1: f64,
        seed: SeedHint,
        settings: GridSettings,
    ) -> Result<Self> {
        check_interval(psi_0, psi_1)?;
        let shooter =
            FluxSurfaceShooter::new(psi, &IdentityMonitor, seed, Adaption::Orthogonal, settings)?;
        check_domain(psi, psi_0, psi_1, seed, &settings)?;
        let mut hint = shooter.seed();
        let start = shooter.find_initial(psi_0, &mut hint)?;
        let width = shooter.find_x1(psi_0, psi_1, &mut hint)?.abs();
        info!("width = {} for Ribeiro grid", width);
        Ok(Self {
            psi,
            shooter,
            psi_0,
            psi_1,
            width,
            start,
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        HEIGHT
    }

    pub fn is_orthogonal(&self) -> bool {
        false
    }

    pub fn generate(&self, zeta: &[f64], eta: &[f64]) -> Result<GeneratedGrid> {
        validate_samples("zeta", zeta)?;
        validate_samples("eta", eta)?;
        let settings = *self.shooter.settings();
        let sign = orientation(self.psi_0, self.psi_1);
        let flow = InverseFluxFlow::new(&self.shooter, self.start, sign);
        let samples = sample_psi(&flow, self.psi_0, self.psi_1, 0.0, zeta, self.width, &settings)?;

        let (nx, ny) = (zeta.len(), eta.len());
        let size = nx * ny;
        let mut grid = GeneratedGrid {
            nx,
            ny,
            r: vec![0.0; size],
            z: vec![0.0; size],
            zeta_r: vec![0.0; size],
            zeta_z: vec![0.0; size],
            eta_r: vec![0.0; size],
            eta_z: vec![0.0; size],
            h: None,
            fx: None,
        };
        let mut hint = self.start;
        for (i, &psi_x) in samples.psi.iter().enumerate() {
            let surface = self.shooter.construct_f(psi_x, &mut hint)?;
            let f_prime = self.shooter.f_prime(psi_x, &mut hint)?;
            let contour = trace_ribeiro_contour(
                self.psi,
                eta,
                SeedHint::new(surface.r, surface.z),
                surface.f,
                f_prime,
                &settings,
            )?;
            let scale = sign * surface.f.abs();
            for j in 0..ny {
                let idx = j * nx + i;
                let (r, z) = (contour.r[j], contour.z[j]);
                grid.r[idx] = r;
                grid.z[idx] = z;
                grid.zeta_r[idx] = scale * self.psi.dfx(r, z);
                grid.zeta_z[idx] = scale * self.psi.dfy(r, z);
                grid.eta_r[idx] = contour.y_r[j];
                grid.eta_z[idx] = contour.y_z[j];
            }
        }
        grid.fx = Some(samples.fx);
        debug!("generated {} x {} Ribeiro grid", nx, ny);
        Ok(grid)
    }
}

/// One interface over the generator families.
pub enum GridGenerator<'a> {
    Orthogonal(SimpleOrthogonal<'a>),
    Ribeiro(Ribeiro<'a>),
}

impl<'a> GridGenerator<'a> {
    /// The Ribeiro family has no monitor tensor and rejects one.
    pub fn new(
        kind: GeneratorKind,
        psi: &'a dyn FluxFunction,
        chi: Option<&'a dyn MonitorTensor>,
        psi_0: f64,
        psi_1: f64,
        seed: SeedHint,
        settings: GridSettings,
    ) -> Result<Self> {
        match kind {
            GeneratorKind::Orthogonal => Ok(GridGenerator::Orthogonal(SimpleOrthogonal::new(
                psi,
                chi,
                psi_0,
                psi_1,
                seed,
                Adaption::Orthogonal,
                settings,
            )?)),
            GeneratorKind::EqualArc => Ok(GridGenerator::Orthogonal(SimpleOrthogonal::new(
                psi,
                chi,
                psi_0,
                psi_1,
                seed,
                Adaption::EqualArc,
                settings,
            )?)),
            GeneratorKind::Ribeiro => {
                if chi.is_some() {
                    return Err(GridError::InvalidSettings {
                        reason: "Ribeiro grids do not take a monitor tensor".into(),
                    });
                }
                Ok(GridGenerator::Ribeiro(Ribeiro::new(
                    psi, psi_0, psi_1, seed, settings,
                )?))
            }
        }
    }

    pub fn kind(&self) -> GeneratorKind {
        match self {
            GridGenerator::Orthogonal(g) => match g.adaption {
                Adaption::Orthogonal => GeneratorKind::Orthogonal,
                Adaption::EqualArc => GeneratorKind::EqualArc,
            },
            GridGenerator::Ribeiro(_) => GeneratorKind::Ribeiro,
        }
    }

    pub fn generate(&self, zeta: &[f64], eta: &[f64]) -> Result<GeneratedGrid> {
        match self {
            GridGenerator::Orthogonal(g) => g.generate(zeta, eta),
            GridGenerator::Ribeiro(g) => g.generate(zeta, eta),
        }
    }

    pub fn width(&self) -> f64 {
        match self {
            GridGenerator::Orthogonal(g) => g.width(),
            GridGenerator::Ribeiro(g) => g.width(),
        }
    }

    pub fn height(&self) -> f64 {
        HEIGHT
    }

    pub fn is_orthogonal(&self) -> bool {
        match self {
            GridGenerator::Orthogonal(g) => g.is_orthogonal(),
            GridGenerator::Ribeiro(g) => g.is_orthogonal(),
        }
    }
}
