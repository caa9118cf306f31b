//! Radial marches: the (R, Z, h) column march of the orthogonal generators
//! and the ψ(x) march of the Ribeiro generator.

use crate::contour::validate_samples;
use crate::error::{GridError, Result};
use crate::fields::ensure_regular;
use crate::nemov::CrossSurfaceField;
use crate::refine::Refinement;
use crate::settings::GridSettings;
use crate::shooting::InverseFluxFlow;
use crate::solvers::{integrate, integrate_through};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// R, Z and h on the full tensor grid, flattened `j * nx + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarchedGrid {
    pub nx: usize,
    pub ny: usize,
    pub r: Vec<f64>,
    pub z: Vec<f64>,
    pub h: Vec<f64>,
}

/// Marches the column (`r_init`, `z_init`) from `x0` through every radial
/// sample in `x_vec`, doubling the steps per interval until the grid settles.
pub fn construct_rz(
    field: &CrossSurfaceField<'_>,
    x0: f64,
    x_vec: &[f64],
    r_init: &[f64],
    z_init: &[f64],
    settings: &GridSettings,
) -> Result<MarchedGrid> {
    validate_samples("zeta", x_vec)?;
    let nx = x_vec.len();
    let ny = field.ny();
    if r_init.len() != ny || z_init.len() != ny {
        return Err(GridError::InvalidSamples {
            reason: format!(
                "initial column has {} R and {} Z values for {} angles",
                r_init.len(),
                z_init.len(),
                ny
            ),
        });
    }

    for (&r, &z) in r_init.iter().zip(z_init) {
        ensure_regular(field.psi(), r, z, settings.critical_gradient)?;
    }

    let mut begin = Vec::with_capacity(3 * ny);
    begin.extend_from_slice(r_init);
    begin.extend_from_slice(z_init);
    begin.extend(field.initial_h(r_init, z_init));

    let march = Refinement {
        stage: "radial march",
        first_steps: 1,
        max_steps: settings.max_march_steps,
        tolerance: settings.march_tolerance,
        floor: settings.march_floor,
    };
    let refined = march.run(|steps, previous: Option<&MarchedGrid>| {
        let columns = integrate_through(field, settings.stepper, &begin, x0, x_vec, steps);
        let size = nx * ny;
        let mut grid = MarchedGrid {
            nx,
            ny,
            r: vec![0.0; size],
            z: vec![0.0; size],
            h: vec![0.0; size],
        };
        for (i, column) in columns.iter().enumerate() {
            for j in 0..ny {
                grid.r[j * nx + i] = column[j];
                grid.z[j * nx + i] = column[ny + j];
                grid.h[j * nx + i] = column[2 * ny + j];
            }
        }
        let r = DVector::from_column_slice(&grid.r);
        let z = DVector::from_column_slice(&grid.z);
        let change = match previous {
            Some(old) => {
                (r - DVector::from_column_slice(&old.r)).norm_squared()
                    + (z - DVector::from_column_slice(&old.z)).norm_squared()
            }
            None => r.norm_squared() + z.norm_squared(),
        };
        let eps = (change / size as f64).sqrt();
        Ok((grid, eps))
    })?;

    let grid = refined.value;
    if grid.r.iter().chain(&grid.z).chain(&grid.h).any(|v| !v.is_finite()) {
        return Err(GridError::NonFinite {
            stage: "radial march",
        });
    }
    for (&r, &z) in grid.r.iter().zip(&grid.z) {
        ensure_regular(field.psi(), r, z, settings.critical_gradient)?;
    }
    Ok(grid)
}

/// ψ at every radial sample and dψ/dx = ±1/f there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsiSamples {
    pub psi: Vec<f64>,
    pub fx: Vec<f64>,
}

/// Integrates dψ/dx from (x0, ψ₀) through `x_vec`. `x1` is the width of the
/// interval, where ψ should come out as ψ₁.
pub fn construct_psi_values(
    flow: &InverseFluxFlow<'_, '_>,
    psi_0: f64,
    psi_1: f64,
    x0: f64,
    x_vec: &[f64],
    x1: f64,
    settings: &GridSettings,
) -> Result<Vec<f64>> {
    validate_samples("zeta", x_vec)?;
    let march = Refinement {
        stage: "psi march",
        first_steps: 1,
        max_steps: settings.max_psi_march_steps,
        tolerance: settings.psi_march_tolerance,
        floor: settings.psi_march_floor,
    };
    let refined = march.run(|steps, previous: Option<&DVector<f64>>| {
        let states = integrate_through(flow, settings.stepper, &[psi_0], x0, x_vec, steps);
        flow.take_failure()?;
        let psi = DVector::from_iterator(states.len(), states.into_iter().map(|state| state[0]));
        let change = match previous {
            Some(old) => (&psi - old).norm(),
            None => psi.norm(),
        };
        let eps = change / psi.norm();
        Ok((psi, eps))
    })?;

    let psi = refined.value;
    let last = x_vec[x_vec.len() - 1];
    let end = integrate(flow, settings.stepper, &[psi[psi.len() - 1]], last, x1, refined.steps);
    flow.take_failure()?;
    debug!(
        "psi(x1) = {} for psi_1 = {} (difference {:e})",
        end[0],
        psi_1,
        end[0] - psi_1
    );
    Ok(psi.iter().cloned().collect())
}

/// [`construct_psi_values`] plus the sampled dψ/dx at every ψ(x_i).
pub fn sample_psi(
    flow: &InverseFluxFlow<'_, '_>,
    psi_0: f64,
    psi_1: f64,
    x0: f64,
    x_vec: &[f64],
    x1: f64,
    settings: &GridSettings,
) -> Result<PsiSamples> {
    let psi = construct_psi_values(flow, psi_0, psi_1, x0, x_vec, x1, settings)?;
    let fx = psi
        .iter()
        .map(|&value| flow.evaluate(value))
        .collect::<Result<Vec<_>>>()?;
    if psi.iter().chain(&fx).any(|v| !v.is_finite()) {
        return Err(GridError::NonFinite { stage: "psi march" });
    }
    Ok(PsiSamples { psi, fx })
}
