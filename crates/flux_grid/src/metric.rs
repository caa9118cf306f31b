//! Contravariant metric and volume element of a generated grid.

use crate::error::{GridError, Result};
use crate::generator::GeneratedGrid;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

const JACOBIAN_THRESHOLD: f64 = 1e-300;

fn to_vec(values: &DVector<f64>) -> Vec<f64> {
    values.iter().cloned().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMetric {
    pub g_xx: Vec<f64>,
    pub g_xy: Vec<f64>,
    pub g_yy: Vec<f64>,
    /// √g of the poloidal plane, 1 / |ζ_R η_Z - ζ_Z η_R|.
    pub perp_vol: Vec<f64>,
    /// R √g.
    pub vol: Vec<f64>,
}

impl GridMetric {
    pub fn from_grid(grid: &GeneratedGrid) -> Result<Self> {
        let zeta_r = DVector::from_column_slice(&grid.zeta_r);
        let zeta_z = DVector::from_column_slice(&grid.zeta_z);
        let eta_r = DVector::from_column_slice(&grid.eta_r);
        let eta_z = DVector::from_column_slice(&grid.eta_z);

        let jacobian =
            (zeta_r.component_mul(&eta_z) - zeta_z.component_mul(&eta_r)).map(f64::abs);
        if let Some(index) = jacobian
            .iter()
            .position(|det| !(*det > JACOBIAN_THRESHOLD) || !det.is_finite())
        {
            return Err(GridError::Degenerate { index });
        }

        let g_xx = zeta_r.component_mul(&zeta_r) + zeta_z.component_mul(&zeta_z);
        let g_xy = zeta_r.component_mul(&eta_r) + zeta_z.component_mul(&eta_z);
        let g_yy = eta_r.component_mul(&eta_r) + eta_z.component_mul(&eta_z);
        let perp_vol = jacobian.map(|det| 1.0 / det);
        let vol = DVector::from_column_slice(&grid.r).component_mul(&perp_vol);
        Ok(Self {
            g_xx: to_vec(&g_xx),
            g_xy: to_vec(&g_xy),
            g_yy: to_vec(&g_yy),
            perp_vol: to_vec(&perp_vol),
            vol: to_vec(&vol),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::CircularFlux;
    use crate::generator::{uniform_samples, GeneratorKind, GridGenerator};
    use crate::settings::GridSettings;
    use crate::shooting::SeedHint;
    use approx::assert_relative_eq;

    fn single_point(zeta: (f64, f64), eta: (f64, f64)) -> GeneratedGrid {
        GeneratedGrid {
            nx: 1,
            ny: 1,
            r: vec![2.0],
            z: vec![0.0],
            zeta_r: vec![zeta.0],
            zeta_z: vec![zeta.1],
            eta_r: vec![eta.0],
            eta_z: vec![eta.1],
            h: None,
            fx: None,
        }
    }

    #[test]
    fn metric_of_sheared_point() {
        let metric = GridMetric::from_grid(&single_point((2.0, 0.0), (1.0, 4.0)))
            .expect("non-degenerate point");
        assert_eq!(metric.g_xx, vec![4.0]);
        assert_eq!(metric.g_xy, vec![2.0]);
        assert_eq!(metric.g_yy, vec![17.0]);
        assert_eq!(metric.perp_vol, vec![0.125]);
        assert_eq!(metric.vol, vec![0.25]);
    }

    #[test]
    fn parallel_gradients_are_degenerate() {
        let result = GridMetric::from_grid(&single_point((1.0, 1.0), (2.0, 2.0)));
        assert!(matches!(result, Err(GridError::Degenerate { index: 0 })));
    }

    #[test]
    fn orthogonal_grid_has_vanishing_cross_term() {
        let psi = CircularFlux { r0: 3.0, z0: 0.0 };
        let generator = GridGenerator::new(
            GeneratorKind::Orthogonal,
            &psi,
            None,
            0.1,
            1.0,
            SeedHint::new(3.2, 0.0),
            GridSettings::default(),
        )
        .expect("generator should build");
        let zeta = uniform_samples(0.0, generator.width(), 3);
        let eta = uniform_samples(0.0, generator.height(), 8);
        let grid = generator.generate(&zeta, &eta).expect("grid should generate");
        let metric = GridMetric::from_grid(&grid).expect("grid should be regular");
        for idx in 0..grid.len() {
            let scale = (metric.g_xx[idx] * metric.g_yy[idx]).sqrt();
            assert!(metric.g_xy[idx].abs() < 1e-6 * scale);
            // |∇x||∇y| = 1 / √g when the gradients are orthogonal
            assert_relative_eq!(scale * metric.perp_vol[idx], 1.0, max_relative = 1e-6);
        }
    }
}
