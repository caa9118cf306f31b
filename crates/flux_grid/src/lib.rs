pub mod contour;
pub mod error;
pub mod fields;
pub mod flows;
pub mod generator;
pub mod march;
pub mod metric;
pub mod nemov;
mod refine;
pub mod settings;
pub mod shooting;
pub mod solvers;
/// The `flux_grid` crate builds curvilinear grids aligned with the flux
/// surfaces of an axisymmetric equilibrium ψ(R, Z).
///
/// Key components:
/// - **Traits**: `FluxFunction` and `MonitorTensor` describe the field, `DynamicalSystem` and `Steppable` the integrators.
/// - **Shooting**: periodicity constant f(ψ), seed points on a surface, ∫f dψ and f'(ψ).
/// - **Contours and marches**: points along one surface and radial marches across surfaces.
/// - **Generators**: orthogonal, equal-arc and Ribeiro grids behind `GridGenerator`.
/// - **Metric**: contravariant metric and volume element of a generated grid.
pub mod traits;

pub use error::{GridError, Result};
pub use fields::{CircularFlux, ConstantMonitor, EllipticFlux, IdentityMonitor};
pub use flows::Adaption;
pub use generator::{
    uniform_samples, GeneratedGrid, GeneratorKind, GridGenerator, Ribeiro, SimpleOrthogonal,
};
pub use metric::GridMetric;
pub use settings::GridSettings;
pub use shooting::{FluxSurfaceShooter, SeedHint};
pub use solvers::StepperKind;
pub use traits::{FluxFunction, MonitorTensor};
