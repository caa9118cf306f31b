use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the integrators.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side of an ODE `dx/dt = f(t, x)`.
///
/// Every field-line flow in this crate is expressed through this trait so the
/// same fixed-step integrators drive shooting, contour tracing and marching.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current value of the independent variable
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// A scalar flux function ψ(R, Z) together with its first and second
/// partial derivatives.
pub trait FluxFunction {
    fn value(&self, r: f64, z: f64) -> f64;
    fn dfx(&self, r: f64, z: f64) -> f64;
    fn dfy(&self, r: f64, z: f64) -> f64;
    fn dfxx(&self, r: f64, z: f64) -> f64;
    fn dfxy(&self, r: f64, z: f64) -> f64;
    fn dfyy(&self, r: f64, z: f64) -> f64;
}

/// Symmetric 2x2 monitor tensor χ(R, Z) used for anisotropic adaption.
///
/// `div_x` and `div_y` are the components of the divergence
/// `∂_R χ_Ri + ∂_Z χ_Zi`, needed for the χ-weighted Laplacian of ψ.
pub trait MonitorTensor {
    fn xx(&self, r: f64, z: f64) -> f64;
    fn xy(&self, r: f64, z: f64) -> f64;
    fn yy(&self, r: f64, z: f64) -> f64;
    fn div_x(&self, r: f64, z: f64) -> f64;
    fn div_y(&self, r: f64, z: f64) -> f64;
}
