use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};

/// Butcher tableau of an explicit Runge-Kutta scheme.
/// Row `s` of `a` holds the coefficients of the stages preceding stage `s`.
pub struct Tableau {
    pub name: &'static str,
    pub c: &'static [f64],
    pub a: &'static [&'static [f64]],
    pub b: &'static [f64],
}

/// Classic Runge-Kutta 4th order.
pub const RK4_TABLEAU: Tableau = Tableau {
    name: "rk4",
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
};

/// Tsitouras 5/4, used here with its 5th order weights only (fixed step).
pub const TSIT5_TABLEAU: Tableau = Tableau {
    name: "tsit5",
    c: &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
    a: &[
        &[],
        &[0.161],
        &[-0.008480655492356989, 0.335480655492357],
        &[2.897153057105493, -6.359448489975075, 4.3622954328695815],
        &[
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
        ],
        &[
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
    ],
    b: &[
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436099,
        2.324710524099774,
    ],
};

fn lift<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Fixed-step explicit Runge-Kutta solver driven by a [`Tableau`].
pub struct ExplicitRungeKutta<T: Scalar> {
    tableau: &'static Tableau,
    stages: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> ExplicitRungeKutta<T> {
    pub fn new(tableau: &'static Tableau, dim: usize) -> Self {
        Self {
            tableau,
            stages: vec![vec![T::zero(); dim]; tableau.b.len()],
            tmp: vec![T::zero(); dim],
        }
    }

    pub fn rk4(dim: usize) -> Self {
        Self::new(&RK4_TABLEAU, dim)
    }

    pub fn tsit5(dim: usize) -> Self {
        Self::new(&TSIT5_TABLEAU, dim)
    }
}

impl<T: Scalar> Steppable<T> for ExplicitRungeKutta<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        let tableau = self.tableau;

        for s in 0..tableau.b.len() {
            // tmp = y + dt * sum_j a_sj k_j
            for i in 0..state.len() {
                let mut incr = T::zero();
                for (j, &a_sj) in tableau.a[s].iter().enumerate() {
                    incr = incr + lift::<T>(a_sj) * self.stages[j][i];
                }
                self.tmp[i] = state[i] + dt * incr;
            }
            let (_, rest) = self.stages.split_at_mut(s);
            system.apply(t0 + lift::<T>(tableau.c[s]) * dt, &self.tmp, &mut rest[0]);
        }

        // y_next = y + dt * sum_s b_s k_s
        for i in 0..state.len() {
            let mut incr = T::zero();
            for (s, &b_s) in tableau.b.iter().enumerate() {
                incr = incr + lift::<T>(b_s) * self.stages[s][i];
            }
            state[i] = state[i] + dt * incr;
        }

        *t = t0 + dt;
    }
}

/// Selects the fixed-step integrator used by every convergence loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepperKind {
    Rk4,
    Tsit5,
}

impl StepperKind {
    pub fn build(self, dim: usize) -> ExplicitRungeKutta<f64> {
        match self {
            StepperKind::Rk4 => ExplicitRungeKutta::rk4(dim),
            StepperKind::Tsit5 => ExplicitRungeKutta::tsit5(dim),
        }
    }
}

impl Default for StepperKind {
    fn default() -> Self {
        StepperKind::Tsit5
    }
}

/// Integrates `system` from `t0` to `t1` with exactly `steps` equal steps and
/// returns the end state. `t1 < t0` integrates backwards.
pub fn integrate<S>(
    system: &S,
    kind: StepperKind,
    begin: &[f64],
    t0: f64,
    t1: f64,
    steps: usize,
) -> Vec<f64>
where
    S: DynamicalSystem<f64> + ?Sized,
{
    let mut state = begin.to_vec();
    if steps == 0 || t0 == t1 {
        return state;
    }
    let mut stepper = kind.build(state.len());
    let dt = (t1 - t0) / steps as f64;
    let mut t = t0;
    for _ in 0..steps {
        stepper.step(&Borrowed(system), &mut t, &mut state, dt);
    }
    state
}

/// Integrates piecewise from `t0` through each of `samples` in turn, taking
/// `steps` steps per interval, and returns the state at every sample.
pub fn integrate_through<S>(
    system: &S,
    kind: StepperKind,
    begin: &[f64],
    t0: f64,
    samples: &[f64],
    steps: usize,
) -> Vec<Vec<f64>>
where
    S: DynamicalSystem<f64> + ?Sized,
{
    let mut states = Vec::with_capacity(samples.len());
    let mut state = begin.to_vec();
    let mut t = t0;
    for &sample in samples {
        state = integrate(system, kind, &state, t, sample, steps);
        t = sample;
        states.push(state.clone());
    }
    states
}

// Lets `integrate` accept unsized systems while `Steppable::step` takes `impl`.
struct Borrowed<'a, S: ?Sized>(&'a S);

impl<S: DynamicalSystem<f64> + ?Sized> DynamicalSystem<f64> for Borrowed<'_, S> {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.0.apply(t, x, out)
    }
}
