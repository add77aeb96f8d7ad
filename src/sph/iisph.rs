//! Implicit Incompressible SPH (IISPH)
//!
//! Pressure is found by relaxed Jacobi iterations on the discretized
//! pressure Poisson equation, driving the predicted density towards the
//! rest density.
//!
//! Ref: [ICS+14]

use super::kernel::Kernel;
use super::neighbor::{read_search, NeighborhoodInterface, NeighborhoodSearch};
use super::property::*;
use super::solver::{Fields, SolverBase, Timepoint};
use crate::math::{Dimension, Real, VectorN};
use crate::parallel::ParallelExecutor;
use crate::particle::ParticleStore;
use crate::report::CompatibilityReport;
use crate::settings::{Dirty, SimulationParameters};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IisphSettings {
    /// Average predicted density error at which the iteration stops.
    max_density_error_allowed: Real,
    min_number_of_iterations: usize,
    max_number_of_iterations: usize,
    /// Relaxation factor.
    omega: Real,
    /// Boundary contribution factor.
    gamma: Real,
    viscosity: Real,
    single_layer_boundary: bool,
    /// Replaces `gamma` in the pressure acceleration for single layer boundaries.
    single_layer_boundary_gamma: Real,
}

impl Default for IisphSettings {
    fn default() -> Self {
        IisphSettings {
            max_density_error_allowed: 0.001,
            min_number_of_iterations: 2,
            max_number_of_iterations: 100,
            omega: 0.5,
            gamma: 0.7,
            viscosity: 5.0,
            single_layer_boundary: false,
            single_layer_boundary_gamma: 1.1,
        }
    }
}

settings_accessors!(IisphSettings, Dirty::SETTINGS, {
    max_density_error_allowed / set_max_density_error_allowed: Real,
    min_number_of_iterations / set_min_number_of_iterations: usize,
    max_number_of_iterations / set_max_number_of_iterations: usize,
    omega / set_omega: Real,
    gamma / set_gamma: Real,
    viscosity / set_viscosity: Real,
    single_layer_boundary / set_single_layer_boundary: bool,
    single_layer_boundary_gamma / set_single_layer_boundary_gamma: Real,
});

impl IisphSettings {
    fn boundary_gamma(&self) -> Real {
        if self.single_layer_boundary {
            self.single_layer_boundary_gamma
        } else {
            self.gamma
        }
    }
}

pub struct Iisph<N: Dimension> {
    base: SolverBase<N>,
    settings: IisphSettings,
    /// `(A p)_i` of the current iteration.
    pressure_term: Vec<Real>,
    last_iteration_count: usize,
    last_predicted_density_error: Real,
}

impl<N: Dimension> Iisph<N> {
    pub fn new(
        parameters: SimulationParameters,
        settings: IisphSettings,
        kernel: Box<dyn Kernel<N>>,
        search: Box<dyn NeighborhoodSearch<N>>,
        executor: ParallelExecutor,
    ) -> Self {
        Iisph {
            base: SolverBase::new(parameters, kernel, search, executor),
            settings,
            pressure_term: Vec::new(),
            last_iteration_count: 0,
            last_predicted_density_error: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        if N::DIM == 3 {
            "IISPHFluidSolver3D"
        } else {
            "IISPHFluidSolver"
        }
    }

    pub fn base(&self) -> &SolverBase<N> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut SolverBase<N> {
        &mut self.base
    }

    pub fn settings(&self) -> &IisphSettings {
        &self.settings
    }

    /// Setters return the `Dirty` marker to pass to `initialize`.
    pub fn settings_mut(&mut self) -> &mut IisphSettings {
        &mut self.settings
    }

    pub fn last_iteration_count(&self) -> usize {
        self.last_iteration_count
    }

    pub fn last_predicted_density_error(&self) -> Real {
        self.last_predicted_density_error
    }

    /// The last pressure solve stopped at `max_number_of_iterations`.
    pub fn iteration_cap_reached(&self) -> bool {
        self.last_iteration_count >= self.settings.max_number_of_iterations
    }

    pub fn initialize(&mut self, dirty: Dirty) {
        self.base.initialize(dirty);
    }

    pub fn adapt_store(particles: &mut ParticleStore) {
        super::init::<N>(particles);
        particles.add_property::<NonPressureAcceleration<N>>();
        particles.add_property::<PredictedVelocity<N>>();
        particles.add_property::<SourceTerm>();
        particles.add_property::<DiagonalElement>();
    }

    pub fn create_neighborhood_interface(&self) -> NeighborhoodInterface<N> {
        self.base.create_neighborhood_interface()
    }

    pub fn execute_step(&mut self, particles: &mut ParticleStore, timepoint: &Timepoint) {
        debug_assert!(self.settings.max_number_of_iterations >= self.settings.min_number_of_iterations);
        let dt = self.base.begin_step(particles, timepoint);
        self.predict_advection(particles, dt);
        self.compute_source_term_and_diagonal(particles, dt);
        self.compute_pressure(particles, dt);
        self.compute_acceleration(particles);
        self.base.integrate(particles, dt);
        self.base.end_step();
    }

    /// Density, non-pressure acceleration and predicted velocity.
    fn predict_advection(&self, particles: &ParticleStore, dt: Real) {
        let search = read_search(self.base.search());
        let (position, velocity, mass, kind) = (
            particles.read::<Position<N>>(),
            particles.read::<Velocity<N>>(),
            particles.read::<Mass>(),
            particles.read::<Kind>(),
        );
        let fields = Fields {
            kernel: self.base.kernel(),
            search: &**search,
            position: &position,
            velocity: &velocity,
            mass: &mass,
            kind: &kind,
        };
        let executor = self.base.executor();

        let mut density = particles.write::<Density>();
        executor.for_each_mut(&mut density[..], |i, density| {
            if fields.kind[i] == ParticleKind::Normal {
                *density = fields.density(i);
            }
        });
        let density = &density[..];

        let (mut non_pressure, mut predicted) = (
            particles.write::<NonPressureAcceleration<N>>(),
            particles.write::<PredictedVelocity<N>>(),
        );
        let parameters = self.base.parameters();
        let viscosity = self.settings.viscosity;
        executor.for_each_zip_mut(&mut non_pressure[..], &mut predicted[..], |i, a_np, v_adv| {
            *a_np = match fields.kind[i] {
                ParticleKind::Normal => fields.non_pressure_acceleration(i, density, parameters, viscosity),
                ParticleKind::Boundary => VectorN::default(),
                ParticleKind::Inactive => return,
            };
            *v_adv = fields.velocity[i] + *a_np * dt;
        });
    }

    /// Ref: [ICS+14] Eq. 9 (source term) and Eq. 12 (diagonal)
    fn compute_source_term_and_diagonal(&self, particles: &ParticleStore, dt: Real) {
        let search = read_search(self.base.search());
        let (position, velocity, mass, kind, density, predicted) = (
            particles.read::<Position<N>>(),
            particles.read::<Velocity<N>>(),
            particles.read::<Mass>(),
            particles.read::<Kind>(),
            particles.read::<Density>(),
            particles.read::<PredictedVelocity<N>>(),
        );
        let fields = Fields {
            kernel: self.base.kernel(),
            search: &**search,
            position: &position,
            velocity: &velocity,
            mass: &mass,
            kind: &kind,
        };
        let (density, predicted) = (&density[..], &predicted[..]);
        let executor = self.base.executor();

        let rest_density = self.base.parameters().rest_density();
        let rest_density2 = rest_density * rest_density;
        let gamma = self.settings.gamma;

        let (mut source, mut diagonal) = (particles.write::<SourceTerm>(), particles.write::<DiagonalElement>());
        executor.for_each_zip_mut(&mut source[..], &mut diagonal[..], |i, source, diagonal| {
            if fields.kind[i] != ParticleKind::Normal {
                return;
            }

            let mut divergence = 0.0;
            // sum_j m_j grad W_ij
            let mut mass_gradient = VectorN::<N>::default();
            // sum_j m_j / rho_0^2 grad W_ij, boundary scaled by 2 gamma
            let mut scaled_gradient = VectorN::<N>::default();
            let mut neighbor_terms = 0.0;
            for j in fields.neighbors(i) {
                let grad = fields.gradient(i, j);
                let m_j = fields.mass[j];
                divergence += m_j * (predicted[i] - predicted[j]).dot(&grad);
                mass_gradient += grad * m_j;
                match fields.kind[j] {
                    ParticleKind::Normal => {
                        scaled_gradient += grad * (m_j / rest_density2);
                        neighbor_terms -= m_j * fields.mass[i] / rest_density2 * grad.norm2();
                    }
                    ParticleKind::Boundary => scaled_gradient += grad * (2.0 * gamma * m_j / rest_density2),
                    ParticleKind::Inactive => {}
                }
            }

            *source = rest_density - density[i] - dt * divergence;
            *diagonal = dt * dt * (neighbor_terms - scaled_gradient.dot(&mass_gradient));
        });

        let mut pressure = particles.write::<Pressure>();
        executor.for_each_mut(&mut pressure[..], |_, pressure| *pressure = 0.0);
    }

    /// Relaxed Jacobi iterations until the average predicted density error
    /// drops below the tolerance, bounded by the iteration limits.
    ///
    /// Ref: [ICS+14] Alg. 1
    fn compute_pressure(&mut self, particles: &ParticleStore, dt: Real) {
        let base = &self.base;
        let settings = &self.settings;
        let pressure_term = &mut self.pressure_term;

        let search = read_search(base.search());
        let (position, velocity, mass, kind, source, diagonal) = (
            particles.read::<Position<N>>(),
            particles.read::<Velocity<N>>(),
            particles.read::<Mass>(),
            particles.read::<Kind>(),
            particles.read::<SourceTerm>(),
            particles.read::<DiagonalElement>(),
        );
        let fields = Fields {
            kernel: base.kernel(),
            search: &**search,
            position: &position,
            velocity: &velocity,
            mass: &mass,
            kind: &kind,
        };
        let (source, diagonal) = (&source[..], &diagonal[..]);
        let executor = base.executor();
        let rest_density = base.parameters().rest_density();
        let boundary_gamma = settings.boundary_gamma();
        let omega = settings.omega;

        pressure_term.clear();
        pressure_term.resize(particles.size(), 0.0);

        let mut iteration = 0;
        let mut error: Real = 0.0;
        while (iteration < settings.min_number_of_iterations || error > settings.max_density_error_allowed)
            && iteration < settings.max_number_of_iterations
        {
            {
                let pressure = particles.read::<Pressure>();
                let mut acceleration = particles.write::<Acceleration<N>>();
                executor.for_each_mut(&mut acceleration[..], |i, acceleration| {
                    if fields.kind[i] == ParticleKind::Normal {
                        *acceleration = pressure_acceleration(&fields, i, &pressure, rest_density, boundary_gamma);
                    }
                });
            }

            {
                let acceleration = particles.read::<Acceleration<N>>();
                executor.for_each_mut(&mut pressure_term[..], |i, ap| {
                    if fields.kind[i] != ParticleKind::Normal {
                        *ap = 0.0;
                        return;
                    }
                    let mut sum = 0.0;
                    for j in fields.neighbors(i) {
                        let grad = fields.gradient(i, j);
                        sum += match fields.kind[j] {
                            ParticleKind::Normal => fields.mass[j] * (acceleration[i] - acceleration[j]).dot(&grad),
                            _ => fields.mass[j] * acceleration[i].dot(&grad),
                        };
                    }
                    *ap = dt * dt * sum;
                });
            }

            let ap = &pressure_term[..];
            let mut pressure = particles.write::<Pressure>();
            executor.for_each_mut(&mut pressure[..], |i, pressure| {
                if fields.kind[i] != ParticleKind::Normal {
                    return;
                }
                if diagonal[i].abs() > Real::EPSILON {
                    *pressure = (*pressure + omega * (source[i] - ap[i]) / diagonal[i]).max(0.0);
                } else {
                    *pressure = 0.0;
                }
            });

            // particles without pressure are not compressed
            let pressure = &pressure[..];
            let (sum, count) = executor.reduce(
                particles.size(),
                (0.0, 0usize),
                |i| {
                    if fields.kind[i] != ParticleKind::Normal || diagonal[i].abs() <= Real::EPSILON {
                        (0.0, 0)
                    } else if pressure[i].abs() <= Real::EPSILON {
                        (0.0, 1)
                    } else {
                        ((source[i] - ap[i]).abs(), 1)
                    }
                },
                |a: (Real, usize), b: (Real, usize)| (a.0 + b.0, a.1 + b.1),
            );
            error = if count > 0 { sum / count as Real } else { 0.0 };
            iteration += 1;
        }

        self.last_iteration_count = iteration;
        self.last_predicted_density_error = error;
        if self.iteration_cap_reached() {
            log::warn!(
                "pressure solve hit the cap of {} iterations, density error {} (allowed {})",
                iteration,
                error,
                self.settings.max_density_error_allowed
            );
        } else {
            log::debug!("pressure solve: {} iterations, density error {}", iteration, error);
        }
    }

    /// Pressure acceleration of the final pressure field plus non-pressure acceleration.
    fn compute_acceleration(&self, particles: &ParticleStore) {
        let search = read_search(self.base.search());
        let (position, velocity, mass, kind, pressure, non_pressure) = (
            particles.read::<Position<N>>(),
            particles.read::<Velocity<N>>(),
            particles.read::<Mass>(),
            particles.read::<Kind>(),
            particles.read::<Pressure>(),
            particles.read::<NonPressureAcceleration<N>>(),
        );
        let fields = Fields {
            kernel: self.base.kernel(),
            search: &**search,
            position: &position,
            velocity: &velocity,
            mass: &mass,
            kind: &kind,
        };
        let (pressure, non_pressure) = (&pressure[..], &non_pressure[..]);
        let rest_density = self.base.parameters().rest_density();
        let boundary_gamma = self.settings.boundary_gamma();

        let mut acceleration = particles.write::<Acceleration<N>>();
        self.base
            .executor()
            .for_each_mut(&mut acceleration[..], |i, acceleration| {
                if fields.kind[i] == ParticleKind::Normal {
                    *acceleration = non_pressure[i]
                        + pressure_acceleration(&fields, i, pressure, rest_density, boundary_gamma);
                }
            });
    }

    pub fn create_compatibility_report(&self, particles: Option<&ParticleStore>, report: &mut CompatibilityReport) {
        report.begin_scope(self.name());
        self.base.report(particles, report);
        if let Some(particles) = particles {
            super::require::<NonPressureAcceleration<N>>(particles, report);
            super::require::<PredictedVelocity<N>>(particles, report);
            super::require::<SourceTerm>(particles, report);
            super::require::<DiagonalElement>(particles, report);
        }
        if self.settings.max_number_of_iterations < self.settings.min_number_of_iterations {
            report.add_issue("Max iterations are less than min number of iterations.");
        }
        if self.settings.max_density_error_allowed <= 0.0 {
            report.add_issue("MaxDensityErrorAllowed is smaller or equal to zero.");
        }
        if self.settings.omega <= 0.0 || self.settings.omega > 1.0 {
            report.add_issue("Omega must lie in (0, 1].");
        }
        report.end_scope();
    }
}

/// Ref: [ICS+14] Eq. 13, boundary neighbors mirror the own pressure.
fn pressure_acceleration<N: Dimension>(
    fields: &Fields<N>,
    i: usize,
    pressure: &[Real],
    rest_density: Real,
    boundary_gamma: Real,
) -> VectorN<N> {
    let rest_density2 = rest_density * rest_density;
    let own = pressure[i] / rest_density2;
    let mut sum = VectorN::<N>::default();
    for j in fields.neighbors(i) {
        let weight = match fields.kind[j] {
            ParticleKind::Boundary => boundary_gamma * fields.mass[j] * 2.0 * own,
            _ => fields.mass[j] * (own + pressure[j] / rest_density2),
        };
        sum -= fields.gradient(i, j) * weight;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{vec2, vec3};
    use crate::sph::kernel::CubicSpline;
    use crate::sph::neighbor::BruteForce;
    use crate::sph::grid::HashedGrid;
    use typenum::{U2, U3};

    fn approx_eq(a: Real, b: Real, eps: Real) {
        let equal = (a - b).abs() <= eps;
        assert!(equal, "{:#?} approx eq {:#?} (eps = {:#?})", a, b, eps);
    }

    fn solver<N: Dimension>(parameters: SimulationParameters, settings: IisphSettings) -> Iisph<N> {
        Iisph::new(
            parameters,
            settings,
            Box::new(CubicSpline::<N>::new(parameters.kernel_support())),
            Box::new(BruteForce::<N>::new(parameters.search_radius())),
            ParallelExecutor::Sequential,
        )
    }

    fn store<N: Dimension>(positions: &[VectorN<N>]) -> ParticleStore {
        let mut particles = ParticleStore::new();
        Iisph::<N>::adapt_store(&mut particles);
        particles
            .add_particles(positions.len())
            .with::<Position<N>>(positions)
            .with::<Mass>(&vec![1.0; positions.len()]);
        particles
    }

    fn timepoint(dt: Real) -> Timepoint {
        Timepoint {
            desired_time_step: dt,
            ..Timepoint::default()
        }
    }

    #[test]
    fn isolated_particles_at_rest_converge_immediately() {
        let positions: Vec<_> = (0..4).map(|i| vec2(5.0 * i as Real, 0.0)).collect();
        let mut particles = store(&positions);
        let rest_density = CubicSpline::<U2>::new(2.0).w(0.0);
        let mut iisph = solver::<U2>(SimulationParameters::new(1.0, rest_density, 0.0), IisphSettings::default());
        iisph.execute_step(&mut particles, &timepoint(0.01));

        assert_eq!(iisph.last_iteration_count(), 2);
        assert_eq!(iisph.last_predicted_density_error(), 0.0);
        for i in 0..4 {
            approx_eq(particles.get::<Density>(i), rest_density, 1e-6);
            approx_eq(particles.get::<SourceTerm>(i), 0.0, 1e-6);
            assert_eq!(particles.get::<Pressure>(i), 0.0);
            assert_eq!(particles.get::<Position<U2>>(i), positions[i]);
        }
    }

    #[test]
    fn cap_counts_even_when_converged() {
        let positions: Vec<_> = (0..4).map(|i| vec2(5.0 * i as Real, 0.0)).collect();
        let mut particles = store(&positions);
        let rest_density = CubicSpline::<U2>::new(2.0).w(0.0);
        let mut settings = IisphSettings::default();
        let _ = settings.set_min_number_of_iterations(4);
        let _ = settings.set_max_number_of_iterations(4);
        let mut iisph = solver::<U2>(SimulationParameters::new(1.0, rest_density, 0.0), settings);
        iisph.execute_step(&mut particles, &timepoint(0.01));

        assert_eq!(iisph.last_iteration_count(), 4);
        assert_eq!(iisph.last_predicted_density_error(), 0.0);
        assert!(iisph.iteration_cap_reached());

        let _ = iisph.settings_mut().set_max_number_of_iterations(100);
        iisph.execute_step(&mut particles, &timepoint(0.01));
        assert_eq!(iisph.last_iteration_count(), 4);
        assert!(!iisph.iteration_cap_reached());
    }

    #[test]
    fn free_fall() {
        let mut particles = store(&[vec3(0.0, 0.0, 0.0)]);
        let mut iisph = solver::<U3>(SimulationParameters::new(1.0, 1.0, 9.81), IisphSettings::default());
        iisph.execute_step(&mut particles, &timepoint(0.01));

        let acceleration = particles.get::<Acceleration<U3>>(0);
        approx_eq(acceleration[1], -9.81, 1e-5);
        approx_eq(particles.get::<PredictedVelocity<U3>>(0)[1], -0.0981, 1e-6);
        approx_eq(particles.get::<Velocity<U3>>(0)[1], -0.0981, 1e-6);
    }

    #[test]
    fn compressed_pair_builds_pressure() {
        let mut particles = store(&[vec2(0.0, 0.0), vec2(0.5, 0.0)]);
        let mut iisph = solver::<U2>(SimulationParameters::new(1.0, 0.1, 0.0), IisphSettings::default());
        iisph.execute_step(&mut particles, &timepoint(0.001));

        assert!(particles.get::<SourceTerm>(0) < 0.0);
        assert!(particles.get::<DiagonalElement>(0) < 0.0);
        assert!(particles.get::<Pressure>(0) > 0.0);
        let left = particles.get::<Acceleration<U2>>(0);
        let right = particles.get::<Acceleration<U2>>(1);
        assert!(left[0] < 0.0 && right[0] > 0.0);
        approx_eq(left[0], -right[0], 1e-2 * left[0].abs());

        let iterations = iisph.last_iteration_count();
        assert!(iterations >= 2 && iterations <= 100, "{}", iterations);
    }

    #[test]
    fn iteration_cap() {
        let positions: Vec<_> = (0..36).map(|i| vec2((i % 6) as Real * 0.5, (i / 6) as Real * 0.5)).collect();
        let mut particles = store(&positions);
        let mut settings = IisphSettings::default();
        let _ = settings.set_max_density_error_allowed(1e-12);
        let _ = settings.set_max_number_of_iterations(3);
        let mut iisph = solver::<U2>(SimulationParameters::new(1.0, 0.5, 9.81), settings);
        iisph.execute_step(&mut particles, &timepoint(0.001));

        assert_eq!(iisph.last_iteration_count(), 3);
        assert!(iisph.iteration_cap_reached());
        assert!(iisph.last_predicted_density_error() > 0.0);
        for i in 0..particles.size() {
            assert!(particles.get::<Density>(i) >= 0.0);
            assert!(particles.get::<Pressure>(i) >= 0.0);
            assert!(particles.get::<Position<U2>>(i)[0].is_finite());
        }
    }

    #[test]
    fn boundary_holds_fluid() {
        let mut positions: Vec<_> = (0..8).map(|i| vec2(i as Real * 0.5, 0.0)).collect();
        positions.extend((0..8).map(|i| vec2(i as Real * 0.5, 0.5)));
        let mut particles = store(&positions);
        for i in 0..8 {
            particles.set::<Kind>(i, ParticleKind::Boundary);
        }
        let mut iisph = Iisph::<U2>::new(
            SimulationParameters::new(0.5, 3.0, 9.81),
            IisphSettings::default(),
            Box::new(CubicSpline::new(1.0)),
            Box::new(HashedGrid::new(1.0)),
            ParallelExecutor::Rayon,
        );
        iisph.execute_step(&mut particles, &timepoint(0.001));

        for i in 0..8 {
            assert_eq!(particles.get::<Position<U2>>(i), positions[i]);
            assert_eq!(particles.get::<Acceleration<U2>>(i), vec2(0.0, 0.0));
        }
        // the floor pushes back against gravity
        assert!(particles.get::<Pressure>(11) > 0.0);
        assert!(particles.get::<Acceleration<U2>>(11)[1] > -9.81);
    }

    #[test]
    fn single_layer_gamma() {
        let mut settings = IisphSettings::default();
        assert_eq!(settings.boundary_gamma(), 0.7);
        assert!(settings.set_single_layer_boundary(true).contains(Dirty::SETTINGS));
        assert_eq!(settings.boundary_gamma(), 1.1);
    }

    #[test]
    fn report() {
        let mut settings = IisphSettings::default();
        let _ = settings.set_min_number_of_iterations(10) | settings.set_max_number_of_iterations(5);
        let iisph = solver::<U2>(SimulationParameters::default(), settings);

        let mut particles = ParticleStore::new();
        crate::sph::init::<U2>(&mut particles);
        let mut report = CompatibilityReport::new();
        iisph.create_compatibility_report(Some(&particles), &mut report);
        let messages: Vec<_> = report.issues().iter().map(|issue| issue.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Particles are missing the NonPressureAcceleration attribute.",
                "Particles are missing the PredictedVelocity attribute.",
                "Particles are missing the SourceTerm attribute.",
                "Particles are missing the DiagonalElement attribute.",
                "Max iterations are less than min number of iterations.",
            ]
        );
        assert_eq!(report.issues()[0].scope, "IISPHFluidSolver");
    }
}
