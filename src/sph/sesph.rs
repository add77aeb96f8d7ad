//! State Equation SPH (SESPH)
//!
//! Explicit pressure from a linear equation of state, clamped at zero.
//!
//! Ref: [MDM03] Sec. 3.2

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
pub struct SesphSettings {
    stiffness: Real,
    viscosity: Real,
}

impl Default for SesphSettings {
    fn default() -> Self {
        SesphSettings {
            stiffness: 100000.0,
            viscosity: 5.0,
        }
    }
}

settings_accessors!(SesphSettings, Dirty::SETTINGS, {
    stiffness / set_stiffness: Real,
    viscosity / set_viscosity: Real,
});

impl SesphSettings {
    pub fn new(stiffness: Real, viscosity: Real) -> Self {
        SesphSettings { stiffness, viscosity }
    }
}

pub struct Sesph<N: Dimension> {
    base: SolverBase<N>,
    settings: SesphSettings,
}

impl<N: Dimension> Sesph<N> {
    pub fn new(
        parameters: SimulationParameters,
        settings: SesphSettings,
        kernel: Box<dyn Kernel<N>>,
        search: Box<dyn NeighborhoodSearch<N>>,
        executor: ParallelExecutor,
    ) -> Self {
        Sesph {
            base: SolverBase::new(parameters, kernel, search, executor),
            settings,
        }
    }

    pub fn name(&self) -> &'static str {
        if N::DIM == 3 {
            "SESPHFluidSolver3D"
        } else {
            "SESPHFluidSolver"
        }
    }

    pub fn base(&self) -> &SolverBase<N> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut SolverBase<N> {
        &mut self.base
    }

    pub fn settings(&self) -> &SesphSettings {
        &self.settings
    }

    /// Setters return the `Dirty` marker to pass to `initialize`.
    pub fn settings_mut(&mut self) -> &mut SesphSettings {
        &mut self.settings
    }

    pub fn initialize(&mut self, dirty: Dirty) {
        self.base.initialize(dirty);
    }

    pub fn adapt_store(particles: &mut ParticleStore) {
        super::init::<N>(particles);
    }

    pub fn create_neighborhood_interface(&self) -> NeighborhoodInterface<N> {
        self.base.create_neighborhood_interface()
    }

    pub fn execute_step(&mut self, particles: &mut ParticleStore, timepoint: &Timepoint) {
        let dt = self.base.begin_step(particles, timepoint);
        self.compute_density_and_pressure(particles);
        self.compute_acceleration(particles);
        self.base.integrate(particles, dt);
        self.base.end_step();
    }

    fn compute_density_and_pressure(&self, particles: &ParticleStore) {
        let search = read_search(self.base.search());
        let (position, velocity, mass, kind, mut density, mut pressure) = (
            particles.read::<Position<N>>(),
            particles.read::<Velocity<N>>(),
            particles.read::<Mass>(),
            particles.read::<Kind>(),
            particles.write::<Density>(),
            particles.write::<Pressure>(),
        );
        let fields = Fields {
            kernel: self.base.kernel(),
            search: &**search,
            position: &position,
            velocity: &velocity,
            mass: &mass,
            kind: &kind,
        };

        let stiffness = self.settings.stiffness;
        let rest_density = self.base.parameters().rest_density();
        self.base
            .executor()
            .for_each_zip_mut(&mut density[..], &mut pressure[..], |i, density, pressure| {
                if fields.kind[i] != ParticleKind::Normal {
                    return;
                }
                *density = fields.density(i);
                *pressure = (stiffness * (*density / rest_density - 1.0)).max(0.0);
            });
    }

    fn compute_acceleration(&self, particles: &ParticleStore) {
        let search = read_search(self.base.search());
        let (position, velocity, mass, kind, density, pressure, mut acceleration) = (
            particles.read::<Position<N>>(),
            particles.read::<Velocity<N>>(),
            particles.read::<Mass>(),
            particles.read::<Kind>(),
            particles.read::<Density>(),
            particles.read::<Pressure>(),
            particles.write::<Acceleration<N>>(),
        );
        let fields = Fields {
            kernel: self.base.kernel(),
            search: &**search,
            position: &position,
            velocity: &velocity,
            mass: &mass,
            kind: &kind,
        };
        let (density, pressure) = (&density[..], &pressure[..]);

        let parameters = self.base.parameters();
        let viscosity = self.settings.viscosity;
        self.base
            .executor()
            .for_each_mut(&mut acceleration[..], |i, acceleration| {
                if fields.kind[i] != ParticleKind::Normal {
                    return;
                }
                let non_pressure = fields.non_pressure_acceleration(i, density, parameters, viscosity);
                *acceleration = non_pressure + pressure_acceleration(&fields, i, density, pressure);
            });
    }

    pub fn create_compatibility_report(&self, particles: Option<&ParticleStore>, report: &mut CompatibilityReport) {
        report.begin_scope(self.name());
        self.base.report(particles, report);
        if self.settings.stiffness <= 0.0 {
            report.add_issue("Stiffness is smaller or equal to zero.");
        }
        if self.settings.viscosity < 0.0 {
            report.add_issue("Viscosity is negative.");
        }
        report.end_scope();
    }
}

/// Symmetric pressure gradient. Boundary neighbors mirror the pressure of
/// the particle itself.
///
/// Ref: [MDM03] Eq. 10, symmetrized as in [ICS+14] Eq. 5
fn pressure_acceleration<N: Dimension>(fields: &Fields<N>, i: usize, density: &[Real], pressure: &[Real]) -> VectorN<N> {
    let over_density2 = |j: usize| {
        if density[j] == 0.0 {
            0.0
        } else {
            pressure[j] / (density[j] * density[j])
        }
    };

    let own = over_density2(i);
    let mut sum = VectorN::<N>::default();
    for j in fields.neighbors(i) {
        let weight = match fields.kind[j] {
            ParticleKind::Boundary => fields.mass[i] * 2.0 * own,
            _ => fields.mass[j] * (own + over_density2(j)),
        };
        sum -= fields.gradient(i, j) * weight;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vec2;
    use crate::sph::kernel::CubicSpline;
    use crate::sph::neighbor::tests::store_from_positions;
    use crate::sph::neighbor::BruteForce;
    use crate::sph::solver::SolverState;
    use typenum::U2;

    fn approx_eq(a: Real, b: Real, eps: Real) {
        let equal = (a - b).abs() <= eps;
        assert!(equal, "{:#?} approx eq {:#?} (eps = {:#?})", a, b, eps);
    }

    fn solver(parameters: SimulationParameters, settings: SesphSettings) -> Sesph<U2> {
        Sesph::new(
            parameters,
            settings,
            Box::new(CubicSpline::new(parameters.kernel_support())),
            Box::new(BruteForce::new(parameters.search_radius())),
            ParallelExecutor::Sequential,
        )
    }

    fn timepoint(dt: Real) -> Timepoint {
        Timepoint {
            desired_time_step: dt,
            ..Timepoint::default()
        }
    }

    fn unit_mass(particles: &mut ParticleStore) {
        for m in particles.write::<Mass>().iter_mut() {
            *m = 1.0;
        }
    }

    #[test]
    fn single_particle_falls() {
        let mut particles = store_from_positions(&[vec2(0.0, 0.0)]);
        unit_mass(&mut particles);
        let mut sesph = solver(SimulationParameters::new(1.0, 1000.0, 9.81), SesphSettings::default());
        sesph.execute_step(&mut particles, &timepoint(0.01));

        let kernel = CubicSpline::<U2>::new(2.0);
        approx_eq(particles.get::<Density>(0), kernel.w(0.0), 1e-6);
        assert_eq!(particles.get::<Pressure>(0), 0.0);
        let acceleration = particles.get::<Acceleration<U2>>(0);
        approx_eq(acceleration[0], 0.0, 1e-6);
        approx_eq(acceleration[1], -9.81, 1e-5);
        approx_eq(particles.get::<Velocity<U2>>(0)[1], -0.0981, 1e-6);
        approx_eq(particles.get::<Position<U2>>(0)[1], -0.000981, 1e-7);
        assert_eq!(sesph.base().state(), SolverState::Initialized);
    }

    #[test]
    fn compressed_pair_repels() {
        let mut particles = store_from_positions(&[vec2(0.0, 0.0), vec2(0.5, 0.0)]);
        unit_mass(&mut particles);
        let mut sesph = solver(SimulationParameters::new(1.0, 0.1, 0.0), SesphSettings::new(1000.0, 0.0));
        sesph.execute_step(&mut particles, &timepoint(0.001));

        assert!(particles.get::<Pressure>(0) > 0.0);
        let left = particles.get::<Acceleration<U2>>(0);
        let right = particles.get::<Acceleration<U2>>(1);
        assert!(left[0] < 0.0 && right[0] > 0.0);
        approx_eq(left[0], -right[0], 1e-3);
        approx_eq(left[1], 0.0, 1e-6);
    }

    #[test]
    fn boundary_mirrors_pressure() {
        let mut particles = store_from_positions(&[vec2(0.0, 0.0), vec2(0.0, -0.5)]);
        unit_mass(&mut particles);
        particles.set::<Kind>(1, ParticleKind::Boundary);
        let mut sesph = solver(SimulationParameters::new(1.0, 0.1, 0.0), SesphSettings::new(1000.0, 0.0));
        sesph.execute_step(&mut particles, &timepoint(0.001));

        // fluid particle pushed away, boundary untouched
        assert!(particles.get::<Acceleration<U2>>(0)[1] > 0.0);
        assert_eq!(particles.get::<Position<U2>>(1), vec2(0.0, -0.5));
        assert_eq!(particles.get::<Density>(1), 0.0);
    }

    #[test]
    fn inactive_particles_are_ignored() {
        let mut particles = store_from_positions(&[vec2(0.0, 0.0), vec2(0.3, 0.0)]);
        unit_mass(&mut particles);
        particles.set::<Kind>(1, ParticleKind::Inactive);
        let mut sesph = solver(SimulationParameters::new(1.0, 1000.0, 1.0), SesphSettings::default());
        sesph.execute_step(&mut particles, &timepoint(0.01));

        approx_eq(particles.get::<Density>(0), CubicSpline::<U2>::new(2.0).w(0.0), 1e-6);
        assert_eq!(particles.get::<Position<U2>>(1), vec2(0.3, 0.0));
        assert_eq!(particles.get::<Velocity<U2>>(1), vec2(0.0, 0.0));
    }

    #[test]
    fn viscosity_damps_relative_motion() {
        let mut particles = store_from_positions(&[vec2(0.0, 0.0), vec2(0.5, 0.0)]);
        unit_mass(&mut particles);
        particles.set::<Velocity<U2>>(0, vec2(1.0, 0.0));
        particles.set::<Velocity<U2>>(1, vec2(-1.0, 0.0));
        // pressure stays zero with a huge rest density
        let mut sesph = solver(SimulationParameters::new(1.0, 1e6, 0.0), SesphSettings::new(1000.0, 1.0));
        sesph.execute_step(&mut particles, &timepoint(0.001));

        assert_eq!(particles.get::<Pressure>(0), 0.0);
        assert!(particles.get::<Acceleration<U2>>(0)[0] < 0.0);
        assert!(particles.get::<Acceleration<U2>>(1)[0] > 0.0);
    }

    #[test]
    fn settings_mark_dirty() {
        let mut sesph = solver(SimulationParameters::default(), SesphSettings::default());
        let dirty = sesph.settings_mut().set_stiffness(50.0) | sesph.settings_mut().set_viscosity(5.0);
        assert!(dirty.contains(Dirty::SETTINGS));
        sesph.initialize(dirty);
        assert_eq!(sesph.settings().stiffness(), 50.0);
    }

    #[test]
    fn report() {
        let particles = ParticleStore::new();
        let sesph = solver(SimulationParameters::new(0.0, 1.0, 9.81), SesphSettings::new(0.0, 5.0));
        let mut report = CompatibilityReport::new();
        sesph.create_compatibility_report(Some(&particles), &mut report);

        let messages: Vec<_> = report.issues().iter().map(|issue| issue.message.as_str()).collect();
        assert!(messages.contains(&"Particles are missing the Position attribute."));
        assert!(messages.contains(&"Particle size is smaller or equal to zero."));
        assert!(messages.contains(&"Stiffness is smaller or equal to zero."));
        assert!(messages.contains(&"Search radius is smaller or equal to zero."));
        assert!(messages.contains(&"Kernel support radius is smaller or equal to zero!"));
        assert!(report
            .issues()
            .iter()
            .any(|issue| issue.scope == "SESPHFluidSolver -> CubicSpline"));
    }
}
