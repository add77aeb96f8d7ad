//! Timestep generation
//!
//! A generator is a pure function of the current particle state. The CFL
//! variant bounds the distance a particle may travel in one step by a
//! fraction of the particle size.

use typenum::{U2, U3};

use crate::math::{Dimension, Real};
use crate::parallel::ParallelExecutor;
use crate::particle::ParticleStore;
use crate::report::CompatibilityReport;
use crate::settings::{Dirty, SimulationParameters};
use crate::sph::property::{Acceleration, Kind, ParticleKind, Velocity};

/// Lower bound for every generated timestep.
pub const MIN_ALLOWED_TIMESTEP: Real = 1e-6;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConstantSettings {
    timestep: Real,
}

impl Default for ConstantSettings {
    fn default() -> Self {
        ConstantSettings { timestep: 0.001 }
    }
}

settings_accessors!(ConstantSettings, Dirty::SETTINGS, {
    timestep / set_timestep: Real,
});

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DynamicCflSettings {
    min_timestep: Real,
    max_timestep: Real,
    /// Safety factor on the velocity bound, in `(0, 1)`.
    lambda_v: Real,
    /// Safety factor on the acceleration bound, in `(0, 1)`.
    lambda_a: Real,
}

impl Default for DynamicCflSettings {
    fn default() -> Self {
        DynamicCflSettings {
            min_timestep: 0.0001,
            max_timestep: 0.02,
            lambda_v: 0.8,
            lambda_a: 0.8,
        }
    }
}

settings_accessors!(DynamicCflSettings, Dirty::SETTINGS, {
    min_timestep / set_min_timestep: Real,
    max_timestep / set_max_timestep: Real,
    lambda_v / set_lambda_v: Real,
    lambda_a / set_lambda_a: Real,
});

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TimestepGenerator {
    Constant(ConstantSettings),
    DynamicCfl(DynamicCflSettings),
}

impl Default for TimestepGenerator {
    fn default() -> Self {
        TimestepGenerator::DynamicCfl(DynamicCflSettings::default())
    }
}

impl TimestepGenerator {
    pub fn name(&self) -> &'static str {
        match self {
            TimestepGenerator::Constant(_) => "ConstantTimestepGenerator",
            TimestepGenerator::DynamicCfl(_) => "DynamicCflTimestepGenerator",
        }
    }

    pub fn generate_next_timestep(
        &self,
        particles: &ParticleStore,
        parameters: &SimulationParameters,
        executor: &ParallelExecutor,
    ) -> Real {
        match self {
            TimestepGenerator::Constant(settings) => settings.timestep,
            TimestepGenerator::DynamicCfl(settings) => {
                let (max_velocity, max_acceleration) = max_velocity_and_acceleration(particles, executor);
                let timestep = settings.cfl_timestep(parameters.particle_size(), max_velocity, max_acceleration);
                log::trace!(
                    "cfl: max velocity {}, max acceleration {} -> {}",
                    max_velocity,
                    max_acceleration,
                    timestep
                );
                timestep
            }
        }
    }

    pub fn create_compatibility_report(
        &self,
        particles: Option<&ParticleStore>,
        parameters: &SimulationParameters,
        report: &mut CompatibilityReport,
    ) {
        report.begin_scope(self.name());
        match self {
            TimestepGenerator::Constant(settings) => {
                if settings.timestep <= 0.0 {
                    report.add_issue("Timestep is smaller or equal to zero.");
                }
            }
            TimestepGenerator::DynamicCfl(settings) => {
                match particles {
                    None => report.add_issue("ParticleCollection is null."),
                    Some(particles) => {
                        if !has_movement::<U2>(particles) && !has_movement::<U3>(particles) {
                            report.add_issue("Particles are missing the Velocity or Acceleration attribute.");
                        }
                        crate::sph::require::<Kind>(particles, report);
                    }
                }
                if parameters.particle_size() <= 0.0 {
                    report.add_issue("Particle size is smaller or equal to zero.");
                }
                if settings.min_timestep <= 0.0 || settings.min_timestep > settings.max_timestep {
                    report.add_issue("Timestep range is empty or not positive.");
                }
                let valid = |lambda: Real| lambda > 0.0 && lambda < 1.0;
                if !valid(settings.lambda_v) || !valid(settings.lambda_a) {
                    report.add_issue("Lambda factors must lie between zero and one.");
                }
            }
        }
        report.end_scope();
    }
}

impl DynamicCflSettings {
    /// Largest timestep satisfying the CFL bound, clamped to the configured range.
    pub fn cfl_timestep(&self, particle_size: Real, max_velocity: Real, max_acceleration: Real) -> Real {
        let dt_v = if max_velocity > 0.0 {
            particle_size / max_velocity * self.lambda_v
        } else {
            self.max_timestep
        };
        let dt_a = if max_acceleration > 0.0 {
            (particle_size / max_acceleration).sqrt() * self.lambda_a
        } else {
            self.max_timestep
        };

        let lower = self.min_timestep.max(MIN_ALLOWED_TIMESTEP);
        let upper = self.max_timestep.max(lower);
        dt_v.min(dt_a).max(lower).min(upper)
    }
}

fn has_movement<N: Dimension>(particles: &ParticleStore) -> bool {
    particles.is_attribute_present::<Velocity<N>>() && particles.is_attribute_present::<Acceleration<N>>()
}

/// Largest velocity and acceleration norm over all non-inactive particles.
///
/// Looks at the 3D columns first, then the 2D ones.
pub fn max_velocity_and_acceleration(particles: &ParticleStore, executor: &ParallelExecutor) -> (Real, Real) {
    if has_movement::<U3>(particles) {
        max_norms::<U3>(particles, executor)
    } else {
        max_norms::<U2>(particles, executor)
    }
}

fn max_norms<N: Dimension>(particles: &ParticleStore, executor: &ParallelExecutor) -> (Real, Real) {
    let velocity = particles.read::<Velocity<N>>();
    let acceleration = particles.read::<Acceleration<N>>();
    let kind = particles.read::<Kind>();
    let (velocity, acceleration, kind) = (&velocity[..], &acceleration[..], &kind[..]);

    executor.reduce(
        particles.size(),
        (0.0, 0.0),
        |i| {
            if kind[i] == ParticleKind::Inactive {
                (0.0, 0.0)
            } else {
                (velocity[i].norm(), acceleration[i].norm())
            }
        },
        |a: (Real, Real), b: (Real, Real)| (a.0.max(b.0), a.1.max(b.1)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{vec2, vec3};
    use crate::sph::neighbor::tests::store_from_positions;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn approx_eq(a: Real, b: Real, eps: Real) {
        let equal = (a - b).abs() <= eps;
        assert!(equal, "{:#?} approx eq {:#?} (eps = {:#?})", a, b, eps);
    }

    #[test]
    fn constant() {
        let particles = ParticleStore::new();
        let generator = TimestepGenerator::Constant(ConstantSettings::default());
        let dt = generator.generate_next_timestep(&particles, &SimulationParameters::default(), &ParallelExecutor::Sequential);
        assert_eq!(dt, 0.001);
    }

    #[test]
    fn cfl_formula() {
        let settings = DynamicCflSettings::default();
        // velocity bound: 1 / 100 * 0.8
        approx_eq(settings.cfl_timestep(1.0, 100.0, 0.0), 0.008, 1e-7);
        // acceleration bound: sqrt(1 / 10000) * 0.8
        approx_eq(settings.cfl_timestep(1.0, 0.0, 10000.0), 0.008, 1e-7);
        // at rest
        assert_eq!(settings.cfl_timestep(1.0, 0.0, 0.0), settings.max_timestep());
        // violent
        assert_eq!(settings.cfl_timestep(1.0, 1e9, 1e12), settings.min_timestep());
    }

    #[test]
    fn floor_is_respected() {
        let mut settings = DynamicCflSettings::default();
        assert!(!settings.set_min_timestep(0.0).is_clean());
        assert_eq!(settings.cfl_timestep(1.0, 1e12, 0.0), MIN_ALLOWED_TIMESTEP);
    }

    #[test]
    fn stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let settings = DynamicCflSettings::default();
        for _ in 0..1000 {
            let velocity = rng.gen_range(0.0..1000.0);
            let acceleration = rng.gen_range(0.0..1e6);
            let dt = settings.cfl_timestep(rng.gen_range(0.01..2.0), velocity, acceleration);
            assert!(dt >= settings.min_timestep() && dt <= settings.max_timestep(), "{}", dt);
        }
    }

    #[test]
    fn reduction_skips_inactive() {
        let mut particles = store_from_positions(&[vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(2.0, 0.0)]);
        particles.set::<Velocity<U2>>(0, vec2(3.0, 4.0));
        particles.set::<Velocity<U2>>(1, vec2(0.0, 100.0));
        particles.set::<Kind>(1, ParticleKind::Inactive);
        particles.set::<Acceleration<U2>>(2, vec2(0.0, -9.0));

        for executor in &[ParallelExecutor::Sequential, ParallelExecutor::Rayon] {
            let (v, a) = max_velocity_and_acceleration(&particles, executor);
            approx_eq(v, 5.0, 1e-6);
            approx_eq(a, 9.0, 1e-6);
        }

        let generator = TimestepGenerator::default();
        let dt = generator.generate_next_timestep(&particles, &SimulationParameters::default(), &ParallelExecutor::Sequential);
        // min(1 / 5 * 0.8, sqrt(1 / 9) * 0.8) clamped to 0.02
        assert_eq!(dt, 0.02);
    }

    #[test]
    fn reduction_prefers_3d() {
        let mut particles = store_from_positions(&[vec3(0.0, 0.0, 0.0)]);
        particles.set::<Velocity<U3>>(0, vec3(0.0, 0.0, 2.0));
        let (v, _) = max_velocity_and_acceleration(&particles, &ParallelExecutor::Sequential);
        approx_eq(v, 2.0, 1e-6);
    }

    #[test]
    fn report() {
        let parameters = SimulationParameters::default();

        let mut report = CompatibilityReport::new();
        TimestepGenerator::Constant(ConstantSettings { timestep: 0.0 })
            .create_compatibility_report(None, &parameters, &mut report);
        assert_eq!(report.issues().len(), 1);

        let mut report = CompatibilityReport::new();
        TimestepGenerator::default().create_compatibility_report(None, &parameters, &mut report);
        assert_eq!(report.issues()[0].message, "ParticleCollection is null.");

        let particles = store_from_positions(&[vec2(0.0, 0.0)]);
        let mut report = CompatibilityReport::new();
        TimestepGenerator::default().create_compatibility_report(Some(&particles), &parameters, &mut report);
        assert!(!report.has_issues());

        let mut report = CompatibilityReport::new();
        TimestepGenerator::default().create_compatibility_report(
            Some(&ParticleStore::new()),
            &SimulationParameters::new(0.0, 1.0, 9.81),
            &mut report,
        );
        assert_eq!(report.issues().len(), 3);
    }
}
