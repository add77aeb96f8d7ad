//! Fluid solvers
//!
//! `SolverBase` holds what every SPH solver needs: parameters, the kernel,
//! the neighborhood search and the executor. `FluidSolver` is the closed set
//! of solvers a simulation can run, dispatched by `match`.

use std::sync::PoisonError;
use typenum::{U2, U3};

use super::compressed::Compressed;
use super::grid::HashedGrid;
use super::iisph::{Iisph, IisphSettings};
use super::kernel::{CubicSpline, Kernel};
use super::neighbor::{self, BruteForce, NeighborhoodInterface, NeighborhoodSearch, SharedSearch};
use super::property::*;
use super::sesph::{Sesph, SesphSettings};
use crate::math::{gravity, Dimension, Real, VectorN};
use crate::parallel::ParallelExecutor;
use crate::particle::ParticleStore;
use crate::report::CompatibilityReport;
use crate::settings::{Dirty, SimulationParameters};

/// Time of a simulation step.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Timepoint {
    pub timestep_number: u64,
    pub simulation_time: Real,
    /// Timestep proposed by the timestep generator.
    pub desired_time_step: Real,
    /// Timestep the solver advanced by.
    pub actual_time_step: Real,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolverState {
    Uninitialized,
    Initialized,
    Stepping,
}

/// Neighborhood search implementation backing a solver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SearchKind {
    BruteForce,
    Hashed,
    Compressed,
}

impl Default for SearchKind {
    fn default() -> Self {
        SearchKind::Hashed
    }
}

impl SearchKind {
    pub fn create<N: Dimension>(self, search_radius: Real) -> Box<dyn NeighborhoodSearch<N>> {
        match self {
            SearchKind::BruteForce => Box::new(BruteForce::<N>::new(search_radius)),
            SearchKind::Hashed => Box::new(HashedGrid::<N>::new(search_radius)),
            SearchKind::Compressed => Box::new(Compressed::<N>::new(search_radius)),
        }
    }
}

/// State shared by all SPH solvers.
pub struct SolverBase<N: Dimension> {
    parameters: SimulationParameters,
    kernel: Box<dyn Kernel<N>>,
    search: SharedSearch<N>,
    executor: ParallelExecutor,
    state: SolverState,
    stale: bool,
}

impl<N: Dimension> SolverBase<N> {
    pub fn new(
        parameters: SimulationParameters,
        mut kernel: Box<dyn Kernel<N>>,
        mut search: Box<dyn NeighborhoodSearch<N>>,
        executor: ParallelExecutor,
    ) -> Self {
        kernel.initialize(parameters.kernel_support());
        search.set_search_radius(parameters.search_radius());
        SolverBase {
            parameters,
            kernel,
            search: neighbor::share(search),
            executor,
            state: SolverState::Uninitialized,
            stale: true,
        }
    }

    pub fn parameters(&self) -> &SimulationParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut SimulationParameters {
        &mut self.parameters
    }

    pub fn kernel(&self) -> &dyn Kernel<N> {
        &*self.kernel
    }

    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    pub fn set_executor(&mut self, executor: ParallelExecutor) {
        self.executor = executor;
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Re-derive everything `dirty` invalidated. The first call derives everything.
    pub fn initialize(&mut self, dirty: Dirty) {
        let dirty = if self.state == SolverState::Uninitialized {
            Dirty::ALL
        } else {
            dirty
        };

        if dirty.contains(Dirty::PARAMETERS) {
            let support = self.parameters.kernel_support();
            self.kernel.initialize(support);
            self.search
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .set_search_radius(self.parameters.search_radius());
            self.stale = true;
            log::info!("kernel support set to {}", support);
        }
        if dirty.contains(Dirty::DATA) {
            self.stale = true;
        }
        self.state = SolverState::Initialized;
    }

    pub(crate) fn ensure_initialized(&mut self) {
        if self.state == SolverState::Uninitialized {
            self.initialize(Dirty::ALL);
        }
    }

    /// Rebuild the neighborhood search if the particles changed since the last build.
    pub fn update_neighbors(&mut self, particles: &ParticleStore) {
        self.ensure_initialized();
        let mut search = self.search.write().unwrap_or_else(PoisonError::into_inner);
        if !self.stale && search.built_generation() == Some(particles.generation()) {
            return;
        }
        search.build(particles);
        search.find_neighbors_for_all(&self.executor);
        self.stale = false;
        log::debug!("{}: neighbors of {} particles", search.name(), particles.size());
    }

    pub(crate) fn begin_step(&mut self, particles: &ParticleStore, timepoint: &Timepoint) -> Real {
        self.update_neighbors(particles);
        assert!(
            timepoint.desired_time_step > 0.0,
            "timestep must be positive, got {}",
            timepoint.desired_time_step
        );
        self.state = SolverState::Stepping;
        timepoint.desired_time_step
    }

    pub(crate) fn end_step(&mut self) {
        self.state = SolverState::Initialized;
    }

    pub fn create_neighborhood_interface(&self) -> NeighborhoodInterface<N> {
        NeighborhoodInterface::new(self.search.clone())
    }

    pub(crate) fn search(&self) -> &SharedSearch<N> {
        &self.search
    }

    /// Checks shared by all solvers; expects the solver scope to be open.
    pub(crate) fn report(&self, particles: Option<&ParticleStore>, report: &mut CompatibilityReport) {
        match particles {
            None => report.add_issue("ParticleCollection is null."),
            Some(particles) => {
                super::require::<Position<N>>(particles, report);
                super::require::<Velocity<N>>(particles, report);
                super::require::<Acceleration<N>>(particles, report);
                super::require::<Mass>(particles, report);
                super::require::<Density>(particles, report);
                super::require::<Pressure>(particles, report);
                super::require::<Kind>(particles, report);
            }
        }
        if self.parameters.particle_size() <= 0.0 {
            report.add_issue("Particle size is smaller or equal to zero.");
        }
        if self.parameters.rest_density() <= 0.0 {
            report.add_issue("Rest density is smaller or equal to zero.");
        }
        neighbor::read_search(&self.search).create_compatibility_report(particles, report);
        self.kernel.create_compatibility_report(report);
    }

    /// Semi-implicit Euler for normal particles.
    pub(crate) fn integrate(&self, particles: &ParticleStore, dt: Real) {
        let (mut position, mut velocity, acceleration, kind) = (
            particles.write::<Position<N>>(),
            particles.write::<Velocity<N>>(),
            particles.read::<Acceleration<N>>(),
            particles.read::<Kind>(),
        );

        self.executor
            .for_each_zip_mut(&mut position[..], &mut velocity[..], |i, x, v| {
                if kind[i] != ParticleKind::Normal {
                    return;
                }
                *v += acceleration[i] * dt;
                *x += *v * dt;
            });
    }
}

/// Column views of one solver pass.
pub(crate) struct Fields<'a, N: Dimension> {
    pub kernel: &'a dyn Kernel<N>,
    pub search: &'a dyn NeighborhoodSearch<N>,
    pub position: &'a [VectorN<N>],
    pub velocity: &'a [VectorN<N>],
    pub mass: &'a [Real],
    pub kind: &'a [ParticleKind],
}

impl<'a, N: Dimension> Fields<'a, N> {
    /// Stored neighbors of `i` which are not inactive.
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + 'a {
        let (search, kind) = (self.search, self.kind);
        search.neighbors(i).filter(move |&j| kind[j] != ParticleKind::Inactive)
    }

    /// `∇W(x_i - x_j)` with respect to `x_i`.
    #[inline]
    pub fn gradient(&self, i: usize, j: usize) -> VectorN<N> {
        self.kernel.gradient(&self.position[j], &self.position[i])
    }

    /// Ref: [MDM03] Eq. 3
    pub fn density(&self, i: usize) -> Real {
        let position = &self.position[i];
        self.neighbors(i)
            .map(|j| self.mass[j] * self.kernel.value(&self.position[j], position))
            .sum()
    }

    /// Gravity and artificial viscosity.
    ///
    /// Neighbors without density take no part in the viscosity sum.
    pub fn non_pressure_acceleration(
        &self,
        i: usize,
        density: &[Real],
        parameters: &SimulationParameters,
        viscosity: Real,
    ) -> VectorN<N> {
        let epsilon = 0.01 * parameters.particle_size() * parameters.particle_size();
        let mut sum = VectorN::<N>::default();
        for j in self.neighbors(i) {
            if density[j] == 0.0 {
                continue;
            }
            let v_ij = self.velocity[i] - self.velocity[j];
            let x_ij = self.position[i] - self.position[j];
            let weight = (self.mass[j] / density[j]) * (v_ij.dot(&x_ij) / (x_ij.norm2() + epsilon));
            sum += self.gradient(i, j) * weight;
        }
        gravity::<N>(parameters.gravity()) + sum * (2.0 * viscosity)
    }
}

/// Selection of a solver together with its settings.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SolverKind {
    Sesph(SesphSettings),
    Sesph3d(SesphSettings),
    Iisph(IisphSettings),
    Iisph3d(IisphSettings),
}

/// Read-only neighborhood access for the dimension of the running solver.
#[derive(Clone)]
pub enum NeighborhoodHandle {
    Dim2(NeighborhoodInterface<U2>),
    Dim3(NeighborhoodInterface<U3>),
}

impl NeighborhoodHandle {
    pub fn as_2d(&self) -> Option<&NeighborhoodInterface<U2>> {
        match self {
            NeighborhoodHandle::Dim2(interface) => Some(interface),
            NeighborhoodHandle::Dim3(_) => None,
        }
    }

    pub fn as_3d(&self) -> Option<&NeighborhoodInterface<U3>> {
        match self {
            NeighborhoodHandle::Dim3(interface) => Some(interface),
            NeighborhoodHandle::Dim2(_) => None,
        }
    }
}

pub enum FluidSolver {
    Sesph(Sesph<U2>),
    Sesph3d(Sesph<U3>),
    Iisph(Iisph<U2>),
    Iisph3d(Iisph<U3>),
}

macro_rules! dispatch {
    ($solver:expr, $s:ident => $body:expr) => {
        match $solver {
            FluidSolver::Sesph($s) => $body,
            FluidSolver::Sesph3d($s) => $body,
            FluidSolver::Iisph($s) => $body,
            FluidSolver::Iisph3d($s) => $body,
        }
    };
}

impl FluidSolver {
    /// Solver with a cubic spline kernel and the requested neighborhood search.
    pub fn new(
        kind: SolverKind,
        parameters: SimulationParameters,
        search: SearchKind,
        executor: ParallelExecutor,
    ) -> Self {
        let radius = parameters.search_radius();
        let support = parameters.kernel_support();
        match kind {
            SolverKind::Sesph(settings) => FluidSolver::Sesph(Sesph::new(
                parameters,
                settings,
                Box::new(CubicSpline::<U2>::new(support)),
                search.create::<U2>(radius),
                executor,
            )),
            SolverKind::Sesph3d(settings) => FluidSolver::Sesph3d(Sesph::new(
                parameters,
                settings,
                Box::new(CubicSpline::<U3>::new(support)),
                search.create::<U3>(radius),
                executor,
            )),
            SolverKind::Iisph(settings) => FluidSolver::Iisph(Iisph::new(
                parameters,
                settings,
                Box::new(CubicSpline::<U2>::new(support)),
                search.create::<U2>(radius),
                executor,
            )),
            SolverKind::Iisph3d(settings) => FluidSolver::Iisph3d(Iisph::new(
                parameters,
                settings,
                Box::new(CubicSpline::<U3>::new(support)),
                search.create::<U3>(radius),
                executor,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FluidSolver::Sesph(_) => "SESPHFluidSolver",
            FluidSolver::Sesph3d(_) => "SESPHFluidSolver3D",
            FluidSolver::Iisph(_) => "IISPHFluidSolver",
            FluidSolver::Iisph3d(_) => "IISPHFluidSolver3D",
        }
    }

    /// Current kind and settings.
    pub fn kind(&self) -> SolverKind {
        match self {
            FluidSolver::Sesph(s) => SolverKind::Sesph(*s.settings()),
            FluidSolver::Sesph3d(s) => SolverKind::Sesph3d(*s.settings()),
            FluidSolver::Iisph(s) => SolverKind::Iisph(*s.settings()),
            FluidSolver::Iisph3d(s) => SolverKind::Iisph3d(*s.settings()),
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            FluidSolver::Sesph(_) | FluidSolver::Iisph(_) => U2::DIM,
            FluidSolver::Sesph3d(_) | FluidSolver::Iisph3d(_) => U3::DIM,
        }
    }

    pub fn state(&self) -> SolverState {
        dispatch!(self, s => s.base().state())
    }

    pub fn parameters(&self) -> &SimulationParameters {
        dispatch!(self, s => s.base().parameters())
    }

    /// Setters return the `Dirty` marker to pass to `initialize`.
    pub fn parameters_mut(&mut self) -> &mut SimulationParameters {
        dispatch!(self, s => s.base_mut().parameters_mut())
    }

    pub fn executor(&self) -> &ParallelExecutor {
        dispatch!(self, s => s.base().executor())
    }

    pub fn initialize(&mut self, dirty: Dirty) {
        dispatch!(self, s => s.initialize(dirty))
    }

    /// Add every column the solver works on.
    pub fn adapt_store(&self, particles: &mut ParticleStore) {
        match self {
            FluidSolver::Sesph(_) => Sesph::<U2>::adapt_store(particles),
            FluidSolver::Sesph3d(_) => Sesph::<U3>::adapt_store(particles),
            FluidSolver::Iisph(_) => Iisph::<U2>::adapt_store(particles),
            FluidSolver::Iisph3d(_) => Iisph::<U3>::adapt_store(particles),
        }
    }

    pub fn execute_neighborhood_search(&mut self, particles: &ParticleStore) {
        dispatch!(self, s => s.base_mut().update_neighbors(particles))
    }

    pub fn execute_step(&mut self, particles: &mut ParticleStore, timepoint: &Timepoint) {
        dispatch!(self, s => s.execute_step(particles, timepoint))
    }

    pub fn create_neighborhood_interface(&self) -> NeighborhoodHandle {
        match self {
            FluidSolver::Sesph(s) => NeighborhoodHandle::Dim2(s.create_neighborhood_interface()),
            FluidSolver::Sesph3d(s) => NeighborhoodHandle::Dim3(s.create_neighborhood_interface()),
            FluidSolver::Iisph(s) => NeighborhoodHandle::Dim2(s.create_neighborhood_interface()),
            FluidSolver::Iisph3d(s) => NeighborhoodHandle::Dim3(s.create_neighborhood_interface()),
        }
    }

    pub fn create_compatibility_report(&self, particles: Option<&ParticleStore>, report: &mut CompatibilityReport) {
        dispatch!(self, s => s.create_compatibility_report(particles, report))
    }

    /// Pressure iterations of the last step, `None` for explicit solvers.
    pub fn last_iteration_count(&self) -> Option<usize> {
        match self {
            FluidSolver::Iisph(s) => Some(s.last_iteration_count()),
            FluidSolver::Iisph3d(s) => Some(s.last_iteration_count()),
            _ => None,
        }
    }

    /// Average predicted density error of the last step, `None` for explicit solvers.
    pub fn last_predicted_density_error(&self) -> Option<Real> {
        match self {
            FluidSolver::Iisph(s) => Some(s.last_predicted_density_error()),
            FluidSolver::Iisph3d(s) => Some(s.last_predicted_density_error()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vec2;
    use crate::sph::neighbor::tests::store_from_positions;

    fn kinds() -> Vec<SolverKind> {
        vec![
            SolverKind::Sesph(SesphSettings::default()),
            SolverKind::Sesph3d(SesphSettings::default()),
            SolverKind::Iisph(IisphSettings::default()),
            SolverKind::Iisph3d(IisphSettings::default()),
        ]
    }

    #[test]
    fn dispatch_by_kind() {
        for kind in kinds() {
            let solver = FluidSolver::new(
                kind,
                SimulationParameters::default(),
                SearchKind::default(),
                ParallelExecutor::Sequential,
            );
            assert_eq!(solver.kind(), kind);
            assert_eq!(solver.state(), SolverState::Uninitialized);
            let is_iisph = match kind {
                SolverKind::Iisph(_) | SolverKind::Iisph3d(_) => true,
                _ => false,
            };
            assert_eq!(solver.last_iteration_count().is_some(), is_iisph);

            let handle = solver.create_neighborhood_interface();
            assert_eq!(handle.as_2d().is_some(), solver.dimensions() == 2);
            assert_eq!(handle.as_3d().is_some(), solver.dimensions() == 3);
        }
    }

    #[test]
    fn adapted_store_passes_report() {
        for kind in kinds() {
            let solver = FluidSolver::new(
                kind,
                SimulationParameters::default(),
                SearchKind::Compressed,
                ParallelExecutor::Sequential,
            );
            let mut particles = ParticleStore::new();
            solver.adapt_store(&mut particles);
            let mut report = CompatibilityReport::new();
            solver.create_compatibility_report(Some(&particles), &mut report);
            assert!(!report.has_issues(), "{:?}", report.issues());

            let mut report = CompatibilityReport::new();
            solver.create_compatibility_report(None, &mut report);
            assert_eq!(report.issues()[0].message, "ParticleCollection is null.");
            assert_eq!(report.issues()[0].scope, solver.name());
        }
    }

    #[test]
    fn parameter_change_reaches_search() {
        let mut solver = FluidSolver::new(
            SolverKind::Sesph(SesphSettings::default()),
            SimulationParameters::default(),
            SearchKind::Hashed,
            ParallelExecutor::Sequential,
        );
        solver.initialize(Dirty::NONE);
        assert_eq!(solver.state(), SolverState::Initialized);

        let dirty = solver.parameters_mut().set_particle_size(0.25);
        solver.initialize(dirty);
        let handle = solver.create_neighborhood_interface();
        assert_eq!(handle.as_2d().map(|i| i.search_radius()), Some(0.5));
    }

    #[test]
    fn search_is_lazy() {
        let mut solver = FluidSolver::new(
            SolverKind::Sesph(SesphSettings::default()),
            SimulationParameters::default(),
            SearchKind::BruteForce,
            ParallelExecutor::Sequential,
        );
        let mut particles = store_from_positions(&[vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(5.0, 0.0)]);
        solver.execute_neighborhood_search(&particles);
        let handle = solver.create_neighborhood_interface();
        let interface = handle.as_2d().unwrap();
        assert_eq!(interface.neighbors(0), vec![0, 1]);

        particles.set::<Position<U2>>(2, vec2(2.0, 0.0));
        // not rebuilt until asked
        assert_eq!(interface.neighbors(0), vec![0, 1]);
        solver.execute_neighborhood_search(&particles);
        assert_eq!(interface.neighbors(0), vec![0, 1, 2]);
        assert!(!interface.is_position_free(&vec2(2.5, 0.0)));
        assert!(interface.is_position_free(&vec2(10.0, 0.0)));
    }

    #[test]
    fn data_change_forces_rebuild() {
        let mut solver = FluidSolver::new(
            SolverKind::Iisph(IisphSettings::default()),
            SimulationParameters::default(),
            SearchKind::Hashed,
            ParallelExecutor::Sequential,
        );
        let close = store_from_positions(&[vec2(0.0, 0.0), vec2(1.0, 0.0)]);
        let apart = store_from_positions(&[vec2(0.0, 0.0), vec2(5.0, 0.0)]);
        assert_eq!(close.generation(), apart.generation());

        solver.execute_neighborhood_search(&close);
        let handle = solver.create_neighborhood_interface();
        let interface = handle.as_2d().unwrap();
        assert_eq!(interface.neighbors(0), vec![0, 1]);

        // same generation, the search cannot tell the stores apart
        solver.execute_neighborhood_search(&apart);
        assert_eq!(interface.neighbors(0), vec![0, 1]);

        solver.initialize(Dirty::DATA);
        assert_eq!(solver.state(), SolverState::Initialized);
        solver.execute_neighborhood_search(&apart);
        assert_eq!(interface.neighbors(0), vec![0]);
        assert_eq!(interface.neighbors(1), vec![1]);
    }
}
