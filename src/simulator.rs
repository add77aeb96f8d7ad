//! Simulation driver
//!
//! Owns the particles and runs one step at a time: timestep generation,
//! optional spatial sorting, neighborhood search, entities and the solver.

use typenum::{U2, U3};

use crate::particle::{ParticleStore, SortMethod};
use crate::report::CompatibilityReport;
use crate::settings::{Dirty, SimulationParameters};
use crate::sph::solver::{FluidSolver, NeighborhoodHandle, Timepoint};
use crate::sph::sort::MortonSorter;
use crate::timestep::TimestepGenerator;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionPoint {
    BeforeSolver,
    AfterSolver,
    BeforeAndAfterSolver,
}

impl ExecutionPoint {
    pub fn before_solver(self) -> bool {
        self != ExecutionPoint::AfterSolver
    }

    pub fn after_solver(self) -> bool {
        self != ExecutionPoint::BeforeSolver
    }
}

/// Hook modifying the particles between solver steps, e.g. spawners or
/// boundary preprocessing.
pub trait SimulationEntity: Send {
    fn name(&self) -> &str;

    fn execution_point(&self) -> ExecutionPoint;

    /// Called on the first step and whenever parameters or particle data changed.
    fn initialize(&mut self, _parameters: &SimulationParameters, _neighborhood: &NeighborhoodHandle) {}

    fn execute_simulation_step(&mut self, particles: &mut ParticleStore, timepoint: &Timepoint, before_solver: bool);

    fn create_compatibility_report(&self, _particles: &ParticleStore, _report: &mut CompatibilityReport) {}
}

pub struct Simulator {
    particles: ParticleStore,
    parameters: SimulationParameters,
    solver: FluidSolver,
    timestep: TimestepGenerator,
    entities: Vec<Box<dyn SimulationEntity>>,
    sorter: Option<MortonSorter>,
    sorted: bool,
    timepoint: Timepoint,
    initialized: bool,
}

impl Simulator {
    pub fn new(
        particles: ParticleStore,
        parameters: SimulationParameters,
        solver: FluidSolver,
        timestep: TimestepGenerator,
    ) -> Self {
        Simulator {
            particles,
            parameters,
            solver,
            timestep,
            entities: Vec::new(),
            sorter: None,
            sorted: false,
            timepoint: Timepoint::default(),
            initialized: false,
        }
    }

    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    /// Position and kind changes are picked up by the next neighborhood search.
    pub fn particles_mut(&mut self) -> &mut ParticleStore {
        &mut self.particles
    }

    /// Replace the particles; pass the marker to `initialize`.
    pub fn set_particles(&mut self, particles: ParticleStore) -> Dirty {
        self.particles = particles;
        self.sorted = false;
        Dirty::DATA
    }

    pub fn parameters(&self) -> &SimulationParameters {
        &self.parameters
    }

    /// Setters return the `Dirty` marker to pass to `initialize`.
    pub fn parameters_mut(&mut self) -> &mut SimulationParameters {
        &mut self.parameters
    }

    pub fn solver(&self) -> &FluidSolver {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut FluidSolver {
        &mut self.solver
    }

    pub fn timestep_generator(&self) -> &TimestepGenerator {
        &self.timestep
    }

    pub fn timestep_generator_mut(&mut self) -> &mut TimestepGenerator {
        &mut self.timestep
    }

    pub fn add_entity(&mut self, entity: Box<dyn SimulationEntity>) -> Dirty {
        self.entities.push(entity);
        Dirty::DATA
    }

    /// Keep particles in Morton order of their search grid cell.
    pub fn set_sorting(&mut self, enabled: bool) {
        self.sorter = if enabled {
            Some(MortonSorter::new(self.parameters.search_radius()))
        } else {
            None
        };
        self.sorted = false;
    }

    pub fn timepoint(&self) -> &Timepoint {
        &self.timepoint
    }

    pub fn set_timepoint(&mut self, timepoint: Timepoint) {
        self.timepoint = timepoint;
    }

    pub fn neighborhood_interface(&self) -> NeighborhoodHandle {
        self.solver.create_neighborhood_interface()
    }

    /// Propagate changed parameters and data to solver and entities.
    pub fn initialize(&mut self, dirty: Dirty) {
        let dirty = if self.initialized { dirty } else { Dirty::ALL };
        if dirty.is_clean() {
            return;
        }

        if dirty.contains(Dirty::PARAMETERS) {
            *self.solver.parameters_mut() = self.parameters;
            if let Some(sorter) = &mut self.sorter {
                sorter.set_cell_size(self.parameters.search_radius());
            }
        }
        if dirty.contains(Dirty::DATA) {
            self.solver.adapt_store(&mut self.particles);
        }
        self.solver.initialize(dirty);

        let neighborhood = self.solver.create_neighborhood_interface();
        for entity in &mut self.entities {
            entity.initialize(&self.parameters, &neighborhood);
        }
        self.initialized = true;
        log::info!(
            "{} initialized with {} particles",
            self.solver.name(),
            self.particles.size()
        );
    }

    pub fn execute_simulation_step(&mut self) {
        if !self.initialized {
            self.initialize(Dirty::ALL);
        }

        let dt = self
            .timestep
            .generate_next_timestep(&self.particles, &self.parameters, self.solver.executor());
        self.timepoint.desired_time_step = dt;
        self.timepoint.actual_time_step = dt;

        self.sort_particles();
        self.solver.execute_neighborhood_search(&self.particles);

        for entity in &mut self.entities {
            if entity.execution_point().before_solver() {
                entity.execute_simulation_step(&mut self.particles, &self.timepoint, true);
            }
        }

        self.solver.execute_step(&mut self.particles, &self.timepoint);

        for entity in &mut self.entities {
            if entity.execution_point().after_solver() {
                entity.execute_simulation_step(&mut self.particles, &self.timepoint, false);
            }
        }

        self.timepoint.simulation_time += self.timepoint.actual_time_step;
        self.timepoint.timestep_number += 1;

        match self.solver.last_iteration_count() {
            Some(iterations) => log::debug!(
                "step {}: dt {}, {} pressure iterations",
                self.timepoint.timestep_number,
                dt,
                iterations
            ),
            None => log::debug!("step {}: dt {}", self.timepoint.timestep_number, dt),
        }
    }

    fn sort_particles(&mut self) {
        let sorter = match self.sorter {
            Some(sorter) => sorter,
            None => return,
        };
        let method = if self.sorted {
            SortMethod::Insertion
        } else {
            SortMethod::Merge
        };
        match self.solver.dimensions() {
            3 => sorter.sort::<U3>(&mut self.particles, method),
            _ => sorter.sort::<U2>(&mut self.particles, method),
        }
        self.sorted = true;
    }

    pub fn create_compatibility_report(&self, report: &mut CompatibilityReport) {
        report.begin_scope("Simulator");
        if self.parameters.particle_size() <= 0.0 {
            report.add_issue("Particle size is smaller or equal to zero.");
        }
        if self.parameters.rest_density() <= 0.0 {
            report.add_issue("Rest density is smaller or equal to zero.");
        }
        if self.solver.parameters() != &self.parameters && self.initialized {
            report.add_issue("Solver parameters are out of date, initialize the simulator.");
        }
        self.solver
            .create_compatibility_report(Some(&self.particles), report);
        self.timestep
            .create_compatibility_report(Some(&self.particles), &self.parameters, report);
        for entity in &self.entities {
            report.begin_scope(entity.name());
            entity.create_compatibility_report(&self.particles, report);
            report.end_scope();
        }
        report.end_scope();
    }
}
