//! Smoothed particle hydrodynamics in two and three dimensions.
//!
//! Particles live in a column-wise `ParticleStore`. A `FluidSolver`
//! (explicit SESPH or implicit IISPH) advances them using a smoothing
//! kernel and one of several neighborhood searches, while a
//! `TimestepGenerator` picks stable step sizes. `Simulator` ties these
//! together.

#[macro_use]
mod macros;

pub mod math;
pub mod parallel;
pub mod particle;
pub mod report;
pub mod settings;
pub mod simulator;
pub mod sph;
pub mod timestep;

pub use crate::math::{Dimension, Real, VectorN};
pub use crate::parallel::ParallelExecutor;
pub use crate::particle::{ParticleId, ParticleStore, Property, SortMethod};
pub use crate::report::{CompatibilityReport, ConfigurationError};
pub use crate::settings::{Dirty, SimulationParameters};
pub use crate::simulator::{ExecutionPoint, SimulationEntity, Simulator};
pub use crate::sph::solver::{FluidSolver, NeighborhoodHandle, SearchKind, SolverKind, Timepoint};
pub use crate::timestep::TimestepGenerator;
