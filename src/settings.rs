//! Simulation parameters and change tracking.
//!
//! Setters return a `Dirty` marker naming what they invalidated. Callers
//! collect markers with `|` and hand them to the next `initialize` call,
//! which consumes them.

use bitflags::bitflags;

use crate::math::Real;

/// Ratio between kernel support and particle size.
pub const KERNEL_SUPPORT_FACTOR: Real = 2.0;

bitflags! {
    #[must_use]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Dirty: u8 {
        /// Physical parameters (particle size, rest density, gravity).
        const PARAMETERS = 1;
        /// Solver or generator settings.
        const SETTINGS = 1 << 1;
        /// The particle store was replaced or restructured.
        const DATA = 1 << 2;
    }
}

impl Dirty {
    pub const NONE: Dirty = Dirty::empty();
    pub const ALL: Dirty = Dirty::all();

    pub fn is_clean(self) -> bool {
        self.is_empty()
    }
}

/// Physical parameters shared by solver, timestep generator and entities.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimulationParameters {
    particle_size: Real,
    rest_density: Real,
    gravity: Real,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        SimulationParameters {
            particle_size: 1.0,
            rest_density: 1.0,
            gravity: 9.81,
        }
    }
}

settings_accessors!(SimulationParameters, Dirty::PARAMETERS, {
    particle_size / set_particle_size: Real,
    rest_density / set_rest_density: Real,
    gravity / set_gravity: Real,
});

impl SimulationParameters {
    pub fn new(particle_size: Real, rest_density: Real, gravity: Real) -> Self {
        SimulationParameters {
            particle_size,
            rest_density,
            gravity,
        }
    }

    pub fn kernel_support(&self) -> Real {
        KERNEL_SUPPORT_FACTOR * self.particle_size
    }

    pub fn search_radius(&self) -> Real {
        self.kernel_support()
    }
}
