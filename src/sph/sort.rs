//! Space filling curve ordering of particles.
//!
//! Sorting particles by the Morton key of their grid cell keeps spatial
//! neighbors close in memory, which benefits every neighbor loop and keeps
//! compressed neighbor deltas small.

use super::property::{Kind, ParticleKind, Position};
use crate::math::{grid_cell, morton, Dimension, Real};
use crate::particle::{ParticleStore, SortMethod};

#[derive(Copy, Clone, Debug)]
pub struct MortonSorter {
    cell_size: Real,
}

impl MortonSorter {
    pub fn new(cell_size: Real) -> Self {
        MortonSorter { cell_size }
    }

    pub fn cell_size(&self) -> Real {
        self.cell_size
    }

    pub fn set_cell_size(&mut self, cell_size: Real) {
        self.cell_size = cell_size;
    }

    /// Keys of all particles. Inactive particles sort last.
    pub fn keys<N: Dimension>(&self, particles: &ParticleStore) -> Vec<u64> {
        let positions = particles.read::<Position<N>>();
        let kinds = particles.try_read::<Kind>();
        (0..particles.size())
            .map(|i| match &kinds {
                Some(kinds) if kinds[i] == ParticleKind::Inactive => u64::MAX,
                _ => morton::encode(grid_cell(&positions[i], self.cell_size).as_ref()),
            })
            .collect()
    }

    /// Use `SortMethod::Merge` for arbitrary order and `SortMethod::Insertion`
    /// to maintain the order from step to step.
    pub fn sort<N: Dimension>(&self, particles: &mut ParticleStore, method: SortMethod) {
        if self.cell_size <= 0.0 {
            return;
        }
        let keys = self.keys::<N>(particles);
        particles.sort_by(|_, i| keys[i], method);
    }
}
