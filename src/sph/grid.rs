//! Hashed uniform grid
//!
//! Unbounded grid with cell size equal to the search radius. Occupied cells
//! are stored in a hash map pointing into one compacted index list, which is
//! sorted by cell so every cell owns a contiguous range.
//!
//! Ref: "Particle Simulation using CUDA", Green, Simon, 2013

use std::collections::HashMap;

use super::neighbor::{NeighborLists, NeighborhoodSearch, Neighbors, Snapshot};
use crate::math::{grid_cell, Dimension, Real, VectorN};
use crate::parallel::ParallelExecutor;
use crate::particle::ParticleStore;

pub struct HashedGrid<N: Dimension> {
    search_radius: Real,
    snapshot: Snapshot<N>,
    cells: HashMap<N::Cell, (usize, usize)>,
    entries: Vec<u32>,
    lists: NeighborLists,
}

impl<N: Dimension> HashedGrid<N> {
    pub fn new(search_radius: Real) -> Self {
        HashedGrid {
            search_radius,
            snapshot: Snapshot::new(),
            cells: HashMap::new(),
            entries: Vec::new(),
            lists: NeighborLists::default(),
        }
    }

    pub fn num_occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Particle range of a cell.
    pub fn get_range(&self, cell: &N::Cell) -> &[u32] {
        match self.cells.get(cell) {
            Some(&(start, end)) => &self.entries[start..end],
            None => &[],
        }
    }

    fn construct_ranges(&mut self) {
        self.cells.clear();
        self.entries.clear();
        if self.search_radius <= 0.0 {
            return;
        }

        let radius = self.search_radius;
        let mut keyed: Vec<(N::Cell, u32)> = self
            .snapshot
            .positions
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.snapshot.active[i])
            .map(|(i, pos)| (grid_cell(pos, radius), i as u32))
            .collect();
        keyed.sort_unstable();

        self.entries.extend(keyed.iter().map(|&(_, i)| i));
        let mut start = 0;
        for end in 1..=keyed.len() {
            if end == keyed.len() || keyed[end].0 != keyed[start].0 {
                self.cells.insert(keyed[start].0, (start, end));
                start = end;
            }
        }
    }

    fn collect(&self, position: &VectorN<N>) -> Vec<u32> {
        if self.search_radius <= 0.0 {
            return Vec::new();
        }
        let cell = grid_cell(position, self.search_radius);
        let mut neighbors = Vec::new();
        for k in 0..N::num_adjacent_cells() {
            let adjacent = match N::adjacent_cell(&cell, k) {
                Some(adjacent) => adjacent,
                None => continue,
            };
            neighbors.extend(
                self.get_range(&adjacent)
                    .iter()
                    .cloned()
                    .filter(|&j| self.snapshot.is_within(j as usize, position, self.search_radius)),
            );
        }
        neighbors.sort_unstable();
        neighbors
    }
}

impl<N: Dimension> NeighborhoodSearch<N> for HashedGrid<N> {
    fn name(&self) -> &'static str {
        "HashedNeighborhoodSearch"
    }

    fn set_search_radius(&mut self, radius: Real) {
        self.search_radius = radius;
    }

    fn search_radius(&self) -> Real {
        self.search_radius
    }

    fn build(&mut self, particles: &ParticleStore) {
        self.snapshot.take(particles);
        self.lists.clear();
        self.construct_ranges();
        log::trace!(
            "hashed grid: {} particles in {} cells",
            self.entries.len(),
            self.cells.len()
        );
    }

    fn find_neighbors_for_all(&mut self, executor: &ParallelExecutor) {
        let lists = executor.map(self.snapshot.len(), |i| {
            if self.snapshot.active[i] {
                self.collect(&self.snapshot.positions[i])
            } else {
                Vec::new()
            }
        });
        self.lists = NeighborLists::from_lists(lists);
    }

    fn neighbors(&self, index: usize) -> Neighbors<'_> {
        Neighbors::List(self.lists.get(index).iter())
    }

    fn neighbors_of_position(&self, position: &VectorN<N>) -> Vec<usize> {
        self.collect(position).into_iter().map(|j| j as usize).collect()
    }

    fn built_generation(&self) -> Option<u64> {
        self.snapshot.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vec2;
    use crate::sph::neighbor::tests::store_from_positions;
    use typenum::U2;

    #[test]
    fn cells_own_contiguous_ranges() {
        let particles = store_from_positions(&[
            vec2(0.5, 0.5),
            vec2(3.5, 0.5),
            vec2(0.2, 0.9),
            vec2(-0.5, 0.5),
        ]);
        let mut grid = HashedGrid::<U2>::new(1.0);
        grid.build(&particles);

        assert_eq!(grid.num_occupied_cells(), 3);
        let origin = grid_cell(&vec2(0.0, 0.0), 1.0);
        assert_eq!(grid.get_range(&origin), &[0, 2]);
        let negative = grid_cell(&vec2(-0.5, 0.5), 1.0);
        assert_eq!(grid.get_range(&negative), &[3]);
    }

    #[test]
    fn non_positive_radius_finds_nothing() {
        let particles = store_from_positions(&[vec2(0.0, 0.0)]);
        let mut grid = HashedGrid::<U2>::new(0.0);
        grid.build(&particles);
        grid.find_neighbors_for_all(&ParallelExecutor::Sequential);
        assert_eq!(grid.neighbors(0).count(), 0);
    }
}
