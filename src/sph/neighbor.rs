//! Neighborhood search
//!
//! All searches answer the same question: which active particles lie within
//! the search radius (inclusive) of a particle or position. A particle is
//! always its own neighbor. Inactive particles are never neighbors and have
//! no neighbors.
//!
//! Searches work on a snapshot of the particle positions taken by `build`.
//! Results refer to particle indices at the time of the snapshot.

use cgmath::MetricSpace;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use super::compressed::Decoder;
use super::property::{Kind, ParticleKind, Position};
use crate::math::{Dimension, Real, VectorN};
use crate::parallel::ParallelExecutor;
use crate::particle::ParticleStore;
use crate::report::CompatibilityReport;

pub trait NeighborhoodSearch<N: Dimension>: Send + Sync {
    fn name(&self) -> &'static str;

    fn set_search_radius(&mut self, radius: Real);

    fn search_radius(&self) -> Real;

    /// Snapshot positions and particle kinds, rebuild spatial structures.
    fn build(&mut self, particles: &ParticleStore);

    /// Store the neighbors of every particle of the snapshot.
    fn find_neighbors_for_all(&mut self, executor: &ParallelExecutor);

    /// Stored neighbors of `index`, empty before `find_neighbors_for_all`.
    fn neighbors(&self, index: usize) -> Neighbors<'_>;

    /// Neighbors of an arbitrary position, computed on demand.
    fn neighbors_of_position(&self, position: &VectorN<N>) -> Vec<usize>;

    /// Store generation of the last snapshot.
    fn built_generation(&self) -> Option<u64>;

    fn create_compatibility_report(&self, particles: Option<&ParticleStore>, report: &mut CompatibilityReport) {
        report.begin_scope(self.name());
        match particles {
            None => report.add_issue("ParticleCollection is null."),
            Some(particles) => {
                super::require::<Position<N>>(particles, report);
                super::require::<Kind>(particles, report);
            }
        }
        if self.search_radius() <= 0.0 {
            report.add_issue("Search radius is smaller or equal to zero.");
        }
        report.end_scope();
    }
}

/// Neighbor indices of one particle.
pub enum Neighbors<'a> {
    List(std::slice::Iter<'a, u32>),
    Compressed(Decoder<'a>),
}

impl<'a> Iterator for Neighbors<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            Neighbors::List(iter) => iter.next().map(|&i| i as usize),
            Neighbors::Compressed(decoder) => decoder.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Neighbors::List(iter) => iter.size_hint(),
            Neighbors::Compressed(decoder) => decoder.size_hint(),
        }
    }
}

/// Positions and activity of the particles a search was built from.
#[derive(Clone, Debug)]
pub struct Snapshot<N: Dimension> {
    pub positions: Vec<VectorN<N>>,
    pub active: Vec<bool>,
    pub generation: Option<u64>,
}

impl<N: Dimension> Snapshot<N> {
    pub fn new() -> Self {
        Snapshot {
            positions: Vec::new(),
            active: Vec::new(),
            generation: None,
        }
    }

    pub fn take(&mut self, particles: &ParticleStore) {
        let positions = particles.read::<Position<N>>();
        self.positions.clear();
        self.positions.extend_from_slice(&positions);

        self.active.clear();
        match particles.try_read::<Kind>() {
            Some(kinds) => self
                .active
                .extend(kinds.iter().map(|&kind| kind != ParticleKind::Inactive)),
            None => self.active.resize(positions.len(), true),
        }
        self.generation = Some(particles.generation());
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Active particle `candidate` lies within `radius` of `position`.
    #[inline]
    pub fn is_within(&self, candidate: usize, position: &VectorN<N>, radius: Real) -> bool {
        self.active[candidate] && self.positions[candidate].distance2(*position) <= radius * radius
    }
}

impl<N: Dimension> Default for Snapshot<N> {
    fn default() -> Self {
        Snapshot::new()
    }
}

/// Flattened per particle neighbor lists.
#[derive(Clone, Debug, Default)]
pub struct NeighborLists {
    offsets: Vec<usize>,
    indices: Vec<u32>,
}

impl NeighborLists {
    pub fn from_lists(lists: Vec<Vec<u32>>) -> Self {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let mut indices = Vec::with_capacity(lists.iter().map(Vec::len).sum());
        offsets.push(0);
        for list in lists {
            indices.extend_from_slice(&list);
            offsets.push(indices.len());
        }
        NeighborLists { offsets, indices }
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
        self.indices.clear();
    }

    pub fn get(&self, index: usize) -> &[u32] {
        if index + 1 >= self.offsets.len() {
            return &[];
        }
        &self.indices[self.offsets[index]..self.offsets[index + 1]]
    }
}

/// Reference search checking all particle pairs.
pub struct BruteForce<N: Dimension> {
    search_radius: Real,
    snapshot: Snapshot<N>,
    lists: NeighborLists,
}

impl<N: Dimension> BruteForce<N> {
    pub fn new(search_radius: Real) -> Self {
        BruteForce {
            search_radius,
            snapshot: Snapshot::new(),
            lists: NeighborLists::default(),
        }
    }

    fn collect(&self, position: &VectorN<N>) -> Vec<u32> {
        (0..self.snapshot.len())
            .filter(|&j| self.snapshot.is_within(j, position, self.search_radius))
            .map(|j| j as u32)
            .collect()
    }
}

impl<N: Dimension> NeighborhoodSearch<N> for BruteForce<N> {
    fn name(&self) -> &'static str {
        "BruteForceNeighborhoodSearch"
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

pub type SharedSearch<N> = Arc<RwLock<Box<dyn NeighborhoodSearch<N>>>>;

pub fn share<N: Dimension>(search: Box<dyn NeighborhoodSearch<N>>) -> SharedSearch<N> {
    Arc::new(RwLock::new(search))
}

pub(crate) fn read_search<N: Dimension>(
    search: &SharedSearch<N>,
) -> RwLockReadGuard<'_, Box<dyn NeighborhoodSearch<N>>> {
    search.read().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of a solver's neighborhood search.
///
/// Queries reflect the last search the solver ran; they never trigger a
/// rebuild. Must not be used while the solver is stepping.
#[derive(Clone)]
pub struct NeighborhoodInterface<N: Dimension> {
    search: SharedSearch<N>,
}

impl<N: Dimension> NeighborhoodInterface<N> {
    pub fn new(search: SharedSearch<N>) -> Self {
        NeighborhoodInterface { search }
    }

    pub fn neighbors(&self, index: usize) -> Vec<usize> {
        read_search(&self.search).neighbors(index).collect()
    }

    pub fn neighbors_of_position(&self, position: &VectorN<N>) -> Vec<usize> {
        read_search(&self.search).neighbors_of_position(position)
    }

    /// No active particle lies within the search radius of `position`.
    pub fn is_position_free(&self, position: &VectorN<N>) -> bool {
        self.neighbors_of_position(position).is_empty()
    }

    pub fn search_radius(&self) -> Real {
        read_search(&self.search).search_radius()
    }
}
