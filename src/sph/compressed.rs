//! Compressed neighbor lists
//!
//! Every neighbor list is sorted ascending and stored as its first index
//! followed by the deltas between successive indices. Each delta gets a two
//! bit control code:
//!
//! | code | delta                                  |
//! |------|----------------------------------------|
//! | `00` | 1                                      |
//! | `10` | 2                                      |
//! | `01` | 3..=258, one byte `delta - 3`          |
//! | `11` | larger, four bytes LE `delta - 259`    |
//!
//! (bit 0 is "has payload", bit 1 "wide" or "two").
//! Particles sorted along a space filling curve mostly produce small deltas.
//!
//! Ref: [BGT17]

use super::neighbor::{NeighborhoodSearch, Neighbors, Snapshot};
use crate::math::{grid_cell, morton, Dimension, Real, VectorN};
use crate::parallel::ParallelExecutor;
use crate::particle::ParticleStore;

const CODE_ONE: u8 = 0b00;
const CODE_TWO: u8 = 0b10;
const CODE_BYTE: u8 = 0b01;
const CODE_WORD: u8 = 0b11;

const BYTE_OFFSET: u32 = 3;
const WORD_OFFSET: u32 = 256 + BYTE_OFFSET;

fn control_bytes(len: usize) -> usize {
    (len.saturating_sub(1) * 2 + 7) / 8
}

/// Encoded neighbor list of a single particle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborStorage {
    first: u32,
    last: u32,
    len: usize,
    control: Vec<u8>,
    deltas: Vec<u8>,
}

impl NeighborStorage {
    pub fn new() -> Self {
        NeighborStorage::default()
    }

    /// Encode strictly ascending indices.
    pub fn encode(sorted: &[u32]) -> Self {
        let mut storage = NeighborStorage::new();
        for &index in sorted {
            storage.push(index);
        }
        storage
    }

    /// Append an index larger than all stored ones.
    pub fn push(&mut self, index: u32) {
        if self.len == 0 {
            self.first = index;
            self.last = index;
            self.len = 1;
            return;
        }

        assert!(index > self.last, "neighbor indices must be strictly ascending");
        let delta = index - self.last;
        let pair = self.len - 1;
        let code = match delta {
            1 => CODE_ONE,
            2 => CODE_TWO,
            d if d < WORD_OFFSET => {
                self.deltas.push((d - BYTE_OFFSET) as u8);
                CODE_BYTE
            }
            d => {
                self.deltas.extend_from_slice(&(d - WORD_OFFSET).to_le_bytes());
                CODE_WORD
            }
        };
        if pair % 4 == 0 {
            self.control.push(0);
        }
        self.control[pair / 4] |= code << (2 * (pair % 4));

        self.last = index;
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> Decoder<'_> {
        Decoder::new(self.first, self.len, &self.control, &self.deltas)
    }

    /// Bytes needed for control codes and payload.
    pub fn encoded_bytes(&self) -> usize {
        self.control.len() + self.deltas.len()
    }
}

/// Iterator over an encoded neighbor list.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    current: u32,
    remaining: usize,
    started: bool,
    control: &'a [u8],
    deltas: &'a [u8],
    pair: usize,
    byte: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(first: u32, len: usize, control: &'a [u8], deltas: &'a [u8]) -> Self {
        Decoder {
            current: first,
            remaining: len,
            started: false,
            control,
            deltas,
            pair: 0,
            byte: 0,
        }
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if !self.started {
            self.started = true;
            return Some(self.current as usize);
        }

        let code = (self.control[self.pair / 4] >> (2 * (self.pair % 4))) & 0b11;
        self.pair += 1;
        let delta = match code {
            CODE_ONE => 1,
            CODE_TWO => 2,
            CODE_BYTE => {
                let d = self.deltas[self.byte] as u32 + BYTE_OFFSET;
                self.byte += 1;
                d
            }
            _ => {
                let mut word = [0u8; 4];
                word.copy_from_slice(&self.deltas[self.byte..self.byte + 4]);
                self.byte += 4;
                u32::from_le_bytes(word) + WORD_OFFSET
            }
        };
        self.current += delta;
        Some(self.current as usize)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Head {
    first: u32,
    len: u32,
    offset: usize,
}

/// Search storing delta encoded neighbor lists.
///
/// Active particles are ordered by the Morton key of their grid cell
/// internally; the particle store itself is never reordered.
pub struct Compressed<N: Dimension> {
    search_radius: Real,
    snapshot: Snapshot<N>,
    /// Active particle indices sorted by cell key.
    sorted: Vec<u32>,
    /// Cell key and first entry in `sorted` of every occupied cell.
    cell_starts: Vec<(u64, usize)>,
    heads: Vec<Head>,
    bytes: Vec<u8>,
}

impl<N: Dimension> Compressed<N> {
    pub fn new(search_radius: Real) -> Self {
        Compressed {
            search_radius,
            snapshot: Snapshot::new(),
            sorted: Vec::new(),
            cell_starts: Vec::new(),
            heads: Vec::new(),
            bytes: Vec::new(),
        }
    }

    fn cell_key(&self, position: &VectorN<N>) -> u64 {
        morton::encode(grid_cell(position, self.search_radius).as_ref())
    }

    fn cell_range(&self, key: u64) -> &[u32] {
        match self.cell_starts.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(pos) => {
                let start = self.cell_starts[pos].1;
                let end = self
                    .cell_starts
                    .get(pos + 1)
                    .map(|&(_, s)| s)
                    .unwrap_or_else(|| self.sorted.len());
                &self.sorted[start..end]
            }
            Err(_) => &[],
        }
    }

    fn collect(&self, position: &VectorN<N>) -> Vec<u32> {
        if self.search_radius <= 0.0 {
            return Vec::new();
        }
        let cell = grid_cell(position, self.search_radius);
        let mut neighbors = Vec::new();
        for k in 0..N::num_adjacent_cells() {
            let key = match N::adjacent_cell(&cell, k) {
                Some(adjacent) => morton::encode(adjacent.as_ref()),
                None => continue,
            };
            neighbors.extend(
                self.cell_range(key)
                    .iter()
                    .cloned()
                    .filter(|&j| self.snapshot.is_within(j as usize, position, self.search_radius)),
            );
        }
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
    }

    /// Bytes used by the encoded lists, excluding their heads.
    pub fn encoded_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Total number of stored neighbor entries.
    pub fn num_neighbor_entries(&self) -> usize {
        self.heads.iter().map(|h| h.len as usize).sum()
    }
}

impl<N: Dimension> NeighborhoodSearch<N> for Compressed<N> {
    fn name(&self) -> &'static str {
        "CompressedNeighborhoodSearch"
    }

    fn set_search_radius(&mut self, radius: Real) {
        self.search_radius = radius;
    }

    fn search_radius(&self) -> Real {
        self.search_radius
    }

    fn build(&mut self, particles: &ParticleStore) {
        self.snapshot.take(particles);
        self.heads.clear();
        self.bytes.clear();
        self.sorted.clear();
        self.cell_starts.clear();
        if self.search_radius <= 0.0 {
            return;
        }

        let mut keyed: Vec<(u64, u32)> = (0..self.snapshot.len())
            .filter(|&i| self.snapshot.active[i])
            .map(|i| (self.cell_key(&self.snapshot.positions[i]), i as u32))
            .collect();
        keyed.sort_unstable();

        for (pos, &(key, index)) in keyed.iter().enumerate() {
            if pos == 0 || keyed[pos - 1].0 != key {
                self.cell_starts.push((key, pos));
            }
            self.sorted.push(index);
        }
    }

    fn find_neighbors_for_all(&mut self, executor: &ParallelExecutor) {
        let storages = executor.map(self.snapshot.len(), |i| {
            if self.snapshot.active[i] {
                NeighborStorage::encode(&self.collect(&self.snapshot.positions[i]))
            } else {
                NeighborStorage::new()
            }
        });

        self.heads.clear();
        self.bytes.clear();
        self.heads.reserve(storages.len());
        for storage in &storages {
            self.heads.push(Head {
                first: storage.first,
                len: storage.len as u32,
                offset: self.bytes.len(),
            });
            self.bytes.extend_from_slice(&storage.control);
            self.bytes.extend_from_slice(&storage.deltas);
        }
        log::trace!(
            "compressed {} neighbor entries into {} bytes",
            self.num_neighbor_entries(),
            self.bytes.len()
        );
    }

    fn neighbors(&self, index: usize) -> Neighbors<'_> {
        let head = self.heads.get(index).cloned().unwrap_or_default();
        let len = head.len as usize;
        let start = head.offset;
        let split = start + control_bytes(len);
        debug_assert!(split <= self.bytes.len(), "neighbor list {} exceeds the encoded stream", index);
        Neighbors::Compressed(Decoder::new(
            head.first,
            len,
            &self.bytes[start..split],
            &self.bytes[split..],
        ))
    }

    fn neighbors_of_position(&self, position: &VectorN<N>) -> Vec<usize> {
        self.collect(position).into_iter().map(|j| j as usize).collect()
    }

    fn built_generation(&self) -> Option<u64> {
        self.snapshot.generation
    }
}
