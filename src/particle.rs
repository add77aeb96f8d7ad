//! Particle system
//!
//! Particles are stored column-wise: one vector per property type. Every
//! particle carries a stable `ParticleId` next to its (changing) index.
//! All reordering goes through `swap`, which keeps the id <-> index
//! mapping up to date.

use mopa::mopafy;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

pub trait Property: 'static {
    type Subtype: Clone + Send + Sync + 'static;

    /// Value of a newly added particle.
    fn new() -> Self::Subtype;

    /// Writing this column invalidates spatial acceleration structures.
    const SPATIAL: bool = false;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleId(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortMethod {
    /// Stable, cheap for almost sorted data.
    Insertion,
    /// Stable, for arbitrary initial order.
    Merge,
}

type Column = RwLock<Box<dyn Storage>>;

pub struct ParticleStore {
    num_particles: usize,
    columns: HashMap<TypeId, Column>,
    ids: Vec<ParticleId>,
    indices: HashMap<ParticleId, usize>,
    next_id: u64,
    generation: AtomicU64,
}

impl Default for ParticleStore {
    fn default() -> Self {
        ParticleStore::new()
    }
}

impl ParticleStore {
    pub fn new() -> Self {
        ParticleStore {
            num_particles: 0,
            columns: HashMap::new(),
            ids: Vec::new(),
            indices: HashMap::new(),
            next_id: 0,
            generation: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.num_particles
    }

    pub fn is_empty(&self) -> bool {
        self.num_particles == 0
    }

    /// Changes whenever positions or the particle set itself change.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn add_property<P: Property>(&mut self) {
        let num_particles = self.num_particles;
        self.columns.entry(TypeId::of::<P>()).or_insert_with(|| {
            RwLock::new(Box::new(VecStorage::<P> {
                data: vec![P::new(); num_particles],
                marker: PhantomData,
            }))
        });
    }

    pub fn is_attribute_present<P: Property>(&self) -> bool {
        self.columns.contains_key(&TypeId::of::<P>())
    }

    pub fn reserve(&mut self, additional: usize) {
        for column in self.columns.values_mut() {
            column_mut(column).reserve(additional);
        }
    }

    /// Append a particle with default values in every column.
    pub fn add(&mut self) -> usize {
        let index = self.num_particles;
        for column in self.columns.values_mut() {
            column_mut(column).fill(index + 1);
        }
        self.push_ids(1);
        index
    }

    /// Append `additional` particles. Columns not given to the builder are
    /// filled with default values when it is dropped.
    pub fn add_particles(&mut self, additional: usize) -> Builder<'_> {
        self.reserve(additional);
        self.push_ids(additional);
        Builder(self)
    }

    fn push_ids(&mut self, additional: usize) {
        for _ in 0..additional {
            let id = ParticleId(self.next_id);
            self.next_id += 1;
            self.indices.insert(id, self.num_particles);
            self.ids.push(id);
            self.num_particles += 1;
        }
        self.touch();
    }

    pub fn get<P: Property>(&self, index: usize) -> P::Subtype {
        self.read::<P>()[index].clone()
    }

    pub fn set<P: Property>(&mut self, index: usize, value: P::Subtype) {
        let column = self
            .columns
            .get_mut(&TypeId::of::<P>())
            .unwrap_or_else(|| missing::<P>());
        vec_storage_mut::<P>(column_mut(column)).data[index] = value;
        if P::SPATIAL {
            self.touch();
        }
    }

    /// Shared access to a whole column.
    ///
    /// Panics if the column is missing or currently written.
    pub fn read<P: Property>(&self) -> Read<'_, P> {
        self.try_read::<P>().unwrap_or_else(|| missing::<P>())
    }

    /// Exclusive access to a whole column.
    ///
    /// Panics if the column is missing or currently borrowed.
    pub fn write<P: Property>(&self) -> Write<'_, P> {
        self.try_write::<P>().unwrap_or_else(|| missing::<P>())
    }

    pub fn try_read<P: Property>(&self) -> Option<Read<'_, P>> {
        let column = self.columns.get(&TypeId::of::<P>())?;
        let guard = match column.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => {
                panic!("{} is already borrowed mutably", type_name::<P>())
            }
        };
        Some(Read {
            guard,
            marker: PhantomData,
        })
    }

    pub fn try_write<P: Property>(&self) -> Option<Write<'_, P>> {
        let column = self.columns.get(&TypeId::of::<P>())?;
        let guard = match column.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => panic!("{} is already borrowed", type_name::<P>()),
        };
        if P::SPATIAL {
            self.touch();
        }
        Some(Write {
            guard,
            marker: PhantomData,
        })
    }

    pub fn get_id(&self, index: usize) -> ParticleId {
        self.ids[index]
    }

    pub fn get_index(&self, id: ParticleId) -> Option<usize> {
        self.indices.get(&id).cloned()
    }

    /// Exchange two particles in every column.
    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for column in self.columns.values_mut() {
            column_mut(column).swap(a, b);
        }
        self.ids.swap(a, b);
        self.indices.insert(self.ids[a], a);
        self.indices.insert(self.ids[b], b);
        self.touch();
    }

    /// Reorder particles by ascending key.
    pub fn sort_by<F>(&mut self, key: F, method: SortMethod)
    where
        F: Fn(&ParticleStore, usize) -> u64,
    {
        let mut keys: Vec<u64> = (0..self.num_particles).map(|i| key(self, i)).collect();
        match method {
            SortMethod::Insertion => self.insertion_sort(&mut keys),
            SortMethod::Merge => self.merge_sort(&keys),
        }
    }

    fn insertion_sort(&mut self, keys: &mut [u64]) {
        for i in 1..keys.len() {
            let mut j = i;
            while j > 0 && keys[j - 1] > keys[j] {
                keys.swap(j - 1, j);
                self.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    fn merge_sort(&mut self, keys: &[u64]) {
        let order = merge_sort_order(keys);

        // apply the permutation through swaps
        let mut slot_of: Vec<usize> = (0..keys.len()).collect();
        let mut at: Vec<usize> = (0..keys.len()).collect();
        for (target, &source) in order.iter().enumerate() {
            let current = slot_of[source];
            if current != target {
                let displaced = at[target];
                self.swap(target, current);
                at[current] = displaced;
                slot_of[displaced] = current;
                at[target] = source;
                slot_of[source] = target;
            }
        }
    }

    /// Physically remove every particle for which `keep` is false.
    ///
    /// Surviving particles keep their relative order and ids.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(&ParticleStore, usize) -> bool,
    {
        let mut flags: Vec<bool> = (0..self.num_particles).map(|i| keep(self, i)).collect();
        let mut write = 0;
        for read in 0..flags.len() {
            if flags[read] {
                if read != write {
                    flags.swap(read, write);
                    self.swap(read, write);
                }
                write += 1;
            }
        }
        self.truncate(write);
    }

    fn truncate(&mut self, len: usize) {
        if len >= self.num_particles {
            return;
        }
        for column in self.columns.values_mut() {
            column_mut(column).truncate(len);
        }
        for id in self.ids.drain(len..) {
            self.indices.remove(&id);
        }
        self.num_particles = len;
        self.touch();
    }
}

/// Stable bottom-up merge sort returning the sorted order of `keys`.
fn merge_sort_order(keys: &[u64]) -> Vec<usize> {
    let n = keys.len();
    let mut order: Vec<usize> = (0..n).collect();
    let mut buffer = order.clone();
    let mut width = 1;
    while width < n {
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            for slot in &mut buffer[start..end] {
                if i < mid && (j >= end || keys[order[i]] <= keys[order[j]]) {
                    *slot = order[i];
                    i += 1;
                } else {
                    *slot = order[j];
                    j += 1;
                }
            }
            start = end;
        }
        std::mem::swap(&mut order, &mut buffer);
        width *= 2;
    }
    order
}

fn missing<P: Property>() -> ! {
    panic!("Particles are missing the {} attribute.", type_name::<P>())
}

fn column_mut(column: &mut Column) -> &mut (dyn Storage + 'static) {
    &mut **column.get_mut().unwrap_or_else(PoisonError::into_inner)
}

fn vec_storage<'a, P: Property>(storage: &'a (dyn Storage + 'static)) -> &'a VecStorage<P> {
    storage
        .downcast_ref::<VecStorage<P>>()
        .unwrap_or_else(|| unreachable!("column stored under the wrong type"))
}

fn vec_storage_mut<'a, P: Property>(storage: &'a mut (dyn Storage + 'static)) -> &'a mut VecStorage<P> {
    storage
        .downcast_mut::<VecStorage<P>>()
        .unwrap_or_else(|| unreachable!("column stored under the wrong type"))
}

pub struct Builder<'a>(&'a mut ParticleStore);

impl<'a> Builder<'a> {
    /// Provide the values of one column for the particles being added.
    pub fn with<P: Property>(&mut self, values: &[P::Subtype]) -> &mut Self {
        let num_particles = self.0.num_particles;
        if let Some(column) = self.0.columns.get_mut(&TypeId::of::<P>()) {
            let storage = &mut vec_storage_mut::<P>(column_mut(column)).data;
            assert_eq!(
                storage.len() + values.len(),
                num_particles,
                "{} values given for {} added particles",
                values.len(),
                num_particles - storage.len()
            );
            storage.extend_from_slice(values);
        }
        self
    }
}

impl<'a> Drop for Builder<'a> {
    fn drop(&mut self) {
        // fill remaining properties with default values
        let num_particles = self.0.num_particles;
        for column in self.0.columns.values_mut() {
            column_mut(column).fill(num_particles);
        }
    }
}

pub struct Read<'a, P: Property> {
    guard: RwLockReadGuard<'a, Box<dyn Storage>>,
    marker: PhantomData<fn() -> P>,
}

impl<'a, P: Property> Deref for Read<'a, P> {
    type Target = [P::Subtype];
    fn deref(&self) -> &Self::Target {
        &vec_storage::<P>(&**self.guard).data
    }
}

pub struct Write<'a, P: Property> {
    guard: RwLockWriteGuard<'a, Box<dyn Storage>>,
    marker: PhantomData<fn() -> P>,
}

impl<'a, P: Property> Deref for Write<'a, P> {
    type Target = [P::Subtype];
    fn deref(&self) -> &Self::Target {
        &vec_storage::<P>(&**self.guard).data
    }
}

impl<'a, P: Property> DerefMut for Write<'a, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut vec_storage_mut::<P>(&mut **self.guard).data
    }
}

trait Storage: mopa::Any + Send + Sync {
    fn reserve(&mut self, additional: usize);
    /// Extend with default values up to `len` elements.
    fn fill(&mut self, len: usize);
    fn swap(&mut self, a: usize, b: usize);
    fn truncate(&mut self, len: usize);
}

mopafy!(Storage);

struct VecStorage<P: Property> {
    data: Vec<P::Subtype>,
    marker: PhantomData<fn() -> P>,
}

impl<P: Property> Storage for VecStorage<P> {
    fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    fn fill(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, P::new());
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.data.swap(a, b);
    }

    fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Value;
    impl Property for Value {
        type Subtype = u32;
        fn new() -> u32 {
            7
        }
    }

    struct Location;
    impl Property for Location {
        type Subtype = f32;
        fn new() -> f32 {
            0.0
        }
        const SPATIAL: bool = true;
    }

    fn store_with_values(n: usize) -> ParticleStore {
        let mut store = ParticleStore::new();
        store.add_property::<Value>();
        store.add_property::<Location>();
        let values: Vec<u32> = (0..n as u32).map(|i| i * 10).collect();
        store.add_particles(n).with::<Value>(&values);
        store
    }

    fn assert_consistent(store: &ParticleStore) {
        for index in 0..store.size() {
            let id = store.get_id(index);
            assert_eq!(store.get_index(id), Some(index));
            // values were assigned as id * 10 and never modified
            assert_eq!(store.get::<Value>(index) as u64, id.0 * 10);
        }
    }

    #[test]
    fn add_fills_defaults() {
        let mut store = store_with_values(3);
        assert_eq!(store.size(), 3);
        assert_eq!(store.get::<Location>(2), 0.0);

        let index = store.add();
        assert_eq!(index, 3);
        assert_eq!(store.get::<Value>(3), 7);

        store.add_property::<Location>();
        assert_eq!(store.read::<Location>().len(), 4);
        assert!(store.is_attribute_present::<Value>());
    }

    #[test]
    fn swap_keeps_identity() {
        let mut store = store_with_values(5);
        store.swap(0, 4);
        store.swap(1, 4);
        assert_eq!(store.get_id(1), ParticleId(0));
        assert_consistent(&store);
    }

    #[test]
    fn sort_keeps_identity() {
        let mut rng = StdRng::seed_from_u64(17);
        for &method in &[SortMethod::Insertion, SortMethod::Merge] {
            let mut store = store_with_values(200);
            {
                let mut location = store.write::<Location>();
                for l in location.iter_mut() {
                    *l = rng.gen_range(-50.0..50.0);
                }
            }
            let before: Vec<(ParticleId, f32)> = (0..store.size())
                .map(|i| (store.get_id(i), store.get::<Location>(i)))
                .collect();

            store.sort_by(|s, i| (s.get::<Location>(i) + 100.0) as u64, method);

            let keys: Vec<u64> = store.read::<Location>().iter().map(|l| (l + 100.0) as u64).collect();
            assert!(keys.windows(2).all(|w| w[0] <= w[1]), "{:?}", method);
            for (id, location) in before {
                let index = store.get_index(id).unwrap();
                assert_eq!(store.get::<Location>(index), location);
            }
            assert_consistent(&store);
        }
    }

    #[test]
    fn merge_sort_is_stable() {
        let keys = [3, 1, 2, 1, 3, 0];
        assert_eq!(merge_sort_order(&keys), vec![5, 1, 3, 2, 0, 4]);
    }

    #[test]
    fn retain_compacts() {
        let mut store = store_with_values(10);
        store.retain(|s, i| s.get::<Value>(i) % 20 == 0);
        assert_eq!(store.size(), 5);
        assert_eq!(store.get_index(ParticleId(1)), None);
        let values: Vec<u32> = store.read::<Value>().to_vec();
        assert_eq!(values, vec![0, 20, 40, 60, 80]);
        assert_consistent(&store);
    }

    #[test]
    fn removed_ids_are_forgotten() {
        let mut store = store_with_values(4);
        for _ in 0..50 {
            store.add_particles(2).with::<Value>(&[1, 3]);
            store.retain(|s, i| s.get::<Value>(i) % 2 == 0);
        }
        assert_eq!(store.size(), 4);
        assert_eq!(store.indices.len(), 4);
        assert_eq!(store.get_index(ParticleId(5)), None);

        let index = store.add();
        assert_eq!(store.get_id(index), ParticleId(104));
        assert_eq!(store.get_index(ParticleId(104)), Some(4));
    }

    #[test]
    #[should_panic]
    fn builder_rejects_extra_values() {
        let mut store = ParticleStore::new();
        store.add_property::<Value>();
        store.add_particles(2).with::<Value>(&[1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn builder_rejects_repeated_column() {
        let mut store = ParticleStore::new();
        store.add_property::<Value>();
        store.add_particles(2).with::<Value>(&[1, 2]).with::<Value>(&[3, 4]);
    }

    #[test]
    fn generation_tracks_spatial_writes() {
        let mut store = store_with_values(4);
        let generation = store.generation();
        store.write::<Value>()[0] = 1;
        assert_eq!(store.generation(), generation);
        store.write::<Location>()[0] = 1.0;
        assert!(store.generation() > generation);
        let generation = store.generation();
        store.set::<Location>(1, 2.0);
        assert!(store.generation() > generation);
    }

    #[test]
    #[should_panic]
    fn conflicting_borrow_panics() {
        let store = store_with_values(2);
        let _write = store.write::<Value>();
        let _read = store.read::<Value>();
    }
}
