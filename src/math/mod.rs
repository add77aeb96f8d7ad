use generic_array::GenericArray;
use num::Zero;
use std::f32::consts::PI;
use std::fmt::Debug;
use std::hash::Hash;
use typenum::{U2, U3};

pub mod morton;
pub mod vector_n;

pub use self::vector_n::{vec2, vec3, VectorN};

pub type Real = f32;

/// Spatial dimension of a particle field.
///
/// Implemented for `U2` and `U3`. The solvers, kernels and neighborhood
/// searches are written once against this trait.
pub trait Dimension: Copy + Clone + Debug + Send + Sync + 'static {
    const DIM: usize;

    /// Component storage of a `VectorN`.
    type Array: Copy + Default + PartialEq + Debug + Send + Sync + AsRef<[Real]> + AsMut<[Real]>;

    /// Integer coordinates of a uniform grid cell.
    type Cell: Copy + Default + Eq + Ord + Hash + Debug + Send + Sync + AsRef<[i32]> + AsMut<[i32]>;

    /// Normalization constant of the cubic spline for smoothing length `h`.
    fn cubic_spline_alpha(h: Real) -> Real;

    /// Number of cells in the `3^D` block around (and including) a cell.
    fn num_adjacent_cells() -> usize {
        3usize.pow(Self::DIM as u32)
    }

    /// The `k`-th cell of the `3^D` block around `cell`, `None` past the
    /// representable cell range.
    fn adjacent_cell(cell: &Self::Cell, k: usize) -> Option<Self::Cell> {
        let mut adjacent = *cell;
        let mut rest = k;
        for c in adjacent.as_mut() {
            *c = c.checked_add((rest % 3) as i32 - 1)?;
            rest /= 3;
        }
        Some(adjacent)
    }
}

impl Dimension for U2 {
    const DIM: usize = 2;
    type Array = GenericArray<Real, U2>;
    type Cell = GenericArray<i32, U2>;

    fn cubic_spline_alpha(h: Real) -> Real {
        5.0 / (14.0 * PI * h * h)
    }
}

impl Dimension for U3 {
    const DIM: usize = 3;
    type Array = GenericArray<Real, U3>;
    type Cell = GenericArray<i32, U3>;

    fn cubic_spline_alpha(h: Real) -> Real {
        1.0 / (4.0 * PI * h * h * h)
    }
}

/// Uniform grid cell containing `position` for a given cell size.
pub fn grid_cell<N: Dimension>(position: &VectorN<N>, cell_size: Real) -> N::Cell {
    let mut cell = N::Cell::default();
    for (c, &x) in cell.as_mut().iter_mut().zip(position.iter()) {
        *c = (x / cell_size).floor() as i32;
    }
    cell
}

/// Gravity acts against the second axis.
pub fn gravity<N: Dimension>(g: Real) -> VectorN<N> {
    let mut v = VectorN::zero();
    v[1] = -g;
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_cells_cover_block() {
        let cell = GenericArray::<i32, U2>::clone_from_slice(&[4, -2]);
        let mut cells: Vec<_> = (0..U2::num_adjacent_cells())
            .filter_map(|k| U2::adjacent_cell(&cell, k))
            .collect();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), 9);
        assert!(cells.iter().all(|c| (c[0] - 4).abs() <= 1 && (c[1] + 2).abs() <= 1));
        assert_eq!(U3::num_adjacent_cells(), 27);
    }

    #[test]
    fn adjacent_cells_stop_at_range_end() {
        let cell = grid_cell(&vec2(1e10, 0.0), 1.0);
        assert_eq!(cell[0], i32::MAX);
        let cells: Vec<_> = (0..U2::num_adjacent_cells())
            .filter_map(|k| U2::adjacent_cell(&cell, k))
            .collect();
        assert_eq!(cells.len(), 6);
        assert!(cells.iter().all(|c| c[0] >= i32::MAX - 1));
    }

    #[test]
    fn grid_cell_floors_negative() {
        let cell = grid_cell(&vec2(-0.5, 3.9), 2.0);
        assert_eq!(&cell[..], &[-1, 1]);
    }
}
