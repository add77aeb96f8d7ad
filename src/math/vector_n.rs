use cgmath::MetricSpace;
use generic_array::GenericArray;
use num::Zero;
use std::ops::{Add, AddAssign, Deref, DerefMut, Div, Mul, MulAssign, Neg, Sub, SubAssign};
use typenum::{U2, U3};

use super::{Dimension, Real};

/// Fixed size vector over the particle field dimension.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VectorN<N: Dimension>(pub N::Array);

impl<N: Dimension> VectorN<N> {
    pub fn from_elem(elem: Real) -> Self {
        let mut v = Self::default();
        for x in v.iter_mut() {
            *x = elem;
        }
        v
    }

    pub fn from_slice(values: &[Real]) -> Self {
        debug_assert_eq!(values.len(), N::DIM);
        let mut v = Self::default();
        v.copy_from_slice(values);
        v
    }

    pub fn dot(&self, other: &Self) -> Real {
        self.iter().zip(other.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn norm2(&self) -> Real {
        self.dot(self)
    }

    pub fn norm(&self) -> Real {
        self.norm2().sqrt()
    }
}

impl<N: Dimension> Default for VectorN<N> {
    fn default() -> Self {
        VectorN(N::Array::default())
    }
}

impl<N: Dimension> Zero for VectorN<N> {
    #[inline]
    fn zero() -> Self {
        Self::default()
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.iter().all(|x| *x == 0.0)
    }
}

impl<N: Dimension> Add for VectorN<N> {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl<N: Dimension> AddAssign for VectorN<N> {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.iter_mut().zip(rhs.iter()) {
            *a += *b;
        }
    }
}

impl<N: Dimension> Sub for VectorN<N> {
    type Output = Self;
    fn sub(mut self, rhs: Self) -> Self::Output {
        self -= rhs;
        self
    }
}

impl<'a, N: Dimension> Sub for &'a VectorN<N> {
    type Output = VectorN<N>;
    fn sub(self, rhs: Self) -> Self::Output {
        *self - *rhs
    }
}

impl<N: Dimension> SubAssign for VectorN<N> {
    fn sub_assign(&mut self, rhs: Self) {
        for (a, b) in self.iter_mut().zip(rhs.iter()) {
            *a -= *b;
        }
    }
}

impl<N: Dimension> Mul<Real> for VectorN<N> {
    type Output = Self;
    fn mul(mut self, rhs: Real) -> Self::Output {
        self *= rhs;
        self
    }
}

impl<N: Dimension> Mul<VectorN<N>> for Real {
    type Output = VectorN<N>;
    fn mul(self, rhs: VectorN<N>) -> Self::Output {
        rhs * self
    }
}

impl<N: Dimension> MulAssign<Real> for VectorN<N> {
    fn mul_assign(&mut self, rhs: Real) {
        for a in self.iter_mut() {
            *a *= rhs;
        }
    }
}

impl<N: Dimension> Div<Real> for VectorN<N> {
    type Output = Self;
    fn div(mut self, rhs: Real) -> Self::Output {
        for a in self.iter_mut() {
            *a /= rhs;
        }
        self
    }
}

impl<N: Dimension> Neg for VectorN<N> {
    type Output = Self;
    fn neg(self) -> Self::Output {
        self * -1.0
    }
}

impl<N: Dimension> MetricSpace for VectorN<N> {
    type Metric = Real;

    fn distance2(self, other: Self) -> Real {
        (self - other).norm2()
    }

    fn distance(self, other: Self) -> Real {
        (self - other).norm()
    }
}

impl<N: Dimension> Deref for VectorN<N> {
    type Target = [Real];
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl<N: Dimension> DerefMut for VectorN<N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl From<VectorN<U2>> for [Real; 2] {
    fn from(v: VectorN<U2>) -> Self {
        [v[0], v[1]]
    }
}

impl From<VectorN<U3>> for [Real; 3] {
    fn from(v: VectorN<U3>) -> Self {
        [v[0], v[1], v[2]]
    }
}

pub fn vec2(x: Real, y: Real) -> VectorN<U2> {
    VectorN(GenericArray::clone_from_slice(&[x, y]))
}

pub fn vec3(x: Real, y: Real, z: Real) -> VectorN<U3> {
    VectorN(GenericArray::clone_from_slice(&[x, y, z]))
}
