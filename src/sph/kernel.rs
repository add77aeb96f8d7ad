//! Smoothing Kernels

use std::marker::PhantomData;

use crate::math::{Dimension, Real, VectorN};
use crate::report::CompatibilityReport;

pub trait Kernel<N: Dimension>: Send + Sync {
    /// Derive all internal constants from the support radius.
    fn initialize(&mut self, kernel_support: Real);

    fn kernel_support(&self) -> Real;

    /// `W(position - neighbor)`
    fn value(&self, neighbor: &VectorN<N>, position: &VectorN<N>) -> Real;

    /// Gradient of `W(position - neighbor)` with respect to `position`.
    fn gradient(&self, neighbor: &VectorN<N>, position: &VectorN<N>) -> VectorN<N>;

    /// Gradient with respect to `neighbor`.
    fn gradient_reversed(&self, neighbor: &VectorN<N>, position: &VectorN<N>) -> VectorN<N> {
        -self.gradient(neighbor, position)
    }

    fn create_compatibility_report(&self, report: &mut CompatibilityReport);
}

/// Cubic spline kernel with support `2h`.
///
/// Ref: [MDM03] Sec 3.5 for the kernel formulation in general,
///      Monaghan 1992 for the spline itself.
#[derive(Clone, Debug)]
pub struct CubicSpline<N: Dimension> {
    kernel_support: Real,
    h: Real,
    alpha: Real,
    dim: PhantomData<N>,
}

impl<N: Dimension> CubicSpline<N> {
    pub fn new(kernel_support: Real) -> Self {
        let mut kernel = CubicSpline {
            kernel_support,
            h: 0.0,
            alpha: 0.0,
            dim: PhantomData,
        };
        kernel.initialize(kernel_support);
        kernel
    }

    /// Kernel value for a separation of length `radius`.
    pub fn w(&self, radius: Real) -> Real {
        debug_assert!(radius >= 0.0);
        let q = radius / self.h;
        let w = if q < 1.0 {
            (2.0 - q).powi(3) - 4.0 * (1.0 - q).powi(3)
        } else if q < 2.0 {
            (2.0 - q).powi(3)
        } else {
            0.0
        };
        self.alpha * w
    }

    /// Radial derivative `dW/dr`, never positive.
    pub fn grad_w(&self, radius: Real) -> Real {
        debug_assert!(radius >= 0.0);
        let q = radius / self.h;
        let dw = if q < 1.0 {
            -3.0 * (2.0 - q).powi(2) + 12.0 * (1.0 - q).powi(2)
        } else if q < 2.0 {
            -3.0 * (2.0 - q).powi(2)
        } else {
            0.0
        };
        self.alpha * dw / self.h
    }
}

impl<N: Dimension> Kernel<N> for CubicSpline<N> {
    fn initialize(&mut self, kernel_support: Real) {
        self.kernel_support = kernel_support;
        self.h = kernel_support / 2.0;
        self.alpha = if self.h > 0.0 {
            N::cubic_spline_alpha(self.h)
        } else {
            0.0
        };
    }

    fn kernel_support(&self) -> Real {
        self.kernel_support
    }

    fn value(&self, neighbor: &VectorN<N>, position: &VectorN<N>) -> Real {
        self.w((position - neighbor).norm())
    }

    fn gradient(&self, neighbor: &VectorN<N>, position: &VectorN<N>) -> VectorN<N> {
        let r = position - neighbor;
        let length = r.norm();
        if length <= Real::EPSILON {
            return VectorN::default();
        }
        r * (self.grad_w(length) / length)
    }

    fn create_compatibility_report(&self, report: &mut CompatibilityReport) {
        report.begin_scope("CubicSpline");
        if self.kernel_support <= 0.0 {
            report.add_issue("Kernel support radius is smaller or equal to zero!");
        }
        report.end_scope();
    }
}
