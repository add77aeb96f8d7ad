//! Execution strategy for per-particle passes.
//!
//! Every pass of a solver step is an indexed loop over particles where
//! iteration `i` only writes slot `i`. The executor decides whether those
//! loops run sequentially, on the global rayon pool or on a dedicated pool.

use rayon::prelude::*;
use rayon::ThreadPool;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum ParallelExecutor {
    Sequential,
    Rayon,
    Pool(Arc<ThreadPool>),
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        ParallelExecutor::Rayon
    }
}

impl fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParallelExecutor::Sequential => write!(f, "Sequential"),
            ParallelExecutor::Rayon => write!(f, "Rayon"),
            ParallelExecutor::Pool(pool) => write!(f, "Pool({} threads)", pool.current_num_threads()),
        }
    }
}

impl ParallelExecutor {
    /// Executor backed by a dedicated pool with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("sph-worker-{}", i))
            .build()?;
        Ok(ParallelExecutor::Pool(Arc::new(pool)))
    }

    /// Run `f(i, &mut data[i])` for every element.
    pub fn for_each_mut<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        match self {
            ParallelExecutor::Sequential => {
                for (i, x) in data.iter_mut().enumerate() {
                    f(i, x);
                }
            }
            ParallelExecutor::Rayon => {
                data.par_iter_mut().enumerate().for_each(|(i, x)| f(i, x));
            }
            ParallelExecutor::Pool(pool) => pool.install(|| {
                data.par_iter_mut().enumerate().for_each(|(i, x)| f(i, x));
            }),
        }
    }

    /// Run `f(i, &mut a[i], &mut b[i])` for every index of two equally long slices.
    pub fn for_each_zip_mut<A, B, F>(&self, a: &mut [A], b: &mut [B], f: F)
    where
        A: Send,
        B: Send,
        F: Fn(usize, &mut A, &mut B) + Send + Sync,
    {
        debug_assert_eq!(a.len(), b.len());
        match self {
            ParallelExecutor::Sequential => {
                for (i, (x, y)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
                    f(i, x, y);
                }
            }
            ParallelExecutor::Rayon => {
                a.par_iter_mut()
                    .zip(b.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (x, y))| f(i, x, y));
            }
            ParallelExecutor::Pool(pool) => pool.install(|| {
                a.par_iter_mut()
                    .zip(b.par_iter_mut())
                    .enumerate()
                    .for_each(|(i, (x, y))| f(i, x, y));
            }),
        }
    }

    /// Collect `f(i)` for `i` in `0..len`.
    pub fn map<T, F>(&self, len: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Send + Sync,
    {
        match self {
            ParallelExecutor::Sequential => (0..len).map(f).collect(),
            ParallelExecutor::Rayon => (0..len).into_par_iter().map(f).collect(),
            ParallelExecutor::Pool(pool) => pool.install(|| (0..len).into_par_iter().map(f).collect()),
        }
    }

    /// Fold `f(i)` for `i` in `0..len` with the associative `op`.
    pub fn reduce<T, F, R>(&self, len: usize, identity: T, f: F, op: R) -> T
    where
        T: Copy + Send + Sync,
        F: Fn(usize) -> T + Send + Sync,
        R: Fn(T, T) -> T + Send + Sync,
    {
        match self {
            ParallelExecutor::Sequential => (0..len).map(f).fold(identity, |a, b| op(a, b)),
            ParallelExecutor::Rayon => (0..len)
                .into_par_iter()
                .map(f)
                .reduce(|| identity, |a, b| op(a, b)),
            ParallelExecutor::Pool(pool) => pool.install(|| {
                (0..len)
                    .into_par_iter()
                    .map(f)
                    .reduce(|| identity, |a, b| op(a, b))
            }),
        }
    }
}
