//! Host kernel launches.
//!
//! A kernel is a host function resolved by name through
//! [`HostKernels`](crate::thunk::HostKernels). [`KernelThunk`] invokes it
//! once per point of a three-dimensional thread grid. With an intra-op pool
//! in the execute params the invocations are spread across the pool and the
//! returned event resolves when the last one finishes; otherwise they run in
//! order on the calling thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock};
use smallvec::SmallVec;

use crate::buffer::{BufferAllocations, BufferSlice, BufferUse};
use crate::error::{Error, Result};
use crate::sync::{promise, ExecuteEvent, Promise};
use crate::thunk::{BufferUses, ExecuteParams, HostKernels, Thunk, ThunkInfo, ThunkKind};
use crate::tracing_compat::trace;

/// An invocable host kernel.
pub type HostKernel = Arc<dyn Fn(&KernelCallFrame<'_>) -> Result<()> + Send + Sync>;

/// Extent of the kernel thread grid, or a point inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadDim {
    /// Innermost dimension.
    pub x: u64,
    /// Middle dimension.
    pub y: u64,
    /// Outermost dimension.
    pub z: u64,
}

impl ThreadDim {
    /// A single invocation.
    pub const ONE: Self = Self::new(1, 1, 1);

    /// A grid of `x * y * z` invocations.
    #[must_use]
    pub const fn new(x: u64, y: u64, z: u64) -> Self {
        Self { x, y, z }
    }

    /// Number of points in the grid.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.x.saturating_mul(self.y).saturating_mul(self.z)
    }

    /// The point with linear index `linear`, x varying fastest.
    #[must_use]
    pub const fn point(&self, linear: u64) -> Self {
        let x = if self.x == 0 { 1 } else { self.x };
        let y = if self.y == 0 { 1 } else { self.y };
        Self {
            x: linear % x,
            y: (linear / x) % y,
            z: linear / x.saturating_mul(y),
        }
    }
}

impl Default for ThreadDim {
    fn default() -> Self {
        Self::ONE
    }
}

/// What a kernel sees for one invocation.
///
/// Guards borrowed from the frame lock the whole slot; a kernel must not hold
/// an argument and a result guard on the same slot at once.
pub struct KernelCallFrame<'a> {
    thread: ThreadDim,
    thread_dim: ThreadDim,
    arguments: &'a [BufferSlice],
    results: &'a [BufferSlice],
    buffers: &'a BufferAllocations,
}

impl<'a> KernelCallFrame<'a> {
    /// This invocation's point in the grid.
    #[must_use]
    pub const fn thread(&self) -> ThreadDim {
        self.thread
    }

    /// The whole grid.
    #[must_use]
    pub const fn thread_dim(&self) -> ThreadDim {
        self.thread_dim
    }

    /// Number of argument buffers.
    #[must_use]
    pub fn num_arguments(&self) -> usize {
        self.arguments.len()
    }

    /// Number of result buffers.
    #[must_use]
    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    /// Reads argument `i`.
    pub fn argument(&self, i: usize) -> Result<MappedRwLockReadGuard<'a, [u8]>> {
        let slice = self.arguments.get(i).copied().ok_or_else(|| {
            Error::invalid_argument(format!("kernel has no argument {i}"))
        })?;
        self.buffers.read(slice)
    }

    /// Writes result `i`.
    pub fn result(&self, i: usize) -> Result<MappedRwLockWriteGuard<'a, [u8]>> {
        let slice = self
            .results
            .get(i)
            .copied()
            .ok_or_else(|| Error::invalid_argument(format!("kernel has no result {i}")))?;
        self.buffers.write(slice)
    }
}

impl fmt::Debug for KernelCallFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCallFrame")
            .field("thread", &self.thread)
            .field("thread_dim", &self.thread_dim)
            .field("arguments", &self.arguments)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of host kernels.
#[derive(Default)]
pub struct HostKernelRegistry {
    kernels: RwLock<HashMap<String, HostKernel>>,
}

impl HostKernelRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `kernel` under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&KernelCallFrame<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.kernels.write().insert(name.into(), Arc::new(kernel));
    }

    /// Number of registered kernels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kernels.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernels.read().is_empty()
    }
}

impl HostKernels for HostKernelRegistry {
    fn find(&self, name: &str) -> Result<HostKernel> {
        self.kernels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("host kernel", name))
    }
}

impl fmt::Debug for HostKernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.kernels.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("HostKernelRegistry")
            .field("kernels", &names)
            .finish()
    }
}

type Slices = SmallVec<[BufferSlice; 4]>;

/// Launches a named host kernel over a thread grid.
pub struct KernelThunk {
    info: ThunkInfo,
    kernel_name: String,
    arguments: Arc<Slices>,
    results: Arc<Slices>,
    thread_dim: ThreadDim,
    kernel: Mutex<Option<HostKernel>>,
}

impl KernelThunk {
    /// A launch of `kernel_name` reading `arguments` and writing `results`.
    #[must_use]
    pub fn new(
        info: ThunkInfo,
        kernel_name: impl Into<String>,
        arguments: impl IntoIterator<Item = BufferSlice>,
        results: impl IntoIterator<Item = BufferSlice>,
        thread_dim: ThreadDim,
    ) -> Self {
        Self {
            info,
            kernel_name: kernel_name.into(),
            arguments: Arc::new(arguments.into_iter().collect()),
            results: Arc::new(results.into_iter().collect()),
            thread_dim,
            kernel: Mutex::new(None),
        }
    }

    /// Kernel name resolved at first launch.
    #[must_use]
    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    /// Thread grid.
    #[must_use]
    pub const fn thread_dim(&self) -> ThreadDim {
        self.thread_dim
    }

    fn resolve(&self, kernels: &dyn HostKernels) -> Result<HostKernel> {
        let mut cached = self.kernel.lock();
        if let Some(kernel) = cached.as_ref() {
            return Ok(Arc::clone(kernel));
        }
        let kernel = kernels.find(&self.kernel_name)?;
        *cached = Some(Arc::clone(&kernel));
        Ok(kernel)
    }

    fn launch(&self, params: &ExecuteParams) -> Result<ExecuteEvent> {
        let kernel = self.resolve(params.host_kernels()?)?;
        let count = self.thread_dim.count();
        trace!(kernel = %self.kernel_name, invocations = count, "launching host kernel");

        let pool = match params.intra_op_threadpool() {
            Some(pool) if count > 1 => Arc::clone(pool),
            _ => {
                for linear in 0..count {
                    invoke(
                        &kernel,
                        self.thread_dim,
                        linear,
                        &self.arguments,
                        &self.results,
                        params.buffer_allocations(),
                    )?;
                }
                return Ok(ExecuteEvent::ok());
            }
        };

        let (done, event) = promise();
        let launch = Arc::new(ParallelLaunch {
            remaining: AtomicU64::new(count),
            first_error: Mutex::new(None),
            done: Mutex::new(Some(done)),
        });
        for linear in 0..count {
            let launch = Arc::clone(&launch);
            let kernel = Arc::clone(&kernel);
            let arguments = Arc::clone(&self.arguments);
            let results = Arc::clone(&self.results);
            let params = params.clone();
            let thread_dim = self.thread_dim;
            pool.run(Box::new(move || {
                let outcome = invoke(
                    &kernel,
                    thread_dim,
                    linear,
                    &arguments,
                    &results,
                    params.buffer_allocations(),
                );
                launch.finish(linear, outcome);
            }));
        }
        Ok(event)
    }
}

fn invoke(
    kernel: &HostKernel,
    thread_dim: ThreadDim,
    linear: u64,
    arguments: &[BufferSlice],
    results: &[BufferSlice],
    buffers: &BufferAllocations,
) -> Result<()> {
    kernel(&KernelCallFrame {
        thread: thread_dim.point(linear),
        thread_dim,
        arguments,
        results,
        buffers,
    })
}

struct ParallelLaunch {
    remaining: AtomicU64,
    first_error: Mutex<Option<(u64, Error)>>,
    done: Mutex<Option<Promise<()>>>,
}

impl ParallelLaunch {
    fn finish(&self, linear: u64, outcome: Result<()>) {
        if let Err(e) = outcome {
            let mut first = self.first_error.lock();
            if first.as_ref().map_or(true, |(i, _)| linear < *i) {
                *first = Some((linear, e));
            }
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let error = self.first_error.lock().take();
            if let Some(done) = self.done.lock().take() {
                done.set_result(error.map_or(Ok(()), |(_, e)| Err(e)));
            }
        }
    }
}

impl Thunk for KernelThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Kernel
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        self.arguments
            .iter()
            .copied()
            .map(BufferUse::read)
            .chain(self.results.iter().copied().map(BufferUse::write))
            .collect()
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        self.launch(params).unwrap_or_else(ExecuteEvent::failed)
    }
}

impl fmt::Debug for KernelThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelThunk")
            .field("info", &self.info)
            .field("kernel_name", &self.kernel_name)
            .field("arguments", &self.arguments)
            .field("results", &self.results)
            .field("thread_dim", &self.thread_dim)
            .finish_non_exhaustive()
    }
}
