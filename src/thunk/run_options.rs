//! Run-level options, the input from which per-run parameter bundles are
//! derived.

use std::fmt;
use std::sync::Arc;

use crate::collective::{CollectivesInterface, DeviceAssignment};
use crate::device::{DeviceMemoryAllocator, FfiExecutionContext, Stream};
use crate::runtime::TaskRunner;
use crate::thunk::HostKernels;
use crate::thunks::custom_call::CustomCallRegistry;
use crate::types::RunId;
use crate::xfeed::XfeedManager;

/// Everything a caller supplies for one invocation of a program.
///
/// Unset fields are only required when the program contains operations that
/// need them.
#[derive(Clone, Default)]
pub struct RunOptions {
    device_ordinal: Option<i32>,
    run_id: Option<RunId>,
    device_assignment: Option<Arc<DeviceAssignment>>,
    collectives: Option<Arc<dyn CollectivesInterface>>,
    stream: Option<Arc<Stream>>,
    allocator: Option<Arc<dyn DeviceMemoryAllocator>>,
    ffi_context: Option<Arc<FfiExecutionContext>>,
    custom_calls: Option<Arc<CustomCallRegistry>>,
    host_kernels: Option<Arc<dyn HostKernels>>,
    xfeed: Option<Arc<XfeedManager>>,
    intra_op_threadpool: Option<Arc<dyn TaskRunner>>,
    task_runner: Option<Arc<dyn TaskRunner>>,
}

impl RunOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local device ordinal.
    #[must_use]
    pub fn with_device_ordinal(mut self, ordinal: i32) -> Self {
        self.device_ordinal = Some(ordinal);
        self
    }

    /// Sets the run id shared by all participants of this invocation.
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Sets the device assignment.
    #[must_use]
    pub fn with_device_assignment(mut self, assignment: Arc<DeviceAssignment>) -> Self {
        self.device_assignment = Some(assignment);
        self
    }

    /// Sets the collectives transport.
    #[must_use]
    pub fn with_collectives(mut self, collectives: Arc<dyn CollectivesInterface>) -> Self {
        self.collectives = Some(collectives);
        self
    }

    /// Sets the stream.
    #[must_use]
    pub fn with_stream(mut self, stream: Arc<Stream>) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Sets the scratch allocator for custom calls.
    #[must_use]
    pub fn with_allocator(mut self, allocator: Arc<dyn DeviceMemoryAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Sets the foreign-function execution context.
    #[must_use]
    pub fn with_ffi_context(mut self, ctx: Arc<FfiExecutionContext>) -> Self {
        self.ffi_context = Some(ctx);
        self
    }

    /// Overrides the process-wide custom call registry.
    #[must_use]
    pub fn with_custom_calls(mut self, registry: Arc<CustomCallRegistry>) -> Self {
        self.custom_calls = Some(registry);
        self
    }

    /// Sets the host kernel resolver.
    #[must_use]
    pub fn with_host_kernels(mut self, kernels: Arc<dyn HostKernels>) -> Self {
        self.host_kernels = Some(kernels);
        self
    }

    /// Sets the infeed/outfeed queues.
    #[must_use]
    pub fn with_xfeed(mut self, xfeed: Arc<XfeedManager>) -> Self {
        self.xfeed = Some(xfeed);
        self
    }

    /// Sets the pool that parallel kernel launches run on.
    #[must_use]
    pub fn with_intra_op_threadpool(mut self, pool: Arc<dyn TaskRunner>) -> Self {
        self.intra_op_threadpool = Some(pool);
        self
    }

    /// Sets the runner used to schedule operations.
    #[must_use]
    pub fn with_task_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.task_runner = Some(runner);
        self
    }

    /// Explicit device ordinal, if set.
    #[must_use]
    pub fn device_ordinal(&self) -> Option<i32> {
        self.device_ordinal
    }

    /// Run id, if set.
    #[must_use]
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Device assignment, if set.
    #[must_use]
    pub fn device_assignment(&self) -> Option<&Arc<DeviceAssignment>> {
        self.device_assignment.as_ref()
    }

    /// Collectives transport, if set.
    #[must_use]
    pub fn collectives(&self) -> Option<&Arc<dyn CollectivesInterface>> {
        self.collectives.as_ref()
    }

    /// Stream, if set.
    #[must_use]
    pub fn stream(&self) -> Option<&Arc<Stream>> {
        self.stream.as_ref()
    }

    /// Allocator, if set.
    #[must_use]
    pub fn allocator(&self) -> Option<&Arc<dyn DeviceMemoryAllocator>> {
        self.allocator.as_ref()
    }

    /// Foreign-function context, if set.
    #[must_use]
    pub fn ffi_context(&self) -> Option<&Arc<FfiExecutionContext>> {
        self.ffi_context.as_ref()
    }

    /// Custom call registry override, if set.
    #[must_use]
    pub fn custom_calls(&self) -> Option<&Arc<CustomCallRegistry>> {
        self.custom_calls.as_ref()
    }

    /// Host kernel resolver, if set.
    #[must_use]
    pub fn host_kernels(&self) -> Option<&Arc<dyn HostKernels>> {
        self.host_kernels.as_ref()
    }

    /// Infeed/outfeed queues, if set.
    #[must_use]
    pub fn xfeed(&self) -> Option<&Arc<XfeedManager>> {
        self.xfeed.as_ref()
    }

    /// Intra-op pool, if set.
    #[must_use]
    pub fn intra_op_threadpool(&self) -> Option<&Arc<dyn TaskRunner>> {
        self.intra_op_threadpool.as_ref()
    }

    /// Operation scheduler, if set.
    #[must_use]
    pub fn task_runner(&self) -> Option<&Arc<dyn TaskRunner>> {
        self.task_runner.as_ref()
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("device_ordinal", &self.device_ordinal)
            .field("run_id", &self.run_id)
            .field("device_assignment", &self.device_assignment)
            .field("collectives", &self.collectives.is_some())
            .field("stream", &self.stream)
            .field("allocator", &self.allocator.is_some())
            .field("ffi_context", &self.ffi_context.is_some())
            .field("host_kernels", &self.host_kernels.is_some())
            .field("xfeed", &self.xfeed.is_some())
            .field("task_runner", &self.task_runner.is_some())
            .finish()
    }
}
