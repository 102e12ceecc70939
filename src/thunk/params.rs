//! Execution context bundles.
//!
//! [`ExecuteParams`] is the flat, immutable snapshot every operation receives.
//! It is assembled once per run, either by hand through
//! [`ExecuteParams::builder`] or from [`RunOptions`] through
//! [`ExecuteParams::for_program`], which validates and attaches only the
//! optional bundles the program actually needs. Operations read the optional
//! parts through accessors that fail with a configuration error when absent,
//! so an operation never observes a half-built context.

use std::fmt;
use std::sync::Arc;

use crate::buffer::BufferAllocations;
use crate::collective::{CollectivesInterface, DeviceAssignment};
use crate::device::{DeviceMemoryAllocator, FfiExecutionContext, Stream};
use crate::error::{Error, Result};
use crate::runtime::TaskRunner;
use crate::thunk::{RunOptions, ThunkKind, ThunkSequence};
use crate::thunks::custom_call::CustomCallRegistry;
use crate::thunks::kernel::HostKernel;
use crate::types::{GlobalDeviceId, RunId};
use crate::xfeed::XfeedManager;

/// Resolves host kernels by name.
///
/// At run time this is typically backed by a compiler that produces kernels
/// on demand.
pub trait HostKernels: Send + Sync {
    /// Looks up `name`; a missing kernel is a lookup error.
    fn find(&self, name: &str) -> Result<HostKernel>;
}

fn resolve_device_ordinal(run_options: &RunOptions) -> Result<i32> {
    match (run_options.device_ordinal(), run_options.stream()) {
        (Some(ordinal), Some(stream)) if ordinal != stream.device_ordinal() => {
            Err(Error::configuration(format!(
                "device ordinal {ordinal} disagrees with stream device ordinal {}",
                stream.device_ordinal()
            )))
        }
        (Some(ordinal), _) => Ok(ordinal),
        (None, Some(stream)) => Ok(stream.device_ordinal()),
        (None, None) => Ok(0),
    }
}

/// Context for collective operations.
pub struct CollectiveExecuteParams {
    run_id: RunId,
    local_device_ordinal: i32,
    global_device_id: GlobalDeviceId,
    device_assignment: Arc<DeviceAssignment>,
    collectives: Arc<dyn CollectivesInterface>,
}

impl CollectiveExecuteParams {
    /// Derives and validates the collective context from run options.
    ///
    /// Fails with a configuration error if the device assignment, run id or
    /// collectives transport is missing, or if the local device is not part
    /// of the assignment.
    pub fn create(run_options: &RunOptions) -> Result<Self> {
        let local_device_ordinal = resolve_device_ordinal(run_options)?;
        let device_assignment = run_options.device_assignment().cloned().ok_or_else(|| {
            Error::configuration("device assignment is required for collective operations")
        })?;
        let run_id = run_options.run_id().ok_or_else(|| {
            Error::configuration("run id is required for collective operations")
        })?;
        let collectives = run_options.collectives().cloned().ok_or_else(|| {
            Error::configuration("collectives transport is required for collective operations")
        })?;
        let global_device_id = GlobalDeviceId(i64::from(local_device_ordinal));
        device_assignment.logical_id(global_device_id)?;
        Ok(Self {
            run_id,
            local_device_ordinal,
            global_device_id,
            device_assignment,
            collectives,
        })
    }

    /// Run id disambiguating concurrent invocations.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Local device ordinal.
    #[must_use]
    pub const fn local_device_ordinal(&self) -> i32 {
        self.local_device_ordinal
    }

    /// Global id of the local device.
    #[must_use]
    pub const fn global_device_id(&self) -> GlobalDeviceId {
        self.global_device_id
    }

    /// Device assignment.
    #[must_use]
    pub fn device_assignment(&self) -> &DeviceAssignment {
        &self.device_assignment
    }

    /// Collectives transport.
    #[must_use]
    pub fn collectives(&self) -> &dyn CollectivesInterface {
        self.collectives.as_ref()
    }
}

impl fmt::Debug for CollectiveExecuteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectiveExecuteParams")
            .field("run_id", &self.run_id)
            .field("local_device_ordinal", &self.local_device_ordinal)
            .field("global_device_id", &self.global_device_id)
            .field("device_assignment", &self.device_assignment)
            .finish_non_exhaustive()
    }
}

/// Context for custom calls.
pub struct CustomCallExecuteParams {
    device_ordinal: i32,
    stream: Option<Arc<Stream>>,
    allocator: Option<Arc<dyn DeviceMemoryAllocator>>,
    ffi_context: Option<Arc<FfiExecutionContext>>,
    registry: Arc<CustomCallRegistry>,
}

impl CustomCallExecuteParams {
    /// Derives the custom call context from run options.
    ///
    /// The device ordinal comes from the options, else from the stream, else
    /// defaults to 0; an ordinal that disagrees with the stream is rejected.
    pub fn create(run_options: &RunOptions) -> Result<Self> {
        Ok(Self {
            device_ordinal: resolve_device_ordinal(run_options)?,
            stream: run_options.stream().cloned(),
            allocator: run_options.allocator().cloned(),
            ffi_context: run_options.ffi_context().cloned(),
            registry: run_options
                .custom_calls()
                .cloned()
                .unwrap_or_else(|| Arc::clone(CustomCallRegistry::global())),
        })
    }

    /// Device ordinal.
    #[must_use]
    pub const fn device_ordinal(&self) -> i32 {
        self.device_ordinal
    }

    /// Stream, if one was supplied.
    #[must_use]
    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_deref()
    }

    /// Scratch allocator, if one was supplied.
    #[must_use]
    pub fn allocator(&self) -> Option<&dyn DeviceMemoryAllocator> {
        self.allocator.as_deref()
    }

    /// Foreign-function context, if one was supplied.
    #[must_use]
    pub fn ffi_context(&self) -> Option<&FfiExecutionContext> {
        self.ffi_context.as_deref()
    }

    /// Handler registry.
    #[must_use]
    pub fn registry(&self) -> &CustomCallRegistry {
        &self.registry
    }
}

impl fmt::Debug for CustomCallExecuteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCallExecuteParams")
            .field("device_ordinal", &self.device_ordinal)
            .field("stream", &self.stream)
            .field("allocator", &self.allocator)
            .field("ffi_context", &self.ffi_context)
            .finish_non_exhaustive()
    }
}

/// Everything an operation needs to run, fixed for the duration of a run.
#[derive(Clone)]
pub struct ExecuteParams {
    buffer_allocations: Arc<BufferAllocations>,
    host_kernels: Option<Arc<dyn HostKernels>>,
    xfeed: Option<Arc<XfeedManager>>,
    intra_op_threadpool: Option<Arc<dyn TaskRunner>>,
    task_runner: Option<Arc<dyn TaskRunner>>,
    collective_params: Option<Arc<CollectiveExecuteParams>>,
    custom_call_params: Option<Arc<CustomCallExecuteParams>>,
}

impl ExecuteParams {
    /// Starts a bundle over `buffers` with every optional part unset.
    #[must_use]
    pub fn builder(buffers: Arc<BufferAllocations>) -> ExecuteParamsBuilder {
        ExecuteParamsBuilder {
            params: Self {
                buffer_allocations: buffers,
                host_kernels: None,
                xfeed: None,
                intra_op_threadpool: None,
                task_runner: None,
                collective_params: None,
                custom_call_params: None,
            },
        }
    }

    /// Builds the bundle `program` needs from `run_options`.
    ///
    /// Nested sequences are inspected too. Missing context for an operation
    /// category present in the program is a configuration error.
    pub fn for_program(
        run_options: &RunOptions,
        program: &ThunkSequence,
        buffers: Arc<BufferAllocations>,
    ) -> Result<Self> {
        let mut builder = Self::builder(buffers);
        if let Some(runner) = run_options.task_runner() {
            builder = builder.task_runner(Arc::clone(runner));
        }
        if let Some(pool) = run_options.intra_op_threadpool() {
            builder = builder.intra_op_threadpool(Arc::clone(pool));
        }
        if program.contains_kind(&ThunkKind::needs_collective_params) {
            builder = builder.collective_params(CollectiveExecuteParams::create(run_options)?);
        }
        if program.contains_kind(&|k| k == ThunkKind::CustomCall) {
            builder = builder.custom_call_params(CustomCallExecuteParams::create(run_options)?);
        }
        if program.contains_kind(&|k| matches!(k, ThunkKind::Infeed | ThunkKind::Outfeed)) {
            let xfeed = run_options.xfeed().ok_or_else(|| {
                Error::configuration("program uses infeed/outfeed but no xfeed manager was provided")
            })?;
            builder = builder.xfeed(Arc::clone(xfeed));
        }
        if program.contains_kind(&|k| k == ThunkKind::Kernel) {
            let kernels = run_options.host_kernels().ok_or_else(|| {
                Error::configuration("program launches host kernels but no resolver was provided")
            })?;
            builder = builder.host_kernels(Arc::clone(kernels));
        }
        Ok(builder.build())
    }

    /// The buffer allocation table.
    #[must_use]
    pub fn buffer_allocations(&self) -> &BufferAllocations {
        &self.buffer_allocations
    }

    /// Host kernel resolver.
    pub fn host_kernels(&self) -> Result<&dyn HostKernels> {
        self.host_kernels
            .as_deref()
            .ok_or_else(|| Error::configuration("host kernel resolver is not set"))
    }

    /// Infeed/outfeed queues.
    pub fn xfeed(&self) -> Result<&XfeedManager> {
        self.xfeed
            .as_deref()
            .ok_or_else(|| Error::configuration("xfeed manager is not set"))
    }

    /// Pool for intra-op parallelism, if any.
    #[must_use]
    pub fn intra_op_threadpool(&self) -> Option<&Arc<dyn TaskRunner>> {
        self.intra_op_threadpool.as_ref()
    }

    /// Runner used to schedule operations, if any.
    #[must_use]
    pub fn task_runner(&self) -> Option<&Arc<dyn TaskRunner>> {
        self.task_runner.as_ref()
    }

    /// Collective context.
    pub fn collective_params(&self) -> Result<&CollectiveExecuteParams> {
        self.collective_params
            .as_deref()
            .ok_or_else(|| Error::configuration("collective execute params are not set"))
    }

    /// Custom call context.
    pub fn custom_call_params(&self) -> Result<&CustomCallExecuteParams> {
        self.custom_call_params
            .as_deref()
            .ok_or_else(|| Error::configuration("custom call execute params are not set"))
    }
}

impl fmt::Debug for ExecuteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteParams")
            .field("buffer_allocations", &self.buffer_allocations)
            .field("host_kernels", &self.host_kernels.is_some())
            .field("xfeed", &self.xfeed.is_some())
            .field("intra_op_threadpool", &self.intra_op_threadpool.is_some())
            .field("task_runner", &self.task_runner.is_some())
            .field("collective_params", &self.collective_params)
            .field("custom_call_params", &self.custom_call_params)
            .finish()
    }
}

/// Assembles an [`ExecuteParams`].
#[derive(Debug)]
pub struct ExecuteParamsBuilder {
    params: ExecuteParams,
}

impl ExecuteParamsBuilder {
    /// Sets the host kernel resolver.
    #[must_use]
    pub fn host_kernels(mut self, kernels: Arc<dyn HostKernels>) -> Self {
        self.params.host_kernels = Some(kernels);
        self
    }

    /// Sets the infeed/outfeed queues.
    #[must_use]
    pub fn xfeed(mut self, xfeed: Arc<XfeedManager>) -> Self {
        self.params.xfeed = Some(xfeed);
        self
    }

    /// Sets the intra-op pool.
    #[must_use]
    pub fn intra_op_threadpool(mut self, pool: Arc<dyn TaskRunner>) -> Self {
        self.params.intra_op_threadpool = Some(pool);
        self
    }

    /// Sets the runner used to schedule operations.
    #[must_use]
    pub fn task_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.params.task_runner = Some(runner);
        self
    }

    /// Attaches the collective context.
    #[must_use]
    pub fn collective_params(mut self, params: CollectiveExecuteParams) -> Self {
        self.params.collective_params = Some(Arc::new(params));
        self
    }

    /// Attaches the custom call context.
    #[must_use]
    pub fn custom_call_params(mut self, params: CustomCallExecuteParams) -> Self {
        self.params.custom_call_params = Some(Arc::new(params));
        self
    }

    /// Finishes the bundle.
    #[must_use]
    pub fn build(self) -> ExecuteParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferSlice;
    use crate::collective::InProcessCollectives;
    use crate::error::ErrorKind;
    use crate::thunk::ThunkInfo;
    use crate::thunks::{CopyThunk, ReplicaIdThunk};

    fn collective_options() -> RunOptions {
        RunOptions::new()
            .with_device_ordinal(1)
            .with_run_id(RunId::from_raw(5))
            .with_device_assignment(Arc::new(DeviceAssignment::replicated(2).expect("da")))
            .with_collectives(Arc::new(InProcessCollectives::default()))
    }

    #[test]
    fn collective_params_require_device_assignment() {
        let options = RunOptions::new()
            .with_run_id(RunId::from_raw(1))
            .with_collectives(Arc::new(InProcessCollectives::default()));
        let err = CollectiveExecuteParams::create(&options).expect_err("no assignment");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn collective_params_require_run_id_and_transport() {
        let da = Arc::new(DeviceAssignment::replicated(1).expect("da"));
        let no_run = RunOptions::new()
            .with_device_assignment(Arc::clone(&da))
            .with_collectives(Arc::new(InProcessCollectives::default()));
        assert!(CollectiveExecuteParams::create(&no_run).is_err());
        let no_transport = RunOptions::new()
            .with_device_assignment(da)
            .with_run_id(RunId::from_raw(1));
        assert!(CollectiveExecuteParams::create(&no_transport).is_err());
    }

    #[test]
    fn collective_params_derive_device() {
        let params = CollectiveExecuteParams::create(&collective_options()).expect("params");
        assert_eq!(params.global_device_id(), GlobalDeviceId(1));
        assert_eq!(params.run_id(), RunId::from_raw(5));
        let off_grid = collective_options().with_device_ordinal(7);
        let err = CollectiveExecuteParams::create(&off_grid).expect_err("off grid");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn custom_call_params_reject_inconsistent_stream() {
        let options = RunOptions::new()
            .with_device_ordinal(0)
            .with_stream(Arc::new(Stream::new(3)));
        let err = CustomCallExecuteParams::create(&options).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let from_stream = RunOptions::new().with_stream(Arc::new(Stream::new(3)));
        let params = CustomCallExecuteParams::create(&from_stream).expect("params");
        assert_eq!(params.device_ordinal(), 3);
    }

    #[test]
    fn for_program_attaches_only_needed_bundles() {
        let buffers = Arc::new(BufferAllocations::with_sizes(&[4, 4]));
        let mut program = ThunkSequence::empty();
        program.push(
            CopyThunk::new(
                ThunkInfo::new("copy"),
                BufferSlice::new(0, 0, 4),
                BufferSlice::new(1, 0, 4),
            )
            .expect("copy"),
        );
        let params =
            ExecuteParams::for_program(&RunOptions::new(), &program, Arc::clone(&buffers))
                .expect("params");
        assert!(params.collective_params().is_err());
        assert!(params.custom_call_params().is_err());

        program.push(ReplicaIdThunk::new(ThunkInfo::new("rid"), BufferSlice::new(0, 0, 4)));
        let err = ExecuteParams::for_program(&RunOptions::new(), &program, Arc::clone(&buffers))
            .expect_err("needs collectives");
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let params = ExecuteParams::for_program(&collective_options(), &program, buffers)
            .expect("params");
        assert!(params.collective_params().is_ok());
    }
}
