//! Custom calls into named, externally registered handlers.
//!
//! Handlers live in a [`CustomCallRegistry`]. Programs normally resolve
//! against the process-wide [`CustomCallRegistry::global`] table; a run can
//! substitute its own through
//! [`RunOptions::with_custom_calls`](crate::thunk::RunOptions::with_custom_calls).
//!
//! A missing handler is a lookup error. Any error a handler reports is
//! surfaced as an execution error naming the target, with the handler's
//! error kept as the source.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock};

use crate::buffer::{BufferAllocations, BufferSlice, BufferUse};
use crate::device::{DeviceMemoryAllocator, FfiExecutionContext, Stream};
use crate::error::{Error, ErrorKind, Result};
use crate::sync::ExecuteEvent;
use crate::thunk::{
    BufferUses, CustomCallExecuteParams, ExecuteParams, Thunk, ThunkInfo, ThunkKind,
};
use crate::tracing_compat::debug;

/// A registered custom call handler.
pub type CustomCallHandler = Arc<dyn Fn(&CustomCallFrame<'_>) -> Result<()> + Send + Sync>;

/// Arguments of one custom call invocation.
///
/// Operand and result guards lock the whole slot; do not hold two guards on
/// the same slot when one of them is a result.
pub struct CustomCallFrame<'a> {
    target_name: &'a str,
    backend_config: &'a str,
    operands: &'a [BufferSlice],
    results: &'a [BufferSlice],
    buffers: &'a BufferAllocations,
    params: &'a CustomCallExecuteParams,
}

impl<'a> CustomCallFrame<'a> {
    /// Name the handler was registered under.
    #[must_use]
    pub const fn target_name(&self) -> &'a str {
        self.target_name
    }

    /// Opaque configuration string attached by the compiler.
    #[must_use]
    pub const fn backend_config(&self) -> &'a str {
        self.backend_config
    }

    /// Number of operands.
    #[must_use]
    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    /// Number of results.
    #[must_use]
    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    /// Reads operand `i`.
    pub fn operand(&self, i: usize) -> Result<MappedRwLockReadGuard<'a, [u8]>> {
        let slice = self.operands.get(i).copied().ok_or_else(|| {
            Error::invalid_argument(format!("custom call has no operand {i}"))
        })?;
        self.buffers.read(slice)
    }

    /// Writes result `i`.
    pub fn result(&self, i: usize) -> Result<MappedRwLockWriteGuard<'a, [u8]>> {
        let slice = self.results.get(i).copied().ok_or_else(|| {
            Error::invalid_argument(format!("custom call has no result {i}"))
        })?;
        self.buffers.write(slice)
    }

    /// Device the call runs for.
    #[must_use]
    pub fn device_ordinal(&self) -> i32 {
        self.params.device_ordinal()
    }

    /// Stream, if the run supplied one.
    #[must_use]
    pub fn stream(&self) -> Option<&'a Stream> {
        self.params.stream()
    }

    /// Scratch allocator, if the run supplied one.
    #[must_use]
    pub fn allocator(&self) -> Option<&'a dyn DeviceMemoryAllocator> {
        self.params.allocator()
    }

    /// Foreign-function context, if the run supplied one.
    #[must_use]
    pub fn ffi_context(&self) -> Option<&'a FfiExecutionContext> {
        self.params.ffi_context()
    }
}

impl fmt::Debug for CustomCallFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCallFrame")
            .field("target_name", &self.target_name)
            .field("operands", &self.operands)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

/// Name-keyed table of custom call handlers.
#[derive(Default)]
pub struct CustomCallRegistry {
    handlers: RwLock<HashMap<String, CustomCallHandler>>,
}

impl CustomCallRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Arc<Self> {
        static GLOBAL: OnceLock<Arc<CustomCallRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new()))
    }

    /// Registers `handler` for `target`, replacing any previous entry.
    pub fn register<F>(&self, target: impl Into<String>, handler: F)
    where
        F: Fn(&CustomCallFrame<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().insert(target.into(), Arc::new(handler));
    }

    /// Looks up the handler for `target`.
    pub fn find(&self, target: &str) -> Result<CustomCallHandler> {
        self.handlers
            .read()
            .get(target)
            .cloned()
            .ok_or_else(|| Error::not_found("custom call target", target))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl fmt::Debug for CustomCallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomCallRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Calls a registered handler with operand and result buffers.
#[derive(Debug)]
pub struct CustomCallThunk {
    info: ThunkInfo,
    target_name: String,
    backend_config: String,
    operands: Vec<BufferSlice>,
    results: Vec<BufferSlice>,
}

impl CustomCallThunk {
    /// A call of `target_name`.
    #[must_use]
    pub fn new(
        info: ThunkInfo,
        target_name: impl Into<String>,
        operands: Vec<BufferSlice>,
        results: Vec<BufferSlice>,
    ) -> Self {
        Self {
            info,
            target_name: target_name.into(),
            backend_config: String::new(),
            operands,
            results,
        }
    }

    /// Attaches an opaque configuration string for the handler.
    #[must_use]
    pub fn with_backend_config(mut self, config: impl Into<String>) -> Self {
        self.backend_config = config.into();
        self
    }

    /// Handler name.
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    fn call(&self, params: &ExecuteParams) -> Result<()> {
        let call_params = params.custom_call_params()?;
        let handler = call_params.registry().find(&self.target_name)?;
        let frame = CustomCallFrame {
            target_name: &self.target_name,
            backend_config: &self.backend_config,
            operands: &self.operands,
            results: &self.results,
            buffers: params.buffer_allocations(),
            params: call_params,
        };
        handler(&frame).map_err(|e| {
            debug!(target = %self.target_name, error = %e, "custom call failed");
            let message = format!("custom call '{}' failed", self.target_name);
            if e.kind() == ErrorKind::Execution {
                e.with_message(message)
            } else {
                Error::execution(message).with_source(e)
            }
        })
    }
}

impl Thunk for CustomCallThunk {
    fn kind(&self) -> ThunkKind {
        ThunkKind::CustomCall
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> BufferUses {
        self.operands
            .iter()
            .copied()
            .map(BufferUse::read)
            .chain(self.results.iter().copied().map(BufferUse::write))
            .collect()
    }

    fn execute(&self, params: &ExecuteParams) -> ExecuteEvent {
        match self.call(params) {
            Ok(()) => ExecuteEvent::ok(),
            Err(e) => ExecuteEvent::failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thunk::RunOptions;
    use std::error::Error as _;

    struct Scale(u8);

    fn params(registry: Arc<CustomCallRegistry>, buffers: Arc<BufferAllocations>) -> ExecuteParams {
        let mut ffi = FfiExecutionContext::new();
        ffi.insert(Scale(3));
        let options = RunOptions::new()
            .with_device_ordinal(2)
            .with_custom_calls(registry)
            .with_ffi_context(Arc::new(ffi));
        ExecuteParams::builder(buffers)
            .custom_call_params(CustomCallExecuteParams::create(&options).expect("params"))
            .build()
    }

    fn registry() -> Arc<CustomCallRegistry> {
        let registry = CustomCallRegistry::new();
        registry.register("scale", |frame: &CustomCallFrame<'_>| {
            let factor = frame
                .ffi_context()
                .ok_or_else(|| Error::configuration("no ffi context"))?
                .lookup::<Scale>()?
                .0;
            let input = frame.operand(0)?.to_vec();
            let mut out = frame.result(0)?;
            for (o, i) in out.iter_mut().zip(input) {
                *o = i * factor;
            }
            Ok(())
        });
        registry.register("ordinal", |frame: &CustomCallFrame<'_>| {
            frame.result(0)?[0] = u8::try_from(frame.device_ordinal())
                .map_err(|_| Error::invalid_argument("negative ordinal"))?;
            Ok(())
        });
        registry.register("broken", |_: &CustomCallFrame<'_>| {
            Err(Error::invalid_argument("bad operand layout"))
        });
        Arc::new(registry)
    }

    #[test]
    fn handler_sees_buffers_and_ffi_context() {
        let buffers = Arc::new(BufferAllocations::new(vec![vec![1, 2, 3], vec![0; 3]]));
        let params = params(registry(), Arc::clone(&buffers));
        let thunk = CustomCallThunk::new(
            ThunkInfo::new("cc"),
            "scale",
            vec![BufferSlice::new(0, 0, 3)],
            vec![BufferSlice::new(1, 0, 3)],
        );
        thunk.execute(&params).wait().expect("custom call");
        assert_eq!(buffers.snapshot()[1], vec![3, 6, 9]);

        let ordinal = CustomCallThunk::new(
            ThunkInfo::new("cc2"),
            "ordinal",
            vec![],
            vec![BufferSlice::new(1, 0, 1)],
        );
        ordinal.execute(&params).wait().expect("ordinal");
        assert_eq!(buffers.snapshot()[1][0], 2);
    }

    #[test]
    fn handler_failure_is_execution_error() {
        let buffers = Arc::new(BufferAllocations::with_sizes(&[1]));
        let thunk = CustomCallThunk::new(ThunkInfo::new("cc"), "broken", vec![], vec![]);
        let event = thunk.execute(&params(registry(), buffers));
        let err = event.error().expect("failed");
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.message(), Some("custom call 'broken' failed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn unknown_target_is_lookup_error() {
        let buffers = Arc::new(BufferAllocations::with_sizes(&[1]));
        let thunk = CustomCallThunk::new(ThunkInfo::new("cc"), "nope", vec![], vec![]);
        let event = thunk.execute(&params(registry(), buffers));
        assert_eq!(event.error().map(Error::kind), Some(ErrorKind::Lookup));
    }

    #[test]
    fn global_registry_is_shared() {
        CustomCallRegistry::global().register("global_noop_for_test", |_: &CustomCallFrame<'_>| Ok(()));
        assert!(CustomCallRegistry::global()
            .find("global_noop_for_test")
            .is_ok());
    }
}
