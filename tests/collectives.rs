//! Multi-participant programs driven through the executor.
//!
//! Each replica runs its own copy of the program on its own thread with its
//! own arena, as a multi-device host would. Participants meet in the shared
//! in-process collectives transport.

#[macro_use]
mod common;

use common::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thunkrt::collective::DeviceAssignment;
use thunkrt::resource::{Resource, ResourceKind};
use thunkrt::thunks::{CollectiveOp, CollectiveOpParams, CollectiveThunk, ReplicaIdThunk};
use thunkrt::{
    BufferAllocations, BufferSlice, ErrorKind, ExecuteParams, ExecutorConfig, InProcessCollectives,
    PrimitiveType, ReductionKind, Result, RunId, RunOptions, ThunkExecutor, ThunkInfo,
    ThunkSequence,
};

fn s32_values(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// slot 0: replica id, slot 1: sum of ids, slot 2: every id gathered.
fn replica_program(replicas: usize) -> Result<ThunkSequence> {
    let communicator = Resource::create(ResourceKind::CollectiveCommunicator);
    let id = BufferSlice::new(0, 0, 4);
    let mut seq = ThunkSequence::empty();
    seq.push(ReplicaIdThunk::new(ThunkInfo::new("replica-id"), id));
    seq.push(CollectiveThunk::new(
        ThunkInfo::new("all-reduce"),
        CollectiveOp::AllReduce {
            reduction: ReductionKind::Sum,
            dtype: PrimitiveType::S32,
        },
        CollectiveOpParams::new(1, Vec::new()),
        id,
        BufferSlice::new(1, 0, 4),
        &communicator,
    )?);
    seq.push(CollectiveThunk::new(
        ThunkInfo::new("all-gather"),
        CollectiveOp::AllGather,
        CollectiveOpParams::new(2, Vec::new()),
        id,
        BufferSlice::new(2, 0, 4 * replicas),
        &communicator,
    )?);
    Ok(seq)
}

fn run_replica(
    replica: usize,
    replicas: usize,
    run_id: RunId,
    assignment: &Arc<DeviceAssignment>,
    collectives: &Arc<InProcessCollectives>,
) -> Result<Vec<Vec<u8>>> {
    let program = replica_program(replicas)?;
    let options = RunOptions::new()
        .with_device_ordinal(i32::try_from(replica).expect("ordinal"))
        .with_run_id(run_id)
        .with_device_assignment(Arc::clone(assignment))
        .with_collectives(Arc::clone(collectives) as Arc<dyn thunkrt::CollectivesInterface>);
    let buffers = Arc::new(BufferAllocations::with_sizes(&[4, 4, 4 * replicas]));
    let params = ExecuteParams::for_program(&options, &program, Arc::clone(&buffers))?;
    ThunkExecutor::new(program).execute(&params).wait()?;
    Ok(buffers.snapshot())
}

#[test]
fn replicas_reduce_and_gather_their_ids() {
    init_test_logging();
    test_phase!("replicas_reduce_and_gather_their_ids");
    const REPLICAS: usize = 4;
    let assignment = Arc::new(DeviceAssignment::replicated(REPLICAS).expect("assignment"));
    let collectives = Arc::new(InProcessCollectives::new(
        &ExecutorConfig::default().rendezvous_timeout(Duration::from_secs(10)),
    ));
    let run_id = RunId::new();

    let handles: Vec<_> = (0..REPLICAS)
        .map(|replica| {
            let assignment = Arc::clone(&assignment);
            let collectives = Arc::clone(&collectives);
            thread::spawn(move || run_replica(replica, REPLICAS, run_id, &assignment, &collectives))
        })
        .collect();

    for (replica, handle) in handles.into_iter().enumerate() {
        let arena = handle.join().expect("replica thread").expect("replica run");
        test_section!(format!("replica {replica}"));
        assert_eq!(s32_values(&arena[0]), vec![replica as i32]);
        assert_eq!(s32_values(&arena[1]), vec![6]);
        assert_eq!(s32_values(&arena[2]), vec![0, 1, 2, 3]);
    }
    test_complete!("replicas_reduce_and_gather_their_ids", replicas = REPLICAS);
}

#[test]
fn concurrent_runs_do_not_mix() {
    init_test_logging();
    const REPLICAS: usize = 2;
    let assignment = Arc::new(DeviceAssignment::replicated(REPLICAS).expect("assignment"));
    let collectives = Arc::new(InProcessCollectives::default());
    let runs = [RunId::new(), RunId::new(), RunId::new()];

    let handles: Vec<_> = runs
        .iter()
        .flat_map(|&run_id| (0..REPLICAS).map(move |replica| (run_id, replica)))
        .map(|(run_id, replica)| {
            let assignment = Arc::clone(&assignment);
            let collectives = Arc::clone(&collectives);
            thread::spawn(move || run_replica(replica, REPLICAS, run_id, &assignment, &collectives))
        })
        .collect();

    for handle in handles {
        let arena = handle.join().expect("thread").expect("run");
        assert_eq!(s32_values(&arena[1]), vec![1]);
        assert_eq!(s32_values(&arena[2]), vec![0, 1]);
    }
}

#[test]
fn missing_participant_times_out_with_attribution() {
    init_test_logging();
    test_phase!("missing_participant_times_out_with_attribution");
    let assignment = Arc::new(DeviceAssignment::replicated(2).expect("assignment"));
    let collectives = Arc::new(InProcessCollectives::new(
        &ExecutorConfig::default()
            .rendezvous_timeout(Duration::from_millis(100))
            .rendezvous_warn_after(Duration::from_millis(50)),
    ));
    let err = run_replica(0, 2, RunId::new(), &assignment, &collectives)
        .expect_err("second replica never arrives");
    assert_with_log!(
        err.kind() == ErrorKind::RendezvousTimeout,
        "error kind",
        ErrorKind::RendezvousTimeout,
        err.kind()
    );
    assert_eq!(err.context().op_name.as_deref(), Some("all-reduce"));
    test_complete!("missing_participant_times_out_with_attribution");
}

#[test]
fn missing_collective_context_is_configuration_error() {
    let program = replica_program(2).expect("program");
    let buffers = Arc::new(BufferAllocations::with_sizes(&[4, 4, 8]));
    let err = ExecuteParams::for_program(&RunOptions::new(), &program, buffers)
        .expect_err("no device assignment");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
