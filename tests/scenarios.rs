//! End-to-end scenarios driving a fully wired [`tablefate::Fte`] against
//! the builtin `AllocateId -> WriteRecord -> Publish -> done` step chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tablefate::env::MockEnv;
use tablefate::id::InstanceType;
use tablefate::status::TxStatus;
use tablefate::step::AllocateId;
use tablefate::{Env, Fte, FateOp, Key, StepPayload};

fn open_fte(dir: &std::path::Path, env: Arc<MockEnv>, threadpool_size: usize) -> Fte {
    Fte::builder(dir).env(env).threadpool_size(threadpool_size).build().unwrap()
}

/// Happy path: every step's `call` runs exactly once, nothing is undone,
/// and the transaction reaches `SUCCESSFUL`.
#[test]
fn happy_path_runs_every_step_once_and_undoes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnv::new());
    let fte = open_fte(dir.path(), env.clone(), 2);

    let id = fte
        .seed(
            InstanceType::User,
            Key::new("table", "happy"),
            FateOp::CreateTable,
            StepPayload::AllocateId(AllocateId::new("happy")),
        )
        .unwrap();

    let status = fte.admin().wait_for_completion(id, Duration::from_secs(5));
    assert_eq!(status, TxStatus::Successful);

    assert_eq!(env.call_count("allocate_id"), 1);
    assert_eq!(env.call_count("write_record"), 1);
    assert_eq!(env.call_count("publish"), 1);
    assert_eq!(env.undo_count("allocate_id"), 0);
    assert_eq!(env.undo_count("write_record"), 0);
    assert_eq!(env.undo_count("publish"), 0);
}

/// A step whose `ready` defers once causes the worker to release the
/// reservation and re-offer the transaction no earlier than the deferred
/// duration; `call` still runs exactly once overall.
#[test]
fn a_one_shot_defer_delays_but_does_not_duplicate_the_call() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnv::new());
    env.schedule_defer("allocate_id", 250);
    let fte = open_fte(dir.path(), env.clone(), 2);

    let start = Instant::now();
    let id = fte
        .seed(
            InstanceType::User,
            Key::new("table", "deferred"),
            FateOp::CreateTable,
            StepPayload::AllocateId(AllocateId::new("deferred")),
        )
        .unwrap();

    let status = fte.admin().wait_for_completion(id, Duration::from_secs(5));
    assert_eq!(status, TxStatus::Successful);
    assert!(start.elapsed() >= Duration::from_millis(250), "completed before the deferred duration elapsed");
    assert_eq!(env.call_count("allocate_id"), 1);
}

/// The middle step of a three-step chain fails after being pushed. `A` and
/// `B` (the failing step itself) are undone exactly once each; `C`, never
/// pushed, is never undone.
#[test]
fn failure_mid_chain_undoes_the_failing_step_and_its_predecessor_only() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnv::new());
    env.arm_failure("write_record");
    let fte = open_fte(dir.path(), env.clone(), 2);

    let id = fte
        .seed(
            InstanceType::User,
            Key::new("table", "mid-failure"),
            FateOp::CreateTable,
            StepPayload::AllocateId(AllocateId::new("mid-failure")),
        )
        .unwrap();

    let status = fte.admin().wait_for_completion(id, Duration::from_secs(5));
    assert_eq!(status, TxStatus::Failed);

    assert_eq!(env.undo_count("allocate_id"), 1);
    assert_eq!(env.undo_count("write_record"), 1);
    assert_eq!(env.undo_count("publish"), 0);

    let exception = fte.admin().fetch_exception(id).unwrap();
    assert!(exception.is_some());
}

/// Cancelling a transaction still sitting in `SUBMITTED` succeeds, records
/// a "cancelled by user" exception, and the transaction still reaches the
/// terminal `FAILED` status once a worker runs its (empty-effect) undo
/// path.
#[test]
fn cancel_while_submitted_reaches_failed_with_a_cancellation_exception() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnv::new());
    // Hold the transaction in SUBMITTED for long enough that `cancel` wins
    // the race against the worker's own progress.
    env.schedule_defer("allocate_id", 10_000);
    let fte = open_fte(dir.path(), env.clone(), 1);

    let id = fte
        .seed(
            InstanceType::User,
            Key::new("table", "cancel-race"),
            FateOp::CreateTable,
            StepPayload::AllocateId(AllocateId::new("cancel-race")),
        )
        .unwrap();

    assert!(fte.admin().cancel(id).unwrap(), "cancel should succeed while still SUBMITTED");

    let status = fte.admin().wait_for_completion(id, Duration::from_secs(5));
    assert_eq!(status, TxStatus::Failed);
    assert_eq!(fte.admin().fetch_exception(id).unwrap().as_deref(), Some("cancelled by user"));
    assert_eq!(env.call_count("allocate_id"), 0, "a cancelled step must never run its call");
}

/// A step failure observed while the host process is shutting down must
/// not burn the transaction into `FAILED_IN_PROGRESS`: the worker leaves
/// the reservation held so the transaction resumes once some manager is
/// alive again.
#[test]
fn a_step_failure_during_shutdown_is_suppressed_rather_than_failed() {
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(MockEnv::new());
    env.arm_failure("allocate_id");
    env.set_shutting_down(true);
    let fte = open_fte(dir.path(), env.clone(), 1);

    let id = fte
        .seed(
            InstanceType::User,
            Key::new("table", "shutdown-suppression"),
            FateOp::CreateTable,
            StepPayload::AllocateId(AllocateId::new("shutdown-suppression")),
        )
        .unwrap();

    // No terminal status is ever reached while the host reports itself as
    // shutting down; `wait_for_completion` times out and reports whatever
    // status the transaction was last left in.
    let status = fte.admin().wait_for_completion(id, Duration::from_millis(500));
    assert!(!status.is_terminal(), "a suppressed failure must not reach a terminal status");
    assert_ne!(status, TxStatus::FailedInProgress);
}
