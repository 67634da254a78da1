//! Crash recovery: stop one `Fte` mid-transaction, reopen a second `Fte`
//! against the same data directory, and confirm the resumed transaction
//! finishes without re-running the steps that had already completed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tablefate::env::MockEnv;
use tablefate::id::InstanceType;
use tablefate::status::TxStatus;
use tablefate::step::AllocateId;
use tablefate::{Env, Fte, FateOp, Key, StepPayload};

/// Seeds a three-step chain (`AllocateId -> WriteRecord -> Publish`) and
/// arms a long defer on the last step, so the first `Fte` durably pushes
/// and runs the first two steps, then parks indefinitely on the third
/// without ever reaching a terminal status. Dropping that `Fte` simulates
/// a crash after exactly that much durable progress.
#[test]
fn a_transaction_paused_mid_chain_resumes_from_its_stack_top_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    // Shared across both `Fte` instances: represents the external system
    // state (table-mapping registry) surviving the process restart, not
    // in-process state that would vanish with it.
    let env: Arc<MockEnv> = Arc::new(MockEnv::new());
    env.schedule_defer("publish", 60_000);

    let id = {
        let fte = Fte::builder(dir.path()).env(env.clone()).threadpool_size(1).build().unwrap();

        let id = fte
            .seed(
                InstanceType::User,
                Key::new("table", "crash-recovery"),
                FateOp::CreateTable,
                StepPayload::AllocateId(AllocateId::new("crash-recovery")),
            )
            .unwrap();

        // Wait until the transaction has made it as far as it durably
        // can: parked on `publish`, still IN_PROGRESS.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "transaction never reached the parked publish step");
            if env.call_count("write_record") >= 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fte.admin().status(id), TxStatus::InProgress);
        id
        // `fte` drops here: every background thread stops and joins,
        // simulating a process restart against the same data directory.
    };

    assert_eq!(env.call_count("allocate_id"), 1);
    assert_eq!(env.call_count("write_record"), 1);
    assert_eq!(env.call_count("publish"), 0);

    let fte = Fte::builder(dir.path()).env(env.clone()).threadpool_size(1).build().unwrap();
    let status = fte.admin().wait_for_completion(id, Duration::from_secs(5));
    assert_eq!(status, TxStatus::Successful);

    // The already-completed steps were never re-invoked; only the step
    // that was still pending when the first process stopped ran, exactly
    // once, after the restart.
    assert_eq!(env.call_count("allocate_id"), 1);
    assert_eq!(env.call_count("write_record"), 1);
    assert_eq!(env.call_count("publish"), 1);
}

/// Reopening a store with no in-flight transactions is a no-op: nothing
/// is spuriously created or marked runnable.
#[test]
fn reopening_an_idle_store_surfaces_no_spurious_work() {
    let dir = tempfile::tempdir().unwrap();
    {
        let fte = Fte::builder(dir.path()).threadpool_size(1).build().unwrap();
        let _ = fte.store().list(None);
    }
    let fte = Fte::builder(dir.path()).threadpool_size(1).build().unwrap();
    assert!(fte.store().list(None).is_empty());
}
