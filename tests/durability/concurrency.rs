//! Concurrency Tests
//!
//! Writers, the background thread and early commits running together.

use crate::common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const WRITERS: usize = 4;
const WRITES_PER_THREAD: usize = 50;

fn slot(writer: usize, i: usize) -> u64 {
    ((writer * WRITES_PER_THREAD + i) * 16) as u64
}

fn payload(writer: usize, i: usize) -> [u8; 8] {
    ((writer as u64) << 32 | i as u64).to_le_bytes()
}

// ============================================================================
// Concurrent Writers
// ============================================================================

#[test]
fn concurrent_writers_all_replay_after_crash() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Arc::new(open_engine(test_config(dir.path())));
        let file = create_file(&engine, "d.0");
        let stop = Arc::new(AtomicBool::new(false));

        let committer = {
            let engine = Arc::clone(&engine);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    engine.run_commit_cycle().unwrap();
                    thread::sleep(Duration::from_millis(2));
                }
            })
        };
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..WRITES_PER_THREAD {
                        write(&engine, file, slot(w, i), &payload(w, i));
                        if i % 10 == 0 {
                            let ctx = engine.context();
                            engine.commit_if_needed(&ctx, true).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        stop.store(true, Ordering::Release);
        committer.join().unwrap();
        engine.run_commit_cycle().unwrap();
        assert!(!engine.has_written());

        let engine = Arc::try_unwrap(engine).ok().unwrap();
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(test_config(dir.path()));
    assert!(engine.recovery().sections_replayed >= 1);
    for w in 0..WRITERS {
        for i in 0..WRITES_PER_THREAD {
            assert_eq!(
                read_shared(&engine, "d.0", slot(w, i), 8),
                payload(w, i).to_vec(),
                "writer {} write {}",
                w,
                i
            );
        }
    }
}

#[test]
fn await_commit_returns_after_journal_write() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(test_config(dir.path())));
    let file = create_file(&engine, "d.0");
    engine.start().unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let engine = Arc::clone(&engine);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                write(&engine, file, slot(w, 0), &payload(w, 0));
                let epoch = engine.commit_epoch();
                engine.await_commit(&engine.context()).unwrap();
                assert!(engine.commit_epoch() > epoch);
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(done.load(Ordering::SeqCst), WRITERS);
    engine.shutdown().unwrap();
    assert!(!engine.has_written());
}

// ============================================================================
// Commit Exclusion
// ============================================================================

#[test]
fn at_most_one_committer() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(test_config(dir.path())));
    let file = create_file(&engine, "d.0");

    // manual cycles and early commits race; journal sequence numbers must
    // stay strictly increasing, which recovery verifies
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..WRITES_PER_THREAD {
                    write(&engine, file, slot(w, i), &payload(w, i));
                    if w % 2 == 0 {
                        engine.run_commit_cycle().unwrap();
                    } else {
                        let ctx = engine.context();
                        engine.commit_if_needed(&ctx, true).unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(!engine.has_written());
    let commits = engine.stats_totals().commits;
    assert!(commits >= 1);

    let engine = Arc::try_unwrap(engine).ok().unwrap();
    crash(engine);
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(test_config(dir.path()));
    assert_eq!(engine.recovery().sections_replayed, commits);
    assert_eq!(read_shared(&engine, "d.0", slot(3, 49), 8), payload(3, 49).to_vec());
}

#[test]
fn writers_block_while_commit_holds_exclusive_read() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(test_config(dir.path())));
    let file = create_file(&engine, "d.0");
    engine.run_commit_cycle().unwrap();

    let ctx = engine.context();
    let guard = ctx.lock(LockMode::ExclusiveRead).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || write(&engine, file, 0, b"late"))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!writer.is_finished());
    assert!(!engine.has_written());

    engine.commit_now(&ctx).unwrap();
    drop(guard);
    writer.join().unwrap();
    assert_eq!(engine.bytes(), 4);
}
