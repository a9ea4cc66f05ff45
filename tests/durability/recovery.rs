//! Crash Recovery Tests
//!
//! A crash is simulated by forgetting the engine: no final commit, no data
//! file flush, no lsn update. Data files are then zeroed on disk so only the
//! journal can bring the writes back.

use crate::common::*;

// ============================================================================
// Replay
// ============================================================================

#[test]
fn committed_writes_survive_a_crash() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"first");
        engine.run_commit_cycle().unwrap();
        write(&engine, file, 8192, b"second");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(test_config(dir.path()));
    let recovery = engine.recovery();
    assert_eq!(recovery.sections_replayed, 2);
    assert_eq!(recovery.last_seq, 2);
    assert!(!recovery.has_issues());
    assert_eq!(read_shared(&engine, "d.0", 0, 5), b"first".to_vec());
    assert_eq!(read_shared(&engine, "d.0", 8192, 6), b"second".to_vec());
}

#[test]
fn uncommitted_writes_are_lost() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        engine.run_commit_cycle().unwrap();
        write(&engine, file, 0, b"never journaled");
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(test_config(dir.path()));
    assert_eq!(engine.recovery().sections_replayed, 1);
    assert_eq!(read_shared(&engine, "d.0", 0, 15), vec![0u8; 15]);
}

#[test]
fn recovery_recreates_missing_data_file() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.1");
        write(&engine, file, 100, b"recreated");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    std::fs::remove_file(dir.path().join("d.1")).unwrap();

    let engine = open_engine(test_config(dir.path()));
    assert_eq!(engine.recovery().ops_replayed, 1);
    assert_eq!(read_shared(&engine, "d.1", 100, 9), b"recreated".to_vec());
}

#[test]
fn compressed_sections_replay() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.compress = true;
    {
        let engine = open_engine(config.clone());
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, &[b'z'; 4000]);
        engine.run_commit_cycle().unwrap();
        let totals = engine.stats_totals();
        assert!(totals.journaled_bytes <= totals.uncompressed_bytes);
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(config);
    assert_eq!(read_shared(&engine, "d.0", 0, 4000), vec![b'z'; 4000]);
}

#[test]
fn uncompressed_sections_replay() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.compress = false;
    {
        let engine = open_engine(config.clone());
        let file = create_file(&engine, "d.0");
        write(&engine, file, 10, b"plain");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(config);
    assert_eq!(read_shared(&engine, "d.0", 10, 5), b"plain".to_vec());
}

// ============================================================================
// Torn Tail
// ============================================================================

#[test]
fn truncated_last_section_is_discarded() {
    let dir = TempDir::new().unwrap();
    let journal_dir = test_config(dir.path()).journal_dir();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"kept");
        engine.run_commit_cycle().unwrap();
        write(&engine, file, 4096, b"torn");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    let files = journal_files(&journal_dir).unwrap();
    let (_, last) = files.last().unwrap();
    let len = std::fs::metadata(last).unwrap().len();
    let f = std::fs::OpenOptions::new().write(true).open(last).unwrap();
    f.set_len(len - 8192 + 16).unwrap();
    drop(f);
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(test_config(dir.path()));
    let recovery = engine.recovery();
    assert_eq!(recovery.sections_replayed, 1);
    assert!(recovery.discarded_tail);
    assert!(recovery.has_issues());
    assert_eq!(recovery.last_seq, 1);
    assert_eq!(read_shared(&engine, "d.0", 0, 4), b"kept".to_vec());
    assert_eq!(read_shared(&engine, "d.0", 4096, 4), vec![0u8; 4]);
}

#[test]
fn sequence_continues_after_discarded_tail() {
    let dir = TempDir::new().unwrap();
    let journal_dir = test_config(dir.path()).journal_dir();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"a");
        engine.run_commit_cycle().unwrap();
        write(&engine, file, 1, b"b");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    let files = journal_files(&journal_dir).unwrap();
    let (_, last) = files.last().unwrap();
    let len = std::fs::metadata(last).unwrap().len();
    let f = std::fs::OpenOptions::new().write(true).open(last).unwrap();
    f.set_len(len - 100).unwrap();
    drop(f);

    {
        let engine = open_engine(test_config(dir.path()));
        let file = engine.open_file("d.0").unwrap().id();
        write(&engine, file, 2, b"c");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    let engine = open_engine(test_config(dir.path()));
    assert_eq!(engine.recovery().sections_replayed, 1);
    assert_eq!(read_shared(&engine, "d.0", 2, 1), b"c".to_vec());
}

#[test]
fn corrupt_section_before_the_tail_fails_recovery() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.compress = false;
    let journal_dir = config.journal_dir();
    {
        let engine = open_engine(config.clone());
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"one");
        engine.run_commit_cycle().unwrap();
        write(&engine, file, 20, b"two");
        engine.run_commit_cycle().unwrap();
        write(&engine, file, 40, b"three");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    let files = journal_files(&journal_dir).unwrap();
    assert_eq!(files.len(), 1);
    let (_, last) = &files[0];
    let mut bytes = std::fs::read(last).unwrap();
    assert_eq!(bytes.len(), 4 * 8192);
    // payload of the second section
    bytes[2 * 8192 + 40] ^= 0xff;
    std::fs::write(last, bytes).unwrap();

    init_tracing();
    let err = DurabilityEngine::open(config.clone()).err().expect("recovery must fail");
    assert!(err.is_corruption());
    // the journal is left in place for inspection
    assert_eq!(journal_files(&journal_dir).unwrap().len(), 1);
}

// ============================================================================
// Idempotence and LSN
// ============================================================================

#[test]
fn recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"once");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }
    wipe_data_file(dir.path(), "d.0");

    {
        let engine = open_engine(test_config(dir.path()));
        assert_eq!(engine.recovery().sections_replayed, 1);
        crash(engine);
    }

    let engine = open_engine(test_config(dir.path()));
    assert_eq!(engine.recovery().sections_replayed, 0);
    assert_eq!(engine.recovery().lsn_at_start, Some(1));
    assert_eq!(read_shared(&engine, "d.0", 0, 4), b"once".to_vec());
}

#[test]
fn clean_shutdown_leaves_nothing_to_replay() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"clean");
        engine.shutdown().unwrap();
    }

    let engine = open_engine(test_config(dir.path()));
    let recovery = engine.recovery();
    assert_eq!(recovery.sections_replayed, 0);
    assert_eq!(recovery.sections_skipped, 1);
    assert_eq!(read_shared(&engine, "d.0", 0, 5), b"clean".to_vec());
}

#[test]
fn sections_at_or_below_lsn_are_skipped() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(test_config(dir.path()));
        let file = create_file(&engine, "d.0");
        write(&engine, file, 0, b"flushed");
        engine.run_commit_cycle().unwrap();
        assert_eq!(engine.flush_data_files().unwrap(), 1);
        write(&engine, file, 100, b"journaled");
        engine.run_commit_cycle().unwrap();
        crash(engine);
    }

    let engine = open_engine(test_config(dir.path()));
    let recovery = engine.recovery();
    assert_eq!(recovery.lsn_at_start, Some(1));
    assert_eq!(recovery.sections_replayed, 1);
    assert_eq!(read_shared(&engine, "d.0", 100, 9), b"journaled".to_vec());
}
