//! Group Commit Tests

use crate::common::*;

// ============================================================================
// Basic Commit
// ============================================================================

#[test]
fn three_intents_commit_in_one_cycle() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.uncommitted_bytes_limit = 1000;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    write(&engine, file, 0, &[1u8; 100]);
    write(&engine, file, 4096, &[2u8; 100]);
    write(&engine, file, 8192, &[3u8; 100]);
    assert_eq!(engine.bytes(), 300);
    assert!(!engine.is_commit_needed());

    let epoch = engine.commit_epoch();
    engine.run_commit_cycle().unwrap();

    assert_eq!(engine.commit_epoch(), epoch + 1);
    assert_eq!(engine.bytes(), 0);
    assert_eq!(read_shared(&engine, "d.0", 4096, 100), vec![2u8; 100]);
    assert_eq!(read_shared(&engine, "d.0", 8192, 100), vec![3u8; 100]);

    let totals = engine.stats_totals();
    assert_eq!(totals.commits, 1);
    assert!(totals.journaled_bytes > 0);
    assert_eq!(totals.write_to_data_files_bytes, 300);
}

#[test]
fn undeclared_write_stays_private() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(test_config(dir.path()));
    let file = create_file(&engine, "d.0");

    let mapped = engine.registry().get(file).unwrap();
    mapped.write_private(100, b"sneaky").unwrap();
    engine.run_commit_cycle().unwrap();

    assert_eq!(read_shared(&engine, "d.0", 100, 6), vec![0u8; 6]);
    assert_eq!(mapped.read_private(100, 6).unwrap(), b"sneaky".to_vec());
}

#[test]
fn paranoid_check_accepts_declared_writes() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.paranoid_checks = true;
    config.always_remap = true;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    write(&engine, file, 512, b"checked");
    engine.run_commit_cycle().unwrap();

    assert!(!engine.has_failed());
    assert_eq!(read_shared(&engine, "d.0", 512, 7), b"checked".to_vec());
}

#[test]
fn paranoid_check_catches_undeclared_write() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.paranoid_checks = true;
    config.always_remap = true;
    let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let f = failures.clone();
    let engine = DurabilityEngine::builder(config)
        .fatal_handler(Box::new(move |_| {
            f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }))
        .open()
        .unwrap();
    let file = create_file(&engine, "d.0");

    write(&engine, file, 0, b"declared");
    engine
        .registry()
        .get(file)
        .unwrap()
        .write_private(1024, b"undeclared")
        .unwrap();

    assert!(engine.run_commit_cycle().is_err());
    assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(engine.has_failed());
}

// ============================================================================
// Early Commit
// ============================================================================

#[test]
fn budget_overrun_under_write_lock_commits_inline() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.uncommitted_bytes_limit = 100;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    let ctx = engine.context();
    let _w = ctx.lock(LockMode::ExclusiveWrite).unwrap();
    engine.write_bytes(&ctx, file, 0, &[9u8; 150]).unwrap();
    assert!(engine.is_commit_needed());

    assert!(engine.commit_if_needed(&ctx, false).unwrap());
    assert_eq!(engine.bytes(), 0);
    assert_eq!(engine.stats_totals().commits_in_write_lock, 1);
}

#[test]
fn budget_overrun_from_unlocked_acquires_and_commits() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.uncommitted_bytes_limit = 100;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    let ctx = engine.context();
    assert!(!engine.commit_if_needed(&ctx, false).unwrap());

    write(&engine, file, 0, &[9u8; 150]);
    assert!(engine.commit_if_needed(&ctx, false).unwrap());
    assert!(!ctx.lock_state().is_locked());
    assert_eq!(engine.bytes(), 0);
    assert_eq!(read_shared(&engine, "d.0", 0, 150), vec![9u8; 150]);
}

#[test]
fn shared_read_holder_never_commits() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.uncommitted_bytes_limit = 100;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");
    write(&engine, file, 0, &[9u8; 150]);

    let ctx = engine.context();
    let _r = ctx.lock(LockMode::SharedRead).unwrap();
    assert!(!engine.commit_if_needed(&ctx, true).unwrap());
    assert_eq!(engine.bytes(), 150);
}

// ============================================================================
// Remapping
// ============================================================================

#[test]
fn every_tenth_cycle_remaps() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.remap_every_n = 10;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    for i in 0..20u64 {
        write(&engine, file, i * 64, &[i as u8; 64]);
        engine.run_commit_cycle().unwrap();
    }
    assert_eq!(engine.cycles(), 20);
    assert_eq!(engine.stats_totals().remap_sweeps, 2);
    assert_eq!(engine.stats_totals().commits, 20);
}

#[test]
fn private_view_matches_shared_after_remap() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.always_remap = true;
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    write(&engine, file, 2048, b"remapped");
    engine.run_commit_cycle().unwrap();

    let mapped = engine.registry().get(file).unwrap();
    assert!(!mapped.will_need_remap());
    assert_eq!(mapped.read_private(2048, 8).unwrap(), b"remapped".to_vec());
    assert!(mapped.views_mismatch().is_none());
}

// ============================================================================
// Sync and Truncate
// ============================================================================

#[test]
fn sync_and_truncate_empties_the_journal() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let journal_dir = config.journal_dir();
    let engine = open_engine(config);
    let file = create_file(&engine, "d.0");

    for i in 0..3u64 {
        write(&engine, file, i * 100, b"x");
        engine.run_commit_cycle().unwrap();
    }
    let ctx = engine.context();
    let _w = ctx.lock(LockMode::ExclusiveWrite).unwrap();
    engine.sync_data_and_truncate_journal(&ctx).unwrap();

    let files = journal_files(&journal_dir).unwrap();
    assert_eq!(files.len(), 1);
    let len = std::fs::metadata(&files[0].1).unwrap().len();
    assert_eq!(len, 8192);
}
