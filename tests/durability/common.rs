//! Shared helpers for the durability tests.

#![allow(dead_code)]

pub use mmjournal::mmj_durability::journal_files;
pub use mmjournal::prelude::*;
pub use std::path::Path;
pub use std::sync::Arc;
pub use tempfile::TempDir;

pub const FILE_LEN: u64 = 64 * 1024;

pub fn test_config(dir: &Path) -> DurabilityConfig {
    let mut config = DurabilityConfig::new(dir);
    config.commit_interval_ms = 20;
    config.builder_capacity = 64 * 1024;
    config.max_journal_file_size = 1024 * 1024;
    config
}

/// Route engine logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open an engine whose fatal handler panics instead of aborting.
pub fn open_engine(config: DurabilityConfig) -> DurabilityEngine {
    init_tracing();
    DurabilityEngine::builder(config)
        .fatal_handler(Box::new(|e| panic!("fatal durability error: {}", e)))
        .open()
        .expect("open engine")
}

pub fn create_file(engine: &DurabilityEngine, name: &str) -> FileId {
    let ctx = engine.context();
    let _w = ctx.lock(LockMode::SharedWrite).unwrap();
    engine.created_file(&ctx, name, FILE_LEN).unwrap().id()
}

/// Declare and write `data` under a SharedWrite lock.
pub fn write(engine: &DurabilityEngine, file: FileId, offset: u64, data: &[u8]) {
    let ctx = engine.context();
    let _w = ctx.lock(LockMode::SharedWrite).unwrap();
    engine.write_bytes(&ctx, file, offset, data).unwrap();
}

pub fn read_shared(engine: &DurabilityEngine, name: &str, offset: u64, len: usize) -> Vec<u8> {
    engine
        .open_file(name)
        .unwrap()
        .read_shared(offset, len)
        .unwrap()
}

/// Leave the engine without a final commit or flush, as a crash would.
pub fn crash(engine: DurabilityEngine) {
    std::mem::forget(engine);
}

/// Zero a data file on disk, standing in for pages lost in the crash.
pub fn wipe_data_file(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), vec![0u8; FILE_LEN as usize]).unwrap();
}
