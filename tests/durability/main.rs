//! Durability Integration Tests
//!
//! End-to-end tests for mmjournal: group commit, early commit, remapping,
//! crash recovery and concurrent writers.

mod common;

mod commit;
mod concurrency;
mod recovery;
