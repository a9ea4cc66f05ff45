//! Durability layer for mmjournal
//!
//! This crate turns captured write intents into durable journal sections and
//! back:
//! - prep: serialize a commit cycle's intents into one journal section
//! - journal: append sections to `j._N` files, fsync, rotate
//! - data_files: apply a prepared section to the shared views
//! - lsn: last sequence number known to be in the data files
//! - recovery: replay unapplied sections at startup

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data_files;
pub mod journal;
pub mod lsn;
pub mod prep;
pub mod recovery;

pub use data_files::{ApplyStats, DataFileWriter};
pub use journal::{journal_files, JournalWriteStats, JournalWriter};
pub use lsn::LsnFile;
pub use prep::{prepare_section, raw_payload, PreparedSection};
pub use recovery::{RecoveryReplayer, RecoveryResult};
