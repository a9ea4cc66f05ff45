//! Storage layer for mmjournal
//!
//! This crate owns everything that touches mapped memory or defines bytes on
//! disk:
//! - DurableMappedFile: a data file with a private (copy-on-write) view and a
//!   shared view
//! - MappedFileRegistry: the set of open files, behind the files lock
//! - AlignedBuilder: the reusable, block-aligned section buffer
//! - format: journal file header, section header/footer, entries, LSN file

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aligned;
pub mod format;
pub mod mapped_file;
pub mod registry;

pub use aligned::{AlignedBuilder, ALIGNMENT};
pub use mapped_file::DurableMappedFile;
pub use registry::{FilesExclusive, FilesShared, MappedFileRegistry};
