//! flimpix-io: Memory-mapped PTU/PT3 container I/O.
//!
//! This crate opens PicoQuant TTTR container files, parses their headers
//! into an [`AcquisitionConfig`](flimpix_core::AcquisitionConfig), and hands
//! the mapped record section to the reconstruction pipeline.
//!
//! # Key Components
//!
//! - [`MappedFileReader`] - Low-level memory-mapped file access
//! - [`parse_header`] - PTU tag walk and PT3 fixed-layout parsing
//! - [`TttrFile`] - An opened file: config, metadata blob and records

mod error;
pub mod header;
mod reader;

pub use error::{Error, Result};
pub use header::{parse_header, parse_pt3_header, parse_ptu_header, FileHeader};
pub use reader::{MappedFileReader, TttrFile};
