//! # CaseForge
//!
//! Transactional data-source ingestion engine for forensic case databases.
//! Takes a forensic acquisition (a disk image, a set of device output files,
//! or a memory image) and registers it as a queryable data source inside a
//! case database, reporting progress while the add runs, tolerating partial
//! failure, and honoring cooperative cancellation.

pub mod casedb;
pub mod cli;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod postproc;
pub mod progress;
pub mod types;
