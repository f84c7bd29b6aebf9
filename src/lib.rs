//! # rs-salvage
//!
//! Forensic data capture from a live rescue environment.
//!
//! The tool discovers block devices on the host, activates composite storage
//! layers (md-RAID, LVM, ZFS) read-only, mounts candidate filesystems with
//! defensive options, streams each volume through compression and integrity
//! hashing into fixed-size chunks, and ships the chunks to a remote archival
//! target with resumable semantics.
//!
//! The safety contract is one-way: no write ever reaches the source media,
//! and no cryptographic material is ever forced. Encrypted volumes are
//! detected and skipped, the device backing the running root is excluded,
//! and every mount is read-only with `nodev,nosuid,noexec`.
//!
//! ## Module Organization
//!
//! - [`cli`]: command-line interface
//! - [`config`]: TOML configuration schema and loading
//! - [`bundle`]: portable-bundle PATH overlay
//! - [`exec`]: uniform child-process execution with dry-run support
//! - [`devices`]: topology inspection, layer activation, volume enumeration
//! - [`mount`]: per-filesystem read-only mount recipes with scoped release
//! - [`archive`]: tar streaming and the compress/hash/split pipeline
//! - [`shipper`]: resumable SFTP transfer of chunk directories
//! - [`orchestrator`]: the bounded worker pool driving the run
//! - [`models`]: volumes, chunks, manifests, run records
//! - [`utils`]: hashing, host token derivation, filesystem helpers
//! - [`constants`]: application-wide tuning values

pub mod archive;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod constants;
pub mod devices;
pub mod exec;
pub mod models;
pub mod mount;
pub mod orchestrator;
pub mod shipper;
pub mod utils;
